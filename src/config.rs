/// Configuration as written on disk: built-in defaults, the user's YAML file,
/// and `SHIPCTL_*` environment overrides, merged in that order.
pub mod file {
    use serde::Deserialize;
    use serde_inline_default::serde_inline_default;
    use serde_yaml::{Mapping, Value};
    use std::path::{Path, PathBuf};
    use thiserror::Error;

    const DEFAULT_CONFIG: &str = include_str!("../default.yaml");

    pub const ENV_PREFIX: &str = "SHIPCTL_";

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("read {path}: {err}")]
        ReadFile { err: std::io::Error, path: PathBuf },

        #[error("parse: {0}")]
        Parse(#[from] serde_yaml::Error),
    }

    /// A .shipctl.yaml file.
    #[derive(Deserialize, Debug, Clone)]
    pub struct File {
        pub description: Option<String>,
        #[serde(default)]
        pub registry: Registry,
        #[serde(default)]
        pub git: Git,
        pub helm: Helm,
        pub notification: Notification,
        pub sdk: Sdk,
        /// Root directory for per-run workspaces.
        pub workspace: Option<PathBuf>,
    }

    impl Default for File {
        fn default() -> Self {
            // The default config is compiled into the program, so
            // make sure to test default() to catch panics compile-time.
            serde_yaml::from_str(DEFAULT_CONFIG).unwrap()
        }
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    pub struct Registry {
        #[serde(default)]
        pub url: String,
        pub username: Option<String>,
        pub password: Option<String>,
    }

    #[derive(Deserialize, Debug, Clone, Default)]
    #[serde(default)]
    pub struct Git {
        pub username: String,
        pub password: String,
        pub email: String,
        pub default_branch: String,
        pub domain: String,
        pub base_url: String,
        pub user_api_endpoint: String,
        pub repo_api_endpoint: String,
        pub access_token: String,
    }

    #[serde_inline_default]
    #[derive(Deserialize, Debug, Clone)]
    pub struct Helm {
        pub version: String,
        /// Full image reference; overrides `alpine/helm:<version>`.
        pub image: Option<String>,
        /// Repository holding one kubeconfig per cluster.
        #[serde_inline_default(String::from("k8s"))]
        pub credentials_repo: String,
    }

    #[serde_inline_default]
    #[derive(Deserialize, Debug, Clone)]
    pub struct Notification {
        #[serde(default)]
        pub from: String,
        pub url: String,
        #[serde(default)]
        pub server_token: String,
        #[serde_inline_default(String::from("outbound"))]
        pub message_stream: String,
    }

    #[derive(Deserialize, Debug, Clone)]
    pub struct Sdk {
        pub maven: SdkMaven,
        pub node: SdkNode,
    }

    #[derive(Deserialize, Debug, Clone)]
    pub struct SdkMaven {
        pub build_docker_image: String,
        pub runtime_docker_image: String,
    }

    #[derive(Deserialize, Debug, Clone)]
    pub struct SdkNode {
        pub build_docker_image: String,
        pub runtime_docker_image: String,
        pub output_directory: String,
    }

    impl File {
        /// Merge an optional user file and environment overrides on top of the defaults.
        pub fn load<I>(user_config_file: Option<&Path>, env: I) -> Result<Self, Error>
        where
            I: IntoIterator<Item = (String, String)>,
        {
            let mut document: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
            if let Some(path) = user_config_file {
                let data = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
                    err,
                    path: path.to_path_buf(),
                })?;
                merge(&mut document, serde_yaml::from_str(&data)?);
            }
            apply_env(&mut document, env);
            Ok(serde_yaml::from_value(document)?)
        }
    }

    fn merge(base: &mut Value, overlay: Value) {
        match (base, overlay) {
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, value) in overlay {
                    match base.get_mut(&key) {
                        Some(existing) => merge(existing, value),
                        None => {
                            base.insert(key, value);
                        }
                    }
                }
            }
            (_, Value::Null) => {}
            (base, overlay) => *base = overlay,
        }
    }

    /// `SHIPCTL_GIT_PASSWORD` sets `git.password`, `SHIPCTL_SDK_NODE_OUTPUT_DIRECTORY` sets
    /// `sdk.node.output_directory`, `SHIPCTL_WORKSPACE` sets `workspace`.
    fn apply_env<I>(document: &mut Value, env: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let Value::Mapping(root) = document else {
            return;
        };
        for (name, value) in env {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            set_path(root, &key.to_lowercase(), value);
        }
    }

    /// Descend into the existing section whose name prefixes `key`; the rest is the field.
    fn set_path(mapping: &mut Mapping, key: &str, value: String) {
        let section = mapping.iter().find_map(|(name, child)| {
            let name = name.as_str()?;
            let rest = key.strip_prefix(name)?.strip_prefix('_')?;
            matches!(child, Value::Mapping(_)).then(|| (name.to_string(), rest.to_string()))
        });
        match section {
            Some((name, rest)) => {
                if let Some(Value::Mapping(child)) = mapping.get_mut(name.as_str()) {
                    set_path(child, &rest, value);
                }
            }
            None => {
                mapping.insert(Value::from(key), Value::from(value));
            }
        }
    }

}

/// Validated configuration, built once at startup and handed to every stage.
pub mod runtime {
    use super::file;
    use std::path::PathBuf;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("missing configuration value `{0}`")]
        Missing(&'static str),
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Credentials {
        pub username: String,
        pub password: String,
    }

    #[derive(Debug, Clone)]
    pub struct Config {
        /// Registry base without scheme or trailing slash, e.g. `registry.example.org/team`.
        pub registry: String,
        registry_username: Option<String>,
        registry_password: Option<String>,
        pub git: file::Git,
        pub helm: file::Helm,
        pub notification: file::Notification,
        pub sdk: file::Sdk,
        pub workspace: PathBuf,
    }

    impl Config {
        pub fn new(cfg: &file::File) -> Self {
            let registry = cfg.registry.url.trim();
            let registry = registry
                .strip_prefix("https://")
                .or_else(|| registry.strip_prefix("http://"))
                .unwrap_or(registry)
                .trim_end_matches('/')
                .to_string();

            Self {
                registry,
                registry_username: cfg.registry.username.clone().filter(|s| !s.is_empty()),
                registry_password: cfg.registry.password.clone().filter(|s| !s.is_empty()),
                git: cfg.git.clone(),
                helm: cfg.helm.clone(),
                notification: cfg.notification.clone(),
                sdk: cfg.sdk.clone(),
                workspace: cfg
                    .workspace
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("shipctl")),
            }
        }

        pub fn registry(&self) -> Result<&str, Error> {
            require(&self.registry, "registry.url")
        }

        /// Host part of the registry, used for login and logout.
        pub fn registry_host(&self) -> Result<&str, Error> {
            let registry = self.registry()?;
            Ok(registry.split('/').next().unwrap_or(registry))
        }

        /// Registry credentials, falling back to the git credentials.
        pub fn registry_credentials(&self) -> Result<Credentials, Error> {
            match (&self.registry_username, &self.registry_password) {
                (Some(username), Some(password)) => Ok(Credentials {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => self.git_credentials(),
            }
        }

        pub fn git_credentials(&self) -> Result<Credentials, Error> {
            Ok(Credentials {
                username: require(&self.git.username, "git.username")?.to_string(),
                password: require(&self.git.password, "git.password")?.to_string(),
            })
        }

        pub fn git_domain(&self) -> Result<&str, Error> {
            require(&self.git.domain, "git.domain")
        }

        pub fn git_email(&self) -> Result<&str, Error> {
            require(&self.git.email, "git.email")
        }

        pub fn git_api_base(&self) -> Result<&str, Error> {
            require(&self.git.base_url, "git.base_url")
        }

        pub fn git_access_token(&self) -> Result<&str, Error> {
            require(&self.git.access_token, "git.access_token")
        }

        pub fn helm_image(&self) -> String {
            match &self.helm.image {
                Some(image) if !image.is_empty() => image.clone(),
                _ => format!("alpine/helm:{}", self.helm.version),
            }
        }

        pub fn notification_server_token(&self) -> Result<&str, Error> {
            require(&self.notification.server_token, "notification.server_token")
        }

        pub fn notification_from(&self) -> Result<&str, Error> {
            require(&self.notification.from, "notification.from")
        }
    }

    fn require<'a>(value: &'a str, key: &'static str) -> Result<&'a str, Error> {
        if value.trim().is_empty() {
            Err(Error::Missing(key))
        } else {
            Ok(value)
        }
    }

}
