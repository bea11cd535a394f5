//! Names derived from an application, a cluster and an environment.
use crate::config::runtime::Credentials;
use reqwest::Url;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("unknown cluster '{0}', expected k1 or k2")]
    UnknownCluster(String),

    #[error("no such environment: {0}")]
    UnknownEnvironment(String),

    #[error("invalid url '{0}'")]
    InvalidUrl(String),
}

/// Environments accepted as deployment targets and configuration branches.
pub const ENVIRONMENTS: [&str; 8] = [
    "development",
    "staging",
    "production",
    // Older configuration repositories use these branch names.
    "default",
    "prod",
    "preprod",
    "debug",
    "dev",
];

/// Name of the configuration repository holding the chart of `app_name` on `cluster`.
pub fn config_repo_name(app_name: &str, cluster: &str) -> String {
    format!("{app_name}-{cluster}")
}

/// Kubeconfig file name inside the cluster credentials repository.
pub fn cluster_credential_file(cluster: &str) -> Result<&'static str, Error> {
    match cluster {
        "k1" => Ok("k8sv1-admin.conf"),
        "k2" => Ok("k8sv2-admin.conf"),
        other => Err(Error::UnknownCluster(other.to_string())),
    }
}

/// Validation gate for environment names. Recognized names are returned unchanged.
pub fn resolve_environment(name: &str) -> Result<&str, Error> {
    if ENVIRONMENTS.contains(&name) {
        Ok(name)
    } else {
        Err(Error::UnknownEnvironment(name.to_string()))
    }
}

/// Application name from its repository URL: the last path segment without `.git`.
pub fn app_name(source_url: &str) -> Result<String, Error> {
    let invalid = || Error::InvalidUrl(source_url.to_string());
    let url = Url::parse(source_url).map_err(|_| invalid())?;
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(invalid)?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);
    if name.is_empty() {
        return Err(invalid());
    }
    Ok(name.to_string())
}

/// A git remote that may carry credentials.
///
/// `Display` and `Debug` mask the password; only [RemoteUrl::expose] reveals it.
#[derive(Clone, PartialEq)]
pub struct RemoteUrl(Url);

impl RemoteUrl {
    pub fn parse(url: &str) -> Result<Self, Error> {
        Url::parse(url)
            .map(RemoteUrl)
            .map_err(|_| Error::InvalidUrl(url.to_string()))
    }

    /// `https://<domain>/<owner>/<repository>`
    pub fn on_host(domain: &str, owner: &str, repository: &str) -> Result<Self, Error> {
        let domain = domain
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Self::parse(&format!("https://{domain}/{owner}/{repository}"))
    }

    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        // Only fails for URLs without a host, which cannot carry credentials anyway.
        let _ = self.0.set_username(&credentials.username);
        let _ = self.0.set_password(Some(&credentials.password));
        self
    }

    /// Full URL including any password. Never log this.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Password as it appears inside the URL (percent-encoded).
    pub fn password(&self) -> Option<&str> {
        self.0.password()
    }

    /// Last path segment, e.g. the repository name.
    pub fn repository(&self) -> Option<&str> {
        self.0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| s.strip_suffix(".git").unwrap_or(s))
    }
}

impl Display for RemoteUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut masked = self.0.clone();
        if masked.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        f.write_str(masked.as_str())
    }
}

impl Debug for RemoteUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteUrl({self})")
    }
}
