use crate::config::runtime::{Config, Credentials};
use crate::oci::ImageReference;
use crate::process::{Command, Error, Runner};
use crate::sdk::BuildArtifact;
use log::{debug, info, warn};
use std::path::Path;

/// `docker run --rm --volume <host_dir>:<mount> --workdir <mount> <image>`
///
/// Arguments appended to the returned command go to the image's entrypoint.
pub fn run(image: &str, host_dir: &Path, mount: &str) -> Command {
    Command::new("docker").args([
        "run".to_string(),
        "--rm".to_string(),
        "--volume".to_string(),
        format!("{}:{mount}", host_dir.display()),
        "--workdir".to_string(),
        mount.to_string(),
        image.to_string(),
    ])
}

pub async fn build(
    runner: &dyn Runner,
    artifact: &BuildArtifact,
    image: &ImageReference,
) -> Result<(), Error> {
    info!("Building image {image}");
    let dockerfile = artifact.dockerfile();
    runner
        .run(Command::new("docker").args([
            "build".to_string(),
            "--file".to_string(),
            dockerfile.to_string_lossy().to_string(),
            "--tag".to_string(),
            image.to_string(),
            artifact.context.to_string_lossy().to_string(),
        ]))
        .await?;
    Ok(())
}

/// The password travels over standard input and is redacted from any output.
pub async fn login(
    runner: &dyn Runner,
    registry: &str,
    credentials: &Credentials,
) -> Result<(), Error> {
    debug!("Logging in to Docker registry {}", registry);
    runner
        .run(
            Command::new("docker")
                .args(["login", registry, "--username", &credentials.username, "--password-stdin"])
                .stdin(credentials.password.as_str())
                .secret(credentials.password.as_str()),
        )
        .await?;
    Ok(())
}

pub async fn logout(runner: &dyn Runner, registry: &str) -> Result<(), Error> {
    runner
        .run(Command::new("docker").args(["logout", registry]))
        .await?;
    Ok(())
}

pub async fn push(runner: &dyn Runner, image: &ImageReference) -> Result<(), Error> {
    debug!("Pushing image {}", image);
    runner
        .run(Command::new("docker").args(["push".to_string(), image.to_string()]))
        .await?;
    Ok(())
}

/// Build, authenticate, push, and sign out.
///
/// A failed logout is only a warning: the image is already published.
pub async fn publish(
    runner: &dyn Runner,
    cfg: &Config,
    artifact: &BuildArtifact,
    app_name: &str,
    tag: &str,
) -> Result<ImageReference, crate::Error> {
    let image = ImageReference {
        registry: cfg.registry()?.to_string(),
        app_name: app_name.to_string(),
        tag: tag.to_string(),
    };
    let host = cfg.registry_host()?;
    let credentials = cfg.registry_credentials()?;

    build(runner, artifact, &image).await?;
    login(runner, host, &credentials).await?;
    push(runner, &image).await?;
    if let Err(err) = logout(runner, host).await {
        warn!("docker logout from {host} failed: {err}");
    }

    info!("Published {image}");
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file;
    use crate::process::fake::{failure, ScriptedRunner};
    use crate::sdk::ProjectKind;
    use crate::ErrorKind;
    use std::path::PathBuf;

    fn config() -> Config {
        let mut f = file::File::default();
        f.registry.url = "https://registry.example.org/apps".into();
        f.git.username = "deployer".into();
        f.git.password = "hunter2".into();
        Config::new(&f)
    }

    fn artifact() -> BuildArtifact {
        BuildArtifact {
            context: PathBuf::from("/ws/build-x1"),
            kind: ProjectKind::Maven,
        }
    }

    #[tokio::test]
    async fn publish_tags_with_digest_and_hides_password() {
        let runner = ScriptedRunner::succeeding();
        let image = publish(&runner, &config(), &artifact(), "orders", "4f2a9c1e")
            .await
            .unwrap();

        assert_eq!(image.to_string(), "registry.example.org/apps/orders:4f2a9c1e");
        assert_eq!(
            runner.lines(),
            vec![
                "docker build --file /ws/build-x1/Dockerfile \
                 --tag registry.example.org/apps/orders:4f2a9c1e /ws/build-x1",
                "docker login registry.example.org --username deployer --password-stdin",
                "docker push registry.example.org/apps/orders:4f2a9c1e",
                "docker logout registry.example.org",
            ]
        );
        let login = &runner.commands()[1];
        assert_eq!(login.stdin.as_deref(), Some("hunter2"));
        assert!(!login.args.iter().any(|a| a.contains("hunter2")));
    }

    #[tokio::test]
    async fn logout_failure_is_not_fatal() {
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.args[0] == "logout" {
                Err(failure(cmd, "not logged in"))
            } else {
                Ok(Default::default())
            }
        });
        assert!(publish(&runner, &config(), &artifact(), "orders", "abc").await.is_ok());
    }

    #[tokio::test]
    async fn login_failure_does_not_leak_password() {
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.args[0] == "login" {
                Err(failure(cmd, "unauthorized: hunter2 rejected"))
            } else {
                Ok(Default::default())
            }
        });
        let err = publish(&runner, &config(), &artifact(), "orders", "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
        assert!(!err.to_string().contains("hunter2"));
        assert_eq!(runner.lines().len(), 2);
    }

    #[tokio::test]
    async fn missing_registry_fails_before_build() {
        let runner = ScriptedRunner::succeeding();
        let cfg = Config::new(&file::File::default());
        let err = publish(&runner, &cfg, &artifact(), "orders", "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(runner.lines().is_empty());
    }
}
