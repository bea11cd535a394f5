use crate::config::runtime::Config;
use crate::docker;
use crate::git::Git;
use crate::naming::{self, RemoteUrl};
use crate::process::Runner;
use crate::workspace::Workspace;
use log::info;
use std::path::PathBuf;
use thiserror::Error;

/// Where the deploy workspace is mounted inside the deployer container.
const MOUNT: &str = "/deploy";

#[derive(Error, Debug)]
pub enum Error {
    #[error("cluster credential file {0} not found in credentials repository")]
    MissingCredentialFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub config_url: RemoteUrl,
    pub app_name: String,
    pub cluster: String,
    pub environment: String,
}

/// Install or upgrade the app's chart from its configuration repository.
///
/// The cluster and environment are validated before anything is cloned.
pub async fn deploy(
    runner: &dyn Runner,
    workspace: &Workspace,
    cfg: &Config,
    request: &DeployRequest,
) -> Result<(), crate::Error> {
    let credential_file = naming::cluster_credential_file(&request.cluster)?;
    let namespace = naming::resolve_environment(&request.environment)?;
    let credentials = cfg.git_credentials()?;
    let credentials_url = RemoteUrl::on_host(
        cfg.git_domain()?,
        &credentials.username,
        &cfg.helm.credentials_repo,
    )?
    .with_credentials(&credentials);

    let chart = naming::config_repo_name(&request.app_name, &request.cluster);
    let directory = workspace.create("deploy")?;
    let git = Git::new(runner);

    info!("Cloning cluster credentials from {credentials_url}");
    git.clone_default(&credentials_url, &directory.join(&cfg.helm.credentials_repo))
        .await?;
    info!("Cloning {} at branch {namespace}", request.config_url);
    git.clone(&request.config_url, namespace, &directory.join(&chart))
        .await?;

    let kubeconfig = PathBuf::from(&cfg.helm.credentials_repo).join(credential_file);
    if !directory.join(&kubeconfig).is_file() {
        return Err(Error::MissingCredentialFile(kubeconfig).into());
    }

    info!("Deploying {} to {namespace} on {}", request.app_name, request.cluster);
    let command = docker::run(&cfg.helm_image(), &directory, MOUNT).args([
        "--kubeconfig".to_string(),
        format!("{MOUNT}/{}", kubeconfig.display()),
        "-n".to_string(),
        namespace.to_string(),
        "upgrade".to_string(),
        "--install".to_string(),
        request.app_name.clone(),
        chart,
    ]);
    runner.run(command).await?;
    info!("Deployed {} to {namespace}", request.app_name);
    Ok(())
}
