//! Point an environment branch of a configuration repository at a new image tag.
use crate::config::runtime::{Config, Credentials};
use crate::git::Git;
use crate::naming::{self, RemoteUrl};
use crate::process::Runner;
use crate::values;
use crate::workspace::Workspace;
use crate::Error;
use log::info;

/// Remote name git gives a cloned repository's origin.
const ORIGIN: &str = "origin";

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub config_url: RemoteUrl,
    /// Also the branch of the configuration repository.
    pub environment: String,
    pub app_name: String,
    pub cluster: String,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    Committed,
    /// The branch already pointed at the digest; nothing was pushed.
    Unchanged,
}

/// `https://<user>:<password>@<domain>/<user>/<app>-<cluster>`
pub fn config_repo_url(cfg: &Config, app_name: &str, cluster: &str) -> Result<RemoteUrl, Error> {
    let credentials = cfg.git_credentials()?;
    Ok(RemoteUrl::on_host(
        cfg.git_domain()?,
        &credentials.username,
        &naming::config_repo_name(app_name, cluster),
    )?
    .with_credentials(&credentials))
}

pub async fn update(
    runner: &dyn Runner,
    workspace: &Workspace,
    cfg: &Config,
    request: &UpdateRequest,
) -> Result<UpdateOutcome, Error> {
    let environment = naming::resolve_environment(&request.environment)?;
    let Credentials { username, .. } = cfg.git_credentials()?;
    let email = cfg.git_email()?;

    let repo_name = naming::config_repo_name(&request.app_name, &request.cluster);
    let directory = workspace.create("config")?.join(&repo_name);
    let git = Git::new(runner);

    info!("Cloning {} at branch {environment}", request.config_url);
    git.clone(&request.config_url, environment, &directory).await?;

    let changed = values::update_file(&directory.join(values::FILE_NAME), &request.digest)?;
    if !changed {
        info!("{} already at {}", values::FILE_NAME, request.digest);
    }

    // A reformatted document counts as a change too.
    if git.status(&directory).await?.trim().is_empty() {
        info!("No changes to commit in {repo_name}");
        return Ok(UpdateOutcome::Unchanged);
    }

    let git = match request.config_url.password() {
        Some(password) => git.with_secret(password),
        None => git,
    };
    git.configure_identity(&directory, &username, email).await?;
    git.add(&directory, values::FILE_NAME).await?;
    git.commit(
        &directory,
        &format!("Update {} tag to {}", request.app_name, request.digest),
    )
    .await?;
    git.push(&directory, ORIGIN, environment).await?;
    info!("Pushed {} tag {} to {repo_name}/{environment}", request.app_name, request.digest);

    Ok(UpdateOutcome::Committed)
}
