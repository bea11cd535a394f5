//! Source acquisition: clone a branch and resolve its head commit.
use crate::git::Git;
use crate::naming::RemoteUrl;
use crate::process::Runner;
use crate::workspace::Workspace;
use crate::Error;
use log::info;
use std::path::PathBuf;

/// Default source branch when none is given.
pub const DEFAULT_BRANCH: &str = "main";

/// A version-controlled source at a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryReference {
    pub url: String,
    pub branch: String,
}

impl RepositoryReference {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

/// A source tree checked out on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ClonedRepository {
    pub directory: PathBuf,
    /// Commit identifier of the branch tip at clone time; the deployment version.
    pub branch_digest: String,
    pub source_url: String,
}

/// Clone `reference` into a fresh workspace directory.
///
/// The first failure is returned as-is; the directory is left for `clear`.
pub async fn acquire(
    runner: &dyn Runner,
    workspace: &Workspace,
    reference: &RepositoryReference,
) -> Result<ClonedRepository, Error> {
    let url = RemoteUrl::parse(&reference.url)?;
    let directory = workspace.create("source")?;
    info!("Cloning {} at branch {}", url, reference.branch);

    let git = Git::new(runner);
    git.clone(&url, &reference.branch, &directory).await?;
    let branch_digest = git.head(&directory).await?;
    info!("Branch digest: {branch_digest}");

    Ok(ClonedRepository {
        directory,
        branch_digest,
        source_url: reference.url.clone(),
    })
}
