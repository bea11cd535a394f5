//! shipctl: clone, package, publish, update the GitOps values, deploy with Helm, notify.
//!
//! Every stage talks to the outside world through a seam: processes through
//! [process::Runner], email through [notify::Transport], and the whole run
//! through [pipeline::Stages].
use thiserror::Error;

pub mod abort;
pub mod config;
pub mod deploy;
pub mod docker;
pub mod git;
pub mod githost;
pub mod naming;
pub mod notify;
pub mod oci;
pub mod pipeline;
pub mod process;
pub mod scaffold;
pub mod sdk;
pub mod source;
pub mod update;
pub mod values;
pub mod workspace;

#[cfg(test)]
mod test_server;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Naming(#[from] naming::Error),

    #[error("configuration file: {0}")]
    ConfigFile(#[from] config::file::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::runtime::Error),

    #[error(transparent)]
    Process(#[from] process::Error),

    #[error("build: {0}")]
    Sdk(#[from] sdk::Error),

    #[error("{0}")]
    Values(#[from] values::Error),

    #[error("deploy: {0}")]
    Deploy(#[from] deploy::Error),

    #[error("{0}")]
    Notify(#[from] notify::Error),

    #[error("{0}")]
    GitHost(#[from] githost::Error),

    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),
}

/// How a failure should be read by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any external call was made.
    InvalidInput,
    /// A tool, the registry, the git host or the mail API failed.
    ExternalToolFailure,
    /// An upstream assumption did not hold: no artifact, no tag field.
    MalformedState,
    /// The abort signal was raised.
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Naming(_) | Error::ConfigFile(_) | Error::Config(_) => ErrorKind::InvalidInput,
            Error::Process(process::Error::Cancelled { .. }) => ErrorKind::Cancelled,
            Error::Process(_) => ErrorKind::ExternalToolFailure,
            Error::Sdk(err) => match err {
                sdk::Error::UnsupportedProjectType(_)
                | sdk::Error::InvalidProperty(_)
                | sdk::Error::ProjectDescriptor { .. } => ErrorKind::InvalidInput,
                sdk::Error::NoArtifactProduced(_) => ErrorKind::MalformedState,
            },
            Error::Values(_) | Error::Deploy(_) => ErrorKind::MalformedState,
            Error::Notify(notify::Error::Config(_)) => ErrorKind::InvalidInput,
            Error::Notify(_) | Error::GitHost(_) | Error::FilesystemError(_) => {
                ErrorKind::ExternalToolFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn taxonomy() {
        let cases: Vec<(Error, ErrorKind)> = vec![
            (naming::Error::UnknownCluster("k9".into()).into(), ErrorKind::InvalidInput),
            (config::runtime::Error::Missing("git.domain").into(), ErrorKind::InvalidInput),
            (
                sdk::Error::UnsupportedProjectType(PathBuf::from("/src")).into(),
                ErrorKind::InvalidInput,
            ),
            (
                sdk::Error::NoArtifactProduced(PathBuf::from("/src/target")).into(),
                ErrorKind::MalformedState,
            ),
            (values::Error::MalformedValuesDocument.into(), ErrorKind::MalformedState),
            (
                process::Error::Cancelled {
                    command: "docker push".into(),
                }
                .into(),
                ErrorKind::Cancelled,
            ),
            (
                process::Error::Failed {
                    command: "git clone".into(),
                    status: "exit status: 128".into(),
                    output: String::new(),
                }
                .into(),
                ErrorKind::ExternalToolFailure,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }
}
