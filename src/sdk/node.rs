use crate::oci::Dockerfile;
use crate::process::Runner;
use crate::sdk::{containerized, Error, ProjectKind, Sdk};
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MARKER: &str = "package.json";
const STATIC_DIR: &str = "build";
const DOCUMENT_ROOT: &str = "/usr/share/nginx/html";
const PORT: u16 = 80;

pub struct Config {
    pub filesystem_path: PathBuf,
    pub docker_builder_image: String,
    pub docker_runtime_image: String,
    /// Directory the build script writes its static output to.
    pub output_directory: String,
}

pub struct Node {
    cfg: Config,
}

/// Returns `Ok(None)` if the source tree has no `package.json`.
pub fn new(cfg: Config) -> Result<Option<Node>, Error> {
    if !cfg.filesystem_path.join(MARKER).is_file() {
        return Ok(None);
    }
    Ok(Some(Node { cfg }))
}

/// Recursively copy the contents of `from` into `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<usize, std::io::Error> {
    let mut copied = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        let destination = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Sdk for Node {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Node
    }

    async fn build(&self, runner: &dyn Runner) -> Result<(), crate::Error> {
        info!("Building with {}", self.cfg.docker_builder_image);
        for args in [vec!["npm", "install"], vec!["npm", "run", "build"]] {
            let args = args.into_iter().map(String::from).collect::<Vec<_>>();
            let command = containerized(
                &self.cfg.docker_builder_image,
                &self.cfg.filesystem_path,
                &args,
            );
            runner.run(command).await?;
        }
        Ok(())
    }

    fn stage(&self, context: &Path) -> Result<Dockerfile, crate::Error> {
        let output = self.cfg.filesystem_path.join(&self.cfg.output_directory);
        if !output.is_dir() {
            return Err(Error::NoArtifactProduced(output).into());
        }
        let copied = copy_tree(&output, &context.join(STATIC_DIR))?;
        if copied == 0 {
            return Err(Error::NoArtifactProduced(output).into());
        }
        debug!("Staged {copied} static files from {}", output.display());

        Ok(Dockerfile {
            base_image: self.cfg.docker_runtime_image.clone(),
            workdir: None,
            copy: vec![(STATIC_DIR.into(), DOCUMENT_ROOT.into())],
            expose: Some(PORT),
            entrypoint: vec![],
            cmd: vec!["nginx".into(), "-g".into(), "daemon off;".into()],
        })
    }
}
