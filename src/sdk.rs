//! Build ecosystem detection and artifact packaging.
//!
//! Each supported ecosystem is a submodule exposing `new(Config)`, which
//! returns `Ok(None)` when the source tree does not belong to it. Detection
//! tries them in priority order and stops at the first match.
use crate::config::file;
use crate::docker;
use crate::oci::Dockerfile;
use crate::process::{Command, Runner};
use crate::workspace::Workspace;
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod maven;
pub mod node;

/// Default JVM runtime version selector.
pub const DEFAULT_RUNTIME_VERSION: u16 = 17;

/// Where the source tree is mounted inside builder containers.
const CONTAINER_SOURCE_DIR: &str = "/src";

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported project type: no pom.xml or package.json in {0}")]
    UnsupportedProjectType(PathBuf),

    #[error("no artifact produced in {0}")]
    NoArtifactProduced(PathBuf),

    #[error("invalid property override '{0}', expected key=value")]
    InvalidProperty(String),

    #[error("read {path}: {reason}")]
    ProjectDescriptor { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectKind {
    Maven,
    Node,
}

/// Parameters of a single build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildParams {
    pub profile: Option<String>,
    /// `key=value` property overrides.
    pub properties: Vec<String>,
    pub runtime_version: u16,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            profile: None,
            properties: vec![],
            runtime_version: DEFAULT_RUNTIME_VERSION,
        }
    }
}

/// A staged build context: a Dockerfile next to the compiled output.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildArtifact {
    pub context: PathBuf,
    pub kind: ProjectKind,
}

impl BuildArtifact {
    pub fn dockerfile(&self) -> PathBuf {
        self.context.join("Dockerfile")
    }
}

#[async_trait]
pub trait Sdk: Send + Sync {
    fn kind(&self) -> ProjectKind;

    /// Run the ecosystem's build tool over the source tree.
    async fn build(&self, runner: &dyn Runner) -> Result<(), crate::Error>;

    /// Copy the build output into `context` and describe the runtime image.
    fn stage(&self, context: &Path) -> Result<Dockerfile, crate::Error>;
}

/// Pick the build ecosystem of `source`, JVM before JS.
pub fn detect(source: &Path, cfg: &file::Sdk, params: &BuildParams) -> Result<Box<dyn Sdk>, Error> {
    match maven::new(maven::Config {
        filesystem_path: source.to_path_buf(),
        docker_builder_image: image(&cfg.maven.build_docker_image, params.runtime_version),
        docker_runtime_image: image(&cfg.maven.runtime_docker_image, params.runtime_version),
        profile: params.profile.clone(),
        properties: params.properties.clone(),
    }) {
        Ok(Some(sdk)) => return Ok(Box::new(sdk)),
        Ok(None) => {}
        Err(err) => return Err(err),
    }

    match node::new(node::Config {
        filesystem_path: source.to_path_buf(),
        docker_builder_image: cfg.node.build_docker_image.clone(),
        docker_runtime_image: cfg.node.runtime_docker_image.clone(),
        output_directory: cfg.node.output_directory.clone(),
    }) {
        Ok(Some(sdk)) => return Ok(Box::new(sdk)),
        Ok(None) => {}
        Err(err) => return Err(err),
    }

    Err(Error::UnsupportedProjectType(source.to_path_buf()))
}

/// Build the project in `source` and stage a fresh build context for it.
pub async fn package(
    runner: &dyn Runner,
    workspace: &Workspace,
    cfg: &file::Sdk,
    source: &Path,
    params: &BuildParams,
) -> Result<BuildArtifact, crate::Error> {
    let sdk = detect(source, cfg, params)?;
    info!("{:?} project detected in {}", sdk.kind(), source.display());

    sdk.build(runner).await?;

    let context = workspace.create("build")?;
    let dockerfile = sdk.stage(&context)?;
    let artifact = BuildArtifact {
        context,
        kind: sdk.kind(),
    };
    std::fs::write(artifact.dockerfile(), dockerfile.to_string())?;
    info!("Build context staged at {}", artifact.context.display());
    Ok(artifact)
}

/// Substitute `{version}` in an image template.
pub fn image(template: &str, version: u16) -> String {
    template.replace("{version}", &version.to_string())
}

/// The build tool runs in `image` with the source tree mounted at `/src`.
fn containerized(image: &str, source: &Path, args: &[String]) -> Command {
    docker::run(image, source, CONTAINER_SOURCE_DIR).args(args.iter().cloned())
}
