use crate::oci::Dockerfile;
use crate::process::Runner;
use crate::sdk::{containerized, Error, ProjectKind, Sdk};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};
use sxd_document::parser;
use sxd_xpath::evaluate_xpath;

const MARKER: &str = "pom.xml";
const ARTIFACT: &str = "app.jar";
const PORT: u16 = 8080;

pub struct Config {
    pub filesystem_path: PathBuf,
    pub docker_builder_image: String,
    pub docker_runtime_image: String,
    pub profile: Option<String>,
    pub properties: Vec<String>,
}

pub struct Maven {
    cfg: Config,
    artifact_id: Option<String>,
}

/// Returns `Ok(None)` if the source tree has no `pom.xml`.
pub fn new(cfg: Config) -> Result<Option<Maven>, Error> {
    let pom = cfg.filesystem_path.join(MARKER);
    if !pom.is_file() {
        return Ok(None);
    }
    for property in &cfg.properties {
        if !property.contains('=') || property.starts_with('=') {
            return Err(Error::InvalidProperty(property.clone()));
        }
    }
    let artifact_id = read_artifact_id(&pom)?;
    Ok(Some(Maven { cfg, artifact_id }))
}

fn read_artifact_id(pom: &Path) -> Result<Option<String>, Error> {
    let descriptor_error = |reason: String| Error::ProjectDescriptor {
        path: pom.to_path_buf(),
        reason,
    };
    let xml = std::fs::read_to_string(pom).map_err(|err| descriptor_error(err.to_string()))?;
    let package = parser::parse(&xml).map_err(|err| descriptor_error(format!("{:?}", err)))?;
    let document = package.as_document();
    let value = evaluate_xpath(
        &document,
        "/*[local-name()='project']/*[local-name()='artifactId']",
    )
    .map_err(|err| descriptor_error(format!("{:?}", err)))?;

    let id = value.string().trim().to_string();
    Ok(if id.is_empty() { None } else { Some(id) })
}

impl Maven {
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "mvn".to_string(),
            "clean".to_string(),
            "package".to_string(),
            "-DskipTests".to_string(),
        ];
        if let Some(profile) = &self.cfg.profile {
            args.push(format!("-P{profile}"));
        }
        args.extend(self.cfg.properties.iter().map(|p| format!("-D{p}")));
        args
    }

    /// Pick the packaged jar from `target/`.
    ///
    /// Source and javadoc jars are never candidates. Among the rest, a jar
    /// named after the project's artifactId wins; otherwise the first in
    /// name order.
    fn select_jar(&self) -> Result<PathBuf, Error> {
        let target = self.cfg.filesystem_path.join("target");
        let mut candidates = std::fs::read_dir(&target)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .filter(|name| {
                        name.ends_with(".jar")
                            && !name.contains("sources")
                            && !name.contains("javadoc")
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        candidates.sort();

        let preferred = self.artifact_id.as_ref().and_then(|id| {
            candidates
                .iter()
                .find(|name| name.starts_with(id.as_str()))
                .cloned()
        });
        let chosen = match preferred {
            Some(name) => name,
            None => {
                let first = candidates
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::NoArtifactProduced(target.clone()))?;
                if candidates.len() > 1 {
                    warn!("Several jars in {}, using {first}", target.display());
                }
                first
            }
        };
        Ok(target.join(chosen))
    }
}

#[async_trait]
impl Sdk for Maven {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Maven
    }

    async fn build(&self, runner: &dyn Runner) -> Result<(), crate::Error> {
        info!("Building with {}", self.cfg.docker_builder_image);
        let command = containerized(
            &self.cfg.docker_builder_image,
            &self.cfg.filesystem_path,
            &self.build_args(),
        );
        runner.run(command).await?;
        Ok(())
    }

    fn stage(&self, context: &Path) -> Result<Dockerfile, crate::Error> {
        let jar = self.select_jar()?;
        info!("Packaging {}", jar.display());
        std::fs::copy(&jar, context.join(ARTIFACT))?;

        Ok(Dockerfile {
            base_image: self.cfg.docker_runtime_image.clone(),
            workdir: Some("/app".into()),
            copy: vec![(ARTIFACT.into(), format!("/app/{ARTIFACT}"))],
            expose: Some(PORT),
            entrypoint: vec!["java".into(), "-jar".into(), format!("/app/{ARTIFACT}")],
            cmd: vec![],
        })
    }
}
