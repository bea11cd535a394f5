//! The release pipeline as an explicit state machine.
//!
//! ```text
//! Idle -> Cloning -> Packaging -> Publishing -> UpdatingConfig -> Deploying -> Notifying -> Done
//!   \________\___________\____________\______________\_______________\____________\-> Failed
//! ```
//!
//! Each stage is reached through the [Stages] trait. The first stage error
//! moves the run to `Failed` and no later stage is invoked.
use crate::config::runtime::Config;
use crate::deploy::{self, DeployRequest};
use crate::docker;
use crate::naming;
use crate::notify::{self, NotificationRequest, Transport};
use crate::oci::ImageReference;
use crate::process::Runner;
use crate::sdk::{self, BuildArtifact, BuildParams};
use crate::source::{self, ClonedRepository, RepositoryReference};
use crate::update::{self, UpdateOutcome, UpdateRequest};
use crate::workspace::Workspace;
use crate::Error;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Cloning,
    Packaging,
    Publishing,
    UpdatingConfig,
    Deploying,
    Notifying,
    Done,
    Failed,
}

impl State {
    /// Next state after the current one finished, successfully or not.
    pub fn advance(self, succeeded: bool) -> State {
        use State::*;
        match (self, succeeded) {
            (Done, _) => Done,
            (Failed, _) => Failed,
            (_, false) => Failed,
            (Idle, true) => Cloning,
            (Cloning, true) => Packaging,
            (Packaging, true) => Publishing,
            (Publishing, true) => UpdatingConfig,
            (UpdatingConfig, true) => Deploying,
            (Deploying, true) => Notifying,
            (Notifying, true) => Done,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Idle => "validate",
            State::Cloning => "clone",
            State::Packaging => "package",
            State::Publishing => "publish",
            State::UpdatingConfig => "update",
            State::Deploying => "deploy",
            State::Notifying => "notify",
            State::Done => "done",
            State::Failed => "failed",
        })
    }
}

/// What to release, and where.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub source: RepositoryReference,
    /// Derived from the source URL when absent.
    pub app_name: Option<String>,
    pub build: BuildParams,
    pub environment: String,
    pub cluster: String,
    pub recipients: Vec<String>,
}

/// A deployment destination: the app's configuration repository branch on a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub app_name: String,
    pub cluster: String,
    pub environment: String,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub target: Target,
    pub image: ImageReference,
    pub update: UpdateOutcome,
}

#[async_trait]
pub trait Stages: Send + Sync {
    async fn clone_source(
        &self,
        reference: &RepositoryReference,
    ) -> Result<ClonedRepository, Error>;

    async fn package(
        &self,
        source: &ClonedRepository,
        params: &BuildParams,
    ) -> Result<BuildArtifact, Error>;

    async fn publish(
        &self,
        artifact: &BuildArtifact,
        app_name: &str,
        tag: &str,
    ) -> Result<ImageReference, Error>;

    async fn update_config(&self, target: &Target, digest: &str) -> Result<UpdateOutcome, Error>;

    async fn deploy(&self, target: &Target) -> Result<(), Error>;

    async fn notify(&self, request: &NotificationRequest) -> Result<(), Error>;
}

/// Data carried into each state.
enum Step {
    Idle,
    Cloning(Target),
    Packaging(Target, ClonedRepository),
    Publishing(Target, ClonedRepository, BuildArtifact),
    UpdatingConfig(Target, ImageReference),
    Deploying(Target, ImageReference, UpdateOutcome),
    Notifying(Release),
    Done(Release),
}

impl Step {
    fn state(&self) -> State {
        match self {
            Step::Idle => State::Idle,
            Step::Cloning(..) => State::Cloning,
            Step::Packaging(..) => State::Packaging,
            Step::Publishing(..) => State::Publishing,
            Step::UpdatingConfig(..) => State::UpdatingConfig,
            Step::Deploying(..) => State::Deploying,
            Step::Notifying(..) => State::Notifying,
            Step::Done(..) => State::Done,
        }
    }
}

/// The states a run went through, and how it ended.
#[derive(Debug)]
pub struct Run {
    pub trail: Vec<State>,
    pub result: Result<Release, Error>,
}

impl Run {
    pub fn state(&self) -> State {
        self.trail.last().copied().unwrap_or(State::Idle)
    }
}

fn validate(request: &PipelineRequest) -> Result<Target, Error> {
    let app_name = match &request.app_name {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => naming::app_name(&request.source.url)?,
    };
    naming::resolve_environment(&request.environment)?;
    naming::cluster_credential_file(&request.cluster)?;
    Ok(Target {
        app_name,
        cluster: request.cluster.clone(),
        environment: request.environment.clone(),
    })
}

async fn execute(
    stages: &dyn Stages,
    request: &PipelineRequest,
    step: Step,
) -> Result<Step, Error> {
    Ok(match step {
        Step::Idle => Step::Cloning(validate(request)?),
        Step::Cloning(target) => {
            let source = stages.clone_source(&request.source).await?;
            Step::Packaging(target, source)
        }
        Step::Packaging(target, source) => {
            let artifact = stages.package(&source, &request.build).await?;
            Step::Publishing(target, source, artifact)
        }
        Step::Publishing(target, source, artifact) => {
            let image = stages
                .publish(&artifact, &target.app_name, &source.branch_digest)
                .await?;
            Step::UpdatingConfig(target, image)
        }
        Step::UpdatingConfig(target, image) => {
            let update = stages.update_config(&target, &image.tag).await?;
            Step::Deploying(target, image, update)
        }
        Step::Deploying(target, image, update) => {
            stages.deploy(&target).await?;
            Step::Notifying(Release { target, image, update })
        }
        Step::Notifying(release) => {
            stages
                .notify(&NotificationRequest {
                    app_name: release.target.app_name.clone(),
                    digest: release.image.tag.clone(),
                    environment: release.target.environment.clone(),
                    recipients: request.recipients.clone(),
                })
                .await?;
            Step::Done(release)
        }
        Step::Done(release) => Step::Done(release),
    })
}

/// Drive `request` through every stage until `Done` or `Failed`.
pub async fn run(stages: &dyn Stages, request: &PipelineRequest) -> Run {
    let mut trail = vec![State::Idle];
    let mut step = Step::Idle;

    loop {
        let state = step.state();
        if let Step::Done(release) = step {
            info!("Released {} to {}", release.image, release.target.environment);
            return Run {
                trail,
                result: Ok(release),
            };
        }

        info!("==> {state}");
        match execute(stages, request, step).await {
            Ok(next) => {
                debug_assert_eq!(state.advance(true), next.state());
                info!("<== {state} ok");
                trail.push(next.state());
                step = next;
            }
            Err(err) => {
                error!("<== {state} failed: {err}");
                trail.push(state.advance(false));
                return Run {
                    trail,
                    result: Err(err),
                };
            }
        }
    }
}

/// The real stages: git and docker through a [Runner], email through a [Transport].
pub struct Toolchain<'a> {
    runner: &'a dyn Runner,
    transport: &'a dyn Transport,
    cfg: &'a Config,
    workspace: Workspace,
}

impl<'a> Toolchain<'a> {
    pub fn new(runner: &'a dyn Runner, transport: &'a dyn Transport, cfg: &'a Config) -> Self {
        Self {
            runner,
            transport,
            cfg,
            workspace: Workspace::new(cfg.workspace.clone()),
        }
    }
}

#[async_trait]
impl<'a> Stages for Toolchain<'a> {
    async fn clone_source(
        &self,
        reference: &RepositoryReference,
    ) -> Result<ClonedRepository, Error> {
        source::acquire(self.runner, &self.workspace, reference).await
    }

    async fn package(
        &self,
        source: &ClonedRepository,
        params: &BuildParams,
    ) -> Result<BuildArtifact, Error> {
        sdk::package(self.runner, &self.workspace, &self.cfg.sdk, &source.directory, params).await
    }

    async fn publish(
        &self,
        artifact: &BuildArtifact,
        app_name: &str,
        tag: &str,
    ) -> Result<ImageReference, Error> {
        docker::publish(self.runner, self.cfg, artifact, app_name, tag).await
    }

    async fn update_config(&self, target: &Target, digest: &str) -> Result<UpdateOutcome, Error> {
        let request = UpdateRequest {
            config_url: update::config_repo_url(self.cfg, &target.app_name, &target.cluster)?,
            environment: target.environment.clone(),
            app_name: target.app_name.clone(),
            cluster: target.cluster.clone(),
            digest: digest.to_string(),
        };
        update::update(self.runner, &self.workspace, self.cfg, &request).await
    }

    async fn deploy(&self, target: &Target) -> Result<(), Error> {
        let request = DeployRequest {
            config_url: update::config_repo_url(self.cfg, &target.app_name, &target.cluster)?,
            app_name: target.app_name.clone(),
            cluster: target.cluster.clone(),
            environment: target.environment.clone(),
        };
        deploy::deploy(self.runner, &self.workspace, self.cfg, &request).await
    }

    async fn notify(&self, request: &NotificationRequest) -> Result<(), Error> {
        notify::notify(self.transport, self.cfg, request, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file;
    use crate::notify::Email;
    use crate::process::fake::{failure, ScriptedRunner};
    use crate::process::{Command, Output};
    use crate::sdk::ProjectKind;
    use crate::ErrorKind;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const DIGEST: &str = "4f2a9c1e0b7d";
    const POM: &str = "<project><artifactId>orders</artifactId></project>";

    /// Counts stage invocations; fails the stage named in `fail_at`.
    #[derive(Default)]
    struct CountingStages {
        calls: Mutex<Vec<&'static str>>,
        fail_at: Option<&'static str>,
    }

    impl CountingStages {
        fn failing_at(stage: &'static str) -> Self {
            Self {
                fail_at: Some(stage),
                ..Default::default()
            }
        }

        fn enter(&self, stage: &'static str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(stage);
            if self.fail_at == Some(stage) {
                return Err(Error::from(crate::process::Error::Failed {
                    command: stage.to_string(),
                    status: "exit status: 1".into(),
                    output: String::new(),
                }));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Stages for CountingStages {
        async fn clone_source(
            &self,
            reference: &RepositoryReference,
        ) -> Result<ClonedRepository, Error> {
            self.enter("clone")?;
            Ok(ClonedRepository {
                directory: PathBuf::from("/ws/source"),
                branch_digest: DIGEST.into(),
                source_url: reference.url.clone(),
            })
        }

        async fn package(
            &self,
            _: &ClonedRepository,
            _: &BuildParams,
        ) -> Result<BuildArtifact, Error> {
            self.enter("package")?;
            Ok(BuildArtifact {
                context: PathBuf::from("/ws/build"),
                kind: ProjectKind::Maven,
            })
        }

        async fn publish(
            &self,
            _: &BuildArtifact,
            app_name: &str,
            tag: &str,
        ) -> Result<ImageReference, Error> {
            self.enter("publish")?;
            Ok(ImageReference {
                registry: "registry.example.org/apps".into(),
                app_name: app_name.into(),
                tag: tag.into(),
            })
        }

        async fn update_config(&self, _: &Target, _: &str) -> Result<UpdateOutcome, Error> {
            self.enter("update")?;
            Ok(UpdateOutcome::Committed)
        }

        async fn deploy(&self, _: &Target) -> Result<(), Error> {
            self.enter("deploy")
        }

        async fn notify(&self, _: &NotificationRequest) -> Result<(), Error> {
            self.enter("notify")
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest {
            source: RepositoryReference::new("https://git.example.org/team/orders.git", "main"),
            app_name: None,
            build: BuildParams::default(),
            environment: "production".into(),
            cluster: "k2".into(),
            recipients: vec!["ops@example.org".into()],
        }
    }

    #[test]
    fn transitions() {
        let mut state = State::Idle;
        let mut path = vec![state];
        while !state.is_terminal() {
            state = state.advance(true);
            path.push(state);
        }
        assert_eq!(
            path,
            vec![
                State::Idle,
                State::Cloning,
                State::Packaging,
                State::Publishing,
                State::UpdatingConfig,
                State::Deploying,
                State::Notifying,
                State::Done,
            ]
        );
        for state in &path[..path.len() - 1] {
            assert_eq!(state.advance(false), State::Failed);
        }
        assert_eq!(State::Done.advance(false), State::Done);
        assert_eq!(State::Failed.advance(true), State::Failed);
    }

    #[tokio::test]
    async fn every_stage_once_in_order() {
        let stages = CountingStages::default();
        let run = run(&stages, &request()).await;

        let release = run.result.as_ref().unwrap();
        assert_eq!(release.target.app_name, "orders");
        assert_eq!(release.image.tag, DIGEST);
        assert_eq!(run.state(), State::Done);
        assert_eq!(run.trail.len(), 8);
        assert_eq!(
            stages.calls(),
            vec!["clone", "package", "publish", "update", "deploy", "notify"]
        );
    }

    #[tokio::test]
    async fn failure_stops_later_stages() {
        let cases = [
            ("clone", 1usize),
            ("package", 2),
            ("publish", 3),
            ("update", 4),
            ("deploy", 5),
            ("notify", 6),
        ];
        for (stage, invoked) in cases {
            let stages = CountingStages::failing_at(stage);
            let run = run(&stages, &request()).await;

            assert_eq!(run.state(), State::Failed, "failing at {stage}");
            assert_eq!(run.result.unwrap_err().kind(), ErrorKind::ExternalToolFailure);
            let calls = stages.calls();
            assert_eq!(calls.len(), invoked, "failing at {stage}");
            assert_eq!(calls.last(), Some(&stage));
        }
    }

    #[tokio::test]
    async fn invalid_input_fails_in_idle() {
        for (environment, cluster) in [("qa", "k2"), ("production", "k7")] {
            let stages = CountingStages::default();
            let mut request = request();
            request.environment = environment.into();
            request.cluster = cluster.into();

            let run = run(&stages, &request).await;

            assert_eq!(run.trail, vec![State::Idle, State::Failed]);
            assert_eq!(run.result.unwrap_err().kind(), ErrorKind::InvalidInput);
            assert!(stages.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn explicit_app_name_wins() {
        let stages = CountingStages::default();
        let mut request = request();
        request.app_name = Some("orders-api".into());
        let run = run(&stages, &request).await;
        assert_eq!(run.result.unwrap().image.app_name, "orders-api");
    }

    // End to end over the real stages with scripted collaborators.

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, email: &Email) -> Result<(), notify::Error> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn config(workspace: &std::path::Path) -> Config {
        let mut f = file::File::default();
        f.registry.url = "https://registry.example.org/apps".into();
        f.git.username = "deployer".into();
        f.git.password = "hunter2".into();
        f.git.email = "deployer@example.org".into();
        f.git.domain = "git.example.org".into();
        f.notification.from = "ci@example.org".into();
        f.notification.server_token = "token-123".into();
        f.workspace = Some(workspace.to_path_buf());
        Config::new(&f)
    }

    /// Simulates git, the builders, the registry and helm. `marker` is written
    /// into the cloned source tree.
    fn world(marker: Option<&'static str>) -> ScriptedRunner {
        ScriptedRunner::new(move |cmd: &Command| {
            let arg = |i: usize| cmd.args.get(i).map(String::as_str).unwrap_or_default();
            match (cmd.program.as_str(), arg(0)) {
                ("git", "clone") => {
                    let dest = PathBuf::from(cmd.args.last().unwrap());
                    std::fs::create_dir_all(&dest).unwrap();
                    let url = &cmd.args[cmd.args.len() - 2];
                    if url.ends_with("/team/orders.git") {
                        if let Some(marker) = marker {
                            std::fs::write(dest.join(marker), POM).unwrap();
                        }
                    } else if url.ends_with("/k8s") {
                        std::fs::write(dest.join("k8sv2-admin.conf"), "apiVersion: v1").unwrap();
                    } else {
                        std::fs::write(dest.join("values.yaml"), "image:\n  tag: old\n").unwrap();
                    }
                    Ok(Output::default())
                }
                ("git", "rev-parse") => Ok(Output::stdout(format!("{DIGEST}\n"))),
                ("git", "status") => Ok(Output::stdout(" M values.yaml\n")),
                ("docker", "run") if cmd.args.iter().any(|a| a == "mvn") => {
                    let mount = cmd.args[3].split(':').next().unwrap();
                    let target = PathBuf::from(mount).join("target");
                    std::fs::create_dir_all(&target).unwrap();
                    std::fs::write(target.join("orders-1.0.jar"), "jar").unwrap();
                    std::fs::write(target.join("orders-1.0-sources.jar"), "src").unwrap();
                    Ok(Output::default())
                }
                ("docker", "run") if cmd.args.last().map(String::as_str) == Some("build") => {
                    let mount = cmd.args[3].split(':').next().unwrap();
                    let output = PathBuf::from(mount).join("build");
                    std::fs::create_dir_all(&output).unwrap();
                    std::fs::write(output.join("index.html"), "<html/>").unwrap();
                    Ok(Output::default())
                }
                _ => Ok(Output::default()),
            }
        })
    }

    #[tokio::test]
    async fn maven_project_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let runner = world(Some("pom.xml"));
        let transport = RecordingTransport::default();
        let toolchain = Toolchain::new(&runner, &transport, &cfg);
        let mut request = request();
        request.build.runtime_version = 21;

        let run = run(&toolchain, &request).await;

        let release = run.result.unwrap();
        assert_eq!(release.image.to_string(), format!("registry.example.org/apps/orders:{DIGEST}"));
        assert_eq!(release.update, UpdateOutcome::Committed);

        let lines = runner.lines();
        let build_context = lines
            .iter()
            .find(|l| l.starts_with("docker build"))
            .unwrap()
            .rsplit(' ')
            .next()
            .unwrap()
            .to_string();
        let context = PathBuf::from(build_context);
        let jars = std::fs::read_dir(&context)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".jar"))
            .count();
        assert_eq!(jars, 1);
        let dockerfile = std::fs::read_to_string(context.join("Dockerfile")).unwrap();
        assert!(dockerfile.starts_with("FROM eclipse-temurin:21-jre-alpine"));

        assert!(lines.iter().any(|l| l == &format!("git commit -m Update orders tag to {DIGEST}")));
        assert!(lines.iter().any(|l| l.ends_with("upgrade --install orders orders-k2")));
        assert!(lines.iter().all(|l| !l.contains("hunter2")));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text_body.contains(DIGEST));
    }

    #[tokio::test]
    async fn node_project_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let runner = world(Some("package.json"));
        let transport = RecordingTransport::default();
        let toolchain = Toolchain::new(&runner, &transport, &cfg);

        let run = run(&toolchain, &request()).await;

        assert_eq!(run.state(), State::Done);
        let lines = runner.lines();
        assert!(lines.iter().any(|l| l.contains("node:18-alpine npm install")));
        assert!(lines.iter().any(|l| l.contains("node:18-alpine npm run build")));
    }

    #[tokio::test]
    async fn no_recipients_needs_no_mail_settings() {
        let root = tempfile::tempdir().unwrap();
        let mut f = file::File::default();
        f.registry.url = "registry.example.org/apps".into();
        f.git.username = "deployer".into();
        f.git.password = "hunter2".into();
        f.git.email = "deployer@example.org".into();
        f.git.domain = "git.example.org".into();
        f.notification.url = "http://127.0.0.1:9/email".into();
        f.workspace = Some(root.path().to_path_buf());
        let cfg = Config::new(&f);
        let runner = world(Some("pom.xml"));
        let transport = notify::PostmarkTransport::from_config(&cfg);
        let toolchain = Toolchain::new(&runner, &transport, &cfg);
        let mut request = request();
        request.recipients.clear();

        let run = run(&toolchain, &request).await;

        assert_eq!(run.state(), State::Done);
        assert!(run.result.is_ok());
    }

    #[tokio::test]
    async fn no_marker_stops_at_packaging() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let runner = world(None);
        let transport = RecordingTransport::default();
        let toolchain = Toolchain::new(&runner, &transport, &cfg);

        let run = run(&toolchain, &request()).await;

        assert_eq!(run.trail.last(), Some(&State::Failed));
        assert_eq!(run.trail[run.trail.len() - 2], State::Packaging);
        let err = run.result.unwrap_err();
        assert!(matches!(err, Error::Sdk(sdk::Error::UnsupportedProjectType(_))));
        // clone and rev-parse only
        assert_eq!(runner.lines().len(), 2);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_source_invokes_nothing_else() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let runner = ScriptedRunner::new(|cmd| {
            Err(failure(
                cmd,
                "fatal: unable to access 'https://git.example.org/team/orders.git/': \
                 Could not resolve host",
            ))
        });
        let transport = RecordingTransport::default();
        let toolchain = Toolchain::new(&runner, &transport, &cfg);

        let run = run(&toolchain, &request()).await;

        assert_eq!(run.trail, vec![State::Idle, State::Cloning, State::Failed]);
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::ExternalToolFailure);
        assert_eq!(runner.lines().len(), 1);
        assert!(runner.lines()[0].starts_with("git clone"));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
