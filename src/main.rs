use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use shipctl::config::{self, runtime::Config};
use shipctl::deploy::DeployRequest;
use shipctl::githost::GitHost;
use shipctl::notify::{NotificationRequest, PostmarkTransport};
use shipctl::pipeline::{self, PipelineRequest, Target, Toolchain};
use shipctl::process::SystemRunner;
use shipctl::scaffold::ScaffoldOptions;
use shipctl::sdk::{BuildParams, DEFAULT_RUNTIME_VERSION};
use shipctl::source::{RepositoryReference, DEFAULT_BRANCH};
use shipctl::workspace::Workspace;
use shipctl::{abort, docker, naming, scaffold, sdk, update, Error};
use std::path::PathBuf;

/// Build, publish and deploy an application from its git repository.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file. Defaults to ~/.shipctl.yaml when it exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Application git repository URL, e.g. https://git.example.org/team/orders
    #[arg(short, long)]
    url: String,

    /// Branch to build.
    #[arg(short, long, default_value = DEFAULT_BRANCH)]
    branch: String,
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Maven profile.
    #[arg(short, long)]
    profile: Option<String>,

    /// Maven property override, key=value. Repeatable.
    #[arg(short, long = "define", value_name = "KEY=VALUE")]
    define: Vec<String>,

    /// JDK version of the builder and runtime images.
    #[arg(short, long = "java-version", default_value_t = DEFAULT_RUNTIME_VERSION)]
    java_version: u16,
}

impl BuildArgs {
    fn params(&self) -> BuildParams {
        BuildParams {
            profile: self.profile.clone(),
            properties: self.define.clone(),
            runtime_version: self.java_version,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Application name.
    #[arg(short, long)]
    name: String,

    /// Kubernetes cluster, k1 or k2.
    #[arg(short, long, default_value = "k2")]
    cluster: String,

    /// Target environment, also the configuration repository branch.
    #[arg(short, long)]
    environment: String,
}

impl TargetArgs {
    fn target(&self) -> Target {
        Target {
            app_name: self.name.clone(),
            cluster: self.cluster.clone(),
            environment: self.environment.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Clone a branch and print its directory and digest.
    Clone {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Package a local source tree into a build context.
    Package {
        /// Root of the source code tree.
        #[arg(default_value = ".")]
        source_directory: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },
    /// Clone, package and publish an image tagged with the branch digest.
    Build {
        #[command(flatten)]
        source: SourceArgs,

        /// Application name. Defaults to the repository name.
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        build: BuildArgs,
    },
    /// Set the image tag in the configuration repository of an environment.
    Update {
        #[command(flatten)]
        target: TargetArgs,

        /// Image tag to deploy.
        #[arg(short, long)]
        tag: String,
    },
    /// Install or upgrade the application's chart.
    Deploy {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Delete the application's configuration repository.
    Delete {
        /// Application name.
        #[arg(short, long)]
        name: String,

        /// Kubernetes cluster, k1 or k2.
        #[arg(short, long, default_value = "k2")]
        cluster: String,
    },
    /// Email a deployment notification.
    Notify {
        #[command(flatten)]
        target: TargetArgs,

        /// Deployed image tag.
        #[arg(short, long)]
        tag: String,

        /// Recipient address. Repeatable or comma separated.
        #[arg(short, long = "mails", value_delimiter = ',')]
        mails: Vec<String>,
    },
    /// Run every stage: clone, package, publish, update, deploy, notify.
    Pipeline {
        #[command(flatten)]
        source: SourceArgs,

        /// Application name. Defaults to the repository name.
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        build: BuildArgs,

        /// Kubernetes cluster, k1 or k2.
        #[arg(short, long, default_value = "k2")]
        cluster: String,

        /// Target environment.
        #[arg(short, long)]
        environment: String,

        /// Recipient address. Repeatable or comma separated.
        #[arg(short, long = "mails", value_delimiter = ',')]
        mails: Vec<String>,
    },
    /// Create and populate the configuration repository of a new application.
    Init {
        /// Application name.
        #[arg(short, long)]
        name: String,

        /// Kubernetes cluster, k1 or k2.
        #[arg(short, long, default_value = "k2")]
        cluster: String,

        /// Add an ingress.
        #[arg(short, long)]
        ingress: bool,

        /// Add a persistent volume.
        #[arg(short, long)]
        volume: bool,
    },
    /// Remove every directory left in the workspace.
    Clear,
}

/// Read configuration file from disk and merge it with the
/// `default.yaml` [built-in config](../default.yaml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// home directory. If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::file::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = ".shipctl.yaml";

    let config_file = match &args.config {
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_FILE))
            .filter(|path| path.is_file()),
        Some(c) => Some(c.clone()),
    };

    Ok(config::file::File::load(
        config_file.as_deref(),
        std::env::vars(),
    )?)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), Error> {
    let args = Cli::parse();
    let cfg = Config::new(&read_config(&args)?);

    info!("shipctl {}", env!("CARGO_PKG_VERSION"));

    let (handle, abort) = abort::signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            handle.raise();
        }
    });

    let runner = SystemRunner::new(abort);
    let workspace = Workspace::new(cfg.workspace.clone());

    match args.command {
        Commands::Clone { source } => {
            let cloned = shipctl::source::acquire(
                &runner,
                &workspace,
                &RepositoryReference::new(source.url, source.branch),
            )
            .await?;
            println!("{}\t{}", cloned.directory.display(), cloned.branch_digest);
            Ok(())
        }
        Commands::Package {
            source_directory,
            build,
        } => {
            let artifact = sdk::package(
                &runner,
                &workspace,
                &cfg.sdk,
                &source_directory,
                &build.params(),
            )
            .await?;
            println!("{}", artifact.context.display());
            Ok(())
        }
        Commands::Build {
            source,
            name,
            build,
        } => {
            let app_name = match name {
                Some(name) => name,
                None => naming::app_name(&source.url)?,
            };
            let cloned = shipctl::source::acquire(
                &runner,
                &workspace,
                &RepositoryReference::new(source.url, source.branch),
            )
            .await?;
            let artifact = sdk::package(
                &runner,
                &workspace,
                &cfg.sdk,
                &cloned.directory,
                &build.params(),
            )
            .await?;
            let image =
                docker::publish(&runner, &cfg, &artifact, &app_name, &cloned.branch_digest)
                    .await?;
            println!("{image}");
            Ok(())
        }
        Commands::Update { target, tag } => {
            let request = update::UpdateRequest {
                config_url: update::config_repo_url(&cfg, &target.name, &target.cluster)?,
                environment: target.environment.clone(),
                app_name: target.name.clone(),
                cluster: target.cluster.clone(),
                digest: tag,
            };
            let outcome = update::update(&runner, &workspace, &cfg, &request).await?;
            info!("{:?}", outcome);
            Ok(())
        }
        Commands::Deploy { target } => {
            let request = DeployRequest {
                config_url: update::config_repo_url(&cfg, &target.name, &target.cluster)?,
                app_name: target.name.clone(),
                cluster: target.cluster.clone(),
                environment: target.environment.clone(),
            };
            shipctl::deploy::deploy(&runner, &workspace, &cfg, &request).await
        }
        Commands::Delete { name, cluster } => {
            naming::cluster_credential_file(&cluster)?;
            let owner = cfg.git_credentials()?.username;
            GitHost::new(&cfg)?
                .delete_repository(&owner, &naming::config_repo_name(&name, &cluster))
                .await?;
            Ok(())
        }
        Commands::Notify {
            target,
            tag,
            mails,
        } => {
            let transport = PostmarkTransport::from_config(&cfg);
            let target = target.target();
            naming::resolve_environment(&target.environment)?;
            shipctl::notify::notify(
                &transport,
                &cfg,
                &NotificationRequest {
                    app_name: target.app_name,
                    digest: tag,
                    environment: target.environment,
                    recipients: mails,
                },
                chrono::Utc::now(),
            )
            .await
        }
        Commands::Pipeline {
            source,
            name,
            build,
            cluster,
            environment,
            mails,
        } => {
            let transport = PostmarkTransport::from_config(&cfg);
            let stages = Toolchain::new(&runner, &transport, &cfg);
            let request = PipelineRequest {
                source: RepositoryReference::new(source.url, source.branch),
                app_name: name,
                build: build.params(),
                environment,
                cluster,
                recipients: mails,
            };
            let run = pipeline::run(&stages, &request).await;
            let trail = run
                .trail
                .iter()
                .map(|state| state.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            info!("Pipeline: {trail}");
            let release = run.result?;
            println!("{}", release.image);
            Ok(())
        }
        Commands::Init {
            name,
            cluster,
            ingress,
            volume,
        } => {
            let host = GitHost::new(&cfg)?;
            let remote = scaffold::init(
                &runner,
                &workspace,
                &cfg,
                &host,
                &ScaffoldOptions {
                    app_name: name,
                    cluster,
                    ingress,
                    volume,
                },
            )
            .await?;
            println!("{remote}");
            Ok(())
        }
        Commands::Clear => {
            let removed = workspace.clear()?;
            println!("{removed}");
            Ok(())
        }
    }
}
