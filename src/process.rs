//! Execution of external tools.
//!
//! Every collaborator (git, docker, helm inside docker) is reached through the
//! [Runner] trait, so stages can be exercised with a scripted runner in tests.
use crate::abort::Abort;
use async_trait::async_trait;
use log::debug;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

const REDACTED: &str = "***";

#[derive(Error, Debug)]
pub enum Error {
    #[error("{command}: could not start: {err}")]
    Spawn {
        command: String,
        err: std::io::Error,
    },

    #[error("{command} failed with {status}\n{output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("{command}: cancelled")]
    Cancelled { command: String },

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// A single external tool invocation.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Written to the process' standard input, never logged.
    pub stdin: Option<String>,
    /// Strings that must not show up in logs or errors.
    pub secrets: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Replace every registered secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&self.redact(&line))
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion. A non-zero exit is an error carrying the captured output.
    async fn run(&self, command: Command) -> Result<Output, Error>;
}

/// Runs commands as child processes of this one.
pub struct SystemRunner {
    abort: Abort,
}

impl SystemRunner {
    pub fn new(abort: Abort) -> Self {
        Self { abort }
    }
}

#[async_trait]
impl Runner for SystemRunner {
    async fn run(&self, command: Command) -> Result<Output, Error> {
        let display = command.to_string();
        debug!("Running {display}");

        if self.abort.is_raised() {
            return Err(Error::Cancelled { command: display });
        }

        let mut process = tokio::process::Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        let mut child = process.spawn().map_err(|err| Error::Spawn {
            command: display.clone(),
            err,
        })?;

        if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes the pipe so the tool sees EOF.
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .map(|out| {
                tokio::spawn(forward(out, command.program.clone(), command.secrets.clone()))
            });
        let stderr = child
            .stderr
            .take()
            .map(|err| {
                tokio::spawn(forward(err, command.program.clone(), command.secrets.clone()))
            });

        let mut abort = self.abort.clone();
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = abort.raised() => {
                debug!("Abort raised, terminating {}", command.program);
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Cancelled { command: display });
            }
        };

        let output = Output {
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        };

        if status.success() {
            Ok(output)
        } else {
            Err(Error::Failed {
                command: display,
                status: status.to_string(),
                output: [output.stdout, output.stderr]
                    .into_iter()
                    .filter(|s| !s.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
        }
    }
}

/// Stream lines to the debug log while capturing them.
async fn forward<R>(reader: R, program: String, secrets: Vec<String>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = secrets
            .iter()
            .fold(line, |acc, secret| acc.replace(secret, REDACTED));
        debug!("[{program}] {line}");
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

async fn collect(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}
