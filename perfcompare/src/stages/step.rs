//! Discrete steps executed inside a stage.

use crate::errors::StepFailure;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::fmt::{self, Debug, Write as _};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Boxed future returned by an in-process step.
pub type ActionFuture = BoxFuture<'static, Result<String, StepFailure>>;

/// In-process step body. Returns text appended to the stage log on success.
pub type StepAction = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// Environment every shell step runs in.
#[derive(Debug, Clone)]
pub struct ShellContext {
    /// Default working directory.
    pub workdir: PathBuf,
    /// Directories prepended to `PATH`.
    pub path_prefix: Vec<PathBuf>,
}

impl Default for ShellContext {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            path_prefix: Vec::new(),
        }
    }
}

impl ShellContext {
    /// Creates a shell context rooted at `workdir`.
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            path_prefix: Vec::new(),
        }
    }

    /// Prepends a directory to `PATH` for every command.
    #[must_use]
    pub fn with_path_prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prefix.push(dir.into());
        self
    }

    fn path_env(&self) -> Option<std::ffi::OsString> {
        if self.path_prefix.is_empty() {
            return None;
        }
        let current = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .path_prefix
            .iter()
            .cloned()
            .chain(std::env::split_paths(&current));
        std::env::join_paths(dirs).ok()
    }

    /// Runs `command` through `sh -c`, appending the command line and its
    /// output to `log`. Fails on spawn error or non-zero exit.
    pub async fn run(
        &self,
        command: &str,
        workdir: Option<&Path>,
        log: &mut String,
    ) -> Result<(), StepFailure> {
        let dir = workdir.unwrap_or(&self.workdir);
        let _ = writeln!(log, "+ {command}");
        debug!(command, workdir = %dir.display(), "Running shell step");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(dir);
        if let Some(path) = self.path_env() {
            cmd.env("PATH", path);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| StepFailure::new(format!("Failed to spawn `{command}`: {e}")))?;

        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(())
        } else {
            Err(StepFailure::new(format!(
                "`{command}` exited with {}",
                output.status
            )))
        }
    }
}

/// One unit of work inside a stage.
#[derive(Clone)]
pub enum Step {
    /// A shell command, optionally with its own working directory.
    Shell {
        /// Command line passed to `sh -c`.
        command: String,
        /// Working directory override.
        workdir: Option<PathBuf>,
    },
    /// Shell commands run concurrently; fails if any of them fails.
    Parallel(Vec<String>),
    /// An in-process closure.
    Action {
        /// Name shown in the stage log.
        name: String,
        /// The closure.
        action: StepAction,
    },
}

impl Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { command, workdir } => f
                .debug_struct("Shell")
                .field("command", command)
                .field("workdir", workdir)
                .finish(),
            Self::Parallel(commands) => f.debug_tuple("Parallel").field(commands).finish(),
            Self::Action { name, .. } => f.debug_struct("Action").field("name", name).finish(),
        }
    }
}

impl Step {
    /// Creates a shell step.
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell {
            command: command.into(),
            workdir: None,
        }
    }

    /// Creates an in-process step from an async closure.
    pub fn action<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, StepFailure>> + Send + 'static,
    {
        Self::Action {
            name: name.into(),
            action: Arc::new(move || func().boxed()),
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Shell { command, .. } => command.clone(),
            Self::Parallel(commands) => format!("parallel({} commands)", commands.len()),
            Self::Action { name, .. } => name.clone(),
        }
    }

    /// Executes the step, appending its output to `log`.
    pub async fn execute(&self, shell: &ShellContext, log: &mut String) -> Result<(), StepFailure> {
        match self {
            Self::Shell { command, workdir } => shell.run(command, workdir.as_deref(), log).await,
            Self::Parallel(commands) => {
                let runs = commands.iter().map(|command| async move {
                    let mut out = String::new();
                    let res = shell.run(command, None, &mut out).await;
                    (out, res)
                });
                let mut first_error = None;
                for (out, res) in join_all(runs).await {
                    log.push_str(&out);
                    if let Err(e) = res {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Self::Action { name, action } => {
                let _ = writeln!(log, "+ {name}");
                let text = action().await?;
                if !text.is_empty() {
                    log.push_str(&text);
                    if !text.ends_with('\n') {
                        log.push('\n');
                    }
                }
                Ok(())
            }
        }
    }
}
