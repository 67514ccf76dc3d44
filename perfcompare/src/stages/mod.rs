//! Stage names, steps and stage definitions.
//!
//! A stage is a named, ordered list of steps. The set of stage names and their
//! order are fixed by [`StageName::ALL`].

mod name;
mod result;
mod step;

pub use name::StageName;
pub use result::StageResult;
pub use step::{ActionFuture, ShellContext, Step, StepAction};

use crate::errors::StepFailure;
use std::future::Future;
use std::path::PathBuf;

/// A stage descriptor: its name, its steps and its bookkeeping files.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The stage name.
    pub name: StageName,
    /// Steps in execution order.
    pub steps: Vec<Step>,
    /// Marker file that, when present, satisfies the stage without running it.
    pub sentinel: Option<PathBuf>,
    /// Files attached to the stage result if the stage fails.
    pub failure_attachments: Vec<PathBuf>,
}

impl StageDefinition {
    /// Creates an empty stage.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            steps: Vec::new(),
            sentinel: None,
            failure_attachments: Vec::new(),
        }
    }

    /// Appends a shell step.
    #[must_use]
    pub fn shell(mut self, command: impl Into<String>) -> Self {
        self.steps.push(Step::shell(command));
        self
    }

    /// Appends a shell step with its own working directory.
    #[must_use]
    pub fn shell_in(mut self, workdir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        self.steps.push(Step::Shell {
            command: command.into(),
            workdir: Some(workdir.into()),
        });
        self
    }

    /// Appends a group of shell commands executed concurrently.
    #[must_use]
    pub fn parallel(mut self, commands: Vec<String>) -> Self {
        self.steps.push(Step::Parallel(commands));
        self
    }

    /// Appends an in-process step.
    #[must_use]
    pub fn action<F, Fut>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, StepFailure>> + Send + 'static,
    {
        self.steps.push(Step::action(name, func));
        self
    }

    /// Sets the sentinel marker.
    #[must_use]
    pub fn with_sentinel(mut self, marker: impl Into<PathBuf>) -> Self {
        self.sentinel = Some(marker.into());
        self
    }

    /// Adds a file attached on failure.
    #[must_use]
    pub fn attach_on_failure(mut self, file: impl Into<PathBuf>) -> Self {
        self.failure_attachments.push(file.into());
        self
    }
}
