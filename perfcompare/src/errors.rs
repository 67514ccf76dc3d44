//! Error types for the perfcompare orchestrator.
//!
//! Configuration problems are fatal before any process is spawned, server
//! lifecycle problems fail the stage that hit them, and benchmark failures are
//! never errors at all (they are recorded in the benchmark outcome).

use crate::server::Role;
use crate::stages::StageName;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for perfcompare operations.
#[derive(Debug, Error)]
pub enum PerfError {
    /// Invalid configuration detected before the run started.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The stage list or resume request is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A server instance failed to start or answer.
    #[error("{0}")]
    Server(#[from] ServerError),

    /// A step inside a stage failed.
    #[error("{0}")]
    Step(#[from] StepFailure),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PerfError {
    /// Returns true for errors that must abort the run before anything is spawned.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Validation(_))
    }
}

/// Fatal configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The batch specification is malformed or out of range.
    #[error("Invalid batch spec '{spec}': {reason}")]
    InvalidBatch {
        /// The offending input.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The host architecture cannot be mapped to a build flavour.
    #[error("Unknown processor architecture: {0}")]
    UnknownArchitecture(String),

    /// The candidate server binary does not exist.
    #[error("Server binary not found under [{}]", .0.display())]
    MissingBinary(PathBuf),

    /// A reference install was requested but no artifact location was given.
    #[error("Reference binary URL is required to run stage '{0}'")]
    MissingReferenceUrl(StageName),
}

impl ConfigError {
    /// Creates an invalid batch error.
    #[must_use]
    pub fn invalid_batch(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBatch {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a stage list or resume request fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stage names involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Creates the error for a resume name that matches no known stage.
    #[must_use]
    pub fn unknown_stage(name: &str) -> Self {
        Self::new(format!(
            "Start stage must be one of [{}], got '{name}'",
            StageName::ALL
                .iter()
                .map(StageName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .with_stages(vec![name.to_string()])
    }
}

/// Errors raised by a server instance lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called while the instance still owns a live process.
    #[error("{role} server is already running (pid {pid})")]
    AlreadyRunning {
        /// Instance role.
        role: Role,
        /// Pid of the live process.
        pid: u32,
    },

    /// The process could not be spawned or exited right after spawn.
    #[error("Failed to start {role} server: {output}")]
    Launch {
        /// Instance role.
        role: Role,
        /// Captured output or spawn error.
        output: String,
    },

    /// The process never answered the liveness query.
    #[error("{role} server not ready after {attempts} attempts")]
    NotReady {
        /// Instance role.
        role: Role,
        /// Number of probes issued.
        attempts: u32,
    },

    /// A query against the instance failed.
    #[error("Query on port {port} failed: {message}")]
    Query {
        /// Target port.
        port: u16,
        /// Client error output.
        message: String,
    },

    /// IO error while managing the process or its log.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a query error.
    #[must_use]
    pub fn query(port: u16, message: impl Into<String>) -> Self {
        Self::Query {
            port,
            message: message.into(),
        }
    }
}

/// Failure of a single step; carries the message shown in the stage log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StepFailure(pub String);

impl StepFailure {
    /// Creates a new step failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ServerError> for StepFailure {
    fn from(err: ServerError) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for StepFailure {
    fn from(err: std::io::Error) -> Self {
        Self(format!("IO error: {err}"))
    }
}

impl From<PerfError> for StepFailure {
    fn from(err: PerfError) -> Self {
        Self(err.to_string())
    }
}
