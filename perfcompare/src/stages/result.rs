//! Recorded outcome of one executed stage.

use super::StageName;
use crate::core::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable record of one attempted stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub name: StageName,
    /// Stage status.
    pub status: StageStatus,
    /// Captured command lines and output of every executed step.
    pub log: String,
    /// Files attached for diagnostics.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// Elapsed time in milliseconds.
    pub duration_ms: f64,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// Creates a stage result that ran to completion.
    #[must_use]
    pub fn completed(name: StageName, started_at: DateTime<Utc>, elapsed: Duration, log: String) -> Self {
        Self {
            name,
            status: StageStatus::Ok,
            log,
            files: Vec::new(),
            started_at,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            error: None,
        }
    }

    /// Creates a stage result satisfied by a sentinel marker.
    #[must_use]
    pub fn skipped(name: StageName, reason: impl Into<String>) -> Self {
        Self {
            name,
            status: StageStatus::Skip,
            log: reason.into(),
            files: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0.0,
            error: None,
        }
    }

    /// Creates a failed stage result.
    #[must_use]
    pub fn failed(
        name: StageName,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        log: String,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name,
            status: StageStatus::Fail,
            log,
            files: Vec::new(),
            started_at,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            error: Some(error.into()),
        }
    }

    /// Attaches diagnostic files.
    #[must_use]
    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms / 1000.0)
    }
}
