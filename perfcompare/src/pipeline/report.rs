//! Stage result aggregation and the final job report.

use crate::errors::PerfError;
use crate::stages::{StageName, StageResult};
use crate::utils::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// The final report of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: Timestamp,
    /// Results of the attempted stages, in execution order.
    pub stages: Vec<StageResult>,
    /// AND of every recorded stage success.
    pub success: bool,
    /// Total elapsed time in milliseconds.
    pub duration_ms: f64,
    /// Diagnostic files attached because the run failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
}

impl PipelineReport {
    /// Returns the names of the attempted stages, in order.
    #[must_use]
    pub fn executed_stages(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Returns the first failed stage, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.is_success())
    }

    /// Process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success)
    }

    /// Persists the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), PerfError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Logs one line per stage plus the overall verdict.
    pub fn log_summary(&self) {
        for stage in &self.stages {
            info!(
                stage = %stage.name,
                status = %stage.status,
                duration_ms = stage.duration_ms,
                files = stage.files.len(),
                "Stage result"
            );
        }
        if self.success {
            info!(run_id = %self.run_id, duration_ms = self.duration_ms, "Job succeeded");
        } else {
            error!(
                run_id = %self.run_id,
                failed_stage = ?self.failed_stage().map(|s| s.name),
                attached = ?self.files,
                "Job failed"
            );
        }
    }
}

/// Collects stage results in order and produces the [`PipelineReport`].
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: Uuid,
    started_at: Timestamp,
    timer: Instant,
    results: Vec<StageResult>,
    success: bool,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    /// Starts a new aggregation; the clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            timer: Instant::now(),
            results: Vec::new(),
            success: true,
        }
    }

    /// Records a stage result and returns the running success flag.
    pub fn record(&mut self, result: StageResult) -> bool {
        self.success = self.success && result.is_success();
        self.results.push(result);
        self.success
    }

    /// Returns the running success flag.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Returns the results recorded so far.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// Finalizes the report, attaching `diagnostics` that exist when the run failed.
    #[must_use]
    pub fn finish(self, diagnostics: &[PathBuf]) -> PipelineReport {
        let files = if self.success {
            Vec::new()
        } else {
            diagnostics.iter().filter(|p| p.is_file()).cloned().collect()
        };
        PipelineReport {
            run_id: self.run_id,
            started_at: self.started_at,
            stages: self.results,
            success: self.success,
            duration_ms: self.timer.elapsed().as_secs_f64() * 1000.0,
            files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok(name: StageName) -> StageResult {
        StageResult::completed(name, Utc::now(), Duration::from_millis(5), String::new())
    }

    fn failed(name: StageName) -> StageResult {
        StageResult::failed(name, Utc::now(), Duration::ZERO, String::new(), "boom")
    }

    #[test]
    fn test_success_is_and_of_results() {
        let mut agg = ResultAggregator::new();
        assert!(agg.record(ok(StageName::InstallCandidate)));
        assert!(!agg.record(failed(StageName::InstallReference)));
        assert!(!agg.is_success());

        let report = agg.finish(&[]);
        assert!(!report.success);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failed_stage().map(|s| s.name), Some(StageName::InstallReference));
    }

    #[test]
    fn test_diagnostics_attached_only_on_failure_and_if_present() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("server.log");
        std::fs::write(&log, "crash").unwrap();
        let missing = dir.path().join("missing.log");
        let diagnostics = vec![log.clone(), missing];

        let mut agg = ResultAggregator::new();
        agg.record(ok(StageName::Configure));
        assert!(agg.finish(&diagnostics).files.is_empty());

        let mut agg = ResultAggregator::new();
        agg.record(failed(StageName::Configure));
        assert_eq!(agg.finish(&diagnostics).files, vec![log]);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("job_report.json");

        let mut agg = ResultAggregator::new();
        agg.record(ok(StageName::Report));
        let report = agg.finish(&[]);
        report.write_json(&path).unwrap();

        let parsed: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.run_id, report.run_id);
        assert_eq!(parsed.executed_stages(), vec![StageName::Report]);
        assert_eq!(parsed.exit_code(), 0);
    }
}
