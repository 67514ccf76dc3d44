//! The resumable, fail-fast stage machine.

use super::report::{PipelineReport, ResultAggregator};
use super::sentinel::SentinelMarker;
use crate::errors::PipelineValidationError;
use crate::events::{EventSink, LoggingEventSink, PipelineEvent};
use crate::stages::{ShellContext, StageDefinition, StageName, StageResult};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs a fixed, ordered list of stages top to bottom.
///
/// Execution stops after the first failed stage; stages that never ran are
/// absent from the report. A run may resume from any stage in the list, in
/// which case the stages before it are neither executed nor reported.
pub struct StageMachine {
    stages: Vec<StageDefinition>,
    shell: ShellContext,
    sink: Arc<dyn EventSink>,
    diagnostics: Vec<PathBuf>,
}

impl std::fmt::Debug for StageMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMachine")
            .field("stages", &self.stage_names())
            .field("shell", &self.shell)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl StageMachine {
    /// Creates a machine over `stages`.
    ///
    /// The stages must be non-empty, unique and in [`StageName::ALL`] order.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, PipelineValidationError> {
        if stages.is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline must contain at least one stage",
            ));
        }
        for pair in stages.windows(2) {
            if pair[0].name >= pair[1].name {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' must not follow '{}'",
                    pair[1].name, pair[0].name
                ))
                .with_stages(vec![pair[0].name.to_string(), pair[1].name.to_string()]));
            }
        }

        Ok(Self {
            stages,
            shell: ShellContext::default(),
            sink: Arc::new(LoggingEventSink),
            diagnostics: Vec::new(),
        })
    }

    /// Sets the environment for shell steps.
    #[must_use]
    pub fn with_shell(mut self, shell: ShellContext) -> Self {
        self.shell = shell;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Registers a file attached to the report when the run fails.
    #[must_use]
    pub fn with_diagnostic_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics.push(path.into());
        self
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Resolves the stages a run starting at `start` would execute.
    pub fn plan(&self, start: Option<&str>) -> Result<&[StageDefinition], PipelineValidationError> {
        let Some(name) = start else {
            return Ok(&self.stages);
        };
        let stage: StageName = name.parse()?;
        let index = self
            .stages
            .iter()
            .position(|s| s.name == stage)
            .ok_or_else(|| {
                PipelineValidationError::new(format!("Stage '{stage}' is not part of this pipeline"))
                    .with_stages(vec![stage.to_string()])
            })?;
        Ok(&self.stages[index..])
    }

    /// Runs the pipeline, optionally resuming at `start`.
    ///
    /// Validation happens before any step runs, so an invalid `start` has no
    /// side effects.
    pub async fn run(&self, start: Option<&str>) -> Result<PipelineReport, PipelineValidationError> {
        let plan = self.plan(start)?;
        if let Some(first) = plan.first() {
            info!(start = %first.name, stages = plan.len(), "Pipeline starting");
        }

        let mut aggregator = ResultAggregator::new();
        for stage in plan {
            if !aggregator.is_success() {
                break;
            }
            let result = self.run_stage(stage).await;
            aggregator.record(result);
        }

        let report = aggregator.finish(&self.diagnostics);
        self.sink
            .emit(&PipelineEvent::PipelineCompleted {
                success: report.success,
                stages: report.stages.len(),
            })
            .await;
        Ok(report)
    }

    async fn run_stage(&self, stage: &StageDefinition) -> StageResult {
        let marker = stage.sentinel.as_ref().map(SentinelMarker::new);
        if let Some(marker) = marker.as_ref().filter(|m| m.is_present()) {
            let result = StageResult::skipped(
                stage.name,
                format!("Marker {} present, stage skipped\n", marker.path().display()),
            );
            self.sink
                .emit(&PipelineEvent::StageCompleted {
                    stage: stage.name,
                    status: result.status,
                    duration_ms: 0.0,
                })
                .await;
            return result;
        }

        self.sink
            .emit(&PipelineEvent::StageStarted { stage: stage.name })
            .await;
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut log = String::new();

        for step in &stage.steps {
            if let Err(failure) = step.execute(&self.shell, &mut log).await {
                warn!(stage = %stage.name, step = %step.label(), error = %failure, "Step failed");
                let files = stage
                    .failure_attachments
                    .iter()
                    .filter(|p| p.is_file())
                    .cloned()
                    .collect();
                self.sink
                    .emit(&PipelineEvent::StageFailed {
                        stage: stage.name,
                        error: failure.to_string(),
                    })
                    .await;
                return StageResult::failed(stage.name, started_at, timer.elapsed(), log, failure.0)
                    .with_files(files);
            }
        }

        if let Some(marker) = &marker {
            if let Err(e) = marker.mark() {
                warn!(stage = %stage.name, marker = %marker.path().display(), error = %e, "Failed to write marker");
            }
        }

        let result = StageResult::completed(stage.name, started_at, timer.elapsed(), log);
        self.sink
            .emit(&PipelineEvent::StageCompleted {
                stage: stage.name,
                status: result.status,
                duration_ms: result.duration_ms,
            })
            .await;
        result
    }
}
