//! Event sink trait and implementations.

use crate::core::StageStatus;
use crate::stages::StageName;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info};

/// Progress events emitted by the stage machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A stage is about to run its steps.
    StageStarted {
        /// Stage name.
        stage: StageName,
    },
    /// A stage finished without a failing step.
    StageCompleted {
        /// Stage name.
        stage: StageName,
        /// `ok` or `skip`.
        status: StageStatus,
        /// Elapsed time in milliseconds.
        duration_ms: f64,
    },
    /// A stage stopped at a failing step.
    StageFailed {
        /// Stage name.
        stage: StageName,
        /// Failure message.
        error: String,
    },
    /// The run is over.
    PipelineCompleted {
        /// Overall success.
        success: bool,
        /// Number of attempted stages.
        stages: usize,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `stage.started`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::PipelineCompleted { .. } => "pipeline.completed",
        }
    }
}

/// Trait for sinks that receive pipeline events.
///
/// Emission must never fail the pipeline; implementations swallow their own
/// errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: &PipelineEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}
}

/// A sink that logs events using the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage } => {
                info!(event_type = event.event_type(), %stage, "Stage started");
            }
            PipelineEvent::StageCompleted {
                stage,
                status,
                duration_ms,
            } => {
                info!(event_type = event.event_type(), %stage, %status, duration_ms, "Stage completed");
            }
            PipelineEvent::StageFailed { stage, error } => {
                error!(event_type = event.event_type(), %stage, error = %error, "Stage failed");
            }
            PipelineEvent::PipelineCompleted { success, stages } => {
                info!(event_type = event.event_type(), success, stages, "Pipeline completed");
            }
        }
    }
}

/// A sink that records events in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the stages for which a `stage.started` event was seen, in order.
    #[must_use]
    pub fn started_stages(&self) -> Vec<StageName> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageStarted { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}
