//! Pipeline execution.
//!
//! This module provides:
//! - The fail-fast, resumable [`StageMachine`]
//! - Result aggregation into a [`PipelineReport`]
//! - Sentinel markers for one-time setup stages

mod machine;
mod report;
mod sentinel;

pub use machine::StageMachine;
pub use report::{PipelineReport, ResultAggregator};
pub use sentinel::SentinelMarker;
