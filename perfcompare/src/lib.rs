//! # Perfcompare
//!
//! An orchestrator for A/B performance comparison of two builds of a database
//! server.
//!
//! Perfcompare drives one comparison run as a fixed, resumable sequence of
//! stages:
//!
//! - **Installation**: the candidate build and a released reference build
//! - **Data preparation**: parallel dataset download and one shared seed
//!   directory, hard-link copied into both instances
//! - **Server lifecycle**: two isolated instances on disjoint ports, bounded
//!   readiness polling and process-group teardown
//! - **Benchmarking**: round-robin sharding of benchmark definitions across
//!   workers and per-benchmark artifact capture
//! - **Reporting**: an aggregated job report with diagnostics on failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use perfcompare::prelude::*;
//!
//! let options = RunOptions::new("/tmp/perfcompare/input", BuildArch::detect()?)
//!     .with_reference_url("https://builds.example.com/{build_name}/clickhouse")
//!     .with_start_stage(StageName::RunTests);
//!
//! let report = PerfJob::new(options).run().await?;
//! report.log_summary();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bench;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod job;
pub mod pipeline;
pub mod server;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bench::{
        discover, shard, BatchSpec, BenchmarkJob, BenchmarkOutcome, BenchmarkRunner,
        DriverConfig, WallClockSummary, WallClockTiming,
    };
    pub use crate::config::{BuildArch, Layout, RunOptions, TestOptions};
    pub use crate::core::StageStatus;
    pub use crate::errors::{
        ConfigError, PerfError, PipelineValidationError, ServerError, StepFailure,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::job::PerfJob;
    pub use crate::pipeline::{PipelineReport, ResultAggregator, StageMachine};
    pub use crate::server::{
        CliQueryClient, QueryClient, Role, ServerProcess, ServerProfile, ServerTimeouts,
    };
    pub use crate::stages::{StageDefinition, StageName, StageResult, Step};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
