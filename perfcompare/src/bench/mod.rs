//! Benchmark execution: discovery, batching and the driver runner.

mod batch;
mod runner;
mod summary;

pub use batch::{discover, shard, BatchSpec};
pub use runner::{
    BenchmarkJob, BenchmarkOutcome, BenchmarkRunner, DriverConfig, WallClockTiming,
    DEFAULT_TIME_BINARY,
};
pub use summary::{WallClockSummary, SUMMARY_FILE};
