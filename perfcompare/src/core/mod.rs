//! Core domain model types shared by stages and the pipeline.

mod status;

pub use status::StageStatus;
