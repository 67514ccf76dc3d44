//! Perfcompare command-line entry point.
//!
//! Exit codes: 0 when every executed stage succeeded, 1 when a stage failed,
//! 2 when the configuration was rejected before anything ran.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use perfcompare::config::{BuildArch, Layout, RunOptions, TestOptions, DEFAULT_RUNS, DEFAULT_WORK_ROOT};
use perfcompare::errors::PerfError;
use perfcompare::job::PerfJob;
use perfcompare::stages::StageName;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "perfcompare")]
#[command(author, version, about = "Compare the performance of two server builds")]
struct Cli {
    /// Directory containing the candidate `clickhouse` binary
    #[arg(long, env = "PERF_BINARY_DIR", default_value = "/tmp/perfcompare/input")]
    binary_dir: PathBuf,

    /// Comma separated options: batch as N/M, architecture tag (amd_release, arm_release)
    #[arg(long, default_value = "")]
    test_options: String,

    /// Stage to resume from
    #[arg(long)]
    start_stage: Option<String>,

    /// Only run benchmarks whose file name contains this substring
    #[arg(long, default_value = "")]
    filter: String,

    /// Reference binary location; `{build_name}` is replaced by the build flavour
    #[arg(long, env = "PERF_REFERENCE_URL")]
    reference_url: Option<String>,

    /// Commit of the reference build, recorded in the report
    #[arg(long, env = "PERF_REFERENCE_COMMIT")]
    reference_commit: Option<String>,

    /// Source checkout with configs, benchmark definitions and scripts
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,

    /// Work root holding both instances, the seed and the results
    #[arg(long, env = "PERF_WORK_ROOT", default_value = DEFAULT_WORK_ROOT)]
    work_root: PathBuf,

    /// Runs per benchmark query
    #[arg(long, default_value_t = DEFAULT_RUNS)]
    runs: u32,

    /// Skip the unsharded warm-up pass
    #[arg(long)]
    no_warmup: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_options(&self) -> Result<RunOptions, PerfError> {
        let test_options = TestOptions::parse(&self.test_options)?;
        let arch = match test_options.arch {
            Some(arch) => arch,
            None => BuildArch::detect()?,
        };
        let repo_root = if self.repo_root.is_absolute() {
            self.repo_root.clone()
        } else {
            std::env::current_dir()?.join(&self.repo_root)
        };

        let mut options = RunOptions::new(&self.binary_dir, arch)
            .with_repo_root(repo_root)
            .with_layout(Layout::new(&self.work_root))
            .with_batch(test_options.batch)
            .with_filter(self.filter.clone())
            .with_runs(self.runs)
            .with_warmup(!self.no_warmup);
        if let Some(stage) = &self.start_stage {
            options = options.with_start_stage(stage.parse::<StageName>()?);
        }
        if let Some(url) = &self.reference_url {
            options = options.with_reference_url(url.clone());
        }
        if let Some(commit) = &self.reference_commit {
            options = options.with_reference_commit(commit.clone());
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let options = match cli.run_options() {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(2));
        }
    };
    info!(
        batch = %options.batch,
        arch = options.arch.build_type(),
        start = options.start_stage.map_or("install-candidate", |s| s.as_str()),
        "Starting performance comparison"
    );

    let report_file = options.layout.report_file();
    let report = match PerfJob::new(options).run().await {
        Ok(report) => report,
        Err(e) if e.is_configuration() => {
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    report.log_summary();
    report
        .write_json(&report_file)
        .with_context(|| format!("Failed to write job report to {}", report_file.display()))?;

    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}
