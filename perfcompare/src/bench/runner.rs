//! Runs one benchmark definition through the comparison driver.

use super::summary::WallClockSummary;
use crate::errors::PerfError;
use crate::server::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default location of the timing wrapper.
pub const DEFAULT_TIME_BINARY: &str = "/usr/bin/time";

/// How the comparison driver is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// The comparison driver executable.
    pub driver: PathBuf,
    /// Optional `time` wrapper producing the timing line.
    pub time_binary: Option<PathBuf>,
    /// Port of the reference instance.
    pub left_port: u16,
    /// Port of the candidate instance.
    pub right_port: u16,
}

impl DriverConfig {
    /// Creates a config for `driver` against the fixed instance ports.
    #[must_use]
    pub fn new(driver: impl Into<PathBuf>) -> Self {
        Self {
            driver: driver.into(),
            time_binary: Some(PathBuf::from(DEFAULT_TIME_BINARY)),
            left_port: Role::Reference.ports().tcp,
            right_port: Role::Candidate.ports().tcp,
        }
    }

    /// Replaces the timing wrapper; `None` runs the driver directly.
    #[must_use]
    pub fn with_time_binary(mut self, time_binary: Option<PathBuf>) -> Self {
        self.time_binary = time_binary;
        self
    }

    /// Overrides the instance ports.
    #[must_use]
    pub fn with_ports(mut self, left: u16, right: u16) -> Self {
        self.left_port = left;
        self.right_port = right;
        self
    }
}

/// One benchmark run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkJob {
    /// Benchmark definition file.
    pub definition: PathBuf,
    /// Batch this run belongs to.
    pub shard_index: usize,
    /// Runs per query.
    pub runs: u32,
}

impl BenchmarkJob {
    /// Creates a job for `definition`.
    #[must_use]
    pub fn new(definition: impl Into<PathBuf>, runs: u32) -> Self {
        Self {
            definition: definition.into(),
            shard_index: 0,
            runs,
        }
    }

    /// Sets the batch index.
    #[must_use]
    pub fn with_shard_index(mut self, index: usize) -> Self {
        self.shard_index = index;
        self
    }

    /// Short name: the definition file stem.
    #[must_use]
    pub fn name(&self) -> String {
        self.definition
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Timing line `name\treal\tuser\tsys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallClockTiming {
    /// Benchmark short name.
    pub name: String,
    /// Elapsed real seconds.
    pub real: f64,
    /// User CPU seconds.
    pub user: f64,
    /// System CPU seconds.
    pub sys: f64,
}

impl WallClockTiming {
    /// Parses a timing line. Returns `None` unless it has four tab separated
    /// fields with numeric timings.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end().split('\t');
        let name = fields.next()?.to_string();
        let real = fields.next()?.trim().parse().ok()?;
        let user = fields.next()?.trim().parse().ok()?;
        let sys = fields.next()?.trim().parse().ok()?;
        if fields.next().is_some() || name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            real,
            user,
            sys,
        })
    }

    /// Finds the last line of `stderr` that is the timing line of `name`.
    #[must_use]
    pub fn find_line<'a>(stderr: &'a str, name: &str) -> Option<&'a str> {
        let prefix = format!("{name}\t");
        stderr.lines().rev().find(|line| line.starts_with(&prefix))
    }
}

/// What happened when one benchmark ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    /// Benchmark short name.
    pub name: String,
    /// Driver exit code; `None` if it never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    /// Raw driver stdout.
    pub stdout: String,
    /// In-process wall time.
    pub elapsed: Duration,
    /// Error log, written on failure.
    pub error_log: Option<PathBuf>,
    /// Raw results file.
    pub raw_results: PathBuf,
    /// Parsed timing line, if the driver produced one.
    pub timing: Option<WallClockTiming>,
}

impl BenchmarkOutcome {
    /// Returns true if the driver exited with status zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs benchmarks one at a time and feeds the wall-clock summary.
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    config: DriverConfig,
    summary: Arc<WallClockSummary>,
}

impl BenchmarkRunner {
    /// Creates a runner appending to `summary`.
    #[must_use]
    pub fn new(config: DriverConfig, summary: Arc<WallClockSummary>) -> Self {
        Self { config, summary }
    }

    /// Driver configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Builds the driver command line for `job`.
    #[must_use]
    pub fn command(&self, job: &BenchmarkJob) -> Command {
        let mut cmd = match &self.config.time_binary {
            Some(time) => {
                let mut cmd = Command::new(time);
                cmd.arg("-f")
                    .arg(format!("{}\t%e\t%U\t%S", job.name()))
                    .arg(&self.config.driver);
                cmd
            }
            None => Command::new(&self.config.driver),
        };
        cmd.args(["--host", "localhost", "localhost", "--port"])
            .arg(self.config.left_port.to_string())
            .arg(self.config.right_port.to_string())
            .arg("--runs")
            .arg(job.runs.to_string())
            .args(["--max-queries", "0", "--profile-seconds", "0"])
            .arg(&job.definition)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Runs `job` and writes its artifacts into `results_dir`.
    ///
    /// A failing or unspawnable driver is recorded in the outcome; only local
    /// I/O errors while writing artifacts are returned as errors.
    pub async fn run(
        &self,
        job: &BenchmarkJob,
        results_dir: &Path,
    ) -> Result<BenchmarkOutcome, PerfError> {
        let name = job.name();
        tokio::fs::create_dir_all(results_dir).await?;
        let raw_results = results_dir.join(format!("{name}-raw.tsv"));
        let err_path = results_dir.join(format!("{name}-err.log"));

        info!(benchmark = %name, shard = job.shard_index, runs = job.runs, "Running benchmark");
        let started = Instant::now();
        let output = self.command(job).output().await;
        let elapsed = started.elapsed();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(benchmark = %name, error = %e, "Failed to spawn comparison driver");
                tokio::fs::write(&raw_results, b"").await?;
                tokio::fs::write(&err_path, format!("failed to spawn driver: {e}\n")).await?;
                self.summary.append("").await?;
                return Ok(BenchmarkOutcome {
                    name,
                    exit_code: None,
                    stdout: String::new(),
                    elapsed,
                    error_log: Some(err_path),
                    raw_results,
                    timing: None,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        tokio::fs::write(&raw_results, &output.stdout).await?;

        let error_log = if output.status.success() {
            None
        } else {
            warn!(benchmark = %name, status = %output.status, "Benchmark failed");
            tokio::fs::write(&err_path, stderr.as_bytes()).await?;
            Some(err_path)
        };

        let timing_line = WallClockTiming::find_line(&stderr, &name);
        self.summary.append(timing_line.unwrap_or_default()).await?;
        let timing = timing_line.and_then(WallClockTiming::parse);
        debug!(benchmark = %name, elapsed_s = elapsed.as_secs_f64(), ?timing, "Benchmark finished");

        Ok(BenchmarkOutcome {
            name,
            exit_code: output.status.code(),
            stdout,
            elapsed,
            error_log,
            raw_results,
            timing,
        })
    }

    /// Runs `jobs` sequentially.
    pub async fn run_all(
        &self,
        jobs: &[BenchmarkJob],
        results_dir: &Path,
    ) -> Result<Vec<BenchmarkOutcome>, PerfError> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.run(job, results_dir).await?);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::SUMMARY_FILE;
    use crate::testing::{write_script, FAKE_DRIVER};
    use pretty_assertions::assert_eq;

    struct Fixture {
        _dir: tempfile::TempDir,
        results: PathBuf,
        defs: PathBuf,
        runner: BenchmarkRunner,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let driver = write_script(dir.path(), "perf.py", FAKE_DRIVER);
        let results = dir.path().join("results");
        let defs = dir.path().join("defs");
        std::fs::create_dir_all(&defs).unwrap();
        let summary = Arc::new(WallClockSummary::in_dir(&results).unwrap());
        let runner = BenchmarkRunner::new(DriverConfig::new(driver).with_time_binary(None), summary);
        Fixture {
            _dir: dir,
            results,
            defs,
            runner,
        }
    }

    fn definition(defs: &Path, name: &str) -> PathBuf {
        let path = defs.join(format!("{name}.xml"));
        std::fs::write(&path, "<test/>").unwrap();
        path
    }

    #[test]
    fn test_parse_timing_line() {
        assert_eq!(
            WallClockTiming::parse("sort\t12.5\t3.25\t0.75"),
            Some(WallClockTiming {
                name: "sort".to_string(),
                real: 12.5,
                user: 3.25,
                sys: 0.75,
            })
        );
        assert_eq!(WallClockTiming::parse("sort\tx\t1\t1"), None);
        assert_eq!(WallClockTiming::parse("sort\t1\t1"), None);
        assert_eq!(WallClockTiming::parse("\t1\t1\t1"), None);
    }

    #[test]
    fn test_find_last_timing_line() {
        let stderr = "sort\t1\t1\t1\nnoise\nsorting\t9\t9\t9\nsort\t2\t2\t2\nCommand exited\n";
        assert_eq!(WallClockTiming::find_line(stderr, "sort"), Some("sort\t2\t2\t2"));
        assert_eq!(WallClockTiming::find_line(stderr, "group"), None);
    }

    #[test]
    fn test_command_with_time_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Arc::new(WallClockSummary::in_dir(dir.path()).unwrap());
        let runner = BenchmarkRunner::new(DriverConfig::new("perf.py"), summary);
        let cmd = runner.command(&BenchmarkJob::new("/defs/sort.xml", 7));
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), DEFAULT_TIME_BINARY);
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-f",
                "sort\t%e\t%U\t%S",
                "perf.py",
                "--host",
                "localhost",
                "localhost",
                "--port",
                "9001",
                "19001",
                "--runs",
                "7",
                "--max-queries",
                "0",
                "--profile-seconds",
                "0",
                "/defs/sort.xml",
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_benchmark_artifacts() {
        let fx = fixture();
        let job = BenchmarkJob::new(definition(&fx.defs, "sort"), 3);

        let outcome = fx.runner.run(&job, &fx.results).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.error_log, None);
        assert!(!fx.results.join("sort-err.log").exists());
        assert_eq!(outcome.timing.as_ref().map(|t| t.real), Some(0.5));

        let raw = std::fs::read_to_string(fx.results.join("sort-raw.tsv")).unwrap();
        assert!(raw.contains("--port 9001 19001 --runs 3"));

        let summary = std::fs::read_to_string(fx.results.join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary, "sort\t0.50\t0.25\t0.05\n");
    }

    #[tokio::test]
    async fn test_failing_benchmark_is_recorded_not_raised() {
        let fx = fixture();
        let job = BenchmarkJob::new(definition(&fx.defs, "broken_join"), 1);

        let outcome = fx.runner.run(&job, &fx.results).await.unwrap();

        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.timing, None);
        let err_log = std::fs::read_to_string(outcome.error_log.unwrap()).unwrap();
        assert!(err_log.contains("Traceback"));
        assert!(fx.results.join("broken_join-raw.tsv").exists());

        let summary = std::fs::read_to_string(fx.results.join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary, "\n");
    }

    #[tokio::test]
    async fn test_missing_driver_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Arc::new(WallClockSummary::in_dir(dir.path()).unwrap());
        let runner = BenchmarkRunner::new(
            DriverConfig::new("/nonexistent/perf.py").with_time_binary(None),
            summary,
        );

        let outcome = runner
            .run(&BenchmarkJob::new("/defs/sort.xml", 1), dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, None);
        assert!(!outcome.is_success());
        assert!(dir.path().join("sort-err.log").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap(), "\n");
    }

    #[tokio::test]
    async fn test_one_summary_line_per_benchmark() {
        let fx = fixture();
        let jobs: Vec<BenchmarkJob> = ["a_sort", "b_broken", "c_group"]
            .iter()
            .map(|name| BenchmarkJob::new(definition(&fx.defs, name), 1))
            .collect();

        let outcomes = fx.runner.run_all(&jobs, &fx.results).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
        let summary = std::fs::read_to_string(fx.results.join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary.lines().collect::<Vec<_>>(), vec![
            "a_sort\t0.50\t0.25\t0.05",
            "",
            "c_group\t0.50\t0.25\t0.05",
        ]);
    }
}
