//! Run configuration: the fixed filesystem layout, build architecture and the
//! parsed command-line options.

use crate::bench::BatchSpec;
use crate::errors::ConfigError;
use crate::server::Role;
use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default work root of a run.
pub const DEFAULT_WORK_ROOT: &str = "/tmp/perfcompare";

/// Name of the multi-call server binary.
pub const SERVER_BINARY: &str = "clickhouse";

/// Tool names symlinked to the multi-call binary in each instance root.
pub const SERVER_TOOLS: [&str; 4] = [
    "clickhouse-server",
    "clickhouse-client",
    "clickhouse-local",
    "clickhouse-keeper",
];

/// Default number of runs per benchmark query.
pub const DEFAULT_RUNS: u32 = 7;

/// A dataset archive extracted into the seed directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSource {
    /// Short name.
    pub name: &'static str,
    /// Archive location.
    pub url: &'static str,
}

/// Datasets every benchmark definition may reference.
pub const DATASETS: [DatasetSource; 4] = [
    DatasetSource {
        name: "hits1",
        url: "https://clickhouse-datasets.s3.amazonaws.com/hits/partitions/hits_v1.tar",
    },
    DatasetSource {
        name: "hits10",
        url: "https://clickhouse-private-datasets.s3.amazonaws.com/hits_10m_single/partitions/hits_10m_single.tar",
    },
    DatasetSource {
        name: "hits100",
        url: "https://clickhouse-private-datasets.s3.amazonaws.com/hits_100m_single/partitions/hits_100m_single.tar",
    },
    DatasetSource {
        name: "values",
        url: "https://clickhouse-datasets.s3.amazonaws.com/values_with_expressions/partitions/test_values.tar",
    },
];

/// The fixed directory layout under a work root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    root: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_WORK_ROOT)
    }
}

impl Layout {
    /// Creates a layout under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The work root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory holding both instance roots and the results.
    #[must_use]
    pub fn perf_wd(&self) -> PathBuf {
        self.root.join("perf_wd")
    }

    /// Root directory of one instance (`left/` or `right/`).
    #[must_use]
    pub fn instance_root(&self, role: Role) -> PathBuf {
        self.perf_wd().join(role.dir_name())
    }

    /// Config directory of one instance.
    #[must_use]
    pub fn config_dir(&self, role: Role) -> PathBuf {
        self.instance_root(role).join("config")
    }

    /// Captured server log of one instance.
    #[must_use]
    pub fn server_log(&self, role: Role) -> PathBuf {
        self.instance_root(role).join("server.log")
    }

    /// Shared seed database, populated once and hard-link copied.
    #[must_use]
    pub fn seed_db(&self) -> PathBuf {
        self.root.join("db0")
    }

    /// Shared seed keeper storage.
    #[must_use]
    pub fn seed_coordination(&self) -> PathBuf {
        self.root.join("coordination0")
    }

    /// Top-level-domain lists shared by both instances.
    #[must_use]
    pub fn top_level_domains(&self) -> PathBuf {
        self.perf_wd().join("top_level_domains")
    }

    /// Directory receiving per-benchmark artifacts and the summary.
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.perf_wd()
    }

    /// Directory receiving the artifacts of the warm-up pass.
    #[must_use]
    pub fn warmup_dir(&self) -> PathBuf {
        self.perf_wd().join("warmup")
    }

    /// The shared wall-clock summary.
    #[must_use]
    pub fn summary_file(&self) -> PathBuf {
        self.results_dir().join(crate::bench::SUMMARY_FILE)
    }

    /// The persisted job report.
    #[must_use]
    pub fn report_file(&self) -> PathBuf {
        self.perf_wd().join("job_report.json")
    }

    /// Marker of a completed reference install.
    #[must_use]
    pub fn reference_marker(&self) -> PathBuf {
        self.instance_root(Role::Reference).join(".done")
    }

    /// Marker of a completed dataset download.
    #[must_use]
    pub fn dataset_marker(&self) -> PathBuf {
        self.seed_db().join(".done")
    }
}

/// Build flavour of the host, used to pick the reference artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildArch {
    /// x86-64 release build.
    Amd,
    /// aarch64 release build.
    Arm,
}

impl BuildArch {
    /// Maps a test-option tag such as `amd_release` to an architecture.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.contains("amd") {
            Some(Self::Amd)
        } else if tag.contains("arm") {
            Some(Self::Arm)
        } else {
            None
        }
    }

    /// Detects the architecture of the running host.
    pub fn detect() -> Result<Self, ConfigError> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Self::Amd),
            "aarch64" => Ok(Self::Arm),
            other => Err(ConfigError::UnknownArchitecture(other.to_string())),
        }
    }

    /// Build type tag.
    #[must_use]
    pub const fn build_type(&self) -> &'static str {
        match self {
            Self::Amd => "amd_release",
            Self::Arm => "arm_release",
        }
    }

    /// Artifact directory name of the release package.
    #[must_use]
    pub const fn build_name(&self) -> &'static str {
        match self {
            Self::Amd => "package_release",
            Self::Arm => "package_aarch64",
        }
    }
}

/// Parsed `--test-options` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOptions {
    /// Batch assignment of this worker.
    pub batch: BatchSpec,
    /// Architecture tag, if one was given.
    pub arch: Option<BuildArch>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            batch: BatchSpec::single(),
            arch: None,
        }
    }
}

impl TestOptions {
    /// Parses a comma separated option list such as `1/3,arm_release`.
    ///
    /// Unrecognized entries are ignored.
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        let mut parsed = Self::default();
        for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            if option.contains('/') {
                parsed.batch = option.parse()?;
            } else if let Some(arch) = BuildArch::from_tag(option) {
                parsed.arch = Some(arch);
            }
        }
        Ok(parsed)
    }
}

/// Fully resolved options of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory holding the candidate binary.
    pub binary_dir: PathBuf,
    /// Source checkout holding configs, benchmark definitions and scripts.
    pub repo_root: PathBuf,
    /// Directory layout.
    pub layout: Layout,
    /// Batch assignment.
    pub batch: BatchSpec,
    /// Host build flavour.
    pub arch: BuildArch,
    /// Stage to resume from.
    pub start_stage: Option<StageName>,
    /// Benchmark-name substring filter.
    pub filter: String,
    /// Reference binary location; `{build_name}` is substituted.
    pub reference_url: Option<String>,
    /// Commit the reference build was made from, recorded by the report.
    pub reference_commit: Option<String>,
    /// Runs per benchmark query.
    pub runs: u32,
    /// Run the unsharded warm-up pass before the batch.
    pub warmup: bool,
}

impl RunOptions {
    /// Creates options with defaults for everything but the binary directory.
    #[must_use]
    pub fn new(binary_dir: impl Into<PathBuf>, arch: BuildArch) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            repo_root: PathBuf::from("."),
            layout: Layout::default(),
            batch: BatchSpec::single(),
            arch,
            start_stage: None,
            filter: String::new(),
            reference_url: None,
            reference_commit: None,
            runs: DEFAULT_RUNS,
            warmup: true,
        }
    }

    /// Sets the source checkout.
    #[must_use]
    pub fn with_repo_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.repo_root = root.into();
        self
    }

    /// Sets the layout.
    #[must_use]
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the batch.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchSpec) -> Self {
        self.batch = batch;
        self
    }

    /// Sets the benchmark filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the reference binary location.
    #[must_use]
    pub fn with_reference_url(mut self, url: impl Into<String>) -> Self {
        self.reference_url = Some(url.into());
        self
    }

    /// Sets the reference commit.
    #[must_use]
    pub fn with_reference_commit(mut self, commit: impl Into<String>) -> Self {
        self.reference_commit = Some(commit.into());
        self
    }

    /// Sets the stage to resume from.
    #[must_use]
    pub fn with_start_stage(mut self, stage: StageName) -> Self {
        self.start_stage = Some(stage);
        self
    }

    /// Sets the runs per benchmark query.
    #[must_use]
    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = runs;
        self
    }

    /// Enables or disables the warm-up pass.
    #[must_use]
    pub fn with_warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }

    /// Directory holding the benchmark definitions.
    #[must_use]
    pub fn benchmark_dir(&self) -> PathBuf {
        self.repo_root.join("tests").join("performance")
    }

    /// The comparison driver.
    #[must_use]
    pub fn driver_script(&self) -> PathBuf {
        self.benchmark_dir().join("scripts").join("perf.py")
    }

    /// The report renderer.
    #[must_use]
    pub fn report_script(&self) -> PathBuf {
        self.repo_root
            .join("ci")
            .join("jobs")
            .join("scripts")
            .join("perf")
            .join("compare.sh")
    }

    /// Path of the candidate multi-call binary.
    #[must_use]
    pub fn candidate_binary(&self) -> PathBuf {
        self.binary_dir.join(SERVER_BINARY)
    }

    /// Reference URL with the architecture substituted.
    #[must_use]
    pub fn resolved_reference_url(&self) -> Option<String> {
        self.reference_url
            .as_ref()
            .map(|url| url.replace("{build_name}", self.arch.build_name()))
    }

    /// Checks the preconditions that must hold before anything is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let binary = self.candidate_binary();
        let present = std::fs::symlink_metadata(&binary)
            .map(|m| m.is_file() || m.file_type().is_symlink())
            .unwrap_or(false);
        if !present {
            return Err(ConfigError::MissingBinary(self.binary_dir.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/w");
        assert_eq!(layout.instance_root(Role::Reference), PathBuf::from("/w/perf_wd/left"));
        assert_eq!(layout.config_dir(Role::Candidate), PathBuf::from("/w/perf_wd/right/config"));
        assert_eq!(layout.summary_file(), PathBuf::from("/w/perf_wd/wall-clock-times.tsv"));
        assert_eq!(layout.dataset_marker(), PathBuf::from("/w/db0/.done"));
        assert_eq!(layout.reference_marker(), PathBuf::from("/w/perf_wd/left/.done"));
    }

    #[test]
    fn test_parse_test_options() {
        let opts = TestOptions::parse("2/4,arm_release").unwrap();
        assert_eq!(opts.batch, BatchSpec::new(2, 4).unwrap());
        assert_eq!(opts.arch, Some(BuildArch::Arm));

        let opts = TestOptions::parse("").unwrap();
        assert_eq!(opts, TestOptions::default());

        let opts = TestOptions::parse("amd_release, something_else").unwrap();
        assert_eq!(opts.arch, Some(BuildArch::Amd));
        assert_eq!(opts.batch, BatchSpec::single());
    }

    #[test]
    fn test_parse_test_options_rejects_bad_batch() {
        assert!(TestOptions::parse("3/3").is_err());
        assert!(TestOptions::parse("a/b,amd").is_err());
    }

    #[test]
    fn test_reference_url_substitution() {
        let opts = RunOptions::new("/bin", BuildArch::Arm)
            .with_reference_url("https://builds/x/{build_name}/clickhouse");
        assert_eq!(
            opts.resolved_reference_url().as_deref(),
            Some("https://builds/x/package_aarch64/clickhouse")
        );
    }

    #[test]
    fn test_validate_requires_binary() {
        let dir = tempfile::tempdir().unwrap();
        let opts = RunOptions::new(dir.path(), BuildArch::Amd);
        assert_eq!(
            opts.validate(),
            Err(ConfigError::MissingBinary(dir.path().to_path_buf()))
        );

        std::fs::write(dir.path().join(SERVER_BINARY), "").unwrap();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join(SERVER_BINARY)).unwrap();
        assert!(RunOptions::new(dir.path(), BuildArch::Amd).validate().is_ok());
    }
}
