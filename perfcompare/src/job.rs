//! Assembly of the seven stages of a comparison run.

use crate::bench::{discover, shard, BenchmarkJob, BenchmarkRunner, DriverConfig, WallClockSummary};
use crate::config::{RunOptions, DATASETS, SERVER_BINARY, SERVER_TOOLS};
use crate::errors::{ConfigError, PerfError, StepFailure};
use crate::events::{EventSink, LoggingEventSink};
use crate::pipeline::{PipelineReport, SentinelMarker, StageMachine};
use crate::server::{
    CliQueryClient, QueryClient, Role, ServerProcess, ServerProfile, ServerTimeouts, Termination,
};
use crate::stages::{ShellContext, StageDefinition, StageName};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Diagnostic queries logged once both servers are up.
const DIAGNOSTIC_QUERIES: [&str; 2] = [
    "select * from system.tables where database NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema')",
    "select * from system.build_options",
];

/// A server shared between the stage steps that drive it.
pub type SharedServer = Arc<Mutex<ServerProcess>>;

/// One comparison run: options, both server instances and the driver setup.
pub struct PerfJob {
    options: RunOptions,
    timeouts: ServerTimeouts,
    client: Option<Arc<dyn QueryClient>>,
    driver: DriverConfig,
    sink: Arc<dyn EventSink>,
    reference: SharedServer,
    candidate: SharedServer,
}

impl std::fmt::Debug for PerfJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfJob")
            .field("options", &self.options)
            .field("timeouts", &self.timeouts)
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}

fn path(p: &Path) -> String {
    p.display().to_string()
}

impl PerfJob {
    /// Creates a job for `options` with default timeouts and the real clients.
    #[must_use]
    pub fn new(options: RunOptions) -> Self {
        let driver = DriverConfig::new(options.driver_script());
        let timeouts = ServerTimeouts::default();
        let reference = Arc::new(Mutex::new(build_server(&options, Role::Reference, timeouts, None)));
        let candidate = Arc::new(Mutex::new(build_server(&options, Role::Candidate, timeouts, None)));
        Self {
            options,
            timeouts,
            client: None,
            driver,
            sink: Arc::new(LoggingEventSink),
            reference,
            candidate,
        }
    }

    /// Overrides the server lifecycle timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self.rebuild_servers();
        self
    }

    /// Routes all server queries through `client`.
    #[must_use]
    pub fn with_query_client(mut self, client: Arc<dyn QueryClient>) -> Self {
        self.client = Some(client);
        self.rebuild_servers();
        self
    }

    /// Overrides the driver invocation.
    #[must_use]
    pub fn with_driver(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the event sink of the stage machine.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    fn rebuild_servers(&mut self) {
        self.reference = Arc::new(Mutex::new(build_server(
            &self.options,
            Role::Reference,
            self.timeouts,
            self.client.clone(),
        )));
        self.candidate = Arc::new(Mutex::new(build_server(
            &self.options,
            Role::Candidate,
            self.timeouts,
            self.client.clone(),
        )));
    }

    /// Run options.
    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// The server of `role`.
    #[must_use]
    pub fn server(&self, role: Role) -> SharedServer {
        match role {
            Role::Reference => Arc::clone(&self.reference),
            Role::Candidate => Arc::clone(&self.candidate),
        }
    }

    /// Shell environment: the source checkout as working directory and the
    /// candidate instance root first on `PATH`.
    #[must_use]
    pub fn shell(&self) -> ShellContext {
        ShellContext::new(&self.options.repo_root)
            .with_path_prefix(self.options.layout.instance_root(Role::Candidate))
    }

    /// Checks every precondition of the requested run. Nothing is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.options.validate()?;
        let resumes_past_reference = self
            .options
            .start_stage
            .map_or(false, |stage| stage > StageName::InstallReference);
        let installed = SentinelMarker::new(self.options.layout.reference_marker()).is_present();
        if self.options.reference_url.is_none() && !resumes_past_reference && !installed {
            return Err(ConfigError::MissingReferenceUrl(StageName::InstallReference));
        }
        Ok(())
    }

    /// Builds the stage machine of this run.
    pub fn machine(&self) -> Result<StageMachine, PerfError> {
        let layout = &self.options.layout;
        let mut machine = StageMachine::new(self.stages())?
            .with_shell(self.shell())
            .with_event_sink(Arc::clone(&self.sink));
        for role in Role::BOTH {
            machine = machine.with_diagnostic_file(layout.server_log(role));
        }
        Ok(machine)
    }

    /// Validates, runs the pipeline and stops whatever servers are still up.
    pub async fn run(&self) -> Result<PipelineReport, PerfError> {
        self.validate()?;
        let machine = self.machine()?;
        let start = self.options.start_stage.map(|s| s.as_str());
        let report = machine.run(start).await;
        self.shutdown().await;
        Ok(report?)
    }

    /// Terminates both servers if they are running.
    pub async fn shutdown(&self) -> Vec<Termination> {
        let mut stopped = Vec::new();
        for role in Role::BOTH {
            let server = self.server(role);
            let mut server = server.lock().await;
            if let Some(termination) = server.terminate().await {
                stopped.push(termination);
            }
        }
        stopped
    }

    /// The seven stage definitions in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<StageDefinition> {
        vec![
            self.install_candidate(),
            self.install_reference(),
            self.fetch_datasets(),
            self.configure(),
            self.start_servers(),
            self.run_tests(),
            self.report(),
        ]
    }

    fn install_candidate(&self) -> StageDefinition {
        let layout = &self.options.layout;
        let right = layout.instance_root(Role::Candidate);
        let config = path(&layout.config_dir(Role::Candidate));
        let binary = path(&self.options.candidate_binary());

        let mut stage = StageDefinition::new(StageName::InstallCandidate)
            .shell(format!("mkdir -p {config}"))
            .shell(format!("cp ./programs/server/config.xml {config}"))
            .shell(format!("cp ./programs/server/users.xml {config}"))
            .shell(format!("cp -r --dereference ./programs/server/config.d {config}"))
            .shell(format!(
                "cp -r ./tests/performance/scripts/config/users.d {config}/users.d"
            ))
            .shell(format!(
                "cp -r ./tests/config/top_level_domains {}",
                path(&layout.perf_wd())
            ))
            .shell(format!("chmod +x {binary}"));
        for tool in SERVER_TOOLS {
            stage = stage.shell(format!("ln -sf {binary} {}", path(&right.join(tool))));
        }
        stage.shell("clickhouse-local --version")
    }

    fn install_reference(&self) -> StageDefinition {
        let layout = &self.options.layout;
        let left = layout.instance_root(Role::Reference);
        let binary = path(&left.join(SERVER_BINARY));

        let mut stage = StageDefinition::new(StageName::InstallReference)
            .with_sentinel(layout.reference_marker())
            .shell(format!("mkdir -p {}", path(&layout.config_dir(Role::Reference))));
        stage = match self.options.resolved_reference_url() {
            Some(url) => stage.shell(format!("wget -nv -O {binary} {url}")),
            None => stage.action("download reference binary", || async {
                Err(StepFailure::new(
                    ConfigError::MissingReferenceUrl(StageName::InstallReference).to_string(),
                ))
            }),
        };
        stage = stage
            .shell(format!("chmod +x {binary}"))
            .shell(format!("cp -r ./tests/performance {}/", path(&left)));
        for tool in SERVER_TOOLS {
            stage = stage.shell(format!("ln -sf {binary} {}", path(&left.join(tool))));
        }
        stage
    }

    fn fetch_datasets(&self) -> StageDefinition {
        let layout = &self.options.layout;
        let db = path(&layout.seed_db());
        let fetches = DATASETS
            .iter()
            .map(|dataset| {
                format!(
                    "wget -nv -nd -c \"{}\" -O- | tar --extract --verbose -C {db}",
                    dataset.url
                )
            })
            .collect();

        StageDefinition::new(StageName::FetchDatasets)
            .with_sentinel(layout.dataset_marker())
            .shell(format!("mkdir -p {db}"))
            .parallel(fetches)
    }

    fn configure(&self) -> StageDefinition {
        let layout = &self.options.layout;
        let db = path(&layout.seed_db());
        let right_config = path(&layout.config_dir(Role::Candidate));
        let left = layout.instance_root(Role::Reference);
        let reference = Arc::clone(&self.reference);

        let mut stage = StageDefinition::new(StageName::Configure)
            .shell(format!(
                "echo \"ATTACH DATABASE default ENGINE=Ordinary\" > {db}/metadata/default.sql"
            ))
            .shell(format!(
                "echo \"ATTACH DATABASE datasets ENGINE=Ordinary\" > {db}/metadata/datasets.sql"
            ))
            .shell(format!("ls {db}/metadata"))
            .shell(format!("rm {right_config}/config.d/text_log.xml ||:"))
            .shell(format!("rm {right_config}/config.d/backups.xml ||:"))
            .shell(format!("cp -rv {right_config} {}/", path(&left)))
            .action("upgrade seed database", move || {
                let reference = Arc::clone(&reference);
                async move {
                    let mut server = reference.lock().await;
                    let started = server.start_preconfigured().await;
                    let stopped = server.terminate().await;
                    started?;
                    Ok(format!(
                        "seed upgraded by {} server (forced stop: {})",
                        server.role(),
                        stopped.map_or(false, |t| t.forced)
                    ))
                }
            });

        for role in Role::BOTH {
            stage = stage.shell(format!("rm -rf {}", path(&layout.instance_root(role).join("db"))));
        }
        for leftover in ["preprocessed_configs", "data/system", "metadata/system", "status"] {
            stage = stage.shell(format!("rm -rf {db}/{leftover}"));
        }
        for role in Role::BOTH {
            let root = layout.instance_root(role);
            stage = stage
                .shell(format!("cp -al {db} {}", path(&root.join("db"))))
                .shell(format!("rm -rf {}", path(&root.join("coordination"))))
                .shell(format!(
                    "cp -R {} {}",
                    path(&layout.seed_coordination()),
                    path(&root.join("coordination"))
                ));
        }
        stage
    }

    fn start_servers(&self) -> StageDefinition {
        let layout = &self.options.layout;
        let mut stage = StageDefinition::new(StageName::StartServers);
        for role in Role::BOTH {
            let server = self.server(role);
            stage = stage.action(format!("start {role} server"), move || {
                let server = Arc::clone(&server);
                async move {
                    let mut server = server.lock().await;
                    server.start().await?;
                    Ok(format!(
                        "{} server ready on port {}",
                        server.role(),
                        server.profile().tcp_port()
                    ))
                }
            });
        }

        let reference = self.server(Role::Reference);
        let candidate = self.server(Role::Candidate);
        stage = stage.action("diagnostics", move || {
            let servers = [Arc::clone(&reference), Arc::clone(&candidate)];
            async move {
                let mut out = String::new();
                for server in servers {
                    let server = server.lock().await;
                    for query in DIAGNOSTIC_QUERIES {
                        let _ = writeln!(out, "[{}] {query}", server.role());
                        out.push_str(&server.ask(query).await);
                    }
                }
                Ok(out)
            }
        });

        Role::BOTH
            .iter()
            .fold(stage, |stage, role| stage.attach_on_failure(layout.server_log(*role)))
    }

    fn run_tests(&self) -> StageDefinition {
        let layout = self.options.layout.clone();
        let bench_dir = self.options.benchmark_dir();
        let filter = self.options.filter.clone();
        let batch = self.options.batch;
        let runs = self.options.runs;
        let warmup = self.options.warmup;
        let driver = self.driver.clone();

        StageDefinition::new(StageName::RunTests).action("run benchmarks", move || {
            let layout = layout.clone();
            let bench_dir = bench_dir.clone();
            let filter = filter.clone();
            let driver = driver.clone();
            async move {
                let definitions = discover(&bench_dir, &filter)?;
                if definitions.is_empty() {
                    return Err(StepFailure::new(format!(
                        "No benchmark definitions in {} match '{filter}'",
                        bench_dir.display()
                    )));
                }
                let mut out = format!("Benchmarks: {}\n", definitions.len());

                if warmup {
                    let warmup_dir = layout.warmup_dir();
                    let summary = Arc::new(WallClockSummary::in_dir(&warmup_dir)?);
                    let runner = BenchmarkRunner::new(driver.clone(), summary);
                    let jobs: Vec<BenchmarkJob> = definitions
                        .iter()
                        .map(|definition| BenchmarkJob::new(definition, runs))
                        .collect();
                    let outcomes = runner.run_all(&jobs, &warmup_dir).await?;
                    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                    let _ = writeln!(out, "Warm-up: {} run, {failed} failed", outcomes.len());
                }

                let results_dir = layout.results_dir();
                let summary = Arc::new(WallClockSummary::in_dir(&results_dir)?);
                let runner = BenchmarkRunner::new(driver, summary);
                let jobs: Vec<BenchmarkJob> = shard(&definitions, batch)
                    .into_iter()
                    .map(|definition| BenchmarkJob::new(definition, runs).with_shard_index(batch.index()))
                    .collect();
                info!(%batch, benchmarks = jobs.len(), "Running batch");
                let outcomes = runner.run_all(&jobs, &results_dir).await?;
                let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                let _ = writeln!(out, "Batch {batch}: {} run, {failed} failed", outcomes.len());
                for outcome in outcomes.iter().filter(|o| !o.is_success()) {
                    let _ = writeln!(out, "  failed: {}", outcome.name);
                }
                Ok(out)
            }
        })
    }

    fn report(&self) -> StageDefinition {
        let results = path(&self.options.layout.results_dir());
        let mut stage = StageDefinition::new(StageName::Report);
        if let Some(commit) = &self.options.reference_commit {
            stage = stage.shell(format!("git log -1 {commit} > {results}/left-commit.txt"));
        }
        stage
            .shell(format!("git log -1 HEAD > {results}/right-commit.txt"))
            .shell_in(
                self.options.layout.results_dir(),
                format!("stage=get_profiles {}", path(&self.options.report_script())),
            )
    }
}

fn build_server(
    options: &RunOptions,
    role: Role,
    timeouts: ServerTimeouts,
    client: Option<Arc<dyn QueryClient>>,
) -> ServerProcess {
    let profile = ServerProfile::new(role, &options.layout);
    let client = client.unwrap_or_else(|| Arc::new(CliQueryClient::new(profile.client_binary())));
    ServerProcess::new(profile, client).with_timeouts(timeouts)
}
