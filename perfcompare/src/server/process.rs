//! Lifecycle of one server instance.

use super::client::QueryClient;
use super::profile::{Role, ServerProfile};
use super::readiness::{poll_until, ServerTimeouts};
use super::signal::{signal_group, Signal};
use crate::errors::ServerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Query used to decide liveness.
pub const LIVENESS_QUERY: &str = "select 1";

/// Run once against the seed so every benchmark finds the `test` database.
const CREATE_TEST_DATABASE: &str = "create database IF NOT EXISTS test";

/// Readiness as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Not polled yet.
    Unknown,
    /// Answered the liveness query.
    Ready,
    /// Did not answer within the probe budget.
    Failed,
}

/// A live process owned by a [`ServerProcess`].
#[derive(Debug)]
pub struct ServerHandle {
    child: Child,
    pid: u32,
    log: Option<File>,
    readiness: Readiness,
}

impl ServerHandle {
    /// Process id, also the process group id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last observed readiness.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// Returns true while the log handle is still open.
    #[must_use]
    pub fn log_open(&self) -> bool {
        self.log.is_some()
    }

    fn close_log(&mut self) {
        if let Some(file) = self.log.take() {
            if let Err(e) = file.sync_all() {
                debug!(pid = self.pid, error = %e, "Failed to flush server log");
            }
        }
    }
}

/// Result of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    /// Pid of the terminated process.
    pub pid: u32,
    /// True when the group had to be killed after the graceful timeout.
    pub forced: bool,
}

/// One server instance: its profile plus at most one live process.
pub struct ServerProcess {
    profile: ServerProfile,
    client: Arc<dyn QueryClient>,
    timeouts: ServerTimeouts,
    handle: Option<ServerHandle>,
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("profile", &self.profile)
            .field("timeouts", &self.timeouts)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ServerProcess {
    /// Creates an instance that is not running.
    #[must_use]
    pub fn new(profile: ServerProfile, client: Arc<dyn QueryClient>) -> Self {
        Self {
            profile,
            client,
            timeouts: ServerTimeouts::default(),
            handle: None,
        }
    }

    /// Overrides the lifecycle timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Instance profile.
    #[must_use]
    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    /// Instance role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// The live process, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&ServerHandle> {
        self.handle.as_ref()
    }

    /// Returns true while a process is owned.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Starts against the shared seed directory. Used once, to let the
    /// server upgrade the seed database before it is copied.
    pub async fn start_preconfigured(&mut self) -> Result<(), ServerError> {
        let args = self.profile.preconfigured_args();
        self.launch(args).await?;
        self.client
            .query(self.profile.tcp_port(), CREATE_TEST_DATABASE)
            .await
            .map(|_| ())
    }

    /// Starts with the instance's own directories and ports.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let args = self.profile.isolated_args();
        self.launch(args).await
    }

    async fn launch(&mut self, args: Vec<String>) -> Result<(), ServerError> {
        let role = self.profile.role();
        if let Some(handle) = &self.handle {
            return Err(ServerError::AlreadyRunning {
                role,
                pid: handle.pid,
            });
        }

        let binary = self.profile.binary();
        let log_path = self.profile.log_file();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = File::create(&log_path)?;

        info!(%role, binary = %binary.display(), args = %args.join(" "), "Starting server");
        let child = Command::new(&binary)
            .args(&args)
            .current_dir(self.profile.root())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServerError::Launch {
                role,
                output: format!("failed to spawn {}: {e}", binary.display()),
            })?;

        let pid = child.id().unwrap_or_default();
        self.handle = Some(ServerHandle {
            child,
            pid,
            log: Some(log),
            readiness: Readiness::Unknown,
        });

        tokio::time::sleep(self.timeouts.launch_grace).await;
        self.check_not_exited().await?;
        info!(%role, pid, "Server process started");

        if self.wait_ready().await {
            Ok(())
        } else {
            Err(ServerError::NotReady {
                role,
                attempts: self.timeouts.poll_attempts,
            })
        }
    }

    /// Fails with the captured output if the process died during the grace period.
    async fn check_not_exited(&mut self) -> Result<(), ServerError> {
        let role = self.profile.role();
        let exited = match self.handle.as_mut() {
            Some(handle) => handle.child.try_wait()?,
            None => return Ok(()),
        };
        let Some(status) = exited else {
            return Ok(());
        };

        if let Some(mut handle) = self.handle.take() {
            handle.close_log();
        }
        let output = tokio::fs::read_to_string(self.profile.log_file())
            .await
            .unwrap_or_default();
        error!(%role, %status, "Server exited immediately after start");
        Err(ServerError::Launch {
            role,
            output: format!("process exited with {status}: {}", output.trim()),
        })
    }

    /// Polls the liveness query until it answers `1` or the budget is spent.
    ///
    /// Probe failures are tolerated; only exhaustion reports false.
    pub async fn wait_ready(&mut self) -> bool {
        let role = self.profile.role();
        let port = self.profile.tcp_port();
        let client = Arc::clone(&self.client);

        let outcome = poll_until(
            self.timeouts.poll_attempts,
            self.timeouts.poll_interval,
            |_| {
                let client = Arc::clone(&client);
                async move {
                    match client.query(port, LIVENESS_QUERY).await {
                        Ok(out) if out.trim() == "1" => Ok(()),
                        Ok(out) => Err(format!("unexpected answer '{}'", out.trim())),
                        Err(e) => Err(e.to_string()),
                    }
                }
            },
        )
        .await;

        let readiness = match outcome {
            Ok(((), attempt)) => {
                info!(%role, port, attempt, "Server ready");
                Readiness::Ready
            }
            Err(exhausted) => {
                error!(
                    %role,
                    port,
                    attempts = exhausted.attempts,
                    last_error = %exhausted.last_error,
                    "Server not ready"
                );
                Readiness::Failed
            }
        };
        if let Some(handle) = self.handle.as_mut() {
            handle.readiness = readiness;
        }
        readiness == Readiness::Ready
    }

    /// Runs a diagnostic query. Errors are logged and yield an empty string.
    pub async fn ask(&self, query: &str) -> String {
        let port = self.profile.tcp_port();
        match self.client.query(port, query).await {
            Ok(out) => out,
            Err(e) => {
                warn!(role = %self.profile.role(), port, query, error = %e, "Diagnostic query failed");
                String::new()
            }
        }
    }

    /// Stops the owned process group and releases the log handle.
    ///
    /// Sends SIGTERM to the group, waits for the graceful timeout, then
    /// kills the group. Returns `None` when nothing was running.
    pub async fn terminate(&mut self) -> Option<Termination> {
        let mut handle = self.handle.take()?;
        let role = self.profile.role();
        let pid = handle.pid;
        info!(%role, pid, "Terminating server");

        if !signal_group(pid, Signal::Term).await {
            debug!(%role, pid, "SIGTERM not delivered to process group");
        }

        let forced = match tokio::time::timeout(self.timeouts.terminate_timeout, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!(%role, pid, %status, "Server stopped");
                false
            }
            Ok(Err(e)) => {
                warn!(%role, pid, error = %e, "Failed to wait for server exit");
                kill_group(&mut handle).await;
                true
            }
            Err(_) => {
                warn!(
                    %role,
                    pid,
                    timeout = ?self.timeouts.terminate_timeout,
                    "Server did not stop gracefully, killing process group"
                );
                kill_group(&mut handle).await;
                true
            }
        };

        handle.close_log();
        Some(Termination { pid, forced })
    }

}

async fn kill_group(handle: &mut ServerHandle) {
    signal_group(handle.pid, Signal::Kill).await;
    if let Err(e) = handle.child.start_kill() {
        debug!(pid = handle.pid, error = %e, "Direct kill failed");
    }
    if let Err(e) = handle.child.wait().await {
        warn!(pid = handle.pid, error = %e, "Failed to reap killed server");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::server::MockQueryClient;
    use crate::testing::{
        install_fake_server, FlakyQueryClient, FAKE_SERVER_EXITS, FAKE_SERVER_IGNORES_TERM,
        FAKE_SERVER_STAYS_UP,
    };
    use std::time::Duration;

    fn fast_timeouts() -> ServerTimeouts {
        ServerTimeouts::default()
            .with_launch_grace(Duration::from_millis(200))
            .with_poll(5, Duration::from_millis(10))
            .with_terminate_timeout(Duration::from_millis(500))
    }

    fn instance(layout: &Layout, role: Role, client: Arc<dyn QueryClient>) -> ServerProcess {
        ServerProcess::new(ServerProfile::new(role, layout), client).with_timeouts(fast_timeouts())
    }

    #[tokio::test]
    async fn test_start_and_terminate_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Reference, FAKE_SERVER_STAYS_UP);

        let mut server = instance(&layout, Role::Reference, Arc::new(FlakyQueryClient::ready()));
        server.start().await.unwrap();

        let handle = server.handle().unwrap();
        assert_eq!(handle.readiness(), Readiness::Ready);
        assert!(handle.log_open());

        let termination = server.terminate().await.unwrap();
        assert!(!termination.forced);
        assert!(!server.is_running());

        let log = std::fs::read_to_string(layout.server_log(Role::Reference)).unwrap();
        assert!(log.contains("fake server up"));
    }

    #[tokio::test]
    async fn test_preconfigured_start_creates_test_database() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Reference, FAKE_SERVER_STAYS_UP);

        let client = Arc::new(FlakyQueryClient::ready());
        let mut server = instance(&layout, Role::Reference, client.clone());
        server.start_preconfigured().await.unwrap();
        server.terminate().await.unwrap();

        let queries = client.queries();
        assert_eq!(queries.first().map(String::as_str), Some(LIVENESS_QUERY));
        assert!(queries.last().unwrap().contains("IF NOT EXISTS test"));
    }

    #[tokio::test]
    async fn test_preconfigured_start_fails_on_database_query() {
        let mut client = MockQueryClient::new();
        client
            .expect_query()
            .withf(|_, query| query.starts_with("select"))
            .returning(|_, _| Ok("1\n".to_string()));
        client
            .expect_query()
            .withf(|_, query| query.starts_with("create"))
            .returning(|port, _| Err(ServerError::query(port, "read-only")));

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Reference, FAKE_SERVER_STAYS_UP);

        let mut server = instance(&layout, Role::Reference, Arc::new(client));
        let err = server.start_preconfigured().await.unwrap_err();
        assert!(matches!(err, ServerError::Query { port: 9001, .. }));
        assert!(server.terminate().await.is_some());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Candidate, FAKE_SERVER_IGNORES_TERM);

        let mut server = instance(&layout, Role::Candidate, Arc::new(FlakyQueryClient::ready()));
        server.start().await.unwrap();

        let termination = server.terminate().await.unwrap();
        assert!(termination.forced);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_terminate_without_process() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let mut server = instance(&layout, Role::Reference, Arc::new(FlakyQueryClient::ready()));
        assert_eq!(server.terminate().await, None);
    }

    #[tokio::test]
    async fn test_immediate_exit_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Reference, FAKE_SERVER_EXITS);

        let client = Arc::new(FlakyQueryClient::ready());
        let mut server = instance(&layout, Role::Reference, client.clone());
        let err = server.start().await.unwrap_err();

        match err {
            ServerError::Launch { role, output } => {
                assert_eq!(role, Role::Reference);
                assert!(output.contains("bad config"), "output: {output}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!server.is_running());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let mut server = instance(&layout, Role::Candidate, Arc::new(FlakyQueryClient::ready()));

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Launch { role: Role::Candidate, .. }));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Reference, FAKE_SERVER_STAYS_UP);

        let mut server = instance(&layout, Role::Reference, Arc::new(FlakyQueryClient::ready()));
        server.start().await.unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning { .. }));

        server.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_ready_keeps_process_for_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_fake_server(&layout, Role::Candidate, FAKE_SERVER_STAYS_UP);

        let mut server = instance(&layout, Role::Candidate, Arc::new(FlakyQueryClient::never_ready()));
        let err = server.start().await.unwrap_err();

        assert_eq!(err.to_string(), "candidate server not ready after 5 attempts");
        assert_eq!(server.handle().map(ServerHandle::readiness), Some(Readiness::Failed));
        assert!(server.terminate().await.is_some());
    }

    #[tokio::test]
    async fn test_wait_ready_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let client = Arc::new(FlakyQueryClient::failing_first(4));
        let mut server = instance(&layout, Role::Reference, client.clone());

        assert!(server.wait_ready().await);
        assert_eq!(client.calls(), 5);
    }

    #[tokio::test]
    async fn test_wait_ready_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let client = Arc::new(FlakyQueryClient::failing_first(5));
        let mut server = instance(&layout, Role::Reference, client.clone());

        assert!(!server.wait_ready().await);
        assert_eq!(client.calls(), 5);
    }

    #[tokio::test]
    async fn test_ask_returns_output() {
        let mut client = MockQueryClient::new();
        client
            .expect_query()
            .withf(|port, query| *port == 19001 && query.contains("build_options"))
            .times(1)
            .returning(|_, _| Ok("VERSION_FULL\t24.3\n".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let server = instance(&layout, Role::Candidate, Arc::new(client));

        assert_eq!(server.ask("select * from system.build_options").await, "VERSION_FULL\t24.3\n");
    }

    #[tokio::test]
    async fn test_ask_swallows_errors() {
        let mut client = MockQueryClient::new();
        client
            .expect_query()
            .returning(|port, _| Err(ServerError::query(port, "Connection refused")));

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let server = instance(&layout, Role::Reference, Arc::new(client));

        assert_eq!(server.ask("select 1").await, "");
    }
}
