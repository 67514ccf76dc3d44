//! Query access to a running instance.

use crate::errors::ServerError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Issues one query against the instance listening on `port`.
///
/// Implementations return the raw stdout of the query on success. Connection
/// refusals are ordinary errors; callers decide whether they are fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Runs `query` and returns its output.
    async fn query(&self, port: u16, query: &str) -> Result<String, ServerError>;
}

/// Runs queries through the command-line client of the server build.
#[derive(Debug, Clone)]
pub struct CliQueryClient {
    client: PathBuf,
    timeout: Duration,
}

impl CliQueryClient {
    /// Creates a client that invokes `client` for each query.
    #[must_use]
    pub fn new(client: impl Into<PathBuf>) -> Self {
        Self {
            client: client.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the per-query timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl QueryClient for CliQueryClient {
    async fn query(&self, port: u16, query: &str) -> Result<String, ServerError> {
        let mut cmd = Command::new(&self.client);
        cmd.arg("--port")
            .arg(port.to_string())
            .arg("--query")
            .arg(query)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ServerError::query(port, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ServerError::query(port, format!("failed to run {}: {e}", self.client.display())))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ServerError::query(
                port,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_script;

    #[tokio::test]
    async fn test_cli_client_passes_port_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let client = write_script(dir.path(), "client", "echo \"$2|$4\"");

        let out = CliQueryClient::new(client).query(9001, "SELECT 1").await.unwrap();
        assert_eq!(out.trim(), "9001|SELECT 1");
    }

    #[tokio::test]
    async fn test_cli_client_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let client = write_script(dir.path(), "client", "echo 'Connection refused' >&2; exit 210");

        let err = CliQueryClient::new(client).query(19001, "SELECT 1").await.unwrap_err();
        assert!(err.to_string().contains("Connection refused"));
        assert!(err.to_string().contains("19001"));
    }

    #[tokio::test]
    async fn test_cli_client_missing_binary() {
        let err = CliQueryClient::new("/nonexistent/client")
            .query(9001, "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Query { port: 9001, .. }));
    }

    #[tokio::test]
    async fn test_cli_client_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let client = write_script(dir.path(), "client", "sleep 5");

        let err = CliQueryClient::new(client)
            .with_timeout(Duration::from_millis(100))
            .query(9001, "SELECT 1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
