//! Process-group signalling.
//!
//! Signals are delivered with the system `kill` utility addressed at the
//! negative group id, so every descendant of the server receives them.

use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Signals sent during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful termination request.
    Term,
    /// Forced kill.
    Kill,
}

impl Signal {
    const fn name(self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}

/// Sends `signal` to process group `pgid`. Returns true if `kill` reported success.
pub async fn signal_group(pgid: u32, signal: Signal) -> bool {
    if pgid == 0 {
        return false;
    }

    match Command::new("kill")
        .arg(format!("-{}", signal.name()))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(pgid, %signal, error = %e, "Failed to send signal to process group");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Term.to_string(), "SIGTERM");
        assert_eq!(Signal::Kill.to_string(), "SIGKILL");
    }

    #[tokio::test]
    async fn test_group_zero_is_refused() {
        assert!(!signal_group(0, Signal::Term).await);
    }

    #[tokio::test]
    async fn test_signal_reaches_group_members() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & wait")
            .process_group(0)
            .spawn()
            .unwrap();
        let pgid = child.id().unwrap();

        assert!(signal_group(pgid, Signal::Kill).await);
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
