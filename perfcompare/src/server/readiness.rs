//! Fixed lifecycle timeouts and the bounded readiness poll.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Timeouts of the server lifecycle. Fixed per run; tests shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Pause between spawn and the immediate-exit check.
    pub launch_grace: Duration,
    /// Maximum number of liveness probes.
    pub poll_attempts: u32,
    /// Delay between two probes.
    pub poll_interval: Duration,
    /// How long to wait for a graceful exit before killing the group.
    pub terminate_timeout: Duration,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            launch_grace: Duration::from_secs(2),
            poll_attempts: 30,
            poll_interval: Duration::from_secs(2),
            terminate_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerTimeouts {
    /// Creates the default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the launch grace period.
    #[must_use]
    pub fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }

    /// Sets the probe budget.
    #[must_use]
    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Sets the graceful termination timeout.
    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Upper bound of the time spent polling.
    #[must_use]
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.poll_attempts
    }
}

/// The probe never succeeded within the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollExhausted {
    /// Probes issued.
    pub attempts: u32,
    /// Error of the last probe.
    pub last_error: String,
}

/// Calls `probe` up to `attempts` times, sleeping `interval` between calls,
/// and returns the first successful value with the 1-based attempt number.
///
/// Probe errors are tolerated until the budget is spent.
pub async fn poll_until<T, F, Fut>(
    attempts: u32,
    interval: Duration,
    mut probe: F,
) -> Result<(T, u32), PollExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_error = String::from("no attempts made");
    for attempt in 1..=attempts {
        match probe(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => {
                debug!(attempt, attempts, error = %e, "Not ready, waiting");
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollExhausted {
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = ServerTimeouts::default();
        assert_eq!(timeouts.poll_attempts, 30);
        assert_eq!(timeouts.poll_budget(), Duration::from_secs(60));
        assert_eq!(timeouts.terminate_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_poll_succeeds_on_first_good_probe() {
        let mut calls = 0;
        let result = poll_until(5, Duration::from_millis(1), |_| {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(format!("refused {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok((3, 3)));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_poll_exhausts_budget() {
        let mut calls = 0;
        let result: Result<((), u32), _> = poll_until(4, Duration::from_millis(1), |attempt| {
            calls += 1;
            async move { Err(format!("refused {attempt}")) }
        })
        .await;

        assert_eq!(
            result,
            Err(PollExhausted {
                attempts: 4,
                last_error: "refused 4".to_string()
            })
        );
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_never_probes() {
        let result: Result<((), u32), _> =
            poll_until(0, Duration::from_millis(1), |_| async { Ok(()) }).await;
        assert!(result.is_err());
    }
}
