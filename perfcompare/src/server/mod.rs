//! Server instances under comparison.
//!
//! Each role owns at most one process. The process runs in its own process
//! group so teardown reaches every descendant, and its stdout/stderr go to a
//! log file that stays open until teardown.

mod client;
mod process;
mod profile;
mod readiness;
mod signal;

pub use client::{CliQueryClient, QueryClient};
#[cfg(test)]
pub use client::MockQueryClient;
pub use process::{Readiness, ServerHandle, ServerProcess, Termination, LIVENESS_QUERY};
pub use profile::{PortTable, Role, ServerProfile};
pub use readiness::{poll_until, PollExhausted, ServerTimeouts};
pub use signal::{signal_group, Signal};
