//! Query client fakes.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ServerError;
use crate::server::{QueryClient, LIVENESS_QUERY};

/// A query client that refuses the first `failures` queries, then answers.
///
/// The liveness query is answered with `1`; every other query with an empty
/// result. All queries are recorded.
#[derive(Debug)]
pub struct FlakyQueryClient {
    failures: u32,
    queries: Mutex<Vec<String>>,
}

impl FlakyQueryClient {
    /// Creates a client failing the first `failures` queries.
    #[must_use]
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Creates a client that answers immediately.
    #[must_use]
    pub fn ready() -> Self {
        Self::failing_first(0)
    }

    /// Creates a client that never answers.
    #[must_use]
    pub fn never_ready() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Returns the number of queries received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    /// Returns every query received, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl QueryClient for FlakyQueryClient {
    async fn query(&self, port: u16, query: &str) -> Result<String, ServerError> {
        let call = {
            let mut queries = self.queries.lock();
            queries.push(query.to_string());
            queries.len()
        };
        if u32::try_from(call).map_or(false, |n| n <= self.failures) {
            return Err(ServerError::query(port, "Connection refused"));
        }
        if query == LIVENESS_QUERY {
            Ok("1\n".to_string())
        } else {
            Ok(String::new())
        }
    }
}
