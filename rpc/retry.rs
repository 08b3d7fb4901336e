/// Ranked endpoint list with a single retry policy
///
/// A call goes to the primary endpoint first. Transient failures are retried
/// on the same endpoint after a fixed delay, then the next endpoint in rank
/// order is tried. Ledger rejections are final and never retried.

use super::transport::{RpcTransport, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ATTEMPTS_PER_ENDPOINT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts on each endpoint, counting the first
    pub attempts_per_endpoint: u32,
    /// Fixed pause between attempts on the same endpoint
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            attempts_per_endpoint: DEFAULT_ATTEMPTS_PER_ENDPOINT,
            delay,
        }
    }

    /// One attempt, no delay. Used for submissions, which must not be
    /// replayed blindly.
    pub fn single_shot() -> Self {
        Self {
            attempts_per_endpoint: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// Ordered transport handles sharing one policy.
#[derive(Clone)]
pub struct EndpointSet {
    endpoints: Vec<Arc<dyn RpcTransport>>,
    policy: RetryPolicy,
}

impl EndpointSet {
    pub fn new(endpoints: Vec<Arc<dyn RpcTransport>>, policy: RetryPolicy) -> Self {
        Self { endpoints, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Run `method` under the policy. Returns the last transient error once
    /// every endpoint is exhausted.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let mut last_err = TransportError::Transient("no endpoints configured".to_string());

        for (rank, endpoint) in self.endpoints.iter().enumerate() {
            for attempt in 1..=self.policy.attempts_per_endpoint.max(1) {
                match endpoint.request(method, params.clone()).await {
                    Ok(value) => {
                        if rank > 0 || attempt > 1 {
                            debug!(
                                "[ChainReader] {} answered by {} (rank {}, attempt {})",
                                method,
                                endpoint.endpoint(),
                                rank,
                                attempt
                            );
                        }
                        return Ok(value);
                    }
                    Err(err) if !err.is_retryable() => return Err(err),
                    Err(err) => {
                        warn!(
                            "⚠️ [ChainReader] {} failed on {} (attempt {}): {}",
                            method,
                            endpoint.endpoint(),
                            attempt,
                            err
                        );
                        last_err = err;
                        if attempt < self.policy.attempts_per_endpoint {
                            tokio::time::sleep(self.policy.delay).await;
                        }
                    }
                }
            }
        }

        Err(last_err)
    }
}
