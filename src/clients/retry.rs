use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::UpstreamError;
use crate::orchestrator::WorkflowError;

/// Bounded retry with exponential backoff for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    pub base_backoff_ms: u64,
    /// Upper bound on a single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// No retries and no delay.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn execute<T, F, Fut>(&self, service: &str, mut op: F) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut backoff_ms = self.base_backoff_ms;

        for attempt in 0..=self.max_retries {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(service, attempt, "Upstream recovered after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let attempts = attempt + 1;
                    if !e.is_transient() || attempt == self.max_retries {
                        tracing::warn!(service, attempts, "Upstream call failed: {e}");
                        return Err(WorkflowError::UpstreamUnavailable {
                            service: service.to_string(),
                            attempts,
                            message: e.to_string(),
                        });
                    }

                    tracing::warn!(
                        service,
                        attempt = attempts,
                        backoff_ms,
                        "Transient upstream error, retrying: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(self.max_backoff_ms);
                }
            }
        }

        // The loop always returns on its final attempt
        Err(WorkflowError::UpstreamUnavailable {
            service: service.to_string(),
            attempts: self.max_retries + 1,
            message: "retries exhausted".to_string(),
        })
    }
}
