//! Rate-limit aware retry around any [`CompletionClient`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::completion::{ChatPayload, ChatResponse, CompletionClient};
use super::CompletionError;

/// Exponential backoff schedule for transient completion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

pub struct RetryingCompletionClient {
    inner: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
}

impl RetryingCompletionClient {
    pub fn new(inner: Arc<dyn CompletionClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn complete_with_retry(&self, payload: &ChatPayload) -> Result<ChatResponse, CompletionError> {
        let mut retry = 0;
        loop {
            match self.inner.complete(payload).await {
                Ok(response) => {
                    if retry > 0 {
                        tracing::info!(retries = retry, "Completion succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && retry < self.policy.max_retries => {
                    let delay = self.policy.backoff(retry);
                    tracing::warn!(
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient completion failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(retries = retry, error = %e, "Completion retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl CompletionClient for RetryingCompletionClient {
    fn complete<'a>(
        &'a self,
        payload: &'a ChatPayload,
    ) -> BoxFuture<'a, Result<ChatResponse, CompletionError>> {
        Box::pin(self.complete_with_retry(payload))
    }
}
