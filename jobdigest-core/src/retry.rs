//! Retry policy shared by the fetch and summarize stages.
//!
//! A policy is just a bound on retries plus a backoff curve. The caller supplies
//! the predicate that decides which errors are worth another attempt, so each
//! stage keeps its own notion of "transient" while the mechanics stay in one place.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Doubling backoff starting near `base_delay_ms`, jittered and capped.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.base_delay_ms / 2).max(1))
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_retries)
    }

    /// Run `action`, retrying while `retryable` approves the error and retries remain.
    pub async fn run<T, E, F, Fut, C>(&self, label: &str, action: F, mut retryable: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnMut(&E) -> bool,
        E: Display,
    {
        let condition = |e: &E| {
            let retry = retryable(e);
            if retry {
                tracing::debug!(stage = label, error = %e, "Transient failure, retrying");
            }
            retry
        };
        RetryIf::spawn(self.delays(), action, condition).await
    }
}
