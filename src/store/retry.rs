//! Bounded retry of store operations that hit storage lock contention.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{DocError, DocResult};

/// Exponential backoff settings for transient storage failures.
///
/// `max_attempts` counts every try, the first one included. Delays start at
/// `base_delay_ms` and double up to `max_delay_ms`; no retry is started that would
/// push the total past `max_total_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_ms: u64,
    /// How long the engine itself waits on a lock before reporting busy.
    pub busy_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
            max_total_ms: 5000,
            busy_timeout_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.max_total_ms)
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or the policy is exhausted.
///
/// Exhaustion yields [`DocError::StorageUnavailable`]; any other error is returned as is
/// after a single attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> DocResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DocResult<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "store operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                let delay = policy.delay_for(attempt - 1);
                if attempt >= policy.max_attempts || started.elapsed() + delay > policy.budget() {
                    tracing::error!(operation, attempt, error = %err, "storage still busy, giving up");
                    return Err(DocError::StorageUnavailable {
                        operation,
                        attempts: attempt,
                    });
                }
                tracing::warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "storage busy, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
