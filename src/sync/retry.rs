//! Exponential backoff with jitter for regeneration retries.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{SyncError, SyncResult};

/// Retry schedule.
///
/// Delays double from `initial_delay` up to `max_delay`, each with ±12.5%
/// jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let doubled = std::cmp::min(delay.saturating_mul(2), self.max_delay);
        let jitter_factor = 0.25 * (rand::random::<f64>() - 0.5);
        doubled.mul_f64(1.0 + jitter_factor)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// Only errors for which `retryable` returns `true` are retried; others are
/// returned immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    retryable: impl Fn(&SyncError) -> bool,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts.max(1) || !retryable(&e) {
                    error!(label, attempt, error = %e, "Giving up");
                    return Err(e);
                }

                warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    ?delay,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                debug!(label, next_attempt = attempt + 1, ?delay, "Backoff updated");
            }
        }
    }
}
