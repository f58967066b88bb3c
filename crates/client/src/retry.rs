//! Generic retry-with-backoff driver.
//!
//! [`retry_with_backoff`] runs an async operation according to a
//! [`RetryPolicy`] until it succeeds, the attempts are exhausted, or the
//! [`CancellationToken`] is triggered. The monitor uses it for both the
//! push-channel readiness check and push-channel reconnects.

use std::fmt::Display;
use std::future::Future;

use engage_core::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

/// How a retry loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded(T),
    /// Every attempt failed.
    Exhausted { attempts: u32 },
    /// The token was cancelled before an attempt succeeded.
    Cancelled,
}

/// Run `op` with exponential backoff.
///
/// `op` receives the 1-based attempt number. Backoff waits are raced
/// against `cancel`, so a cancelled session never waits out a delay. A
/// running attempt is not interrupted: `op` observes `cancel` itself, which
/// lets it release what it holds (e.g. close a socket) cleanly.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(delay) = policy.delay_before(attempt) {
            tracing::debug!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Backing off before attempt",
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        match op(attempt).await {
            Ok(value) => return RetryOutcome::Succeeded(value),
            Err(_) if cancel.is_cancelled() => return RetryOutcome::Cancelled,
            Err(e) => {
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt {attempt} failed",
                );
            }
        }
    }

    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}
