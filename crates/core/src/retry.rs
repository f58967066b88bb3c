//! Exponential-backoff retry policies.
//!
//! A [`RetryPolicy`] describes when and how often an operation is
//! re-attempted. The async driver that consumes it lives in
//! `engage-client`; the same driver serves push-channel readiness checks
//! and reconnects.

use std::time::Duration;

/// Tunable parameters for an exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay used for the first wait.
    pub base_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total number of attempts before giving up.
    pub max_attempts: u32,
    /// Wait [`base_delay`](Self::base_delay) before the very first attempt
    /// instead of running it immediately.
    pub delay_first_attempt: bool,
}

impl RetryPolicy {
    /// Readiness pre-check before opening the push channel: first check
    /// immediately, then 1 s, 1.5 s, 2.25 s ... capped at 5 s, 10 checks.
    pub fn readiness() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            multiplier: 1.5,
            max_delay: Duration::from_millis(5000),
            max_attempts: 10,
            delay_first_attempt: false,
        }
    }

    /// Push-channel reconnect after an abnormal close or failed open:
    /// 2 s, 4 s, 8 s before each of 3 attempts.
    pub fn reconnect() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(8000),
            max_attempts: 3,
            delay_first_attempt: true,
        }
    }

    /// Calculate the next backoff delay from the current one.
    ///
    /// The result is clamped to [`max_delay`](Self::max_delay).
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    /// The `n`-th delay of the backoff sequence (1-based).
    pub fn delay_for(&self, n: u32) -> Duration {
        let mut delay = self.base_delay.min(self.max_delay);
        for _ in 1..n {
            delay = self.next_delay(delay);
        }
        delay
    }

    /// How long to wait before `attempt` (1-based), if at all.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if self.delay_first_attempt {
            Some(self.delay_for(attempt))
        } else if attempt <= 1 {
            None
        } else {
            Some(self.delay_for(attempt - 1))
        }
    }
}
