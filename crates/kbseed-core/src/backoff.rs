//! Backoff policies for retried upstream calls
//!
//! A policy only answers "how long to wait before retry number `attempt`",
//! returning `None` once no further retry should be made. Callers own the
//! sleeping, so tests can run the same code against tokio's paused clock.

use std::time::Duration;

/// Delay schedule for retries
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Delay before retry `attempt` (0 = first retry), or `None` to give up
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Never retry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl BackoffPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Constant delay for a bounded number of retries
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    /// One retry after the model warm-up interval
    pub fn cold_start(delay: Duration) -> Self {
        Self::new(delay, 1)
    }
}

impl BackoffPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then_some(self.delay)
    }
}

/// Doubling delay capped at `max_delay`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_retries,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_retries: 3,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 1u32 << attempt.min(16);
        Some(self.base.saturating_mul(factor).min(self.max_delay))
    }
}
