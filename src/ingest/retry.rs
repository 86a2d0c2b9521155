// src/ingest/retry.rs
use std::time::Duration;

/// Exponential backoff: `base * 2^(retry-1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `retry` (1 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Bounded attempt budget with computed delays between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None` when the
    /// budget is spent.
    pub fn after_failure(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then(|| self.backoff.delay(attempt))
    }
}
