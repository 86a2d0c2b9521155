// src/notify/pacing.rs
use std::time::Duration;
use tokio::time::Instant;

/// Minimum-gap gate between consecutive successful sends.
/// - First send always allowed.
/// - Inside the gap, `wait` sleeps until the gap has elapsed.
/// - State is updated explicitly via `record_send` after a successful send.
#[derive(Debug, Clone)]
pub struct Pacer {
    gap: Duration,
    last_send: Option<Instant>,
}

impl Pacer {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            last_send: None,
        }
    }

    /// Time still to wait at `now`. Does NOT mutate state.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_send {
            None => Duration::ZERO,
            Some(ts) => (ts + self.gap).saturating_duration_since(now),
        }
    }

    pub async fn wait(&self) {
        let left = self.remaining(Instant::now());
        if !left.is_zero() {
            tracing::trace!(?left, "pacing before next send");
            tokio::time::sleep(left).await;
        }
    }

    /// Record that a message went out at `now`.
    pub fn record_send(&mut self, now: Instant) {
        self.last_send = Some(now);
    }
}
