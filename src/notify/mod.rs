// src/notify/mod.rs
//! Delivery channel: one formatted message per item to a single outbound sink,
//! paced between successful sends, blocking on sink rate limits.

pub mod format;
pub mod log_sink;
pub mod pacing;
pub mod telegram;

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::SinkError;
use crate::ingest::retry::Backoff;
use crate::notify::pacing::Pacer;

/// Outbound messaging sink (Telegram in production).
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), SinkError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Ok,
    /// Worth retrying. `retry_after` is set when the sink asked us to back off
    /// for a given time.
    RetryableError {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Given up on this item for the current cycle. It is not recorded, so it
    /// stays eligible next cycle.
    FatalError(String),
}

impl DeliveryResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, DeliveryResult::Ok)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Minimum gap between consecutive successful sends.
    pub min_gap: Duration,
    /// Consecutive retryable failures tolerated per item. Rate limits don't count.
    pub max_attempts: u32,
    /// Wait applied when a rate limit carries no duration.
    pub default_retry_after: Duration,
    pub backoff: Backoff,
}

impl DeliveryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        let base = Duration::from_millis(cfg.delivery.retry_backoff_ms);
        Self {
            min_gap: cfg.settings.message_delay(),
            max_attempts: cfg.delivery.max_attempts.max(1),
            default_retry_after: Duration::from_secs(cfg.delivery.default_retry_after_secs),
            backoff: Backoff::new(base, base.saturating_mul(16)),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("courier_delivered_total", "Messages delivered to the sink.");
        describe_counter!(
            "courier_delivery_failures_total",
            "Items given up on for a cycle."
        );
        describe_counter!(
            "courier_rate_limited_total",
            "Rate-limit signals received from the sink."
        );
    });
}

/// Serialized sender. One per pipeline; owns the pacing state.
pub struct DeliveryChannel {
    sink: Arc<dyn MessageSink>,
    policy: DeliveryPolicy,
    pacer: Pacer,
}

impl DeliveryChannel {
    pub fn new(sink: Arc<dyn MessageSink>, policy: DeliveryPolicy) -> Self {
        ensure_metrics_described();
        Self {
            sink,
            pacer: Pacer::new(policy.min_gap),
            policy,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// One paced send attempt, no retry.
    pub async fn attempt(&mut self, text: &str) -> DeliveryResult {
        self.pacer.wait().await;
        match self.sink.send(text).await {
            Ok(()) => {
                self.pacer.record_send(Instant::now());
                counter!("courier_delivered_total").increment(1);
                DeliveryResult::Ok
            }
            Err(SinkError::RateLimited { retry_after }) => {
                counter!("courier_rate_limited_total").increment(1);
                DeliveryResult::RetryableError {
                    reason: "rate limited".to_string(),
                    retry_after: Some(retry_after.unwrap_or(self.policy.default_retry_after)),
                }
            }
            Err(SinkError::Transient(e)) => DeliveryResult::RetryableError {
                reason: e,
                retry_after: None,
            },
            Err(SinkError::Permanent(e)) => DeliveryResult::FatalError(e),
        }
    }

    /// Deliver one message, retrying the same message until it is sent, the
    /// sink rejects it, or `max_attempts` consecutive transient failures occur.
    ///
    /// A rate limit suspends the channel for the requested time and retries; it
    /// never counts toward the failure budget and breaks a run of transient
    /// failures, so the budget starts over after it.
    pub async fn deliver(&mut self, text: &str) -> DeliveryResult {
        let mut failures: u32 = 0;
        loop {
            match self.attempt(text).await {
                DeliveryResult::Ok => return DeliveryResult::Ok,
                DeliveryResult::RetryableError {
                    retry_after: Some(wait),
                    ..
                } => {
                    tracing::warn!(sink = self.sink.name(), ?wait, "sink rate limit, suspending sends");
                    failures = 0;
                    tokio::time::sleep(wait).await;
                }
                DeliveryResult::RetryableError { reason, .. } => {
                    failures += 1;
                    if failures >= self.policy.max_attempts {
                        tracing::error!(sink = self.sink.name(), failures, error = %reason, "giving up on item for this cycle");
                        counter!("courier_delivery_failures_total").increment(1);
                        return DeliveryResult::FatalError(format!(
                            "{failures} consecutive failures, last: {reason}"
                        ));
                    }
                    let delay = self.policy.backoff.delay(failures);
                    tracing::warn!(sink = self.sink.name(), failures, ?delay, error = %reason, "send failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                DeliveryResult::FatalError(reason) => {
                    tracing::error!(sink = self.sink.name(), error = %reason, "sink rejected message");
                    counter!("courier_delivery_failures_total").increment(1);
                    return DeliveryResult::FatalError(reason);
                }
            }
        }
    }
}

/// Scripted in-memory sink: each `send` consumes the next scripted result
/// (`Ok` once the script runs out) and records the attempt with its time.
#[derive(Default)]
pub struct MockSink {
    script: StdMutex<VecDeque<Result<(), SinkError>>>,
    attempts: StdMutex<Vec<(String, Instant)>>,
    delivered: StdMutex<Vec<String>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(results: impl IntoIterator<Item = Result<(), SinkError>>) -> Self {
        Self {
            script: StdMutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every send attempt, in order, with the (tokio) time it happened.
    pub fn attempts(&self) -> Vec<(String, Instant)> {
        lock(&self.attempts).clone()
    }

    /// Texts that were accepted.
    pub fn delivered(&self) -> Vec<String> {
        lock(&self.delivered).clone()
    }
}

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl MessageSink for MockSink {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        lock(&self.attempts).push((text.to_string(), Instant::now()));
        let res = lock(&self.script).pop_front().unwrap_or(Ok(()));
        if res.is_ok() {
            lock(&self.delivered).push(text.to_string());
        }
        res
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
