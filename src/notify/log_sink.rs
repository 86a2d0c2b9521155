// src/notify/log_sink.rs
use async_trait::async_trait;

use super::MessageSink;
use crate::error::SinkError;

/// Dry-run sink: writes each message to the log instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        tracing::info!(target: "feed_courier::dry_run", chars = text.chars().count(), "\n{text}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
