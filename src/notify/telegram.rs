// src/notify/telegram.rs
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MessageSink;
use crate::config::TelegramSettings;
use crate::error::SinkError;

/// Bot API `sendMessage` sink. One attempt per `send`; retry policy lives in
/// the delivery channel.
#[derive(Clone)]
pub struct TelegramSink {
    endpoint: String,
    chat_id: String,
    topic_id: Option<i64>,
    client: Client,
    timeout: Duration,
}

impl TelegramSink {
    pub fn new(cfg: &TelegramSettings) -> Self {
        Self {
            endpoint: format!(
                "{}/bot{}/sendMessage",
                cfg.api_base.trim_end_matches('/'),
                cfg.token
            ),
            chat_id: cfg.chat_id.clone(),
            topic_id: cfg.topic_id,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Deserialize, Default)]
struct ApiReply {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Deserialize, Default)]
struct ReplyParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

static RETRY_AFTER_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry after (\d+)").expect("static regex"));

/// Wait requested by a 429 reply: `parameters.retry_after`, then the
/// `Retry-After` header, then "retry after N" in the description.
fn rate_limit_wait(header: Option<&str>, reply: &ApiReply) -> Option<Duration> {
    if let Some(secs) = reply.parameters.as_ref().and_then(|p| p.retry_after) {
        return Some(Duration::from_secs(secs));
    }
    if let Some(secs) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    reply
        .description
        .as_deref()
        .and_then(|d| RETRY_AFTER_TEXT.captures(d))
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "MarkdownV2",
            disable_web_page_preview: false,
            message_thread_id: self.topic_id,
        };

        let rsp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("telegram request failed: {}", e.without_url())))?;

        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }

        let header = rsp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = rsp.text().await.unwrap_or_default();
        let reply: ApiReply = serde_json::from_str(&body).unwrap_or_default();
        let desc = reply.description.clone().unwrap_or_else(|| body.clone());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SinkError::RateLimited {
                retry_after: rate_limit_wait(header.as_deref(), &reply),
            });
        }
        if status.is_server_error() {
            return Err(SinkError::Transient(format!("telegram {status}: {desc}")));
        }
        Err(SinkError::Permanent(format!("telegram {status}: {desc}")))
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
