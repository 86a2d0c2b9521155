// src/config/mod.rs
//! Startup configuration: global settings, HTTP/delivery tuning, Telegram
//! credentials, categorizer keywords and the ordered list of sources.
//!
//! Loaded once from TOML; an invalid file prevents the scheduler from starting.

pub mod sources;

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
pub use sources::{DeclaredCategory, DetailSelectors, HtmlSelectors, SourceDescriptor, SourceKind};

pub const DEFAULT_CONFIG_PATH: &str = "config/courier.toml";
pub const ENV_CONFIG_PATH: &str = "COURIER_CONFIG_PATH";
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

fn default_run_interval_minutes() -> u64 {
    30
}
fn default_status_report_interval_hours() -> u64 {
    24
}
fn default_message_delay_seconds() -> u64 {
    3
}
fn default_url_retention_days() -> u64 {
    90
}
fn default_max_stored_urls() -> usize {
    5000
}
fn default_log_retention_days() -> u64 {
    30
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_fetch_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_run_interval_minutes")]
    pub run_interval_minutes: u64,
    #[serde(default = "default_status_report_interval_hours")]
    pub status_report_interval_hours: u64,
    /// Minimum gap between two successful sends.
    #[serde(default = "default_message_delay_seconds")]
    pub message_delay_seconds: u64,
    #[serde(default = "default_url_retention_days")]
    pub url_retention_days: u64,
    #[serde(default = "default_max_stored_urls")]
    pub max_stored_urls: usize,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// How many sources are fetched at once.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_interval_minutes: default_run_interval_minutes(),
            status_report_interval_hours: default_status_report_interval_hours(),
            message_delay_seconds: default_message_delay_seconds(),
            url_retention_days: default_url_retention_days(),
            max_stored_urls: default_max_stored_urls(),
            log_retention_days: default_log_retention_days(),
            state_dir: default_state_dir(),
            log_dir: None,
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

impl Settings {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_minutes * 60)
    }

    pub fn status_report_interval(&self) -> Duration {
        Duration::from_secs(self.status_report_interval_hours * 3600)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_secs(self.message_delay_seconds)
    }

    pub fn url_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.url_retention_days as i64)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }
}

fn default_user_agent() -> String {
    format!("feed-courier/{}", env!("CARGO_PKG_VERSION"))
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_page_delay_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request budget (connect + read). A source exceeding it is unavailable.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attempts per page, including the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Politeness delay between consecutive pages of one source.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_after_secs() -> u64 {
    30
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    /// Consecutive retryable failures tolerated for one item.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait used when the sink rate-limits without saying for how long.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub send_status_reports: bool,
    /// Log messages instead of sending them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_retry_after_secs: default_retry_after_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            send_status_reports: false,
            dry_run: false,
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Clone, Deserialize)]
pub struct TelegramSettings {
    /// `"ENV"` means: read from `TELEGRAM_BOT_TOKEN`.
    #[serde(default)]
    pub token: String,
    /// `"ENV"` means: read from `TELEGRAM_CHAT_ID`.
    #[serde(default)]
    pub chat_id: String,
    /// Forum topic (message_thread_id) inside the chat.
    #[serde(default)]
    pub topic_id: Option<i64>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            topic_id: None,
            api_base: default_api_base(),
        }
    }
}

// Never print the token.
impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token_len", &self.token.len())
            .field("chat_id", &self.chat_id)
            .field("topic_id", &self.topic_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategorizerSettings {
    /// Keyword overrides per category tag (e.g. `events = ["conference"]`).
    #[serde(default)]
    pub keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub categorizer: CategorizerSettings,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

impl Config {
    /// Parse, resolve `"ENV"` credentials and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = toml::from_str(s)?;
        cfg.resolve_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallback:
    /// 1) $COURIER_CONFIG_PATH
    /// 2) config/courier.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    fn resolve_env(&mut self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().eq_ignore_ascii_case("env") {
            self.telegram.token = std::env::var(ENV_TELEGRAM_TOKEN).map_err(|_| {
                ConfigError::Invalid(format!("missing {ENV_TELEGRAM_TOKEN} env var"))
            })?;
        }
        if self.telegram.chat_id.trim().eq_ignore_ascii_case("env") {
            self.telegram.chat_id = std::env::var(ENV_TELEGRAM_CHAT_ID).map_err(|_| {
                ConfigError::Invalid(format!("missing {ENV_TELEGRAM_CHAT_ID} env var"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.settings;
        if s.run_interval_minutes == 0 {
            return Err(invalid("settings.run_interval_minutes must be > 0"));
        }
        if s.status_report_interval_hours == 0 {
            return Err(invalid("settings.status_report_interval_hours must be > 0"));
        }
        if s.max_stored_urls == 0 {
            return Err(invalid("settings.max_stored_urls must be > 0"));
        }
        if s.fetch_concurrency == 0 {
            return Err(invalid("settings.fetch_concurrency must be > 0"));
        }
        if self.http.retry_attempts == 0 {
            return Err(invalid("http.retry_attempts must be > 0"));
        }
        if self.delivery.max_attempts == 0 {
            return Err(invalid("delivery.max_attempts must be > 0"));
        }

        if !self.delivery.dry_run {
            if self.telegram.token.trim().is_empty() {
                return Err(invalid("telegram.token is required unless delivery.dry_run"));
            }
            if self.telegram.chat_id.trim().is_empty() {
                return Err(invalid("telegram.chat_id is required unless delivery.dry_run"));
            }
        }

        let mut names = HashSet::new();
        for src in &self.sources {
            let name = src.name.trim();
            if name.is_empty() {
                return Err(invalid("source with empty name"));
            }
            if !names.insert(name.to_string()) {
                return Err(invalid(format!("duplicate source name '{name}'")));
            }
            if let Err(e) = url::Url::parse(&src.url) {
                return Err(invalid(format!("source '{name}': bad url: {e}")));
            }
            if src.max_pages == Some(0) {
                return Err(invalid(format!("source '{name}': max_pages must be > 0")));
            }
            if let DeclaredCategory::Unknown(tag) = &src.category {
                tracing::warn!(source = name, tag = %tag, "unknown category, items will be uncategorized");
            }
            let bad = src.placeholder_credentials();
            if !bad.is_empty() {
                tracing::warn!(source = name, params = ?bad, "placeholder API credentials, source will be skipped");
            }
        }
        if self.sources.is_empty() {
            tracing::warn!("no sources defined in config");
        }
        tracing::info!(sources = self.sources.len(), "config validated");
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
