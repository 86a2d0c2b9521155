// src/error.rs
//! Error taxonomy shared by the fetch, delivery and storage layers.
//!
//! Per-source and per-item errors are isolated by the pipeline and reported in
//! the run summary; only [`StoreError`] escalates to aborting a run.

use std::time::Duration;

/// Failure of one source page (network, HTTP status, or parse).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Network/parse failure; retried with backoff by the orchestrator.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The descriptor cannot work as configured (placeholder credentials, bad URL).
    /// Retrying does not help.
    #[error("source misconfigured: {0}")]
    Misconfigured(String),
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        // timeouts, connect failures and body decode errors all land here
        Self::Unavailable(e.to_string())
    }
}

/// Outcome of a single send attempt reported by the outbound sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Sink backpressure ("too many requests"), optionally with a suggested wait.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

/// History store unreadable or unwritable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("history lock poisoned")]
    Poisoned,
}

/// Configuration rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that abort a whole pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
