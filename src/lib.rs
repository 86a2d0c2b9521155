// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod categorize;
pub mod config;
pub mod dedup;
pub mod error;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod status;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::categorize::{Categorizer, Category};
pub use crate::config::{Config, SourceDescriptor};
pub use crate::history::HistoryStore;
pub use crate::ingest::types::{Page, PageToken, RawItem, SourceClient};
pub use crate::notify::{DeliveryChannel, DeliveryResult, MessageSink};
pub use crate::pipeline::{Pipeline, RunStatus, RunSummary};
pub use crate::scheduler::Scheduler;
