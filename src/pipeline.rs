// src/pipeline.rs
//! One cycle: fetch → dedupe → categorize → deliver → record.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::categorize::Categorizer;
use crate::config::{Config, SourceDescriptor};
use crate::dedup::filter_new;
use crate::error::RunError;
use crate::history::HistoryStore;
use crate::ingest::types::SourceClient;
use crate::ingest::{fetch_all, FetchOptions, SourceReport};
use crate::notify::format::item_message;
use crate::notify::{DeliveryChannel, DeliveryResult};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("courier_runs_total", "Pipeline runs by terminal status.");
        describe_counter!(
            "courier_duplicates_total",
            "Items filtered by the deduplicator (kind=history|batch)."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStat {
    pub name: String,
    pub pages: u32,
    pub items: usize,
    pub retries: u32,
    pub error: Option<String>,
}

impl From<&SourceReport> for SourceStat {
    fn from(r: &SourceReport) -> Self {
        Self {
            name: r.name.clone(),
            pages: r.pages,
            items: r.items,
            retries: r.retries,
            error: r.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Rolling record of one run; kept in the status file until the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub seen_before: usize,
    pub in_batch: usize,
    pub new_items: usize,
    pub delivered: usize,
    pub failed: usize,
    #[serde(default)]
    pub by_category: BTreeMap<String, usize>,
    #[serde(default)]
    pub sources: Vec<SourceStat>,
    /// `id: reason` for items not delivered this cycle.
    #[serde(default)]
    pub delivery_errors: Vec<String>,
    pub status: RunStatus,
    /// Set when the run aborted.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunSummary {
    /// Summary for a run that aborted before finishing.
    pub fn failed(run_id: u64, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            fetched: 0,
            seen_before: 0,
            in_batch: 0,
            new_items: 0,
            delivered: 0,
            failed: 0,
            by_category: BTreeMap::new(),
            sources: Vec::new(),
            delivery_errors: Vec::new(),
            status: RunStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn source_errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources
            .iter()
            .filter_map(|s| s.error.as_deref().map(|e| (s.name.as_str(), e)))
    }
}

pub struct Pipeline {
    client: Arc<dyn SourceClient>,
    history: Arc<HistoryStore>,
    channel: Mutex<DeliveryChannel>,
    categorizer: Categorizer,
    sources: Vec<SourceDescriptor>,
    fetch: FetchOptions,
    next_run_id: AtomicU64,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn SourceClient>,
        history: Arc<HistoryStore>,
        channel: DeliveryChannel,
        categorizer: Categorizer,
        sources: Vec<SourceDescriptor>,
        fetch: FetchOptions,
    ) -> Self {
        ensure_metrics_described();
        Self {
            client,
            history,
            channel: Mutex::new(channel),
            categorizer,
            sources,
            fetch,
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(
        cfg: &Config,
        client: Arc<dyn SourceClient>,
        history: Arc<HistoryStore>,
        channel: DeliveryChannel,
    ) -> Self {
        Self::new(
            client,
            history,
            channel,
            Categorizer::new(&cfg.categorizer.keywords),
            cfg.sources.clone(),
            FetchOptions::from_config(cfg),
        )
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Reserve the id of the next run.
    pub fn next_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send arbitrary text (status reports) through the same paced channel.
    pub async fn send_text(&self, text: &str) -> DeliveryResult {
        self.channel.lock().await.deliver(text).await
    }

    /// Execute one full cycle.
    ///
    /// Per-source and per-item failures downgrade the result to `Partial`; only
    /// a history store failure aborts the run with an error.
    pub async fn run_once(&self, run_id: u64) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        tracing::info!(run_id, sources = self.sources.len(), "pipeline run started");

        let fetched = fetch_all(self.client.as_ref(), &self.sources, &self.fetch).await;
        let sources: Vec<SourceStat> = fetched.reports.iter().map(SourceStat::from).collect();
        let fetched_count = fetched.items.len();

        // Held until every item is attempted: compaction waits for us.
        let mut writer = self.history.writer().await;

        let dedup = filter_new(fetched.items, &self.history)?;
        counter!("courier_duplicates_total", "kind" => "history").increment(dedup.seen_before as u64);
        counter!("courier_duplicates_total", "kind" => "batch").increment(dedup.in_batch as u64);

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            fetched: fetched_count,
            seen_before: dedup.seen_before,
            in_batch: dedup.in_batch,
            new_items: dedup.new_items.len(),
            delivered: 0,
            failed: 0,
            by_category: BTreeMap::new(),
            sources,
            delivery_errors: Vec::new(),
            status: RunStatus::Success,
            error: None,
        };

        let mut channel = self.channel.lock().await;
        for item in &dedup.new_items {
            let category = self.categorizer.categorize(item);
            let text = item_message(item, category);

            match channel.deliver(&text).await {
                DeliveryResult::Ok => {
                    writer.record(&item.id, Utc::now())?;
                    summary.delivered += 1;
                    *summary.by_category.entry(category.as_str().to_string()).or_default() += 1;
                    tracing::debug!(run_id, id = %item.id, %category, "delivered");
                }
                DeliveryResult::RetryableError { reason, .. } | DeliveryResult::FatalError(reason) => {
                    summary.failed += 1;
                    summary.delivery_errors.push(format!("{}: {reason}", item.id));
                }
            }
        }
        drop(channel);
        drop(writer);

        summary.finished_at = Utc::now();
        summary.status = if summary.failed == 0 && fetched.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        counter!("courier_runs_total", "status" => summary.status.as_str()).increment(1);

        tracing::info!(
            run_id,
            status = summary.status.as_str(),
            fetched = summary.fetched,
            new = summary.new_items,
            delivered = summary.delivered,
            failed = summary.failed,
            source_errors = fetched.errors.len(),
            "pipeline run finished"
        );
        Ok(summary)
    }
}
