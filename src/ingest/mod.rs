// src/ingest/mod.rs
//! Fetch orchestration: drives a [`SourceClient`] across every configured source
//! and every page (up to the page cap), retrying the current page with
//! exponential backoff and isolating failures per source.

pub mod http;
pub mod providers;
pub mod retry;
pub mod types;

use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use crate::config::{Config, SourceDescriptor};
use crate::error::SourceError;
use crate::ingest::retry::{Backoff, RetryPolicy};
use crate::ingest::types::{Page, PageToken, RawItem, SourceClient};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("courier_items_fetched_total", "Items fetched from sources.");
        describe_counter!(
            "courier_items_collapsed_total",
            "Items dropped as repeats across pages of the same source."
        );
        describe_counter!(
            "courier_page_retries_total",
            "Page fetches retried after a transient source failure."
        );
        describe_counter!(
            "courier_source_errors_total",
            "Sources abandoned for a cycle after exhausting retries."
        );
        describe_histogram!("courier_fetch_page_ms", "Page fetch time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Knobs for one orchestration pass.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub retry: RetryPolicy,
    /// Pause between consecutive pages of one source.
    pub page_delay: Duration,
    /// Sources fetched at once. Output order is unaffected.
    pub concurrency: usize,
}

impl FetchOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let h = &cfg.http;
        Self {
            retry: RetryPolicy::new(
                h.retry_attempts,
                Backoff::new(
                    Duration::from_millis(h.backoff_base_ms),
                    Duration::from_millis(h.backoff_max_ms),
                ),
            ),
            page_delay: Duration::from_millis(h.page_delay_ms),
            concurrency: cfg.settings.fetch_concurrency,
        }
    }
}

/// Per-source outcome of one pass.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub pages: u32,
    pub items: usize,
    pub retries: u32,
    /// Set when the source was abandoned; items from earlier pages are kept.
    pub error: Option<SourceError>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Declaration order of sources, then page order, then in-page order.
    pub items: Vec<RawItem>,
    pub errors: BTreeMap<String, SourceError>,
    pub reports: Vec<SourceReport>,
}

/// Fetch every page of every source. Never fails as a whole: a source that keeps
/// failing is recorded in `errors` and the remaining sources still run.
pub async fn fetch_all<C>(client: &C, sources: &[SourceDescriptor], opts: &FetchOptions) -> FetchOutcome
where
    C: SourceClient + ?Sized,
{
    ensure_metrics_described();

    let pending: Vec<_> = sources
        .iter()
        .map(|src| fetch_source(client, src, opts))
        .collect();
    // `buffered` (not `buffer_unordered`) keeps declaration order.
    let per_source: Vec<(Vec<RawItem>, SourceReport)> = stream::iter(pending)
        .buffered(opts.concurrency.max(1))
        .collect()
        .await;

    let mut out = FetchOutcome::default();
    for (mut items, report) in per_source {
        if let Some(e) = &report.error {
            out.errors.insert(report.name.clone(), e.clone());
        }
        out.items.append(&mut items);
        out.reports.push(report);
    }
    tracing::info!(
        items = out.items.len(),
        failed_sources = out.errors.len(),
        "fetch pass finished"
    );
    out
}

async fn fetch_source<C>(client: &C, src: &SourceDescriptor, opts: &FetchOptions) -> (Vec<RawItem>, SourceReport)
where
    C: SourceClient + ?Sized,
{
    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut report = SourceReport {
        name: src.name.clone(),
        pages: 0,
        items: 0,
        retries: 0,
        error: None,
    };
    let mut token: Option<PageToken> = None;

    loop {
        if src.max_pages.is_some_and(|cap| report.pages >= cap) {
            tracing::debug!(source = %src.name, pages = report.pages, "page cap reached");
            break;
        }
        if report.pages > 0 && !opts.page_delay.is_zero() {
            tokio::time::sleep(opts.page_delay).await;
        }

        let page = match fetch_page_with_retry(client, src, token.as_ref(), opts, &mut report).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(source = %src.name, page = report.pages + 1, error = %e, "abandoning source for this cycle");
                counter!("courier_source_errors_total").increment(1);
                report.error = Some(e);
                break;
            }
        };
        report.pages += 1;

        let found = page.items.len();
        for it in page.items {
            if seen.insert(it.id.clone()) {
                items.push(it);
            } else {
                counter!("courier_items_collapsed_total").increment(1);
            }
        }
        tracing::debug!(source = %src.name, page = report.pages, found, "page fetched");

        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    report.items = items.len();
    counter!("courier_items_fetched_total").increment(items.len() as u64);
    tracing::info!(source = %src.name, items = report.items, pages = report.pages, "source fetched");
    (items, report)
}

async fn fetch_page_with_retry<C>(
    client: &C,
    src: &SourceDescriptor,
    token: Option<&PageToken>,
    opts: &FetchOptions,
    report: &mut SourceReport,
) -> Result<Page, SourceError>
where
    C: SourceClient + ?Sized,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let t0 = Instant::now();
        let res = client.fetch_page(src, token).await;
        histogram!("courier_fetch_page_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match res {
            Ok(page) => return Ok(page),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => match opts.retry.after_failure(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        source = %src.name,
                        attempt,
                        ?delay,
                        error = %e,
                        "page fetch failed, retrying"
                    );
                    counter!("courier_page_retries_total").increment(1);
                    report.retries += 1;
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  <b>Brain&nbsp;&nbsp;waves</b>\n\n “matter”  ";
        assert_eq!(normalize_text(s), "Brain waves \"matter\"");
    }

    #[test]
    fn normalize_text_keeps_sentence_punctuation() {
        assert_eq!(normalize_text("Sleep helps memory!"), "Sleep helps memory!");
    }
}
