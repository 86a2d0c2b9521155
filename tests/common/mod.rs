// tests/common/mod.rs
//
// Shared fakes for integration tests: a scripted source client and builders
// for descriptors, items and pipelines.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use feed_courier::categorize::Categorizer;
use feed_courier::config::{DeclaredCategory, HtmlSelectors, SourceDescriptor, SourceKind};
use feed_courier::error::SourceError;
use feed_courier::history::HistoryStore;
use feed_courier::ingest::retry::{Backoff, RetryPolicy};
use feed_courier::ingest::types::{Page, PageToken, RawItem, SourceClient};
use feed_courier::ingest::FetchOptions;
use feed_courier::notify::{DeliveryChannel, DeliveryPolicy, MockSink};
use feed_courier::pipeline::Pipeline;

/// Source client serving canned pages per source name.
#[derive(Default)]
pub struct FakeClient {
    pages: HashMap<String, Vec<Vec<RawItem>>>,
    endless: HashMap<String, Vec<RawItem>>,
    fail_first: Mutex<HashMap<String, u32>>,
    always: HashMap<String, SourceError>,
    panic_on: Option<String>,
    gate: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<(String, Option<PageToken>)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages served in order; the last one carries no next token.
    pub fn with_pages(mut self, source: &str, pages: Vec<Vec<RawItem>>) -> Self {
        self.pages.insert(source.to_string(), pages);
        self
    }

    /// Same page forever, always announcing a next page.
    pub fn endless(mut self, source: &str, page: Vec<RawItem>) -> Self {
        self.endless.insert(source.to_string(), page);
        self
    }

    /// First `n` calls for `source` fail with a retryable error.
    pub fn fail_first(self, source: &str, n: u32) -> Self {
        self.fail_first.lock().unwrap().insert(source.to_string(), n);
        self
    }

    pub fn always_fail(mut self, source: &str, err: SourceError) -> Self {
        self.always.insert(source.to_string(), err);
        self
    }

    pub fn panic_on(mut self, source: &str) -> Self {
        self.panic_on = Some(source.to_string());
        self
    }

    /// Every fetch waits for one `notify_one` on the gate.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls_for(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == source)
            .count()
    }
}

#[async_trait]
impl SourceClient for FakeClient {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        token: Option<&PageToken>,
    ) -> Result<Page, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((source.name.clone(), token.cloned()));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panic_on.as_deref() == Some(source.name.as_str()) {
            panic!("parser blew up on {}", source.name);
        }
        if let Some(err) = self.always.get(&source.name) {
            return Err(err.clone());
        }
        {
            let mut fails = self.fail_first.lock().unwrap();
            if let Some(n) = fails.get_mut(&source.name) {
                if *n > 0 {
                    *n -= 1;
                    return Err(SourceError::unavailable("connection reset"));
                }
            }
        }

        let idx = match token {
            Some(PageToken::Number(n)) => n.saturating_sub(1) as usize,
            _ => 0,
        };
        if let Some(page) = self.endless.get(&source.name) {
            return Ok(Page {
                items: page.clone(),
                next: Some(PageToken::Number(idx as u32 + 2)),
            });
        }
        let Some(pages) = self.pages.get(&source.name) else {
            return Ok(Page::exhausted());
        };
        let Some(items) = pages.get(idx) else {
            return Ok(Page::exhausted());
        };
        let next = (idx + 1 < pages.len()).then(|| PageToken::Number(idx as u32 + 2));
        Ok(Page {
            items: items.clone(),
            next,
        })
    }
}

pub fn source(name: &str) -> SourceDescriptor {
    SourceDescriptor {
        name: name.to_string(),
        kind: SourceKind::Website,
        category: DeclaredCategory::default(),
        url: format!("https://{}.example.org/", name.to_lowercase()),
        max_pages: None,
        params: BTreeMap::new(),
        selectors: HtmlSelectors::default(),
        details: None,
        items_path: None,
        page_param: None,
    }
}

pub fn item(source: &str, slug: &str) -> RawItem {
    RawItem::new(
        format!("https://{}.example.org/{slug}", source.to_lowercase()),
        format!("{source} {slug}"),
        source,
        DeclaredCategory::default(),
    )
}

pub fn ids(items: &[RawItem]) -> Vec<String> {
    items.iter().map(|i| i.id.clone()).collect()
}

pub fn fast_fetch() -> FetchOptions {
    FetchOptions {
        retry: RetryPolicy::new(
            3,
            Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        ),
        page_delay: Duration::ZERO,
        concurrency: 2,
    }
}

pub fn fast_delivery() -> DeliveryPolicy {
    DeliveryPolicy {
        min_gap: Duration::ZERO,
        max_attempts: 3,
        default_retry_after: Duration::from_millis(50),
        backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
    }
}

pub fn pipeline(
    client: FakeClient,
    history: Arc<HistoryStore>,
    sink: Arc<MockSink>,
    sources: Vec<SourceDescriptor>,
) -> Pipeline {
    Pipeline::new(
        Arc::new(client),
        history,
        DeliveryChannel::new(sink, fast_delivery()),
        Categorizer::default(),
        sources,
        fast_fetch(),
    )
}

/// Message text contains the item link as the "Read Article" target.
pub fn delivered_ids(sink: &MockSink) -> Vec<String> {
    sink.delivered()
        .iter()
        .filter_map(|text| {
            let start = text.rfind("](")? + 2;
            Some(text[start..text.len() - 1].to_string())
        })
        .collect()
}
