// src/ingest/http.rs
use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::config::{DetailSelectors, HttpSettings, SourceDescriptor, SourceKind};
use crate::error::SourceError;
use crate::ingest::providers::{paged_api, paged_html};
use crate::ingest::types::{Page, PageToken, RawItem, SourceClient};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "courier_detail_failures_total",
            "Item pages that could not be fetched or parsed; the item is kept as listed."
        );
    });
}

/// Production source client: one shared `reqwest` client, dispatching on the
/// source kind to the matching extraction plugin.
#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
}

impl HttpSourceClient {
    pub fn new(cfg: &HttpSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(&cfg.user_agent)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_website(
        &self,
        src: &SourceDescriptor,
        token: Option<&PageToken>,
    ) -> Result<Page, SourceError> {
        let (url, page_no) = paged_html::page_url(src, token)?;
        tracing::debug!(source = %src.name, %url, page = page_no, "fetching website page");

        let resp = self.client.get(url.as_str()).send().await?;
        let status = resp.status();
        // a missing page past the first one means the listing ran out
        if status == StatusCode::NOT_FOUND && page_no > 1 {
            return Ok(Page::exhausted());
        }
        if !status.is_success() {
            return Err(SourceError::unavailable(format!("HTTP {status} for {url}")));
        }
        let body = resp.text().await?;
        let mut items = paged_html::extract(src, &url, &body)?;
        if let Some(details) = &src.details {
            ensure_metrics_described();
            for item in &mut items {
                if let Err(e) = self.fetch_details(item, details).await {
                    counter!("courier_detail_failures_total").increment(1);
                    tracing::warn!(source = %src.name, item = %item.id, error = %e, "item page unavailable, keeping listing data");
                }
            }
        }
        let next = (!items.is_empty()).then(|| PageToken::Number(page_no + 1));
        Ok(Page { items, next })
    }

    /// Fetch one item's own page and fill what the listing left out.
    async fn fetch_details(&self, item: &mut RawItem, details: &DetailSelectors) -> Result<(), SourceError> {
        let url = Url::parse(&item.id).map_err(|e| SourceError::unavailable(format!("bad item url {}: {e}", item.id)))?;
        let resp = self.client.get(url.as_str()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::unavailable(format!("HTTP {status} for {url}")));
        }
        let body = resp.text().await?;
        paged_html::enrich(item, details, &url, &body)
    }

    async fn fetch_api(
        &self,
        src: &SourceDescriptor,
        token: Option<&PageToken>,
    ) -> Result<Page, SourceError> {
        let bad = src.placeholder_credentials();
        if !bad.is_empty() {
            return Err(SourceError::Misconfigured(format!(
                "placeholder credentials: {}",
                bad.join(", ")
            )));
        }

        let req = paged_api::build_request(&self.client, src, token)?;
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::unavailable(format!(
                "API returned HTTP {status} for {}",
                src.url
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::unavailable(format!("invalid JSON from {}: {e}", src.url)))?;
        Ok(paged_api::extract(src, token, &body))
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        token: Option<&PageToken>,
    ) -> Result<Page, SourceError> {
        match source.kind {
            SourceKind::Website => self.fetch_website(source, token).await,
            SourceKind::Api => self.fetch_api(source, token).await,
        }
    }
}
