// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{DeclaredCategory, SourceDescriptor};
use crate::error::SourceError;

/// Secondary link attached to an item (e.g. the original research paper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraLink {
    /// Short kind shown in bold, e.g. `Research`.
    pub label: String,
    /// Link text; `None` renders a generic "link".
    pub title: Option<String>,
    pub url: String,
}

/// One fetched unit. Immutable after the source client creates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    /// Canonical absolute URL; the dedup key.
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub links: Vec<ExtraLink>,
    /// Name of the originating source.
    pub source: String,
    pub declared: DeclaredCategory,
}

impl RawItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source: impl Into<String>,
        declared: DeclaredCategory,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: None,
            author: None,
            published: None,
            links: Vec::new(),
            source: source.into(),
            declared,
        }
    }
}

/// Cursor for the next page of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// 1-based page number.
    Number(u32),
    /// Absolute URL of the next page, as announced by the source.
    Url(String),
    /// Opaque cursor passed back as a query parameter.
    Cursor(String),
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RawItem>,
    /// `None` when the source is exhausted.
    pub next: Option<PageToken>,
}

impl Page {
    pub fn exhausted() -> Self {
        Self::default()
    }
}

/// Fetches one page of a source.
///
/// Must be idempotent for the same `(source, token)` pair; `token == None`
/// requests the first page.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        token: Option<&PageToken>,
    ) -> Result<Page, SourceError>;
}
