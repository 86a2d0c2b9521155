// src/config/sources.rs
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::categorize::Category;

/// Parameter names that carry API credentials.
const CREDENTIAL_KEYS: &[&str] = &["key", "token", "api_key", "apikey", "access_token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Paginated HTML listing ("paged-html").
    Website,
    /// Paginated JSON endpoint ("paged-api").
    Api,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Website => "website",
            SourceKind::Api => "api",
        }
    }
}

/// Category a source declares for everything it publishes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DeclaredCategory {
    Fixed(Category),
    /// Source publishes several kinds of content; items are classified by keyword.
    Mixed,
    /// Tag not in the fixed set. Items fall back to `uncategorized`.
    Unknown(String),
}

impl From<String> for DeclaredCategory {
    fn from(s: String) -> Self {
        let t = s.trim().to_ascii_lowercase();
        if t == "mixed" {
            return DeclaredCategory::Mixed;
        }
        match Category::parse(&t) {
            Some(c) => DeclaredCategory::Fixed(c),
            None => DeclaredCategory::Unknown(s),
        }
    }
}

impl Default for DeclaredCategory {
    fn default() -> Self {
        DeclaredCategory::Fixed(Category::News)
    }
}

/// CSS selectors for website sources. Unset fields use the generic article layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HtmlSelectors {
    pub item: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
}

/// Selectors applied to each item's own page. Unset fields use the generic
/// article layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailSelectors {
    pub author: Option<String>,
    pub date: Option<String>,
    /// Paragraphs searched for a missing summary; one starting with
    /// "Summary:" wins over the first.
    pub summary: Option<String>,
    /// Blocks of `<strong>Label:</strong> value` lines (author, original research).
    pub meta: Option<String>,
}

/// One configured origin of items. Immutable for the duration of a cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub category: DeclaredCategory,
    pub url: String,
    /// Hard page cap. `None` = follow next tokens until the source is exhausted.
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Query parameters (API sources), including credentials.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub selectors: HtmlSelectors,
    /// Website sources: when set, every listed item's page is fetched to fill
    /// in research links and a missing author, date or summary.
    #[serde(default)]
    pub details: Option<DetailSelectors>,
    /// Dotted path to the item array in an API response, e.g. `response.docs`.
    #[serde(default)]
    pub items_path: Option<String>,
    /// Query parameter used for numeric pagination of API sources.
    #[serde(default)]
    pub page_param: Option<String>,
}

impl SourceDescriptor {
    /// Credential parameters that are empty or still hold a placeholder value.
    pub fn placeholder_credentials(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| CREDENTIAL_KEYS.contains(&k.to_ascii_lowercase().as_str()))
            .filter(|(_, v)| is_placeholder(v))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

fn is_placeholder(v: &str) -> bool {
    let v = v.trim();
    v.is_empty() || v.starts_with("YOUR_") || v == "PLACEHOLDER"
}
