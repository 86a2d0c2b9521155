// src/ingest/providers/mod.rs
//! Source-specific extraction plugins, one per source kind.

pub mod paged_api;
pub mod paged_html;

use chrono::{DateTime, NaiveDate, Utc};
use url::Url;

/// Resolve `href` against `base`, keep only http(s), drop the fragment.
pub fn canonical_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    let mut u = base.join(href).ok()?;
    if !matches!(u.scheme(), "http" | "https") {
        return None;
    }
    u.set_fragment(None);
    Some(u.to_string())
}

/// Best-effort timestamp parsing for the formats sources actually emit.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_link_resolves_relative_and_strips_fragment() {
        let base = Url::parse("https://news.example.org/topic/neuro/").unwrap();
        assert_eq!(
            canonical_link(&base, "/2025/05/sleep-study#comments").as_deref(),
            Some("https://news.example.org/2025/05/sleep-study")
        );
        assert_eq!(canonical_link(&base, "mailto:x@y.z"), None);
        assert_eq!(canonical_link(&base, "  "), None);
    }

    #[test]
    fn parse_published_accepts_common_formats() {
        let a = parse_published("2025-05-15T13:25:41-07:00").unwrap();
        assert_eq!(a.to_rfc3339(), "2025-05-15T20:25:41+00:00");
        assert!(parse_published("Thu, 15 May 2025 10:00:00 GMT").is_some());
        assert!(parse_published("2025-05-15").is_some());
        assert!(parse_published("May 15, 2025").is_some());
        assert!(parse_published("yesterday").is_none());
    }
}
