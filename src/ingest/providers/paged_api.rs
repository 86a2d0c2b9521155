// src/ingest/providers/paged_api.rs
//! JSON APIs: query parameters from the descriptor, items under a well-known key,
//! next page announced by the response or derived from `page_param`.

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

use super::{canonical_link, parse_published};
use crate::config::SourceDescriptor;
use crate::error::SourceError;
use crate::ingest::normalize_text;
use crate::ingest::types::{ExtraLink, Page, PageToken, RawItem};

const ITEM_KEYS: &[&str] = &["data", "items", "results"];
const TITLE_KEYS: &[&str] = &["title", "name"];
const LINK_KEYS: &[&str] = &["url", "link", "permalink"];
const SUMMARY_KEYS: &[&str] = &["description", "summary", "content"];
const DATE_KEYS: &[&str] = &["date", "published_date", "published_at", "created_at"];
const AUTHOR_KEYS: &[&str] = &["author", "creator"];

/// Query key carrying numeric page tokens when the source names none.
const DEFAULT_PAGE_KEY: &str = "page";
const DEFAULT_CURSOR_KEY: &str = "cursor";

pub fn build_request(
    client: &Client,
    src: &SourceDescriptor,
    token: Option<&PageToken>,
) -> Result<RequestBuilder, SourceError> {
    let params: Vec<(&str, &str)> = src.params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let req = match token {
        Some(PageToken::Url(next)) => {
            let url = Url::parse(next).map_err(|e| SourceError::unavailable(format!("bad next url {next}: {e}")))?;
            // the announced URL usually repeats the query already
            let present: HashSet<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
            let missing: Vec<(&str, &str)> = params
                .iter()
                .filter(|(k, _)| !present.contains(*k))
                .copied()
                .collect();
            client.get(url).query(&missing)
        }
        Some(PageToken::Cursor(c)) => {
            let key = src.page_param.as_deref().unwrap_or(DEFAULT_CURSOR_KEY);
            client.get(&src.url).query(&params).query(&[(key, c.as_str())])
        }
        Some(PageToken::Number(n)) => {
            let key = src.page_param.as_deref().unwrap_or(DEFAULT_PAGE_KEY);
            client.get(&src.url).query(&params).query(&[(key, n.to_string())])
        }
        None => match src.page_param.as_deref() {
            Some(key) => client.get(&src.url).query(&params).query(&[(key, "1")]),
            None => client.get(&src.url).query(&params),
        },
    };
    Ok(req)
}

fn lookup_path<'a>(v: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .try_fold(v, |cur, key| cur.get(key))
}

fn item_array<'a>(src: &SourceDescriptor, body: &'a Value) -> &'a [Value] {
    if let Some(path) = src.items_path.as_deref() {
        return lookup_path(body, path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
    }
    if let Some(arr) = ITEM_KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
    {
        return arr.as_slice();
    }
    body.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn first_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
            // {"author": {"name": "..."}}
            Value::Object(_) => v.get("name").and_then(Value::as_str),
            _ => None,
        })
}

fn next_token(src: &SourceDescriptor, token: Option<&PageToken>, body: &Value, had_items: bool) -> Option<PageToken> {
    if let Some(next) = body
        .get("next")
        .and_then(Value::as_str)
        .and_then(|n| Url::parse(&src.url).ok().and_then(|base| canonical_link(&base, n)))
    {
        return Some(PageToken::Url(next));
    }
    for key in ["next_page", "next_cursor"] {
        match body.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(PageToken::Cursor(s.clone())),
            Some(Value::Number(n)) => {
                if let Some(n) = n.as_u64().and_then(|n| u32::try_from(n).ok()) {
                    return Some(PageToken::Number(n));
                }
            }
            _ => {}
        }
    }
    if src.page_param.is_some() && had_items {
        let current = match token {
            Some(PageToken::Number(n)) => *n,
            _ => 1,
        };
        return Some(PageToken::Number(current + 1));
    }
    None
}

fn map_item(src: &SourceDescriptor, base: Option<&Url>, obj: &Value) -> Option<RawItem> {
    let title = normalize_text(first_str(obj, TITLE_KEYS)?);
    let raw_link = first_str(obj, LINK_KEYS)?;
    let link = match base {
        Some(b) => canonical_link(b, raw_link)?,
        None => raw_link.trim().to_string(),
    };
    if title.is_empty() || link.is_empty() {
        return None;
    }

    let mut item = RawItem::new(link, title, src.name.clone(), src.category.clone());
    item.summary = first_str(obj, SUMMARY_KEYS)
        .map(normalize_text)
        .filter(|s| !s.is_empty());
    item.author = first_str(obj, AUTHOR_KEYS).map(normalize_text);
    item.published = first_str(obj, DATE_KEYS).and_then(parse_published);

    if let Some(url) = obj.get("original_research_url").and_then(Value::as_str) {
        let title = obj
            .get("original_research_title")
            .and_then(Value::as_str)
            .map(normalize_text)
            .filter(|t| !t.is_empty());
        if let Some(url) = base.and_then(|b| canonical_link(b, url)) {
            item.links.push(ExtraLink {
                label: "Research".to_string(),
                title,
                url,
            });
        }
    }
    Some(item)
}

/// Map one JSON response into a page. Items without title or link are dropped.
pub fn extract(src: &SourceDescriptor, token: Option<&PageToken>, body: &Value) -> Page {
    let base = Url::parse(&src.url).ok();
    let raw = item_array(src, body);
    let items: Vec<RawItem> = raw
        .iter()
        .filter_map(|obj| map_item(src, base.as_ref(), obj))
        .collect();
    if items.len() < raw.len() {
        tracing::debug!(source = %src.name, dropped = raw.len() - items.len(), "api items without title/link");
    }
    let next = next_token(src, token, body, !raw.is_empty());
    Page { items, next }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeclaredCategory, HtmlSelectors, SourceKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn src() -> SourceDescriptor {
        SourceDescriptor {
            name: "Events API".into(),
            kind: SourceKind::Api,
            category: DeclaredCategory::Mixed,
            url: "https://api.example.org/v1/events".into(),
            max_pages: None,
            params: BTreeMap::new(),
            selectors: HtmlSelectors::default(),
            details: None,
            items_path: None,
            page_param: None,
        }
    }

    #[test]
    fn field_fallbacks_and_drop_incomplete() {
        let body = json!({
            "results": [
                {"name": "Brain Summit", "link": "/e/1", "summary": "Two days", "created_at": "2025-06-01",
                 "creator": {"name": "Dr. Who"}},
                {"title": "No link"},
                {"title": "Paper", "url": "https://x.example/p", "original_research_url": "https://doi.org/10.1/abc",
                 "original_research_title": "Sleep spindles"}
            ]
        });
        let page = extract(&src(), None, &body);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "https://api.example.org/e/1");
        assert_eq!(page.items[0].title, "Brain Summit");
        assert_eq!(page.items[0].author.as_deref(), Some("Dr. Who"));
        assert!(page.items[0].published.is_some());
        assert_eq!(page.items[1].links[0].label, "Research");
        assert_eq!(page.items[1].links[0].title.as_deref(), Some("Sleep spindles"));
        assert!(page.next.is_none());
    }

    #[test]
    fn next_token_variants() {
        let s = src();
        let body = json!({"items": [{"title": "a", "url": "https://x/a"}], "next": "https://api.example.org/v1/events?p=2"});
        assert_eq!(
            extract(&s, None, &body).next,
            Some(PageToken::Url("https://api.example.org/v1/events?p=2".into()))
        );

        let body = json!({"items": [], "next": "/v1/events?p=3"});
        assert_eq!(
            extract(&s, None, &body).next,
            Some(PageToken::Url("https://api.example.org/v1/events?p=3".into()))
        );

        let body = json!({"items": [], "next_cursor": "abc"});
        assert_eq!(extract(&s, None, &body).next, Some(PageToken::Cursor("abc".into())));

        let mut s = src();
        s.page_param = Some("page".into());
        let body = json!([{"title": "a", "url": "https://x/a"}]);
        assert_eq!(
            extract(&s, Some(&PageToken::Number(2)), &body).next,
            Some(PageToken::Number(3))
        );
        let empty = json!([]);
        assert_eq!(extract(&s, Some(&PageToken::Number(3)), &empty).next, None);
    }

    #[test]
    fn items_path_is_followed() {
        let mut s = src();
        s.items_path = Some("response.docs".into());
        let body = json!({"response": {"docs": [{"title": "t", "url": "https://x/t"}]}});
        assert_eq!(extract(&s, None, &body).items.len(), 1);
    }
}
