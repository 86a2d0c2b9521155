// src/ingest/providers/paged_html.rs
//! Website listings: page 1 is the configured URL, page n is `{url}/page/{n}/`.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{canonical_link, parse_published};
use crate::config::{DetailSelectors, SourceDescriptor};
use crate::error::SourceError;
use crate::ingest::normalize_text;
use crate::ingest::types::{ExtraLink, PageToken, RawItem};

const DEFAULT_ITEM: &str = "article";
const DEFAULT_TITLE: &str = "h1, h2, h3";
const DEFAULT_LINK: &str = "a[href]";
const DEFAULT_SUMMARY: &str = ".excerpt, p";
const DEFAULT_AUTHOR: &str = ".author, [rel=author]";
const DEFAULT_DATE: &str = "time";

const DETAIL_SUMMARY: &str = ".entry-content p";
const DETAIL_META: &str = "p.has-background";

/// URL and 1-based page number for `token`.
pub fn page_url(src: &SourceDescriptor, token: Option<&PageToken>) -> Result<(Url, u32), SourceError> {
    let n = match token {
        None => 1,
        Some(PageToken::Number(n)) => *n,
        Some(other) => {
            return Err(SourceError::Misconfigured(format!(
                "website source got non-numeric page token {other:?}"
            )))
        }
    };
    let raw = if n <= 1 {
        src.url.clone()
    } else {
        format!("{}/page/{}/", src.url.trim_end_matches('/'), n)
    };
    let url = Url::parse(&raw).map_err(|e| SourceError::Misconfigured(format!("bad url {raw}: {e}")))?;
    Ok((url, n.max(1)))
}

struct Selectors {
    item: Selector,
    title: Selector,
    link: Selector,
    summary: Selector,
    author: Selector,
    date: Selector,
}

impl Selectors {
    fn for_source(src: &SourceDescriptor) -> Result<Self, SourceError> {
        let s = &src.selectors;
        Ok(Self {
            item: compile(s.item.as_deref().unwrap_or(DEFAULT_ITEM))?,
            title: compile(s.title.as_deref().unwrap_or(DEFAULT_TITLE))?,
            link: compile(s.link.as_deref().unwrap_or(DEFAULT_LINK))?,
            summary: compile(s.summary.as_deref().unwrap_or(DEFAULT_SUMMARY))?,
            author: compile(s.author.as_deref().unwrap_or(DEFAULT_AUTHOR))?,
            date: compile(s.date.as_deref().unwrap_or(DEFAULT_DATE))?,
        })
    }
}

fn compile(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Misconfigured(format!("bad selector '{css}': {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .map(text_of)
        .find(|t| !t.is_empty())
}

/// Extract items from one listing page. Items lacking a title or link are skipped.
pub fn extract(src: &SourceDescriptor, page_url: &Url, body: &str) -> Result<Vec<RawItem>, SourceError> {
    let sel = Selectors::for_source(src)?;
    let doc = Html::parse_document(body);
    let base = Url::parse(&src.url).unwrap_or_else(|_| page_url.clone());

    let mut out = Vec::new();
    for node in doc.select(&sel.item) {
        let Some(title_el) = node.select(&sel.title).find(|el| !text_of(*el).is_empty()) else {
            continue;
        };
        let title = text_of(title_el);

        // prefer the anchor inside (or being) the title, then any link in the item
        let href = title_el
            .value()
            .attr("href")
            .or_else(|| title_el.select(&sel.link).find_map(|a| a.value().attr("href")))
            .or_else(|| node.select(&sel.link).find_map(|a| a.value().attr("href")));
        let Some(link) = href.and_then(|h| canonical_link(&base, h)) else {
            tracing::debug!(source = %src.name, %title, "item without usable link skipped");
            continue;
        };

        let mut item = RawItem::new(link, title, src.name.clone(), src.category.clone());
        item.summary = first_text(node, &sel.summary).filter(|s| *s != item.title);
        item.author = first_text(node, &sel.author);
        item.published = node.select(&sel.date).find_map(|t| {
            t.value()
                .attr("datetime")
                .and_then(parse_published)
                .or_else(|| parse_published(&text_of(t)))
        });
        out.push(item);
    }
    Ok(out)
}

/// Fill gaps in `item` from the item's own page: research links from the
/// labelled meta blocks, then author, date and summary where still missing.
/// Listing values always win over the detail page.
pub fn enrich(
    item: &mut RawItem,
    details: &DetailSelectors,
    page_url: &Url,
    body: &str,
) -> Result<(), SourceError> {
    let meta = compile(details.meta.as_deref().unwrap_or(DETAIL_META))?;
    let author = compile(details.author.as_deref().unwrap_or(DEFAULT_AUTHOR))?;
    let date = compile(details.date.as_deref().unwrap_or(DEFAULT_DATE))?;
    let summary = compile(details.summary.as_deref().unwrap_or(DETAIL_SUMMARY))?;
    let label = compile("strong")?;

    let doc = Html::parse_document(body);
    let root = doc.root_element();

    for block in root.select(&meta) {
        for strong in block.select(&label) {
            let name = text_of(strong);
            if name.starts_with("Original Research") {
                let Some(anchor) = anchor_after(strong) else { continue };
                let Some(url) = anchor.value().attr("href").and_then(|h| canonical_link(page_url, h)) else {
                    continue;
                };
                if item.links.iter().any(|l| l.url == url) {
                    continue;
                }
                let title = text_of(anchor);
                item.links.push(ExtraLink {
                    label: "Research".to_string(),
                    title: (!title.is_empty()).then_some(title),
                    url,
                });
            } else if name.starts_with("Author") && item.author.is_none() {
                item.author = value_after(strong);
            }
        }
    }

    if item.author.is_none() {
        item.author = first_text(root, &author);
    }
    if item.published.is_none() {
        item.published = root.select(&date).find_map(|t| {
            t.value()
                .attr("datetime")
                .and_then(parse_published)
                .or_else(|| parse_published(&text_of(t)))
        });
    }
    if item.summary.is_none() {
        let paragraphs: Vec<String> = root
            .select(&summary)
            .map(text_of)
            .filter(|t| !t.is_empty())
            .collect();
        item.summary = paragraphs
            .iter()
            .find_map(|p| p.strip_prefix("Summary:").map(|rest| rest.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| paragraphs.into_iter().next());
    }
    Ok(())
}

/// First anchor following `label` on the same line.
fn anchor_after(label: ElementRef<'_>) -> Option<ElementRef<'_>> {
    for node in label.next_siblings() {
        if let Some(el) = ElementRef::wrap(node) {
            match el.value().name() {
                "a" => return Some(el),
                "strong" | "br" => return None,
                _ => {}
            }
        }
    }
    None
}

/// Value following `label`: a linked name if present, else the plain text
/// up to the next label or line break.
fn value_after(label: ElementRef<'_>) -> Option<String> {
    let mut text = String::new();
    for node in label.next_siblings() {
        match ElementRef::wrap(node) {
            Some(el) if matches!(el.value().name(), "strong" | "br") => break,
            Some(el) if el.value().name() == "a" => {
                let name = text_of(el);
                if !name.is_empty() {
                    return Some(name);
                }
            }
            Some(el) => text.extend(el.text()),
            None => {
                if let Some(t) = node.value().as_text() {
                    text.push_str(t);
                }
            }
        }
    }
    let value = normalize_text(&text);
    let value = value.trim_start_matches(':').trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeclaredCategory, HtmlSelectors, SourceKind};
    use std::collections::BTreeMap;

    fn src(url: &str) -> SourceDescriptor {
        SourceDescriptor {
            name: "Blog".into(),
            kind: SourceKind::Website,
            category: DeclaredCategory::Mixed,
            url: url.into(),
            max_pages: Some(2),
            params: BTreeMap::new(),
            selectors: HtmlSelectors::default(),
            details: None,
            items_path: None,
            page_param: None,
        }
    }

    #[test]
    fn page_urls_follow_wordpress_layout() {
        let s = src("https://blog.example.org/neuro/");
        let (u1, n1) = page_url(&s, None).unwrap();
        assert_eq!((u1.as_str(), n1), ("https://blog.example.org/neuro/", 1));
        let (u3, n3) = page_url(&s, Some(&PageToken::Number(3))).unwrap();
        assert_eq!((u3.as_str(), n3), ("https://blog.example.org/neuro/page/3/", 3));
        assert!(page_url(&s, Some(&PageToken::Cursor("x".into()))).is_err());
    }

    #[test]
    fn generic_article_layout() {
        let html = r#"
            <html><body>
              <article>
                <h2><a href="/posts/one">First &amp; best</a></h2>
                <p>Summary one.</p>
                <time datetime="2025-05-15T13:25:41-07:00">May 15</time>
              </article>
              <article><h2>No link here</h2></article>
              <article>
                <h3>Second</h3>
                <a href="https://other.example.net/two#top">read</a>
              </article>
            </body></html>"#;
        let s = src("https://blog.example.org/neuro/");
        let page = Url::parse(&s.url).unwrap();
        let items = extract(&s, &page, html).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "https://blog.example.org/posts/one");
        assert_eq!(items[0].title, "First & best");
        assert_eq!(items[0].summary.as_deref(), Some("Summary one."));
        assert!(items[0].published.is_some());
        assert_eq!(items[1].id, "https://other.example.net/two");
        assert_eq!(items[1].source, "Blog");
    }

    #[test]
    fn detail_page_fills_gaps() {
        let html = r#"
            <html><body>
              <time datetime="2025-05-15T13:25:41-07:00">May 15, 2025</time>
              <div class="entry-content">
                <p>Opening paragraph.</p>
                <p><strong>Summary:</strong> Spindles replay the day.</p>
                <p class="has-background">
                  <strong>Author:</strong> Jane Doe<br>
                  <strong>Source:</strong> <a href="https://uni.example.edu">Example University</a><br>
                  <strong>Original Research:</strong> Closed access.<br>
                  <a href="/doi/10.1/x">Sleep spindles and memory</a>
                </p>
                <p class="has-background">
                  <strong>Original Research:</strong> <a href="https://doi.org/10.1/y#abs">Second study</a>
                </p>
              </div>
            </body></html>"#;
        let page = Url::parse("https://blog.example.org/posts/one").unwrap();
        let mut item = RawItem::new(page.as_str(), "One", "Blog", DeclaredCategory::Mixed);
        enrich(&mut item, &DetailSelectors::default(), &page, html).unwrap();

        assert_eq!(item.author.as_deref(), Some("Jane Doe"));
        assert_eq!(item.summary.as_deref(), Some("Spindles replay the day."));
        assert!(item.published.is_some());
        // the first research label has no link on its own line
        assert_eq!(
            item.links,
            vec![ExtraLink {
                label: "Research".into(),
                title: Some("Second study".into()),
                url: "https://doi.org/10.1/y".into(),
            }]
        );
    }

    #[test]
    fn detail_page_never_overrides_listing_values() {
        let html = r#"<div class="entry-content"><p>Other text.</p>
            <p class="has-background"><strong>Author:</strong> <a href="/who">Someone Else</a></p></div>"#;
        let page = Url::parse("https://blog.example.org/posts/one").unwrap();
        let mut item = RawItem::new(page.as_str(), "One", "Blog", DeclaredCategory::Mixed);
        item.author = Some("Listing Author".into());
        item.summary = Some("Listing summary.".into());
        enrich(&mut item, &DetailSelectors::default(), &page, html).unwrap();
        assert_eq!(item.author.as_deref(), Some("Listing Author"));
        assert_eq!(item.summary.as_deref(), Some("Listing summary."));
        assert!(item.links.is_empty());

        let mut fresh = RawItem::new(page.as_str(), "One", "Blog", DeclaredCategory::Mixed);
        enrich(&mut fresh, &DetailSelectors::default(), &page, html).unwrap();
        assert_eq!(fresh.author.as_deref(), Some("Someone Else"));
        assert_eq!(fresh.summary.as_deref(), Some("Other text."));
    }

    #[test]
    fn bad_selector_is_misconfiguration() {
        let mut s = src("https://blog.example.org/");
        s.selectors.item = Some("div[".into());
        let page = Url::parse(&s.url).unwrap();
        assert!(matches!(
            extract(&s, &page, "<html></html>"),
            Err(SourceError::Misconfigured(_))
        ));
    }
}
