// src/notify/format.rs
//! Telegram MarkdownV2 rendering of items.

use crate::categorize::Category;
use crate::ingest::types::RawItem;

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Summaries longer than this are cut, preferably at a sentence end.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Escape visible text for MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a URL placed inside `(...)` of an inline link.
pub fn escape_link_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

/// Cut at the last '.' inside the limit when that keeps most of the text,
/// otherwise hard-cut and add an ellipsis.
pub fn cut_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let min_keep = max_chars * 6 / 10;
    match head.rfind('.') {
        Some(pos) if head[..pos].chars().count() > min_keep => head[..=pos].to_string(),
        _ => format!("{}…", head.trim_end()),
    }
}

/// Render one item as a MarkdownV2 message.
pub fn item_message(item: &RawItem, category: Category) -> String {
    let mut msg = format!("*{}*\n\n", escape_markdown_v2(&item.title));

    if let Some(summary) = item.summary.as_deref().filter(|s| !s.is_empty()) {
        let summary = summary.strip_prefix("Summary:").unwrap_or(summary).trim();
        msg.push_str(&escape_markdown_v2(&cut_summary(summary, SUMMARY_MAX_CHARS)));
        msg.push_str("\n\n");
    }
    if let Some(author) = item.author.as_deref().filter(|a| !a.is_empty()) {
        msg.push_str(&format!("*👤 Author:* {}\n", escape_markdown_v2(author)));
    }
    if let Some(ts) = item.published {
        let date = ts.format("%B %d, %Y").to_string();
        msg.push_str(&format!("*🗓 Date:* {}\n", escape_markdown_v2(&date)));
    }
    msg.push_str(&format!("*📌 Source:* {}\n", escape_markdown_v2(&item.source)));
    for link in &item.links {
        msg.push_str(&format!(
            "📝 *{}:* [{}]({})\n",
            escape_markdown_v2(&link.label),
            escape_markdown_v2(link.title.as_deref().unwrap_or("link")),
            escape_link_url(&link.url)
        ));
    }
    msg.push_str(&format!("\\#{}\n\n", escape_markdown_v2(category.hashtag())));
    msg.push_str(&format!("[📖 Read Article]({})", escape_link_url(&item.id)));
    msg
}
