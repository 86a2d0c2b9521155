// src/categorize.rs
//! Static classifier into the fixed category set.
//!
//! The source's declared category wins; only "mixed" sources are classified by
//! keyword match against title + summary. Total and deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DeclaredCategory;
use crate::ingest::types::RawItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    News,
    Events,
    Jobs,
    VideosCourses,
    Facts,
    Uncategorized,
}

impl Category {
    /// Order in which keyword rules are tried for mixed sources.
    pub const RULE_ORDER: [Category; 5] = [
        Category::Events,
        Category::Jobs,
        Category::VideosCourses,
        Category::Facts,
        Category::News,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Some(Category::News),
            "events" | "event" => Some(Category::Events),
            "jobs" | "job" => Some(Category::Jobs),
            "videos/courses" | "videos" | "courses" | "videos_courses" => {
                Some(Category::VideosCourses)
            }
            "facts" | "fact" => Some(Category::Facts),
            "uncategorized" => Some(Category::Uncategorized),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::News => "news",
            Category::Events => "events",
            Category::Jobs => "jobs",
            Category::VideosCourses => "videos/courses",
            Category::Facts => "facts",
            Category::Uncategorized => "uncategorized",
        }
    }

    /// Hashtag-safe label used in messages.
    pub fn hashtag(self) -> &'static str {
        match self {
            Category::VideosCourses => "videos_courses",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_keywords(c: Category) -> &'static [&'static str] {
    match c {
        Category::Events => &[
            "conference",
            "symposium",
            "workshop",
            "webinar",
            "meetup",
            "summit",
            "seminar",
            "hackathon",
        ],
        Category::Jobs => &[
            "hiring",
            "vacancy",
            "job opening",
            "postdoc",
            "phd position",
            "fellowship",
            "position available",
        ],
        Category::VideosCourses => &[
            "video", "course", "lecture", "tutorial", "mooc", "podcast", "watch",
        ],
        Category::Facts => &["did you know", "fun fact", "fact:"],
        Category::News => &["study", "research", "researchers", "scientists", "findings"],
        Category::Uncategorized => &[],
    }
}

/// Keyword table for mixed sources. Immutable once built.
#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: Vec<(Category, Vec<String>)>,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl Categorizer {
    /// `overrides` maps a category tag to a keyword list replacing the defaults.
    /// Unknown tags are ignored.
    pub fn new(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut by_cat: BTreeMap<Category, Vec<String>> = BTreeMap::new();
        for (tag, words) in overrides {
            match Category::parse(tag) {
                Some(c) => {
                    by_cat.insert(c, words.iter().map(|w| w.to_lowercase()).collect());
                }
                None => tracing::warn!(tag = %tag, "ignoring keywords for unknown category"),
            }
        }
        let rules = Category::RULE_ORDER
            .iter()
            .map(|c| {
                let words = by_cat.remove(c).unwrap_or_else(|| {
                    default_keywords(*c).iter().map(|s| s.to_string()).collect()
                });
                (*c, words)
            })
            .collect();
        Self { rules }
    }

    pub fn categorize(&self, item: &RawItem) -> Category {
        match &item.declared {
            DeclaredCategory::Fixed(c) => *c,
            DeclaredCategory::Unknown(_) => Category::Uncategorized,
            DeclaredCategory::Mixed => self.classify_text(item),
        }
    }

    fn classify_text(&self, item: &RawItem) -> Category {
        let hay = format!(
            "{} {}",
            item.title.to_lowercase(),
            item.summary.as_deref().unwrap_or_default().to_lowercase()
        );
        self.rules
            .iter()
            .find(|(_, words)| words.iter().any(|w| !w.is_empty() && hay.contains(w.as_str())))
            .map(|(c, _)| *c)
            .unwrap_or(Category::Uncategorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(declared: DeclaredCategory, title: &str, summary: Option<&str>) -> RawItem {
        let mut it = RawItem::new("https://x.example/a", title, "Src", declared);
        it.summary = summary.map(str::to_string);
        it
    }

    #[test]
    fn declared_category_wins_for_fixed_sources() {
        let c = Categorizer::default();
        let it = item(
            DeclaredCategory::Fixed(Category::Jobs),
            "Annual neuroscience conference announced",
            None,
        );
        assert_eq!(c.categorize(&it), Category::Jobs);
    }

    #[test]
    fn mixed_sources_use_keywords_in_rule_order() {
        let c = Categorizer::default();
        let it = item(
            DeclaredCategory::Mixed,
            "Watch the lecture from our spring symposium",
            None,
        );
        // events are tried before videos/courses
        assert_eq!(c.categorize(&it), Category::Events);

        let it = item(
            DeclaredCategory::Mixed,
            "Intro course",
            Some("A free MOOC on the visual cortex"),
        );
        assert_eq!(c.categorize(&it), Category::VideosCourses);
    }

    #[test]
    fn falls_back_to_uncategorized() {
        let c = Categorizer::default();
        assert_eq!(
            c.categorize(&item(DeclaredCategory::Mixed, "Hello", None)),
            Category::Uncategorized
        );
        assert_eq!(
            c.categorize(&item(DeclaredCategory::Unknown("podcasts".into()), "Hello", None)),
            Category::Uncategorized
        );
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut o = BTreeMap::new();
        o.insert("facts".to_string(), vec!["Neuron Trivia".to_string()]);
        let c = Categorizer::new(&o);
        let it = item(DeclaredCategory::Mixed, "Neuron trivia #12", None);
        assert_eq!(c.categorize(&it), Category::Facts);
    }
}
