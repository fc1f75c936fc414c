// src/article.rs
//! Normalized article model shared by every adapter and pipeline stage.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One normalized unit of ingested content.
///
/// Produced by the feed and page adapters; never mutated afterwards except
/// for `relevance_score`, which the scorer fills in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    /// Canonical URL; primary dedup key.
    pub link: String,
    #[serde(default)]
    pub description: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Human-readable origin name, e.g. the feed title.
    pub source: String,
    /// The feed or page URL the article was fetched from.
    pub origin_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<u8>,
}

impl Article {
    /// Key used to decide whether two articles are the same: the link, or the
    /// title when the link is empty.
    pub fn dedup_key(&self) -> &str {
        if self.link.is_empty() {
            &self.title
        } else {
            &self.link
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.relevance_score = Some(score);
        self
    }
}

/// Normalize text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // Entities may have been double-encoded inside CDATA.
    if out.contains('&') {
        out = html_escape::decode_html_entities(&out).to_string();
    }

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (includes &nbsp; after decoding)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Cap `s` at `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(link: &str, title: &str) -> Article {
        Article {
            title: title.into(),
            link: link.into(),
            description: String::new(),
            published_at: Utc::now(),
            author: String::new(),
            categories: vec![],
            source: "Test".into(),
            origin_url: "https://example.test/feed".into(),
            relevance_score: None,
        }
    }

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <p>Hello,&nbsp;&nbsp; <b>world</b>&hellip;</p> &ldquo;ok&rdquo; ";
        assert_eq!(normalize_text(s), "Hello, world … \"ok\"");
    }

    #[test]
    fn dedup_key_falls_back_to_title() {
        assert_eq!(article("https://a.test/1", "One").dedup_key(), "https://a.test/1");
        assert_eq!(article("", "One").dedup_key(), "One");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("人工知能ニュース", 4), "人工知能");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
