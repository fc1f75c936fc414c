// src/ingest/feed.rs
//! RSS 2.0 / Atom 1.0 adapter.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::dedup::sort_by_recency;
use super::scrape::{parse_date, BROWSER_USER_AGENT};
use super::with_deadline;
use crate::article::{normalize_text, Article};
use crate::error::PipelineError;
use crate::resilience::{cache_key, with_cache, ErrorHandler, Severity, TtlCache};

pub const FEED_TIMEOUT: Duration = Duration::from_secs(30);
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator")]
    creator: Option<String>,
    author: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<TextNode>,
}

#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<TextNode>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    author: Option<AtomPerson>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomPerson {
    name: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term", default)]
    term: String,
}

/// RFC 2822, then RFC 3339, then the listing-page heuristics.
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond()).single())
        .or_else(|| parse_date(ts))
}

enum FeedFormat {
    Rss,
    Atom,
}

fn detect_format(xml: &str) -> FeedFormat {
    let rss = xml.find("<rss").or_else(|| xml.find("<channel"));
    let atom = xml.find("<feed");
    match (rss, atom) {
        (Some(r), Some(a)) if a < r => FeedFormat::Atom,
        (None, Some(_)) => FeedFormat::Atom,
        _ => FeedFormat::Rss,
    }
}

/// Parse an RSS or Atom document into articles. Items with neither title
/// nor link are dropped; missing dates fall back to the ingestion time.
pub fn parse_feed(xml: &str, feed_url: &str) -> Result<Vec<Article>> {
    let t0 = Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let now = Utc::now();

    let out = match detect_format(&xml_clean) {
        FeedFormat::Rss => {
            let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
            let source = source_name(rss.channel.title.as_deref());
            rss.channel
                .items
                .into_iter()
                .filter_map(|it| {
                    let title = normalize_text(it.title.as_deref().unwrap_or_default());
                    let link = it.link.as_deref().unwrap_or_default().trim().to_string();
                    if title.is_empty() && link.is_empty() {
                        return None;
                    }
                    let body = it
                        .content_encoded
                        .filter(|s| !s.trim().is_empty())
                        .or(it.description)
                        .unwrap_or_default();
                    Some(Article {
                        title,
                        link,
                        description: normalize_text(&body),
                        published_at: it
                            .pub_date
                            .as_deref()
                            .and_then(parse_feed_date)
                            .unwrap_or(now),
                        author: normalize_text(
                            it.creator.or(it.author).as_deref().unwrap_or_default(),
                        ),
                        categories: it
                            .categories
                            .into_iter()
                            .map(|c| normalize_text(&c.value))
                            .filter(|c| !c.is_empty())
                            .collect(),
                        source: source.clone(),
                        origin_url: feed_url.to_string(),
                        relevance_score: None,
                    })
                })
                .collect::<Vec<_>>()
        }
        FeedFormat::Atom => {
            let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
            let source = source_name(feed.title.as_ref().map(|t| t.value.as_str()));
            feed.entries
                .into_iter()
                .filter_map(|e| {
                    let title = normalize_text(e.title.as_ref().map_or("", |t| t.value.as_str()));
                    let link = e
                        .links
                        .iter()
                        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                        .or_else(|| e.links.first())
                        .map(|l| l.href.trim().to_string())
                        .unwrap_or_default();
                    if title.is_empty() && link.is_empty() {
                        return None;
                    }
                    let body = e
                        .content
                        .filter(|c| !c.value.trim().is_empty())
                        .or(e.summary)
                        .unwrap_or_default();
                    Some(Article {
                        title,
                        link,
                        description: normalize_text(&body.value),
                        published_at: e
                            .published
                            .or(e.updated)
                            .as_deref()
                            .and_then(parse_feed_date)
                            .unwrap_or(now),
                        author: normalize_text(
                            e.author.and_then(|a| a.name).as_deref().unwrap_or_default(),
                        ),
                        categories: e
                            .categories
                            .into_iter()
                            .map(|c| c.term.trim().to_string())
                            .filter(|c| !c.is_empty())
                            .collect(),
                        source: source.clone(),
                        origin_url: feed_url.to_string(),
                        relevance_score: None,
                    })
                })
                .collect::<Vec<_>>()
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(out.len() as u64);
    Ok(out)
}

fn source_name(title: Option<&str>) -> String {
    let t = normalize_text(title.unwrap_or_default());
    if t.is_empty() {
        UNKNOWN_SOURCE.to_string()
    } else {
        t
    }
}

pub struct FeedAdapter {
    client: Client,
    timeout: Duration,
    errors: Arc<ErrorHandler>,
    cache: Option<(Arc<TtlCache<Vec<Article>>>, Duration)>,
}

impl FeedAdapter {
    pub fn new(errors: Arc<ErrorHandler>) -> Self {
        Self {
            client: Client::new(),
            timeout: FEED_TIMEOUT,
            errors,
            cache: None,
        }
    }

    pub fn with_timeout(mut self, t: Duration) -> Self {
        self.timeout = t;
        self
    }

    pub fn with_cache(mut self, cache: Option<(Arc<TtlCache<Vec<Article>>>, Duration)>) -> Self {
        self.cache = cache;
        self
    }

    /// Fetch and parse one feed. Never fails: errors are reported at LOW
    /// severity and yield an empty list.
    pub async fn fetch_one(&self, url: &str) -> Vec<Article> {
        let result = match &self.cache {
            Some((cache, ttl)) => {
                let key = cache_key("feed", url);
                with_cache(cache, &key, *ttl, || self.try_fetch(url)).await
            }
            None => self.try_fetch(url).await,
        };
        match result {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "ingest", url, error = %format!("{e:#}"), "feed fetch failed");
                counter!("ingest_provider_errors_total").increment(1);
                self.errors
                    .handle_error(&e, "feed_fetch", Severity::Low, serde_json::json!({ "url": url }))
                    .await;
                Vec::new()
            }
        }
    }

    /// All feeds concurrently, all-settled; union newest first.
    pub async fn fetch_many(&self, urls: &[String]) -> Vec<Article> {
        if urls.is_empty() {
            return Vec::new();
        }
        let batches = join_all(urls.iter().map(|u| self.fetch_one(u))).await;
        let mut all: Vec<Article> = batches.into_iter().flatten().collect();
        sort_by_recency(&mut all);
        info!(target: "ingest", feeds = urls.len(), articles = all.len(), "feed fetch finished");
        all
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<Article>> {
        let req = async {
            let rsp = self
                .client
                .get(url)
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .send()
                .await?
                .error_for_status()?;
            rsp.text().await
        };
        let body = with_deadline(&format!("feed {url}"), self.timeout, req)
            .await?
            .map_err(|e| anyhow::Error::new(e).context(PipelineError::source_failure(url, "http fetch failed")))?;
        let articles = parse_feed(&body, url)
            .map_err(|e| e.context(PipelineError::source_failure(url, "unparseable feed")))?;
        debug!(target: "ingest", url, count = articles.len(), "feed parsed");
        Ok(articles)
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_defaults_and_fallbacks() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
  <title>AI Weekly</title>
  <item>
    <title>GPT &amp; friends&nbsp;update</title>
    <link>https://ai.test/1</link>
    <pubDate>Tue, 05 Mar 2024 08:00:00 GMT</pubDate>
    <description>short</description>
    <content:encoded><![CDATA[<p>Long <b>body</b></p>]]></content:encoded>
    <dc:creator>Ada</dc:creator>
    <category>AI</category>
  </item>
  <item><title>Title only</title></item>
  <item><description>neither title nor link</description></item>
</channel>
</rss>"#;
        let got = parse_feed(xml, "https://ai.test/rss").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].title, "GPT & friends update");
        assert_eq!(got[0].description, "Long body");
        assert_eq!(got[0].author, "Ada");
        assert_eq!(got[0].categories, vec!["AI".to_string()]);
        assert_eq!(got[0].source, "AI Weekly");
        assert_eq!(
            got[0].published_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap()
        );
        assert_eq!(got[1].link, "");
        assert_eq!(got[1].dedup_key(), "Title only");
    }

    #[test]
    fn atom_entries_use_alternate_link() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title type="html">Claude release</title>
    <link rel="self" href="https://a.test/self"/>
    <link rel="alternate" href="https://a.test/post"/>
    <updated>2024-03-15T10:30:00Z</updated>
    <summary>Summary text</summary>
    <author><name>Team</name></author>
    <category term="llm"/>
  </entry>
</feed>"#;
        let got = parse_feed(xml, "https://a.test/atom").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].link, "https://a.test/post");
        assert_eq!(got[0].source, UNKNOWN_SOURCE);
        assert_eq!(got[0].description, "Summary text");
        assert_eq!(got[0].categories, vec!["llm".to_string()]);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("<rss><channel><item>", "u").is_err());
    }

    #[test]
    fn feed_dates_fall_through_formats() {
        assert!(parse_feed_date("2024-03-15T10:30:00+02:00").is_some());
        assert!(parse_feed_date("March 5, 2024").is_some());
        assert!(parse_feed_date("whenever").is_none());
    }
}
