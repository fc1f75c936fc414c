// src/config/sources.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MIN_RELEVANCE_SCORE: u8 = 10;
pub const DEFAULT_MAX_ARTICLES_PER_FETCH: usize = 10;
pub const DEFAULT_MAX_ITEMS_PER_PAGE: usize = 10;

fn default_true() -> bool {
    true
}
fn default_min_score() -> u8 {
    DEFAULT_MIN_RELEVANCE_SCORE
}
fn default_max_articles() -> usize {
    DEFAULT_MAX_ARTICLES_PER_FETCH
}
fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS_PER_PAGE
}
fn default_interval_minutes() -> u64 {
    60
}
fn default_item_delay_ms() -> u64 {
    1_000
}
fn default_ledger_capacity() -> usize {
    1_000
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cleanup_interval_secs() -> u64 {
    600
}

/// How a source is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS / Atom feed.
    #[serde(alias = "rss", alias = "feed")]
    Structured,
    /// Server-rendered HTML fetched over plain HTTP.
    Static,
    /// JavaScript-rendered page; needs a rendered page fetcher.
    Dynamic,
}

/// When an extracted element is accepted as an article.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptancePolicy {
    /// Title AND a resolvable link are required.
    #[default]
    Strict,
    /// Title OR a link on the profile domain is enough. Meant for sources
    /// whose markup changes often; trades precision for recall.
    Loose,
}

/// Per-source extraction behaviour, resolved once when config is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionProfile {
    /// Candidate item selectors tried before the source's own selector.
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub acceptance: AcceptancePolicy,
    /// Domain a link must contain to pass the loose policy without a title.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self {
            selectors: Vec::new(),
            acceptance: AcceptancePolicy::Strict,
            domain: None,
            max_items: DEFAULT_MAX_ITEMS_PER_PAGE,
        }
    }
}

/// One configured source. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Item selector for page sources; ignored for feeds.
    #[serde(default)]
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: Option<SourceKind>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Id of an entry in `[profiles]`; defaults to the source name.
    #[serde(default)]
    pub profile: Option<String>,
    /// Categories stamped onto every article from this source.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(skip)]
    pub extraction: ExtractionProfile,
}

impl SourceConfig {
    pub fn feed(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            selector: String::new(),
            kind: Some(SourceKind::Structured),
            enabled: true,
            profile: None,
            categories: Vec::new(),
            extraction: ExtractionProfile::default(),
        }
    }

    pub fn page(name: &str, url: &str, selector: &str, kind: SourceKind) -> Self {
        Self {
            selector: selector.to_string(),
            kind: Some(kind),
            ..Self::feed(name, url)
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionProfile) -> Self {
        self.extraction = extraction;
        self
    }

    /// Explicit `type`, else dynamic when a selector is given, else structured.
    pub fn kind(&self) -> SourceKind {
        match self.kind {
            Some(k) => k,
            None if !self.selector.trim().is_empty() => SourceKind::Dynamic,
            None => SourceKind::Structured,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self.kind(), SourceKind::Static | SourceKind::Dynamic)
    }

    /// Selectors in resolution order: profile overrides, then the configured one.
    pub fn candidate_selectors(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.extraction.selectors.len() + 1);
        for s in self
            .extraction
            .selectors
            .iter()
            .chain(std::iter::once(&self.selector))
        {
            let t = s.trim();
            if !t.is_empty() && !out.iter().any(|x| x == t) {
                out.push(t.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default = "default_min_score", alias = "minRelevanceScore")]
    pub min_relevance_score: u8,
    #[serde(default = "default_max_articles", alias = "maxArticlesPerFetch")]
    pub max_articles_per_fetch: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_relevance_score: DEFAULT_MIN_RELEVANCE_SCORE,
            max_articles_per_fetch: DEFAULT_MAX_ARTICLES_PER_FETCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Pause between two delivered items.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    /// Links remembered to avoid re-delivery across cycles.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            item_delay_ms: default_item_delay_ms(),
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// 0 disables per-source result caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Legacy layout: plain feed list.
    #[serde(default, alias = "rssFeeds", skip_serializing)]
    pub rss_feeds: Vec<SourceConfig>,
    /// Legacy layout: scraped page list.
    #[serde(default, alias = "gamePatches", skip_serializing)]
    pub game_patches: Vec<SourceConfig>,
    #[serde(default, alias = "filterSettings")]
    pub filter: FilterSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub profiles: HashMap<String, ExtractionProfile>,
}

impl AppConfig {
    /// Merge legacy lists into `sources`, sanitize limits and attach
    /// extraction profiles.
    pub fn finalize(mut self) -> Self {
        for mut f in std::mem::take(&mut self.rss_feeds) {
            f.kind.get_or_insert(SourceKind::Structured);
            self.sources.push(f);
        }
        for mut p in std::mem::take(&mut self.game_patches) {
            p.kind.get_or_insert(SourceKind::Dynamic);
            self.sources.push(p);
        }

        self.sources
            .retain(|s| !s.name.trim().is_empty() && !s.url.trim().is_empty());

        for p in self.profiles.values_mut() {
            if p.max_items == 0 {
                p.max_items = DEFAULT_MAX_ITEMS_PER_PAGE;
            }
        }
        for s in &mut self.sources {
            let id = s.profile.clone().unwrap_or_else(|| s.name.clone());
            s.extraction = self.profiles.get(&id).cloned().unwrap_or_default();
        }

        self.filter.min_relevance_score = self.filter.min_relevance_score.min(100);
        if self.filter.max_articles_per_fetch == 0 {
            self.filter.max_articles_per_fetch = DEFAULT_MAX_ARTICLES_PER_FETCH;
        }
        if self.delivery.interval_minutes == 0 {
            self.delivery.interval_minutes = default_interval_minutes();
        }
        self
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// URLs of enabled feed sources.
    pub fn feed_urls(&self) -> Vec<String> {
        self.enabled_sources()
            .filter(|s| s.kind() == SourceKind::Structured)
            .map(|s| s.url.clone())
            .collect()
    }

    /// Enabled page sources (static and dynamic).
    pub fn page_sources(&self) -> Vec<SourceConfig> {
        self.enabled_sources()
            .filter(|s| s.is_page())
            .cloned()
            .collect()
    }
}
