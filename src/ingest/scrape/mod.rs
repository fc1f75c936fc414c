// src/ingest/scrape/mod.rs
//! Heuristic listing-page adapter for sources without a feed.

pub mod dates;
pub mod extract;
pub mod render;

pub use dates::{parse_date, parse_date_at};
pub use extract::{extract_entries, resolve_selector, PageEntry};
pub use render::{
    BrowserRenderService, RenderOptions, RenderedPage, RenderedPageFetcher, ResourceType,
    WaitUntil,
};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, histogram};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use scraper::Html;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::dedup::sort_by_recency;
use super::with_deadline;
use crate::article::Article;
use crate::config::{SourceConfig, SourceKind};
use crate::error::PipelineError;
use crate::resilience::{cache_key, with_cache, ErrorHandler, Severity, TtlCache};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const STATIC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PageAdapter {
    client: Client,
    static_timeout: Duration,
    render: RenderOptions,
    fetcher: Option<Arc<dyn RenderedPageFetcher>>,
    errors: Arc<ErrorHandler>,
    cache: Option<(Arc<TtlCache<Vec<Article>>>, Duration)>,
}

impl PageAdapter {
    pub fn new(errors: Arc<ErrorHandler>) -> Self {
        Self {
            client: Client::new(),
            static_timeout: STATIC_TIMEOUT,
            render: RenderOptions::default(),
            fetcher: None,
            errors,
            cache: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn RenderedPageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_cache(mut self, cache: Option<(Arc<TtlCache<Vec<Article>>>, Duration)>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_static_timeout(mut self, t: Duration) -> Self {
        self.static_timeout = t;
        self
    }

    pub fn with_render_options(mut self, opts: RenderOptions) -> Self {
        self.render = opts;
        self
    }

    /// Scrape one page source. Never fails: any problem is reported at LOW
    /// severity and yields an empty list.
    pub async fn scrape_one(&self, src: &SourceConfig) -> Vec<Article> {
        let result = match &self.cache {
            Some((cache, ttl)) => {
                let key = cache_key("page", &(&src.url, src.candidate_selectors()));
                with_cache(cache, &key, *ttl, || self.try_scrape(src)).await
            }
            None => self.try_scrape(src).await,
        };
        match result {
            Ok(articles) => articles,
            Err(e) => {
                warn!(target: "scrape", source = %src.name, url = %src.url, error = %format!("{e:#}"), "page source failed");
                counter!("ingest_provider_errors_total").increment(1);
                let meta = serde_json::json!({ "source": src.name, "url": src.url });
                self.errors
                    .handle_error(&e, "page_scrape", Severity::Low, meta)
                    .await;
                Vec::new()
            }
        }
    }

    /// All enabled page sources concurrently; settled results merged newest first.
    pub async fn scrape_many(&self, sources: &[SourceConfig]) -> Vec<Article> {
        let enabled: Vec<&SourceConfig> =
            sources.iter().filter(|s| s.enabled && s.is_page()).collect();
        if enabled.is_empty() {
            debug!(target: "scrape", "no enabled page sources");
            return Vec::new();
        }
        let batches = join_all(enabled.iter().map(|s| self.scrape_one(s))).await;
        let mut all: Vec<Article> = batches.into_iter().flatten().collect();
        sort_by_recency(&mut all);
        info!(target: "scrape", sources = enabled.len(), articles = all.len(), "page scrape finished");
        all
    }

    async fn try_scrape(&self, src: &SourceConfig) -> Result<Vec<Article>> {
        let page_url = Url::parse(&src.url)
            .map_err(|e| PipelineError::source_failure(&src.name, format!("invalid url: {e}")))?;
        let t0 = Instant::now();
        let html = match src.kind() {
            SourceKind::Static => self.fetch_static(src).await?,
            SourceKind::Dynamic => self.fetch_rendered(src).await?,
            SourceKind::Structured => {
                return Err(PipelineError::source_failure(
                    &src.name,
                    "structured sources belong to the feed adapter",
                )
                .into())
            }
        };
        let articles = articles_from_html(&html, src, &page_url)?;
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_events_total").increment(articles.len() as u64);
        debug!(target: "scrape", source = %src.name, count = articles.len(), "page scraped");
        Ok(articles)
    }

    async fn fetch_static(&self, src: &SourceConfig) -> Result<String> {
        let req = async {
            let rsp = self
                .client
                .get(&src.url)
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .send()
                .await?
                .error_for_status()?;
            rsp.text().await
        };
        with_deadline(&format!("static fetch {}", src.name), self.static_timeout, req)
            .await?
            .map_err(|e| anyhow::Error::new(e).context(PipelineError::source_failure(&src.name, "http fetch failed")))
    }

    async fn fetch_rendered(&self, src: &SourceConfig) -> Result<String> {
        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
            PipelineError::source_failure(&src.name, "no rendered page fetcher configured")
        })?;
        let opts = self.render.clone().waiting_for(src.candidate_selectors());
        let page = with_deadline(
            &format!("render {}", src.name),
            opts.budget(),
            fetcher.render(&src.url, &opts),
        )
        .await?
        .with_context(|| PipelineError::source_failure(&src.name, "render failed"))?;
        Ok(page.html)
    }
}

/// Parse a snapshot and turn accepted elements into articles. Synchronous so
/// the (non-`Send`) DOM never lives across an await point.
pub fn articles_from_html(html: &str, src: &SourceConfig, page_url: &Url) -> Result<Vec<Article>> {
    let doc = Html::parse_document(html);
    let candidates = src.candidate_selectors();
    let Some((winner, selector)) = resolve_selector(&doc, &candidates) else {
        counter!("scrape_selector_miss_total").increment(1);
        return Err(PipelineError::ExtractionFailure {
            source_name: src.name.clone(),
            tried: candidates,
        }
        .into());
    };

    let entries = extract_entries(&doc, &selector, page_url, &src.extraction);
    if entries.is_empty() {
        return Err(PipelineError::ExtractionFailure {
            source_name: src.name.clone(),
            tried: vec![winner],
        }
        .into());
    }

    let now = Utc::now();
    Ok(entries
        .into_iter()
        .map(|e| Article {
            title: e.title,
            link: e.link,
            description: e.description,
            published_at: e.published_at.unwrap_or(now),
            author: String::new(),
            categories: src.categories.clone(),
            source: src.name.clone(),
            origin_url: src.url.clone(),
            relevance_score: None,
        })
        .collect())
}
