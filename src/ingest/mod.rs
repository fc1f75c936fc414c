// src/ingest/mod.rs
pub mod dedup;
pub mod feed;
pub mod scrape;

pub use dedup::{dedup, merge, sort_by_recency};
pub use feed::{parse_feed, FeedAdapter};
pub use scrape::PageAdapter;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::article::Article;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::relevance::RelevanceScorer;
use crate::resilience::ResilienceContext;
use crate::telemetry::Telemetry;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Articles parsed from sources.");
        describe_counter!(
            "ingest_kept_total",
            "Articles kept after relevance filtering and truncation."
        );
        describe_counter!(
            "ingest_filtered_total",
            "Articles dropped below the relevance threshold."
        );
        describe_counter!("ingest_dedup_total", "Articles removed as duplicates.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Feed and page source failures."
        );
        describe_counter!(
            "scrape_selector_miss_total",
            "Page scrapes where no candidate selector matched."
        );
        describe_counter!("delivery_sent_total", "Articles delivered to the sink.");
        describe_counter!("resilience_errors_total", "Error records by severity.");
        describe_histogram!("ingest_parse_ms", "Source parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the pipeline last ran."
        );
    });
}

/// Await `fut`, failing with [`PipelineError::Timeout`] once `after` elapses.
pub async fn with_deadline<T, F>(operation: &str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(after, fut).await.map_err(|_| {
        PipelineError::Timeout {
            operation: operation.to_string(),
            after,
        }
        .into()
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleOutcome {
    pub articles: Vec<Article>,
    /// Articles collected from all sources.
    pub fetched: usize,
    pub after_dedup: usize,
    /// Same as `articles.len()`.
    pub kept: usize,
}

/// Fetch → merge → dedup → score/filter → cap, once per cycle.
pub struct Pipeline {
    feeds: FeedAdapter,
    pages: PageAdapter,
    scorer: RelevanceScorer,
    telemetry: Arc<Telemetry>,
}

impl Pipeline {
    pub fn new(ctx: &ResilienceContext, telemetry: Arc<Telemetry>) -> Self {
        Self {
            feeds: FeedAdapter::new(ctx.errors.clone()).with_cache(ctx.source_cache()),
            pages: PageAdapter::new(ctx.errors.clone()).with_cache(ctx.source_cache()),
            scorer: RelevanceScorer::default(),
            telemetry,
        }
    }

    pub fn with_feeds(mut self, feeds: FeedAdapter) -> Self {
        self.feeds = feeds;
        self
    }

    pub fn with_pages(mut self, pages: PageAdapter) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub async fn run_cycle(&self, cfg: &AppConfig) -> CycleOutcome {
        ensure_metrics_described();

        let feed_urls = cfg.feed_urls();
        let page_sources = cfg.page_sources();
        let t = &self.telemetry;

        let (feed_articles, page_articles) = tokio::join!(
            t.timed(
                "feed_fetch",
                json!({ "sources": feed_urls.len() }),
                self.feeds.fetch_many(&feed_urls)
            ),
            t.timed(
                "page_scrape",
                json!({ "sources": page_sources.len() }),
                self.pages.scrape_many(&page_sources)
            ),
        );

        let (fetched, unique) = t.timed_sync("dedup_merge", serde_json::Value::Null, || {
            let merged = merge(vec![feed_articles, page_articles]);
            let fetched = merged.len();
            let mut unique = dedup(merged);
            sort_by_recency(&mut unique);
            (fetched, unique)
        });
        let after_dedup = unique.len();
        counter!("ingest_dedup_total").increment((fetched - after_dedup) as u64);

        let min = cfg.filter.min_relevance_score;
        let articles = t.timed_sync("relevance_filter", json!({ "min_score": min }), || {
            let mut kept = self.scorer.filter(unique, min);
            kept.truncate(cfg.filter.max_articles_per_fetch);
            kept
        });

        let kept = articles.len();
        counter!("ingest_kept_total").increment(kept as u64);
        gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(target: "ingest", fetched, after_dedup, kept, "cycle finished");

        CycleOutcome {
            articles,
            fetched,
            after_dedup,
            kept,
        }
    }
}
