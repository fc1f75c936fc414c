// src/delivery.rs
//! Hands filtered articles to an output sink, one at a time.

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::article::Article;
use crate::config::DeliverySettings;
use crate::resilience::{ErrorHandler, RetryPolicy};
use crate::telemetry::Telemetry;

pub const NO_MATCHES_NOTICE: &str = "No matching articles found.";

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, article: &Article) -> Result<()>;
    /// Plain status message, e.g. the empty-cycle notice.
    async fn notice(&self, text: &str) -> Result<()>;
}

/// Writes deliveries to the log only.
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, article: &Article) -> Result<()> {
        info!(
            target: "delivery",
            title = %article.title,
            link = %article.link,
            source = %article.source,
            score = article.relevance_score.unwrap_or_default(),
            "article"
        );
        Ok(())
    }

    async fn notice(&self, text: &str) -> Result<()> {
        info!(target: "delivery", "{text}");
        Ok(())
    }
}

/// Bounded FIFO of delivered links.
struct Ledger {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl Ledger {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.seen.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped_seen: usize,
    pub notice_sent: bool,
}

pub struct DeliveryDriver {
    sink: Arc<dyn DeliverySink>,
    errors: Arc<ErrorHandler>,
    telemetry: Arc<Telemetry>,
    item_delay: Duration,
    retry: RetryPolicy,
    ledger: Mutex<Ledger>,
}

impl DeliveryDriver {
    pub fn new(
        sink: Arc<dyn DeliverySink>,
        errors: Arc<ErrorHandler>,
        telemetry: Arc<Telemetry>,
        settings: &DeliverySettings,
    ) -> Self {
        Self {
            sink,
            errors,
            telemetry,
            item_delay: Duration::from_millis(settings.item_delay_ms),
            retry: RetryPolicy::default(),
            ledger: Mutex::new(Ledger::new(settings.ledger_capacity)),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Deliver serially with a fixed pause between items. Links already
    /// delivered by this process are skipped. Retry exhaustion stops the
    /// cycle and is returned.
    pub async fn deliver(&self, articles: &[Article]) -> Result<DeliveryReport> {
        let meta = serde_json::json!({ "articles": articles.len() });
        self.telemetry
            .measure("delivery", meta, self.deliver_inner(articles))
            .await
    }

    async fn deliver_inner(&self, articles: &[Article]) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        let fresh: Vec<&Article> = articles
            .iter()
            .filter(|a| {
                let seen = self.ledger.lock().contains(a.dedup_key());
                if seen {
                    report.skipped_seen += 1;
                }
                !seen
            })
            .collect();

        if fresh.is_empty() {
            self.errors
                .retry("delivery", self.retry, || self.sink.notice(NO_MATCHES_NOTICE))
                .await?;
            report.notice_sent = true;
            return Ok(report);
        }

        for (i, article) in fresh.iter().enumerate() {
            if i > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            if let Err(e) = self
                .errors
                .retry("delivery", self.retry, || self.sink.deliver(article))
                .await
            {
                warn!(target: "delivery", delivered = report.delivered, remaining = fresh.len() - i, "delivery aborted");
                return Err(e);
            }
            self.ledger.lock().insert(article.dedup_key().to_string());
            counter!("delivery_sent_total").increment(1);
            report.delivered += 1;
        }
        info!(target: "delivery", delivered = report.delivered, skipped = report.skipped_seen, "delivery finished");
        Ok(report)
    }
}
