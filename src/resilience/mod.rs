pub mod cache;
pub mod errors;

pub use cache::{cache_key, with_cache, TtlCache};
pub use errors::{
    EmergencySnapshot, ErrorHandler, ErrorRecord, ErrorStats, ProcessExit, RetryPolicy, Severity,
    Terminator,
};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::article::Article;
use crate::config::CacheSettings;

/// Process-wide resilience state: the shared article cache and the error
/// handler. Created once and passed around by `Arc`.
pub struct ResilienceContext {
    pub cache: Arc<TtlCache<Vec<Article>>>,
    pub errors: Arc<ErrorHandler>,
    /// 0 disables per-source result caching.
    pub source_ttl: Duration,
    cleanup_every: Duration,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ResilienceContext {
    pub fn new(errors: ErrorHandler, settings: &CacheSettings) -> Self {
        let ttl = Duration::from_secs(settings.ttl_secs);
        let cache_ttl = if ttl.is_zero() { cache::DEFAULT_TTL } else { ttl };
        Self {
            cache: Arc::new(TtlCache::new(cache_ttl)),
            errors: Arc::new(errors),
            source_ttl: ttl,
            cleanup_every: Duration::from_secs(settings.cleanup_interval_secs.max(1)),
            cleanup: Mutex::new(None),
        }
    }

    /// Same defaults as an empty config, no notifier.
    pub fn with_defaults() -> Self {
        Self::new(ErrorHandler::new(), &CacheSettings::default())
    }

    /// Cache handle for adapters, or `None` when source caching is off.
    pub fn source_cache(&self) -> Option<(Arc<TtlCache<Vec<Article>>>, Duration)> {
        (!self.source_ttl.is_zero()).then(|| (self.cache.clone(), self.source_ttl))
    }

    /// Start the periodic cache sweep. Calling twice keeps the first timer.
    pub fn start_cleanup(&self) {
        let mut slot = self.cleanup.lock();
        if slot.is_none() {
            *slot = Some(self.cache.clone().spawn_cleanup(self.cleanup_every));
            info!(target: "resilience", every_secs = self.cleanup_every.as_secs(), "cache cleanup started");
        }
    }

    /// Stop the sweep timer and drop cached entries.
    pub fn shutdown(&self) {
        if let Some(h) = self.cleanup.lock().take() {
            h.abort();
        }
        self.cache.clear();
        info!(target: "resilience", "resilience context shut down");
    }
}

impl Drop for ResilienceContext {
    fn drop(&mut self) {
        if let Some(h) = self.cleanup.get_mut().take() {
            h.abort();
        }
    }
}
