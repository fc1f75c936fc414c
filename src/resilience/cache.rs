// src/resilience/cache.rs
//! In-memory TTL cache with expired-on-read semantics and a cache-aside helper.

use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default entry lifetime (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default sweep interval for [`TtlCache::spawn_cleanup`] (10 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Thread-safe key/value store whose entries expire after a TTL.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        before - map.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Value for `key`, or `None`. An expired entry is deleted on read.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let map = self.entries.read();
            match map.get(key) {
                None => return None,
                Some(e) if !e.is_expired(now) => return Some(e.value.clone()),
                Some(_) => {}
            }
        }
        let mut map = self.entries.write();
        // Re-check: another writer may have refreshed the entry meanwhile.
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        None
    }
}

impl<V: Send + Sync + 'static> TtlCache<V> {
    /// Sweep expired entries every `every` until the handle is aborted.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.cleanup();
                if removed > 0 {
                    debug!(target: "resilience", removed, "cache cleanup");
                }
            }
        })
    }
}

/// Stable cache key: `name:` + SHA-256 (first 8 bytes, hex) of the arguments' JSON form.
pub fn cache_key<A: Serialize + ?Sized>(name: &str, args: &A) -> String {
    let json = serde_json::to_vec(args).unwrap_or_default();
    let digest = Sha256::digest(&json);
    let mut out = String::with_capacity(name.len() + 17);
    out.push_str(name);
    out.push(':');
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Cache-aside: return the cached value for `key`, or run `op`, store its
/// `Ok` result for `ttl` and return it. Errors are passed through uncached.
pub async fn with_cache<V, F, Fut, E>(
    cache: &TtlCache<V>,
    key: &str,
    ttl: Duration,
    op: F,
) -> Result<V, E>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if let Some(hit) = cache.get(key) {
        debug!(target: "resilience", key, "cache hit");
        return Ok(hit);
    }
    debug!(target: "resilience", key, "cache miss");
    let value = op().await?;
    cache.set_with_ttl(key, value.clone(), ttl);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ttl_expiry_evicts_on_read() {
        let c: TtlCache<&str> = TtlCache::default();
        c.set_with_ttl("k", "v", Duration::from_millis(100));
        assert_eq!(c.get("k"), Some("v"));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(c.get("k"), None);
        assert!(c.is_empty(), "expired entry is deleted by the read");
    }

    #[test]
    fn cleanup_sweeps_only_expired() {
        let c: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        c.set_with_ttl("old", 1, Duration::from_millis(5));
        c.set("fresh", 2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.cleanup(), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("fresh"), Some(2));
        c.delete("fresh");
        assert!(c.is_empty());
    }

    #[test]
    fn keys_are_stable_and_argument_sensitive() {
        let a = cache_key("feed", &["https://a.test/rss"]);
        assert_eq!(a, cache_key("feed", &["https://a.test/rss"]));
        assert_ne!(a, cache_key("feed", &["https://b.test/rss"]));
        assert!(a.starts_with("feed:"));
        assert_eq!(a.len(), "feed:".len() + 16);
    }

    #[tokio::test]
    async fn with_cache_runs_op_once_and_skips_errors() {
        let c: TtlCache<Vec<u32>> = TtlCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v: Result<Vec<u32>, String> = with_cache(&c, "k", DEFAULT_TTL, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2])
            })
            .await;
            assert_eq!(v.unwrap(), vec![1, 2]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err: Result<Vec<u32>, String> =
            with_cache(&c, "bad", DEFAULT_TTL, || async { Err("nope".to_string()) }).await;
        assert!(err.is_err());
        assert!(c.get("bad").is_none(), "errors are never cached");
    }
}
