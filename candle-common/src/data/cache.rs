//! TTL and size bounded cache for read-path query results.
//!
//! Entries are replaced wholesale, never patched. Expired entries are dropped
//! lazily on lookup and eagerly whenever the cache grows past its cap, after
//! which the least recently accessed entries go first.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache sizing and freshness settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default time-to-live for entries
    pub ttl: Duration,
    /// Maximum number of entries kept
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =================================================================
// Cache entry
// =================================================================

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            ttl,
            last_accessed: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.inserted_at + self.ttl
    }
}

// =================================================================
// Query cache
// =================================================================

/// In-process query result cache keyed by a rendered query string
pub struct QueryCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, refreshing its access time on a hit
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(key.into(), CacheEntry::new(value, ttl));

        if entries.len() > self.config.max_size {
            let evicted = self.evict(&mut entries);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, size = entries.len(), "Query cache over capacity");
        }
    }

    /// Insert or replace an entry using the default TTL
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.config.ttl);
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// The lock is not held while `compute` runs, so concurrent misses on the
    /// same key may both compute; the last write wins. Errors from `compute`
    /// are returned as-is and nothing is cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Expired entries first, then least recently accessed until at the cap
    fn evict(&self, entries: &mut HashMap<String, CacheEntry<V>>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));

        let excess = entries.len().saturating_sub(self.config.max_size);
        if excess > 0 {
            let mut by_access: Vec<(Instant, String)> = entries
                .iter()
                .map(|(key, entry)| (entry.last_accessed, key.clone()))
                .collect();
            by_access.sort_by_key(|(accessed, _)| *accessed);

            for (_, key) in by_access.into_iter().take(excess) {
                entries.remove(&key);
            }
        }

        before - entries.len()
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_size: usize) -> QueryCache<String> {
        QueryCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_size,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_until_ttl() {
        let cache = small_cache(10);
        cache.set("k", "v".to_string(), Duration::from_secs(60));

        assert_eq!(cache.get("k"), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("k"), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_value() {
        let cache = small_cache(10);
        cache.insert("k", "old".to_string());
        cache.insert("k", "new".to_string());

        assert_eq!(cache.get("k"), Some("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_least_recently_accessed() {
        let cache = small_cache(2);
        cache.insert("a", "1".to_string());
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("b", "2".to_string());
        tokio::time::advance(Duration::from_millis(10)).await;

        // Touch "a" so that "b" becomes the oldest
        assert!(cache.get("a").is_some());
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("c", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_compute_caches_success_only() {
        let cache = small_cache(10);

        let first: Result<String, String> = cache
            .get_or_compute("q", Duration::from_secs(5), || async { Ok("computed".to_string()) })
            .await;
        assert_eq!(first.unwrap(), "computed");

        let second: Result<String, String> = cache
            .get_or_compute("q", Duration::from_secs(5), || async {
                Err("should not run".to_string())
            })
            .await;
        assert_eq!(second.unwrap(), "computed");

        let failed: Result<String, String> = cache
            .get_or_compute("other", Duration::from_secs(5), || async {
                Err("storage down".to_string())
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.get("other").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = small_cache(10);
        cache.set("short", "1".to_string(), Duration::from_secs(1));
        cache.set("long", "2".to_string(), Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
