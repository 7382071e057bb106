//! Generic TTL cache
//!
//! In-memory, thread-safe key/value cache with per-entry expiry. The REST
//! client keeps leaderboard pages and public profiles here so repeated page
//! renders don't hit the API.
//!
//! Expiry is measured with `tokio::time::Instant`, so tests can drive it with
//! a paused clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::logger::Logger;

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Entries currently stored, expired or not
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed
    pub expired: u64,
}

/// Cap for TTLs too long to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    stats: CacheStats,
}

/// Thread-safe TTL cache keyed by `K`
pub struct TtlCache<K, V> {
    inner: Arc<RwLock<Inner<K, V>>>,
    default_ttl: Duration,
    name: &'static str,
    logger: Arc<dyn Logger>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            default_ttl: self.default_ttl,
            name: self.name,
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache whose entries live for `default_ttl` unless inserted with their own TTL
    pub fn new(name: &'static str, default_ttl: Duration, logger: Arc<dyn Logger>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            })),
            default_ttl,
            name,
            logger,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a live entry. An expired entry is removed and counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let live = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                inner.stats.expired += 1;
                None
            }
            None => None,
        };

        match live {
            Some(value) => {
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a live entry without touching hit/miss counters
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Insert with the default TTL, returning the previous live value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    /// Insert with an explicit TTL, returning the previous live value
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let previous = inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now
                    .checked_add(ttl)
                    .unwrap_or_else(|| now + FAR_FUTURE),
            },
        );
        previous
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry and return how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - inner.entries.len();
        inner.stats.expired += removed as u64;
        if removed > 0 {
            self.logger
                .debug(&format!("{} cache purged {} expired entries", self.name, removed));
        }
        removed
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        self.logger.debug(&format!("{} cache cleared", self.name));
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;

    fn cache(ttl_secs: u64) -> TtlCache<String, u32> {
        TtlCache::new("test", Duration::from_secs(ttl_secs), Arc::new(NoopLogger))
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(30);
        cache.insert("alice".to_string(), 1500);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&"alice".to_string()), Some(1500));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"alice".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_with_ttl_overrides_default() {
        let cache = cache(60);
        cache.insert_with_ttl("short".to_string(), 1, Duration::from_secs(5));
        cache.insert("long".to_string(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cache.contains(&"short".to_string()));
        assert!(cache.contains(&"long".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_returns_only_live_previous_value() {
        let cache = cache(10);
        assert_eq!(cache.insert("k".to_string(), 1), None);
        assert_eq!(cache.insert("k".to_string(), 2), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.insert("k".to_string(), 3), None);
        assert_eq!(cache.get(&"k".to_string()), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(10);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert_with_ttl("c".to_string(), 3, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let cache = cache(30);
        cache.insert_with_ttl("alice".to_string(), 1500, Duration::MAX);

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
        assert_eq!(cache.get(&"alice".to_string()), Some(1500));
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = cache(60);
        cache.insert("a".to_string(), 1);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"missing".to_string()), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.remove(&"a".to_string()), None);
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = cache(60);
        let other = cache.clone();
        other.insert("shared".to_string(), 7);
        assert_eq!(cache.get(&"shared".to_string()), Some(7));
    }
}
