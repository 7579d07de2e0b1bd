//! Bounded LRU cache with lazy TTL expiry.
//!
//! Keys are the SHA-256 of an identity string (normally the target URL).
//! Entries past their TTL are treated as absent on read and removed, no
//! matter how recently they were used.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;
use crate::models::cache_key;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    /// 50 entries, 30 minutes.
    fn default() -> Self {
        Self {
            max_size: 50,
            ttl: Duration::from_secs(1800),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_size == 0 {
            return Err(AppError::ConfigError(
                "cache max_size must be at least 1".into(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(AppError::ConfigError(
                "cache ttl must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of cache occupancy.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl: Duration,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
    /// Position in `Inner::order`; larger is more recent.
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl<V> Inner<V> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        match self.order.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

/// Thread-safe bounded TTL cache.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct BoundedTtlCache<V> {
    config: CacheConfig,
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V: Clone> BoundedTtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            })),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache mutex");
            poisoned.into_inner()
        })
    }

    /// Fetch a fresh value and mark it most recently used.
    pub fn get(&self, identity: &str) -> Option<V> {
        let key = cache_key(identity);
        let now = Instant::now();
        let mut inner = self.lock_inner();

        let stored_at = inner.entries.get(&key)?.stored_at;
        if now.duration_since(stored_at) > self.config.ttl {
            inner.remove(&key);
            tracing::debug!(identity, "Cache entry expired");
            return None;
        }

        let tick = inner.bump();
        let entry = inner.entries.get_mut(&key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        inner.order.remove(&old_tick);
        inner.order.insert(tick, key);
        Some(value)
    }

    /// Store `value`, evicting least recently used entries to make room.
    pub fn set(&self, identity: &str, value: V) {
        let key = cache_key(identity);
        let mut inner = self.lock_inner();

        inner.remove(&key);
        while inner.entries.len() >= self.config.max_size {
            if !inner.evict_lru() {
                break;
            }
        }

        let tick = inner.bump();
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
                tick,
            },
        );
    }

    /// Drop the entry for `identity`. Returns whether one was present.
    pub fn remove(&self, identity: &str) -> bool {
        self.lock_inner().remove(&cache_key(identity)).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of stored entries, including any not yet lazily expired.
    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max_size: self.config.max_size,
            ttl: self.config.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_secs: u64) -> BoundedTtlCache<String> {
        BoundedTtlCache::new(CacheConfig {
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_stored_value() {
        let cache = cache(3, 60);
        assert_eq!(cache.get("https://a.com"), None);

        cache.set("https://a.com", "jobs".into());
        assert_eq!(cache.get("https://a.com").as_deref(), Some("jobs"));
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_evicts_least_recently_used() {
        let cache = cache(3, 60);
        cache.set("a", "1".into());
        cache.set("b", "2".into());
        cache.set("c", "3".into());

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("a").is_some());
        cache.set("d", "4".into());

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_absent_even_if_recently_used() {
        let cache = cache(3, 10);
        cache.set("a", "1".into());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("a").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_at_exact_ttl_is_still_fresh() {
        let cache = cache(3, 10);
        cache.set("a", "1".into());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_key_does_not_evict_others() {
        let cache = cache(2, 60);
        cache.set("a", "1".into());
        cache.set("b", "2".into());
        cache.set("a", "updated".into());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("updated"));
        assert!(cache.get("b").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_refreshes_ttl() {
        let cache = cache(2, 10);
        cache.set("a", "1".into());
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("a", "2".into());
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("a").as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_clear_and_stats() {
        let cache = cache(5, 60);
        cache.set("a", "1".into());
        cache.set("b", "2".into());

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(
            cache.stats(),
            CacheStats {
                size: 1,
                max_size: 5,
                ttl: Duration::from_secs(60),
            }
        );

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = CacheConfig {
            max_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
        assert!(CacheConfig::default().validate().is_ok());
    }
}
