//! Sharded per-domain state.
//!
//! State is partitioned by [`DomainKey`] across a fixed number of shards, each
//! behind its own mutex, so callers touching unrelated domains rarely contend
//! and never serialize through one global lock.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::domain::DomainKey;

pub(crate) const DEFAULT_SHARDS: usize = 16;

pub(crate) struct ShardedMap<V> {
    name: &'static str,
    shards: Box<[Mutex<HashMap<DomainKey, V>>]>,
}

impl<V: Default> ShardedMap<V> {
    pub(crate) fn new(name: &'static str, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { name, shards }
    }

    fn shard_for(&self, key: &DomainKey) -> MutexGuard<'_, HashMap<DomainKey, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;

        // A panic while holding a shard leaves plain data behind; keep serving it.
        self.shards[index].lock().unwrap_or_else(|poisoned| {
            tracing::warn!(map = self.name, "Recovered from poisoned shard mutex");
            poisoned.into_inner()
        })
    }

    /// Run `f` against the entry for `key`, creating it on first reference.
    ///
    /// The shard stays locked for the duration of `f`, which makes any
    /// read-then-write inside it atomic for that key.
    pub(crate) fn with_entry<R>(&self, key: &DomainKey, f: impl FnOnce(&mut V) -> R) -> R {
        let mut shard = self.shard_for(key);
        f(shard.entry(key.clone()).or_default())
    }

    /// Run `f` against the entry for `key` if one exists. Never creates it.
    pub(crate) fn get<R>(&self, key: &DomainKey, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard_for(key).get(key).map(f)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .sum()
    }
}
