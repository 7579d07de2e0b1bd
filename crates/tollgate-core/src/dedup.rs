//! Durable "already processed" membership keyed by normalized URL.
//!
//! The [`DurableStore`] is the source of truth. An in-process set of known
//! keys shadows it for fast lookups: it is loaded once by a full key scan on
//! first use (behind a one-time initialization barrier, so concurrent first
//! callers never observe a half-loaded set) and updated only after a durable
//! write has succeeded.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Mutex, OnceCell};

use crate::domain::normalize_url;
use crate::error::AppError;
use crate::models::{DedupRecord, Discovered, dedup_key};
use crate::traits::DurableStore;

/// Highest batch size accepted; the backing store's transaction limit is 500.
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    /// Records written per `put_batch` call.
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { batch_size: 450 }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(AppError::ConfigError(format!(
                "dedup batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

/// Normalize `url` (resolving it against `base` if relative) and derive its dedup key.
///
/// Returns `(normalized_url, key)`.
pub fn identify(url: &str, base: Option<&str>) -> Result<(String, String), AppError> {
    let normalized = normalize_url(url, base)?;
    let key = dedup_key(&normalized);
    Ok((normalized, key))
}

struct Shared {
    known: OnceCell<RwLock<HashSet<String>>>,
    /// Serializes check-then-write sequences against the known set.
    write_gate: Mutex<()>,
}

/// Deduplicating store over a [`DurableStore`] backend.
#[derive(Clone)]
pub struct DedupStore<S> {
    store: S,
    config: DedupConfig,
    shared: Arc<Shared>,
}

impl<S: DurableStore> DedupStore<S> {
    pub fn new(store: S, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            shared: Arc::new(Shared {
                known: OnceCell::new(),
                write_gate: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn known(&self) -> Result<&RwLock<HashSet<String>>, AppError> {
        self.shared
            .known
            .get_or_try_init(|| async {
                let keys = self.store.keys().await?;
                tracing::info!(count = keys.len(), "Loaded known dedup keys");
                Ok::<_, AppError>(RwLock::new(keys.into_iter().collect()))
            })
            .await
    }

    fn read(set: &RwLock<HashSet<String>>) -> RwLockReadGuard<'_, HashSet<String>> {
        set.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(set: &RwLock<HashSet<String>>) -> RwLockWriteGuard<'_, HashSet<String>> {
        set.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned dedup set lock");
            poisoned.into_inner()
        })
    }

    /// Whether `url` (or any spelling that normalizes to it) was recorded.
    pub async fn is_seen(&self, url: &str) -> Result<bool, AppError> {
        let (_, key) = identify(url, None)?;
        let known = self.known().await?;
        Ok(Self::read(known).contains(&key))
    }

    /// Record `url` with no payload. Returns its dedup key.
    pub async fn record(&self, url: &str) -> Result<String, AppError> {
        self.record_with(url, serde_json::Value::Null).await
    }

    /// Record `url` together with the item that was discovered there.
    ///
    /// Re-recording a known URL overwrites its payload but keeps `first_seen_at`.
    pub async fn record_with(
        &self,
        url: &str,
        payload: serde_json::Value,
    ) -> Result<String, AppError> {
        let (normalized, _) = identify(url, None)?;
        let known = self.known().await?;
        let record = DedupRecord::new(normalized, payload);

        let _gate = self.shared.write_gate.lock().await;
        self.store.put(&record).await?;
        Self::write(known).insert(record.key.clone());

        tracing::debug!(key = %record.key, url = %record.url, "Recorded item");
        Ok(record.key)
    }

    /// Record `url` only if it has not been seen. Returns true if it was new.
    pub async fn record_if_new(
        &self,
        url: &str,
        payload: serde_json::Value,
    ) -> Result<bool, AppError> {
        let (normalized, key) = identify(url, None)?;
        let known = self.known().await?;

        let _gate = self.shared.write_gate.lock().await;
        if Self::read(known).contains(&key) {
            return Ok(false);
        }

        let record = DedupRecord::new(normalized, payload);
        self.store.put(&record).await?;
        Self::write(known).insert(key);
        Ok(true)
    }

    /// Record many items, committing every `batch_size` records.
    ///
    /// Items with an empty or unparseable URL are skipped. If a batch fails,
    /// batches committed before it stay recorded and the error is returned.
    pub async fn record_batch<T: Discovered>(&self, items: &[T]) -> Result<usize, AppError> {
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            if item.url().trim().is_empty() {
                tracing::warn!("Skipping item without a URL");
                continue;
            }
            let normalized = match normalize_url(item.url(), None) {
                Ok(normalized) => normalized,
                Err(e) => {
                    tracing::warn!(url = item.url(), error = %e, "Skipping item with invalid URL");
                    continue;
                }
            };
            records.push(DedupRecord::new(normalized, serde_json::to_value(item)?));
        }

        if records.is_empty() {
            return Ok(0);
        }

        let known = self.known().await?;
        let _gate = self.shared.write_gate.lock().await;
        let saved = self.commit(known, &records).await?;

        tracing::info!(saved, "Saved items in batch");
        Ok(saved)
    }

    /// Record the items whose URL was never seen and return exactly those.
    ///
    /// Item URLs must already be normalized. The membership check and the
    /// writes happen under the write gate, so concurrent callers offering the
    /// same URL never both get it back. Repeats within `items` are returned once.
    pub async fn record_unseen<T: Discovered>(&self, items: Vec<T>) -> Result<Vec<T>, AppError> {
        if items.is_empty() {
            return Ok(items);
        }

        let known = self.known().await?;
        let _gate = self.shared.write_gate.lock().await;

        let mut fresh = Vec::new();
        let mut records = Vec::new();
        {
            let set = Self::read(known);
            let mut offered = HashSet::new();
            for item in items {
                let key = dedup_key(item.url());
                if set.contains(&key) || !offered.insert(key) {
                    continue;
                }
                records.push(DedupRecord::new(item.url(), serde_json::to_value(&item)?));
                fresh.push(item);
            }
        }

        self.commit(known, &records).await?;
        Ok(fresh)
    }

    /// Write `records` in `batch_size` chunks, marking each chunk known once
    /// it is durable. Callers hold the write gate.
    async fn commit(
        &self,
        known: &RwLock<HashSet<String>>,
        records: &[DedupRecord],
    ) -> Result<usize, AppError> {
        let mut saved = 0;
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            self.store.put_batch(chunk).await?;
            Self::write(known).extend(chunk.iter().map(|r| r.key.clone()));
            saved += chunk.len();
            tracing::debug!(batch = chunk.len(), saved, "Committed dedup batch");
        }
        Ok(saved)
    }

    /// Delete the record with dedup key `id`. Returns whether it existed.
    pub async fn forget(&self, id: &str) -> Result<bool, AppError> {
        let _gate = self.shared.write_gate.lock().await;
        let existed = self.store.delete(id).await?;
        if let Some(known) = self.shared.known.get() {
            Self::write(known).remove(id);
        }
        tracing::info!(key = id, existed, "Forgot item");
        Ok(existed)
    }

    /// Fetch the stored record for dedup key `id`.
    pub async fn get(&self, id: &str) -> Result<Option<DedupRecord>, AppError> {
        self.store.get(id).await
    }

    /// Number of keys in the membership set, loading it if needed.
    pub async fn known_count(&self) -> Result<usize, AppError> {
        let known = self.known().await?;
        Ok(Self::read(known).len())
    }
}
