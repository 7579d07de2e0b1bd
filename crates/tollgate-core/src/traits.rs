use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AppError;
use crate::models::DedupRecord;

/// Durable key-value storage behind the dedup store.
///
/// Records are addressed by their dedup key, so a `put` of an existing key
/// overwrites instead of duplicating. Implementations must keep the first
/// `first_seen_at` when a key is written again.
pub trait DurableStore: Send + Sync + Clone {
    /// Point lookup by key.
    fn get(&self, key: &str)
    -> impl Future<Output = Result<Option<DedupRecord>, AppError>> + Send;

    /// Insert or overwrite a single record.
    fn put(&self, record: &DedupRecord) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Write a group of records as one unit. Callers bound the group size.
    fn put_batch(
        &self,
        records: &[DedupRecord],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Remove a record. Returns whether the key existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Every stored key. Used once to warm the in-process membership set.
    fn keys(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// In-process [`DurableStore`] for ephemeral runs and tests.
///
/// Nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, DedupRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, DedupRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned memory store mutex");
            poisoned.into_inner()
        })
    }

    fn upsert(records: &mut HashMap<String, DedupRecord>, record: &DedupRecord) {
        let mut record = record.clone();
        if let Some(existing) = records.get(&record.key) {
            record.first_seen_at = existing.first_seen_at;
        }
        records.insert(record.key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<DedupRecord>, AppError> {
        Ok(self.lock_records().get(key).cloned())
    }

    async fn put(&self, record: &DedupRecord) -> Result<(), AppError> {
        Self::upsert(&mut self.lock_records(), record);
        Ok(())
    }

    async fn put_batch(&self, records: &[DedupRecord]) -> Result<(), AppError> {
        let mut stored = self.lock_records();
        for record in records {
            Self::upsert(&mut stored, record);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.lock_records().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, AppError> {
        Ok(self.lock_records().keys().cloned().collect())
    }
}
