//! Test utilities: handwritten mocks for stores, units of work and reporters.
//!
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::DedupRecord;
use crate::orchestrator::{GovernanceEvent, GovernanceReporter};
use crate::traits::{DurableStore, MemoryStore};

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// [`MemoryStore`] wrapper with switchable failures and call accounting.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_puts: Arc<AtomicBool>,
    fail_keys: Arc<AtomicBool>,
    keys_calls: Arc<AtomicU32>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store, bypassing failure injection.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_keys(&self, fail: bool) {
        self.fail_keys.store(fail, Ordering::SeqCst);
    }

    pub fn keys_calls(&self) -> u32 {
        self.keys_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the successful `put_batch` calls, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn check_puts(&self) -> Result<(), AppError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::StorageError("injected write failure".into()));
        }
        Ok(())
    }
}

impl DurableStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<DedupRecord>, AppError> {
        self.inner.get(key).await
    }

    async fn put(&self, record: &DedupRecord) -> Result<(), AppError> {
        self.check_puts()?;
        self.inner.put(record).await
    }

    async fn put_batch(&self, records: &[DedupRecord]) -> Result<(), AppError> {
        self.check_puts()?;
        self.inner.put_batch(records).await?;
        self.batch_sizes.lock().unwrap().push(records.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, AppError> {
        self.keys_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keys.load(Ordering::SeqCst) {
            return Err(AppError::StorageError("injected scan failure".into()));
        }
        self.inner.keys().await
    }
}

// ---------------------------------------------------------------------------
// YieldingStore
// ---------------------------------------------------------------------------

/// [`MemoryStore`] wrapper that yields to the scheduler before every call,
/// so concurrent callers interleave at each storage await.
#[derive(Clone, Default)]
pub struct YieldingStore {
    inner: MemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl DurableStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<DedupRecord>, AppError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn put(&self, record: &DedupRecord) -> Result<(), AppError> {
        tokio::task::yield_now().await;
        self.inner.put(record).await
    }

    async fn put_batch(&self, records: &[DedupRecord]) -> Result<(), AppError> {
        tokio::task::yield_now().await;
        self.inner.put_batch(records).await
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, AppError> {
        tokio::task::yield_now().await;
        self.inner.keys().await
    }
}

// ---------------------------------------------------------------------------
// MockWork
// ---------------------------------------------------------------------------

type Fallback<V> = Arc<dyn Fn() -> Result<V, AppError> + Send + Sync>;

/// Scripted unit of work. Each call pops the next queued response; once the
/// queue is empty every call returns the fallback.
#[derive(Clone)]
pub struct MockWork<V> {
    responses: Arc<Mutex<VecDeque<Result<V, AppError>>>>,
    fallback: Fallback<V>,
    calls: Arc<AtomicU32>,
}

impl<V: Clone + Send + Sync + 'static> MockWork<V> {
    /// Always succeeds with `value`.
    pub fn ok(value: V) -> Self {
        Self::from_fallback(Arc::new(move || Ok(value.clone())))
    }

    /// Always fails with the error built by `make`.
    pub fn failing(make: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        Self::from_fallback(Arc::new(move || Err(make())))
    }

    fn from_fallback(fallback: Fallback<V>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue responses returned before the fallback kicks in.
    pub fn with_responses(self, responses: Vec<Result<V, AppError>>) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    pub async fn call(&self) -> Result<V, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| (self.fallback)())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records every event for later assertions.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<GovernanceEvent>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl GovernanceReporter for MockReporter {
    fn report(&self, event: GovernanceEvent) {
        self.events.lock().unwrap().push(event);
    }
}
