pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
mod keyed;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{BoundedTtlCache, CacheConfig, CacheStats};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitState, CircuitStatus, DomainCircuitBreaker};
pub use config::GovernanceConfig;
pub use dedup::{DedupConfig, DedupStore, identify};
pub use domain::{DomainKey, normalize_url};
pub use error::AppError;
pub use models::{DedupRecord, Discovered, Listing, Target, cache_key, compute_hash, dedup_key};
pub use orchestrator::{
    GovernanceEvent, GovernanceReporter, Orchestrator, Outcome, RunReport, Surfaced,
    TracingReporter,
};
pub use retry::{Retrier, RetryPolicy, retry};
pub use throttle::{DomainRateLimiter, RateLimiterConfig};
pub use traits::{DurableStore, MemoryStore};
