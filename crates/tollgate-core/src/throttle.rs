//! Per-domain request spacing for polite fetching.
//!
//! [`DomainRateLimiter`] enforces a randomized minimum gap between successive
//! calls to the same domain. Each call draws a required spacing uniformly from
//! `[min_delay, max_delay]`; if less time than that has passed since the last
//! call, the caller sleeps for the remainder. The last-call timestamp is then
//! set to "now" whether or not it slept, which keeps bursty callers spaced out.
//!
//! Domains can also be locked for a cool-down (e.g. after an HTTP 429),
//! independently of the circuit breaker.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tollgate_core::domain::DomainKey;
//! use tollgate_core::throttle::{DomainRateLimiter, RateLimiterConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = DomainRateLimiter::new(RateLimiterConfig::new(
//!     Duration::from_secs(2),
//!     Duration::from_secs(5),
//! ));
//! let domain = DomainKey::from_url("https://jobs.example.com/careers")?;
//! let waited = limiter.wait(&domain).await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::DomainKey;
use crate::error::AppError;
use crate::keyed::{DEFAULT_SHARDS, ShardedMap};

/// Longest cool-down a domain can be locked for. Longer requests are clamped.
pub const MAX_LOCK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the per-domain rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Lower bound of the randomized spacing between calls to one domain.
    pub min_delay: Duration,

    /// Upper bound of the randomized spacing between calls to one domain.
    pub max_delay: Duration,

    /// Cool-down applied by [`DomainRateLimiter::lock`] when no duration is given.
    pub default_lock: Duration,
}

impl RateLimiterConfig {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_default_lock(mut self, duration: Duration) -> Self {
        self.default_lock = duration;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_delay < self.min_delay {
            return Err(AppError::ConfigError(format!(
                "rate limit max_delay ({:?}) must be >= min_delay ({:?})",
                self.max_delay, self.min_delay
            )));
        }
        if self.default_lock > MAX_LOCK {
            return Err(AppError::ConfigError(format!(
                "rate limit default_lock ({:?}) must be <= {:?}",
                self.default_lock, MAX_LOCK
            )));
        }
        Ok(())
    }

    /// Draw the spacing required before the next call.
    fn required_spacing(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::rng().random_range(self.min_delay..=self.max_delay)
    }
}

impl Default for RateLimiterConfig {
    /// 2–5 seconds between calls, 60 second cool-down locks.
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            default_lock: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct DomainSlot {
    /// Held across the sleep so callers to the same domain queue up behind it.
    last_call_at: Arc<Mutex<Option<Instant>>>,
    locked_until: Option<Instant>,
}

/// Thread-safe per-domain rate limiter.
#[derive(Clone)]
pub struct DomainRateLimiter {
    config: RateLimiterConfig,
    slots: Arc<ShardedMap<DomainSlot>>,
}

impl DomainRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            slots: Arc::new(ShardedMap::new("rate_limiter", DEFAULT_SHARDS)),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Pace a call to `domain`, returning how long the caller was suspended.
    pub async fn wait(&self, domain: &DomainKey) -> Duration {
        let last_call_at = self
            .slots
            .with_entry(domain, |slot| Arc::clone(&slot.last_call_at));
        let mut last_call_at = last_call_at.lock().await;

        let required = self.config.required_spacing();
        let mut slept = Duration::ZERO;

        if let Some(last) = *last_call_at {
            let elapsed = last.elapsed();
            if elapsed < required {
                slept = required - elapsed;
                tracing::debug!(
                    domain = %domain,
                    sleep_ms = slept.as_millis() as u64,
                    "Throttling request"
                );
                tokio::time::sleep(slept).await;
            }
        }

        *last_call_at = Some(Instant::now());
        slept
    }

    /// Lock `domain` for `duration`, or the configured default cool-down.
    pub fn lock(&self, domain: &DomainKey, duration: Option<Duration>) {
        let duration = duration.unwrap_or(self.config.default_lock).min(MAX_LOCK);
        let until = Instant::now() + duration;
        self.slots
            .with_entry(domain, |slot| slot.locked_until = Some(until));
        tracing::warn!(
            domain = %domain,
            lock_secs = duration.as_secs(),
            "Domain locked"
        );
    }

    pub fn unlock(&self, domain: &DomainKey) {
        self.slots.with_entry(domain, |slot| slot.locked_until = None);
    }

    /// Whether `domain` is inside a cool-down. Reading never mutates the lock.
    pub fn is_locked(&self, domain: &DomainKey) -> bool {
        self.lock_remaining(domain).is_some()
    }

    /// Time left on the domain's cool-down, if any.
    pub fn lock_remaining(&self, domain: &DomainKey) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .get(domain, |slot| {
                slot.locked_until
                    .filter(|until| now < *until)
                    .map(|until| until - now)
            })
            .flatten()
    }
}
