//! Bounded, jittered retry with exponential or linear backoff.
//!
//! A [`Retrier`] re-executes a unit of work while its failures are classified
//! as retryable. Delay for the failed attempt `n` (0-indexed) is
//!
//! ```text
//! exponential: min(base_delay * 2^n, max_delay)
//! linear:      min(base_delay * (n + 1), max_delay)
//! ```
//!
//! plus uniform jitter in `[0, 0.1 * delay]` so concurrent callers don't retry
//! in lockstep. After `max_retries + 1` attempts the last failure is returned
//! wrapped in [`AppError::RetryExhausted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::AppError;

/// Retry schedule. Immutable once a retry sequence starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.base_delay.is_zero() {
            return Err(AppError::ConfigError(
                "retry base_delay must be greater than zero".into(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(AppError::ConfigError(format!(
                "retry max_delay ({:?}) must be >= base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Backoff before jitter for the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.exponential {
            self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.base_delay.saturating_mul(attempt.saturating_add(1))
        };
        delay.min(self.max_delay)
    }

    /// Backoff with uniform jitter in `[0, 0.1 * delay]` added on top.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let factor: f64 = rand::rng().random_range(0.0..=0.1);
        delay + delay.mul_f64(factor)
    }
}

type RetryPredicate = Arc<dyn Fn(&AppError) -> bool + Send + Sync>;

/// Executes units of work under a [`RetryPolicy`].
///
/// By default only failures with [`AppError::is_retryable`] are retried;
/// anything else is returned to the caller on the first attempt.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    should_retry: RetryPredicate,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: Arc::new(AppError::is_retryable),
        }
    }

    /// A retrier that retries every failure regardless of its kind.
    pub fn retry_all(policy: RetryPolicy) -> Self {
        Self::new(policy).with_predicate(|_| true)
    }

    /// Replace the retryable/fatal classification.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&AppError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// There is no cancellation: once started, the sequence runs to success
    /// or exhaustion.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let total = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !(self.should_retry)(&error) {
                tracing::debug!(
                    attempt = attempt + 1,
                    error = %error,
                    "Failure is not retryable, giving up"
                );
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                tracing::error!(attempts = total, error = %error, "All attempts failed");
                return Err(AppError::RetryExhausted {
                    attempts: total,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.jittered_delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                total,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Run `operation` under `policy` with the default retryable classification.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    Retrier::new(policy.clone()).execute(operation).await
}
