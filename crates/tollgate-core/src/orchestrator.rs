//! Composition of the governance primitives around a unit of work.
//!
//! For a single target URL the [`Orchestrator`] runs, in order:
//!
//! 1. domain cool-down check (rate limiter lock)
//! 2. circuit breaker admission
//! 3. result cache lookup
//! 4. rate limiter pacing
//! 5. the unit of work under the retrier
//! 6. circuit and cache bookkeeping
//!
//! Items discovered by the work are then filtered through the dedup store so
//! only never-seen items are surfaced.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::BoundedTtlCache;
use crate::circuit_breaker::DomainCircuitBreaker;
use crate::config::GovernanceConfig;
use crate::dedup::DedupStore;
use crate::domain::{DomainKey, normalize_url};
use crate::error::AppError;
use crate::models::{Discovered, Target};
use crate::retry::Retrier;
use crate::throttle::DomainRateLimiter;
use crate::traits::DurableStore;

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceEvent {
    CooldownRejected {
        domain: DomainKey,
        retry_after: Duration,
    },
    CircuitRejected {
        domain: DomainKey,
        retry_after: Duration,
    },
    CacheHit {
        domain: DomainKey,
    },
    Throttled {
        domain: DomainKey,
        waited: Duration,
    },
    Succeeded {
        domain: DomainKey,
    },
    Failed {
        domain: DomainKey,
        error: String,
        counted: bool,
    },
    DomainLocked {
        domain: DomainKey,
        duration: Duration,
    },
    ItemsSurfaced {
        found: usize,
        new: usize,
        invalid: usize,
    },
    TargetStarted {
        company: String,
        url: String,
    },
    TargetFailed {
        company: String,
        error: String,
    },
    RunCancelled {
        remaining: usize,
    },
    RunFinished {
        targets_checked: usize,
        new_items: usize,
        errors: usize,
    },
}

/// Trait for receiving governance events (decoupled logging).
pub trait GovernanceReporter: Send + Sync {
    fn report(&self, event: GovernanceEvent) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl GovernanceReporter for TracingReporter {
    fn report(&self, event: GovernanceEvent) {
        match event {
            GovernanceEvent::CooldownRejected {
                domain,
                retry_after,
            } => {
                tracing::info!(
                    %domain,
                    retry_after_secs = retry_after.as_secs(),
                    "Domain cooling down, skipping"
                );
            }
            GovernanceEvent::CircuitRejected {
                domain,
                retry_after,
            } => {
                tracing::warn!(
                    %domain,
                    retry_after_secs = retry_after.as_secs(),
                    "Circuit open, skipping"
                );
            }
            GovernanceEvent::CacheHit { domain } => {
                tracing::info!(%domain, "Using cached result");
            }
            GovernanceEvent::Throttled { domain, waited } => {
                tracing::debug!(%domain, waited_ms = waited.as_millis() as u64, "Request paced");
            }
            GovernanceEvent::Succeeded { domain } => {
                tracing::info!(%domain, "Request succeeded");
            }
            GovernanceEvent::Failed {
                domain,
                error,
                counted,
            } => {
                tracing::warn!(%domain, %error, %counted, "Request failed");
            }
            GovernanceEvent::DomainLocked { domain, duration } => {
                tracing::warn!(%domain, lock_secs = duration.as_secs(), "Rate limited, domain locked");
            }
            GovernanceEvent::ItemsSurfaced {
                found,
                new,
                invalid,
            } => {
                tracing::info!(%found, %new, %invalid, "Filtered discovered items");
            }
            GovernanceEvent::TargetStarted { company, url } => {
                tracing::info!(%company, %url, "Checking target");
            }
            GovernanceEvent::TargetFailed { company, error } => {
                tracing::error!(%company, %error, "Target check failed");
            }
            GovernanceEvent::RunCancelled { remaining } => {
                tracing::info!(%remaining, "Run cancelled");
            }
            GovernanceEvent::RunFinished {
                targets_checked,
                new_items,
                errors,
            } => {
                tracing::info!(%targets_checked, %new_items, %errors, "Run finished");
            }
        }
    }
}

/// Result of one governed unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<V> {
    pub value: V,
    pub from_cache: bool,
    pub domain: DomainKey,
}

/// Discovered items that passed the dedup check.
#[derive(Debug, Clone, PartialEq)]
pub struct Surfaced<T> {
    /// New items, with URLs rewritten to their normalized absolute form.
    pub new_items: Vec<T>,
    /// Items dropped because their URL could not be normalized.
    pub invalid: usize,
}

/// Summary of a run over many targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport<T> {
    pub targets_checked: usize,
    pub new_items_count: usize,
    pub new_items: Vec<T>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl<T> Default for RunReport<T> {
    fn default() -> Self {
        Self {
            targets_checked: 0,
            new_items_count: 0,
            new_items: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }
}

/// Explicitly constructed owner of all governance state.
///
/// `S` is the durable dedup backend, `V` the value produced by a unit of work.
#[derive(Clone)]
pub struct Orchestrator<S, V> {
    retrier: Retrier,
    limiter: DomainRateLimiter,
    circuit: DomainCircuitBreaker,
    cache: BoundedTtlCache<V>,
    dedup: DedupStore<S>,
}

impl<S, V> Orchestrator<S, V>
where
    S: DurableStore,
    V: Clone,
{
    /// Build every component from `config`, which is validated first.
    pub fn new(config: &GovernanceConfig, store: S) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            retrier: Retrier::new(config.retry.clone()),
            limiter: DomainRateLimiter::new(config.rate_limit.clone()),
            circuit: DomainCircuitBreaker::new(config.circuit.clone()),
            cache: BoundedTtlCache::new(config.cache.clone()),
            dedup: DedupStore::new(store, config.dedup.clone()),
        })
    }

    /// Replace the retrier, e.g. to change which failures are retried.
    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    pub fn limiter(&self) -> &DomainRateLimiter {
        &self.limiter
    }

    pub fn circuit(&self) -> &DomainCircuitBreaker {
        &self.circuit
    }

    pub fn cache(&self) -> &BoundedTtlCache<V> {
        &self.cache
    }

    pub fn dedup(&self) -> &DedupStore<S> {
        &self.dedup
    }

    /// Run `work` for `url` under cool-down, circuit, cache, pacing and retry.
    ///
    /// Every outcome is signalled: a skipped domain yields
    /// [`AppError::DomainCooldown`] or [`AppError::CircuitOpen`] without
    /// calling `work`.
    pub async fn run<F, Fut, R>(
        &self,
        url: &str,
        work: F,
        reporter: &R,
    ) -> Result<Outcome<V>, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
        R: GovernanceReporter + ?Sized,
    {
        let domain = DomainKey::from_url(url)?;

        if let Some(retry_after) = self.limiter.lock_remaining(&domain) {
            reporter.report(GovernanceEvent::CooldownRejected {
                domain: domain.clone(),
                retry_after,
            });
            return Err(AppError::DomainCooldown {
                domain: domain.to_string(),
                retry_after,
            });
        }

        if !self.circuit.can_execute(&domain) {
            // A busy half-open circuit has no countdown; wait out a full window.
            let retry_after = self
                .circuit
                .status(&domain)
                .time_until_half_open
                .unwrap_or(self.circuit.config().recovery_timeout);
            reporter.report(GovernanceEvent::CircuitRejected {
                domain: domain.clone(),
                retry_after,
            });
            return Err(AppError::CircuitOpen {
                domain: domain.to_string(),
                retry_after,
            });
        }

        if let Some(value) = self.cache.get(url) {
            self.circuit.release_probe(&domain);
            reporter.report(GovernanceEvent::CacheHit {
                domain: domain.clone(),
            });
            return Ok(Outcome {
                value,
                from_cache: true,
                domain,
            });
        }

        let waited = self.limiter.wait(&domain).await;
        if !waited.is_zero() {
            reporter.report(GovernanceEvent::Throttled {
                domain: domain.clone(),
                waited,
            });
        }

        match self.retrier.execute(work).await {
            Ok(value) => {
                self.circuit.record_success(&domain);
                self.cache.set(url, value.clone());
                reporter.report(GovernanceEvent::Succeeded {
                    domain: domain.clone(),
                });
                Ok(Outcome {
                    value,
                    from_cache: false,
                    domain,
                })
            }
            Err(error) => {
                let counted = error.should_trip_circuit();
                if counted {
                    self.circuit.record_error(&domain, &error);
                } else {
                    self.circuit.release_probe(&domain);
                }
                reporter.report(GovernanceEvent::Failed {
                    domain: domain.clone(),
                    error: error.to_string(),
                    counted,
                });

                if error.is_rate_limit() {
                    let duration = self.limiter.config().default_lock;
                    self.limiter.lock(&domain, Some(duration));
                    reporter.report(GovernanceEvent::DomainLocked { domain, duration });
                }
                Err(error)
            }
        }
    }

    /// Keep only the items never recorded before, and record them.
    ///
    /// Relative item URLs are resolved against `base_url`. Duplicates within
    /// `items` are surfaced once. Storage failures abort the whole call.
    pub async fn surface_new<T, R>(
        &self,
        items: Vec<T>,
        base_url: &str,
        reporter: &R,
    ) -> Result<Surfaced<T>, AppError>
    where
        T: Discovered,
        R: GovernanceReporter + ?Sized,
    {
        let found = items.len();
        let mut candidates = Vec::with_capacity(found);
        let mut invalid = 0;

        for mut item in items {
            match normalize_url(item.url(), Some(base_url)) {
                Ok(normalized) => {
                    item.set_url(normalized);
                    candidates.push(item);
                }
                Err(e) => {
                    tracing::warn!(url = item.url(), error = %e, "Skipping item with unusable URL");
                    invalid += 1;
                }
            }
        }

        let new_items = self.dedup.record_unseen(candidates).await?;

        reporter.report(GovernanceEvent::ItemsSurfaced {
            found,
            new: new_items.len(),
            invalid,
        });
        Ok(Surfaced { new_items, invalid })
    }
}

impl<S, T> Orchestrator<S, Vec<T>>
where
    S: DurableStore,
    T: Discovered + Clone,
{
    /// Check every active target in sequence and collect the new items.
    ///
    /// `work_fn` produces the discovered items for one target. Cancellation
    /// is observed between targets, never inside one.
    pub async fn run_targets<F, Fut, R>(
        &self,
        targets: &[Target],
        mut work_fn: F,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> RunReport<T>
    where
        F: FnMut(&Target) -> Fut,
        Fut: Future<Output = Result<Vec<T>, AppError>>,
        R: GovernanceReporter + ?Sized,
    {
        let active: Vec<&Target> = targets.iter().filter(|t| t.active).collect();
        let mut report = RunReport::default();

        for (index, target) in active.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                reporter.report(GovernanceEvent::RunCancelled {
                    remaining: active.len() - index,
                });
                break;
            }

            report.targets_checked += 1;
            reporter.report(GovernanceEvent::TargetStarted {
                company: target.company_name.clone(),
                url: target.careers_url.clone(),
            });

            let result = match self
                .run(&target.careers_url, || work_fn(target), reporter)
                .await
            {
                Ok(outcome) => {
                    self.surface_new(outcome.value, &target.careers_url, reporter)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(surfaced) => {
                    report.new_items_count += surfaced.new_items.len();
                    report.new_items.extend(surfaced.new_items);
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(GovernanceEvent::TargetFailed {
                        company: target.company_name.clone(),
                        error: error.clone(),
                    });
                    report
                        .errors
                        .push(format!("{}: {}", target.company_name, error));
                }
            }
        }

        reporter.report(GovernanceEvent::RunFinished {
            targets_checked: report.targets_checked,
            new_items: report.new_items_count,
            errors: report.errors.len(),
        });
        report
    }
}
