//! Per-domain circuit breaker.
//!
//! Stops issuing calls to a target that keeps failing, so one blocking or
//! misbehaving career site can't starve the rest of a run.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------------[success]----------------------------+
//! ```
//!
//! The Open → Half-Open transition is lazy: it is evaluated from the stored
//! state and the current time whenever a domain is read. There is no timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::DomainKey;
use crate::error::AppError;
use crate::keyed::{DEFAULT_SHARDS, ShardedMap};

/// Current state of one domain's circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    #[default]
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - a bounded number of probes test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time since the last failure before Open turns into Half-Open.
    pub recovery_timeout: Duration,

    /// Probes let through while Half-Open before the circuit is resolved.
    pub half_open_probes: u32,

    /// When a rate limit (429) opens the circuit, multiply the domain's
    /// recovery timeout by this factor.
    pub rate_limit_backoff_multiplier: f32,

    /// Maximum recovery timeout after rate limit backoffs.
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_probes: 1,
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit failure_threshold must be at least 1".into(),
            ));
        }
        if self.half_open_probes == 0 {
            return Err(AppError::ConfigError(
                "circuit half_open_probes must be at least 1".into(),
            ));
        }
        let multiplier = self.rate_limit_backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(AppError::ConfigError(format!(
                "circuit rate_limit_backoff_multiplier must be a finite value >= 1.0, got {multiplier}"
            )));
        }
        if self.max_recovery_timeout < self.recovery_timeout {
            return Err(AppError::ConfigError(
                "circuit max_recovery_timeout must be >= recovery_timeout".into(),
            ));
        }
        Ok(())
    }
}

/// State tracked for a single domain.
#[derive(Debug, Default)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probes_granted: u32,
    /// Set when rate limits have stretched this domain's recovery window.
    extended_timeout: Option<Duration>,
    last_error: Option<String>,
}

impl CircuitRecord {
    fn recovery_timeout(&self, config: &CircuitBreakerConfig) -> Duration {
        self.extended_timeout.unwrap_or(config.recovery_timeout)
    }

    /// Apply the time-based Open → Half-Open transition for `now`.
    ///
    /// Returns true if the transition happened.
    fn refresh(&mut self, now: Instant, config: &CircuitBreakerConfig) -> bool {
        if self.state == CircuitState::Open
            && let Some(last_failure) = self.last_failure_at
            && now.saturating_duration_since(last_failure) >= self.recovery_timeout(config)
        {
            self.state = CircuitState::HalfOpen;
            self.probes_granted = 0;
            return true;
        }
        false
    }

    fn time_until_half_open(
        &self,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let timeout = self.recovery_timeout(config);
        Some(match self.last_failure_at {
            Some(t) => timeout.saturating_sub(now.saturating_duration_since(t)),
            None => timeout,
        })
    }

    fn extend_for_rate_limit(&mut self, config: &CircuitBreakerConfig) {
        let current = self.recovery_timeout(config);
        let extended = Duration::try_from_secs_f32(
            current.as_secs_f32() * config.rate_limit_backoff_multiplier,
        )
        .unwrap_or(config.max_recovery_timeout);
        self.extended_timeout = Some(extended.min(config.max_recovery_timeout));
    }
}

/// Snapshot of one domain's circuit for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStatus {
    pub domain: DomainKey,
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    /// When the circuit last opened, if it ever did.
    pub opened_at: Option<Instant>,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker keeping independent state per domain.
#[derive(Clone)]
pub struct DomainCircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Arc<ShardedMap<CircuitRecord>>,
}

impl DomainCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(ShardedMap::new("circuit_breaker", DEFAULT_SHARDS)),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call to `domain` may proceed.
    ///
    /// True when closed, false when open. While half-open, each call hands out
    /// one probe permit until `half_open_probes` are outstanding.
    pub fn can_execute(&self, domain: &DomainKey) -> bool {
        let now = Instant::now();
        self.circuits.with_entry(domain, |record| {
            if record.refresh(now, &self.config) {
                tracing::info!(domain = %domain, "Circuit transitioning to half-open state");
            }
            match record.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    if record.probes_granted < self.config.half_open_probes {
                        record.probes_granted += 1;
                        true
                    } else {
                        false
                    }
                }
            }
        })
    }

    /// Current state, applying the lazy Open → Half-Open transition.
    pub fn state(&self, domain: &DomainKey) -> CircuitState {
        self.status(domain).state
    }

    pub fn status(&self, domain: &DomainKey) -> CircuitStatus {
        let now = Instant::now();
        self.circuits.with_entry(domain, |record| {
            record.refresh(now, &self.config);
            CircuitStatus {
                domain: domain.clone(),
                state: record.state,
                failure_count: record.failure_count,
                threshold: self.config.failure_threshold,
                opened_at: record.opened_at,
                last_error: record.last_error.clone(),
                time_until_half_open: record.time_until_half_open(now, &self.config),
            }
        })
    }

    /// Reset the domain to closed with zero failures, whatever its state.
    pub fn record_success(&self, domain: &DomainKey) {
        self.circuits.with_entry(domain, |record| {
            if record.state != CircuitState::Closed {
                tracing::info!(domain = %domain, "Circuit closing after successful probe");
            }
            record.state = CircuitState::Closed;
            record.failure_count = 0;
            record.probes_granted = 0;
            record.extended_timeout = None;
            record.last_error = None;
        });
    }

    pub fn record_failure(&self, domain: &DomainKey) {
        self.record(domain, None);
    }

    /// Record a failure caused by `error`.
    ///
    /// Rate-limit failures that open the circuit also stretch the domain's
    /// recovery window by `rate_limit_backoff_multiplier`.
    pub fn record_error(&self, domain: &DomainKey, error: &AppError) {
        self.record(domain, Some(error));
    }

    /// Hand back a half-open probe permit whose call ended without a verdict
    /// on the domain's health (cache hit, non-tripping error).
    pub fn release_probe(&self, domain: &DomainKey) {
        self.circuits.with_entry(domain, |record| {
            if record.state == CircuitState::HalfOpen {
                record.probes_granted = record.probes_granted.saturating_sub(1);
            }
        });
    }

    pub fn reset(&self, domain: &DomainKey) {
        self.circuits.with_entry(domain, |record| {
            tracing::info!(domain = %domain, "Circuit manually reset");
            *record = CircuitRecord::default();
        });
    }

    fn record(&self, domain: &DomainKey, error: Option<&AppError>) {
        let now = Instant::now();
        let is_rate_limit = error.is_some_and(AppError::is_rate_limit);

        self.circuits.with_entry(domain, |record| {
            record.refresh(now, &self.config);
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_at = Some(now);
            if let Some(error) = error {
                record.last_error = Some(error.to_string());
            }

            match record.state {
                CircuitState::Closed => {
                    if record.failure_count >= self.config.failure_threshold {
                        if is_rate_limit {
                            record.extend_for_rate_limit(&self.config);
                        }
                        tracing::warn!(
                            domain = %domain,
                            failures = record.failure_count,
                            recovery_secs = record.recovery_timeout(&self.config).as_secs(),
                            "Circuit opening after {} consecutive failures",
                            record.failure_count
                        );
                        record.state = CircuitState::Open;
                        record.opened_at = Some(now);
                    }
                }
                CircuitState::HalfOpen => {
                    if is_rate_limit {
                        record.extend_for_rate_limit(&self.config);
                    }
                    tracing::warn!(
                        domain = %domain,
                        "Circuit probe failed, returning to open state"
                    );
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                    record.probes_granted = 0;
                }
                CircuitState::Open => {}
            }
        });
    }
}
