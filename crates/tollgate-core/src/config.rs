use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::dedup::DedupConfig;
use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::throttle::RateLimiterConfig;

/// Configuration for every governance component, built once and handed to
/// the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernanceConfig {
    pub retry: RetryPolicy,
    pub rate_limit: RateLimiterConfig,
    pub circuit: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
}

impl GovernanceConfig {
    /// Read overrides from environment variables, falling back to defaults.
    ///
    /// - `RATE_LIMIT_MIN_DELAY` / `RATE_LIMIT_MAX_DELAY` (seconds, fractional allowed)
    /// - `DOMAIN_LOCK_SECONDS`
    /// - `MAX_RETRIES`, `RETRY_BASE_DELAY`, `RETRY_MAX_DELAY`
    /// - `CIRCUIT_FAILURE_THRESHOLD`, `CIRCUIT_RECOVERY_TIMEOUT`
    /// - `CACHE_MAX_SIZE`, `CACHE_TTL_SECONDS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(v) = parse_secs(&lookup, "RATE_LIMIT_MIN_DELAY")? {
            config.rate_limit.min_delay = v;
        }
        if let Some(v) = parse_secs(&lookup, "RATE_LIMIT_MAX_DELAY")? {
            config.rate_limit.max_delay = v;
        }
        if let Some(v) = parse_secs(&lookup, "DOMAIN_LOCK_SECONDS")? {
            config.rate_limit.default_lock = v;
        }

        if let Some(v) = parse(&lookup, "MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_secs(&lookup, "RETRY_BASE_DELAY")? {
            config.retry.base_delay = v;
        }
        if let Some(v) = parse_secs(&lookup, "RETRY_MAX_DELAY")? {
            config.retry.max_delay = v;
        }

        if let Some(v) = parse(&lookup, "CIRCUIT_FAILURE_THRESHOLD")? {
            config.circuit.failure_threshold = v;
        }
        if let Some(v) = parse_secs(&lookup, "CIRCUIT_RECOVERY_TIMEOUT")? {
            config.circuit.recovery_timeout = v;
        }

        if let Some(v) = parse(&lookup, "CACHE_MAX_SIZE")? {
            config.cache.max_size = v;
        }
        if let Some(v) = parse_secs(&lookup, "CACHE_TTL_SECONDS")? {
            config.cache.ttl = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.retry.validate()?;
        self.rate_limit.validate()?;
        self.circuit.validate()?;
        self.cache.validate()?;
        self.dedup.validate()
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, AppError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| AppError::ConfigError(format!("Invalid {name} '{raw}'")))
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>, AppError> {
    match parse::<f64>(lookup, name)? {
        None => Ok(None),
        Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {name} '{secs}': must be a non-negative number of seconds"
            ))
        }),
    }
}
