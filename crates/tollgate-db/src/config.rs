use std::time::Duration;

use tollgate_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the dedup history lives and how hard to lean on it.
///
/// One run writes at most a handful of batches at a time, so the pool stays
/// small; the acquire timeout bounds how long a check waits for a connection
/// before the run gives up on durable dedup.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string (`postgres://` or `postgresql://`).
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Read the history database settings from the process environment.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT` seconds (optional, defaults to 10)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::ConfigError(
                "DATABASE_URL not set. The dedup history needs a PostgreSQL database; \
                 use `tollgate key` for offline checks."
                    .into(),
            )
        })?;
        let mut config = Self::new(url);

        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                ))
            })?;
        }
        if let Some(raw) = lookup("DATABASE_ACQUIRE_TIMEOUT") {
            config.acquire_timeout = raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_ACQUIRE_TIMEOUT '{raw}': must be a non-negative number of seconds"
                    ))
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.url.trim();
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(AppError::ConfigError(
                "DATABASE_URL must be a postgres:// or postgresql:// connection string".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(AppError::ConfigError(
                "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "DATABASE_ACQUIRE_TIMEOUT must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
