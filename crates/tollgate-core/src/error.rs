use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Tollgate.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Remote target answered with HTTP 429 or equivalent.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Every attempt allowed by the retry policy failed.
    #[error("Failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    /// The domain's circuit is open; no attempt was made.
    #[error("Circuit open for {domain}, retry after {} seconds", .retry_after.as_secs())]
    CircuitOpen { domain: String, retry_after: Duration },

    /// The domain is locked in the rate limiter (e.g. after a 429).
    #[error("Domain {domain} cooling down for another {} seconds", .retry_after.as_secs())]
    DomainCooldown { domain: String, retry_after: Duration },

    /// Durable store operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Malformed identity, rejected before any state was touched.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should count against the domain's circuit.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::HttpError(_)
            | AppError::Generic(_) => true,
            AppError::RetryExhausted { source, .. } => source.should_trip_circuit(),
            _ => false,
        }
    }

    /// Returns true for 429-class failures, looking through retry exhaustion.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            AppError::RateLimitExceeded => true,
            AppError::HttpError(msg) => msg.contains("429"),
            AppError::RetryExhausted { source, .. } => source.is_rate_limit(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(AppError::HttpError("connect refused".into()).is_retryable());
        assert!(!AppError::HttpError("404 not found".into()).is_retryable());
        assert!(!AppError::ValidationError("missing url".into()).is_retryable());
        assert!(!AppError::StorageError("disk full".into()).is_retryable());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::RateLimitExceeded.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(!AppError::ValidationError("bad".into()).should_trip_circuit());
        assert!(!AppError::StorageError("bad".into()).should_trip_circuit());
    }

    #[test]
    fn test_exhausted_delegates_to_cause() {
        let err = AppError::RetryExhausted {
            attempts: 3,
            source: Box::new(AppError::RateLimitExceeded),
        };
        assert!(err.should_trip_circuit());
        assert!(err.is_rate_limit());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exhausted_exposes_source() {
        use std::error::Error;

        let err = AppError::RetryExhausted {
            attempts: 2,
            source: Box::new(AppError::Timeout(5)),
        };
        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "Request timed out after 5 seconds");
        assert!(err.to_string().starts_with("Failed after 2 attempts"));
    }
}
