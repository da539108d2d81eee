use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input rejected at registration time
    #[error("Validation error: {0}")]
    Validation(String),

    /// Queue full or concurrency cap reached
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Admission denied by the rate limiter
    #[error("Rate limit exceeded for '{resource}' ({reason}), retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        resource: String,
        reason: String,
        retry_after_ms: u64,
    },

    /// Protected service is failing fast
    #[error("Circuit open for {service_type}:{service_id}")]
    CircuitOpen {
        service_type: String,
        service_id: String,
    },

    /// Work item failed after its retry budget
    #[error("Retries exhausted for '{task}' after {attempts} attempts: {last_error}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        last_error: String,
    },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Cooperative cancellation observed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Capacity(_) => "CAPACITY_ERROR",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            AppError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may reasonably try the same operation again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RateLimitExceeded { .. }
                | AppError::CircuitOpen { .. }
                | AppError::Timeout(_)
                | AppError::Capacity(_)
        )
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Validation("bad cron".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            AppError::CircuitOpen {
                service_type: "proxy".to_string(),
                service_id: "p1".to_string(),
            }
            .error_code(),
            "CIRCUIT_OPEN"
        );
        assert_eq!(
            AppError::Capacity("queue full".to_string()).error_code(),
            "CAPACITY_ERROR"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::RateLimitExceeded {
            resource: "google".to_string(),
            reason: "engine_limit".to_string(),
            retry_after_ms: 2000,
        }
        .is_transient());
        assert!(!AppError::Validation("x".to_string()).is_transient());
        assert!(!AppError::RetryExhausted {
            task: "t".to_string(),
            attempts: 3,
            last_error: "boom".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_display_carries_context() {
        let err = AppError::RateLimitExceeded {
            resource: "bing".to_string(),
            reason: "min_delay".to_string(),
            retry_after_ms: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("bing"));
        assert!(msg.contains("min_delay"));
        assert!(msg.contains("250ms"));
    }
}
