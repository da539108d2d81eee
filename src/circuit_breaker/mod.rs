//! Per-service failure protection.
//!
//! This module provides the circuit breaker used in front of every protected
//! downstream resource (proxies, search engines, APIs):
//! - Sliding-window failure counting and failure-rate tripping
//! - Limited half-open probing with a consecutive-success close rule
//! - Fallback support for callers that prefer a default over an error
//! - A registry that lazily creates one breaker per service key and forwards
//!   every state change onto the engine event bus
//! - Prometheus metrics and JSON snapshots for persistence
//!
//! # Circuit Breaker States
//!
//! - **Closed**: Normal operation, requests pass through, failures are counted
//! - **Open**: Fast-fail mode, all requests are rejected immediately
//! - **Half-Open**: Testing recovery, a bounded number of probes are admitted
//!
//! # Example
//!
//! ```no_run
//! use serp_orchestrator::circuit_breaker::{CircuitBreakerRegistry, ServiceType};
//!
//! # async fn run() {
//! let registry = CircuitBreakerRegistry::default();
//! let breaker = registry.get_breaker(ServiceType::SearchEngine, "google");
//!
//! let result = breaker
//!     .execute(|| async { Ok::<_, std::io::Error>("results page") })
//!     .await;
//! # let _ = result;
//! # }
//! ```

mod config;
mod core;
mod metrics;
mod registry;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerRegistryConfig};
pub use core::{CircuitBreaker, CircuitBreakerStats, TransitionListener};
pub use metrics::{
    init_circuit_breaker_metrics, CallOutcome, RejectReason, CIRCUIT_BREAKER_METRICS,
};
pub use registry::{
    AggregateMetrics, CircuitBreakerRegistry, RegistryHealth, ServiceTypeSummary, StateCount,
};
pub use state::{
    BreakerMetrics, CircuitBreakerSnapshot, CircuitBreakerState, SlidingWindow, StateData,
    StateTransition,
};

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Result type for circuit breaker operations
pub type CircuitBreakerResult<T> = std::result::Result<T, CircuitBreakerError>;

/// Kind of resource a breaker protects; selects the preset configuration
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceType {
    Proxy,
    SearchEngine,
    Api,
    Other,
}

/// Errors that can occur in circuit breaker operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Circuit is open and rejecting requests
    #[error("Circuit breaker is open for {service_type}:{service_id}")]
    Open {
        service_type: ServiceType,
        service_id: String,
    },

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation failed
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Operation exceeded the configured call timeout
    #[error("Operation timed out")]
    Timeout,

    /// Circuit breaker not found in registry
    #[error("Circuit breaker '{0}' not found")]
    NotFound(String),
}

impl CircuitBreakerError {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open {
                service_type,
                service_id,
            } => AppError::CircuitOpen {
                service_type: service_type.to_string(),
                service_id,
            },
            CircuitBreakerError::InvalidConfig(msg) => AppError::Configuration(msg),
            CircuitBreakerError::OperationFailed(msg) => AppError::Internal(msg),
            CircuitBreakerError::Timeout => AppError::Timeout("Circuit breaker call".to_string()),
            CircuitBreakerError::NotFound(name) => {
                AppError::NotFound(format!("Circuit breaker: {}", name))
            }
        }
    }
}
