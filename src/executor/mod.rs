//! Gated task execution.
//!
//! [`TaskExecutor`] runs one unit of automation work at a time per call:
//! admission through the [`RateLimiter`](crate::rate_limiter::RateLimiter),
//! the call itself inside the service's circuit breaker, and exponential
//! backoff between attempts. Outcomes are published as `task:*` events.

mod config;
mod core;
#[cfg(test)]
mod harness;
mod retry;
mod worker;

pub use config::ExecutorConfig;
pub use core::{ActiveTaskInfo, ExecutorStats, TaskExecutor, TaskOutcome, TaskRequest};
pub use retry::RetryPolicy;
pub use worker::ProcessOutcome;

use crate::circuit_breaker::ServiceType;
use crate::error::AppError;
use crate::rate_limiter::RateLimiterError;
use uuid::Uuid;

/// Result type for executor operations
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

/// Errors that can occur while executing a task
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Too many tasks in flight
    #[error("Maximum of {max} concurrent tasks reached")]
    Capacity { max: usize },

    /// A task with this id is already in flight
    #[error("Task {0} is already running")]
    Duplicate(Uuid),

    /// Task was cancelled before it could finish
    #[error("Task {0} was cancelled")]
    Cancelled(Uuid),

    /// Admission was never granted
    #[error("Rate limited: {0}")]
    RateLimited(#[source] RateLimiterError),

    /// Last attempt was rejected by an open circuit
    #[error("Circuit open for {service_type}:{service_id}")]
    CircuitOpen {
        service_type: ServiceType,
        service_id: String,
    },

    /// Every attempt failed
    #[error("Task '{task}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ExecutorError> for AppError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Capacity { .. } => AppError::Capacity(err.to_string()),
            ExecutorError::Duplicate(_) => AppError::Validation(err.to_string()),
            ExecutorError::Cancelled(id) => AppError::Cancelled(format!("task {}", id)),
            ExecutorError::RateLimited(inner) => inner.into(),
            ExecutorError::CircuitOpen {
                service_type,
                service_id,
            } => AppError::CircuitOpen {
                service_type: service_type.to_string(),
                service_id,
            },
            ExecutorError::RetryExhausted {
                task,
                attempts,
                last_error,
            } => AppError::RetryExhausted {
                task,
                attempts,
                last_error,
            },
            ExecutorError::InvalidConfig(msg) => AppError::Configuration(msg),
        }
    }
}
