//! Configuration for the task executor

use crate::circuit_breaker::ServiceType;
use crate::executor::{ExecutorError, ExecutorResult, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tasks allowed in flight at once
    pub max_concurrent_tasks: usize,

    /// Attempts per task, including the first
    pub max_attempts: u32,

    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,

    /// Longest wait for rate-limit admission per attempt
    pub rate_limit_wait_ms: u64,

    /// Resource used when a task names none
    pub default_resource: String,

    /// Breaker family used when a task names none
    pub default_service_type: ServiceType,
}

impl ExecutorConfig {
    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn validate(&self) -> ExecutorResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ExecutorError::InvalidConfig(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ExecutorError::InvalidConfig(
                "max_delay_ms must not be smaller than base_delay_ms".to_string(),
            ));
        }
        if self.default_resource.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "default_resource must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            rate_limit_wait_ms: 30_000,
            default_resource: "google".to_string(),
            default_service_type: ServiceType::SearchEngine,
        }
    }
}
