//! Circuit breaker configuration with builder pattern.

use crate::circuit_breaker::{CircuitBreakerError, ServiceType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the sliding window that open the circuit
    pub failure_threshold: u32,

    /// Failure percentage (0-100) inside the window that opens the circuit
    pub failure_rate_threshold: f64,

    /// Requests the window must hold before the failure rate is considered
    pub minimum_request_threshold: u32,

    /// Consecutive half-open successes required to close
    pub success_threshold: u32,

    /// Time an open circuit waits before admitting probes
    pub reset_timeout_ms: u64,

    /// Maximum concurrent probes in half-open state
    pub half_open_max_requests: u32,

    /// Span over which failures and the failure rate are evaluated
    pub sliding_window_ms: u64,

    /// Calls running longer than this are abandoned and counted as failures
    pub call_timeout_ms: Option<u64>,
}

impl CircuitBreakerConfig {
    /// Create a new builder for CircuitBreakerConfig
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn sliding_window(&self) -> Duration {
        Duration::from_millis(self.sliding_window_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_rate_threshold must be within (0, 100]".to_string(),
            ));
        }

        if self.success_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.reset_timeout_ms == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "reset_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.half_open_max_requests == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "half_open_max_requests must be greater than 0".to_string(),
            ));
        }

        if self.sliding_window_ms == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "sliding_window_ms must be greater than 0".to_string(),
            ));
        }

        if self.call_timeout_ms == Some(0) {
            return Err(CircuitBreakerError::InvalidConfig(
                "call_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 50.0,
            minimum_request_threshold: 10,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
            half_open_max_requests: 3,
            sliding_window_ms: 60_000,
            call_timeout_ms: None,
        }
    }
}

/// Builder for CircuitBreakerConfig with fluent API
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    failure_rate_threshold: Option<f64>,
    minimum_request_threshold: Option<u32>,
    success_threshold: Option<u32>,
    reset_timeout: Option<Duration>,
    half_open_max_requests: Option<u32>,
    sliding_window: Option<Duration>,
    call_timeout: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the failure rate threshold (percent)
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = Some(percent);
        self
    }

    /// Set the minimum request threshold
    pub fn minimum_request_threshold(mut self, threshold: u32) -> Self {
        self.minimum_request_threshold = Some(threshold);
        self
    }

    /// Set the success threshold
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Set the reset timeout
    pub fn reset_timeout(mut self, duration: Duration) -> Self {
        self.reset_timeout = Some(duration);
        self
    }

    /// Set the maximum requests in half-open state
    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = Some(max);
        self
    }

    /// Set the sliding window length
    pub fn sliding_window(mut self, window: Duration) -> Self {
        self.sliding_window = Some(window);
        self
    }

    /// Set the per-call timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        let default = CircuitBreakerConfig::default();

        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(default.failure_threshold),
            failure_rate_threshold: self
                .failure_rate_threshold
                .unwrap_or(default.failure_rate_threshold),
            minimum_request_threshold: self
                .minimum_request_threshold
                .unwrap_or(default.minimum_request_threshold),
            success_threshold: self.success_threshold.unwrap_or(default.success_threshold),
            reset_timeout_ms: self
                .reset_timeout
                .map(|d| d.as_millis() as u64)
                .unwrap_or(default.reset_timeout_ms),
            half_open_max_requests: self
                .half_open_max_requests
                .unwrap_or(default.half_open_max_requests),
            sliding_window_ms: self
                .sliding_window
                .map(|d| d.as_millis() as u64)
                .unwrap_or(default.sliding_window_ms),
            call_timeout_ms: self
                .call_timeout
                .map(|d| d.as_millis() as u64)
                .or(default.call_timeout_ms),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Predefined configurations per protected resource kind
impl CircuitBreakerConfig {
    /// Proxies are cheap to rotate away from: trip early, probe once
    pub fn for_proxy() -> Self {
        Self {
            failure_threshold: 3,
            failure_rate_threshold: 50.0,
            minimum_request_threshold: 3,
            success_threshold: 1,
            reset_timeout_ms: 30_000,
            half_open_max_requests: 1,
            sliding_window_ms: 60_000,
            call_timeout_ms: Some(30_000),
        }
    }

    /// Search engines throttle aggressively: longer window and cool-down
    pub fn for_search_engine() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 50.0,
            minimum_request_threshold: 10,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
            half_open_max_requests: 2,
            sliding_window_ms: 120_000,
            call_timeout_ms: Some(60_000),
        }
    }

    /// Generic APIs tolerate more noise before tripping
    pub fn for_api() -> Self {
        Self {
            failure_threshold: 10,
            failure_rate_threshold: 60.0,
            minimum_request_threshold: 20,
            success_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_max_requests: 3,
            sliding_window_ms: 60_000,
            call_timeout_ms: Some(30_000),
        }
    }

    pub fn for_service_type(service_type: ServiceType) -> Self {
        match service_type {
            ServiceType::Proxy => Self::for_proxy(),
            ServiceType::SearchEngine => Self::for_search_engine(),
            ServiceType::Api => Self::for_api(),
            ServiceType::Other => Self::default(),
        }
    }
}

/// Registry-level overrides of the per-type presets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerRegistryConfig {
    pub proxy: Option<CircuitBreakerConfig>,
    pub search_engine: Option<CircuitBreakerConfig>,
    pub api: Option<CircuitBreakerConfig>,
    pub other: Option<CircuitBreakerConfig>,
}

impl CircuitBreakerRegistryConfig {
    /// Effective configuration for a service type
    pub fn for_service_type(&self, service_type: ServiceType) -> CircuitBreakerConfig {
        let configured = match service_type {
            ServiceType::Proxy => &self.proxy,
            ServiceType::SearchEngine => &self.search_engine,
            ServiceType::Api => &self.api,
            ServiceType::Other => &self.other,
        };
        configured
            .clone()
            .unwrap_or_else(|| CircuitBreakerConfig::for_service_type(service_type))
    }

    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        for config in [&self.proxy, &self.search_engine, &self.api, &self.other]
            .into_iter()
            .flatten()
        {
            config.validate()?;
        }
        Ok(())
    }
}
