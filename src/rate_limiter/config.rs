use crate::rate_limiter::RateLimiterError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Limits for one layer (a resource or the global layer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Tokens per window
    pub max_requests: u32,
    pub window_ms: u64,
    pub max_concurrent: u32,
    /// Minimum spacing between request starts; ignored on the global layer
    pub min_delay_ms: u64,
}

impl LimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay_ms = min_delay.as_millis() as u64;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    fn validate(&self, layer: &str) -> Result<(), RateLimiterError> {
        if self.max_requests == 0 {
            return Err(RateLimiterError::InvalidConfig(format!(
                "{}: max_requests must be greater than 0",
                layer
            )));
        }
        if self.window_ms == 0 {
            return Err(RateLimiterError::InvalidConfig(format!(
                "{}: window_ms must be greater than 0",
                layer
            )));
        }
        if self.max_concurrent == 0 {
            return Err(RateLimiterError::InvalidConfig(format!(
                "{}: max_concurrent must be greater than 0",
                layer
            )));
        }
        Ok(())
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_ms: 60_000,
            max_concurrent: 2,
            min_delay_ms: 1_000,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Limits applied to resources without an override
    pub default_resource: LimitConfig,

    /// Shared layer across every resource
    pub global: LimitConfig,

    /// Per-resource overrides keyed by resource name
    pub resources: HashMap<String, LimitConfig>,

    /// Longest single sleep inside `wait_for_limit`
    pub max_wait_step_ms: u64,

    /// Default overall timeout for `wait_for_limit`
    pub wait_timeout_ms: u64,

    /// Publish an event for every admission decision
    pub emit_events: bool,

    /// Tracked resources above which idle ones are dropped
    pub max_tracked_resources: usize,
}

impl RateLimiterConfig {
    pub fn for_resource(&self, resource: &str) -> &LimitConfig {
        self.resources
            .get(resource)
            .unwrap_or(&self.default_resource)
    }

    pub fn with_resource(mut self, resource: impl Into<String>, limits: LimitConfig) -> Self {
        self.resources.insert(resource.into(), limits);
        self
    }

    pub fn max_wait_step(&self) -> Duration {
        Duration::from_millis(self.max_wait_step_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RateLimiterError> {
        self.default_resource.validate("default_resource")?;
        self.global.validate("global")?;
        for (name, limits) in &self.resources {
            limits.validate(name)?;
        }
        if self.max_wait_step_ms == 0 {
            return Err(RateLimiterError::InvalidConfig(
                "max_wait_step_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_tracked_resources == 0 {
            return Err(RateLimiterError::InvalidConfig(
                "max_tracked_resources must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_resource: LimitConfig::default(),
            global: LimitConfig {
                max_requests: 100,
                window_ms: 60_000,
                max_concurrent: 10,
                min_delay_ms: 0,
            },
            resources: HashMap::new(),
            max_wait_step_ms: 5_000,
            wait_timeout_ms: 30_000,
            emit_events: true,
            max_tracked_resources: 1_024,
        }
    }
}
