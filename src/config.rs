use crate::circuit_breaker::CircuitBreakerRegistryConfig;
use crate::error::{AppError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::executor::ExecutorConfig;
use crate::monitor::MonitorConfig;
use crate::queue::QueueConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in defaults, overridden by the optional file and the environment
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging and metrics
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Event bus sizing
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    /// Per-service-type breaker overrides
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerRegistryConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, `$CONFIG_PATH` and the environment
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load configuration with an explicit override file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Toml,
            ));

        // Override with config file if it exists
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        // Override with environment variables (prefix: SERP_ORCH)
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("SERP_ORCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every section; the first problem found is reported
    pub fn validate(&self) -> Result<()> {
        if self.events.capacity == 0 {
            return Err(AppError::Configuration(
                "events.capacity must be greater than 0".to_string(),
            ));
        }
        self.scheduler.validate()?;
        self.rate_limiter.validate()?;
        self.circuit_breakers.validate()?;
        self.queue.validate()?;
        self.monitor.validate()?;
        self.executor.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Register Prometheus metrics and dump them at shutdown
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer per subscriber; slower subscribers lag past this
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "serp-orchestrator".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}
