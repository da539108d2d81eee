//! Adaptive system resource monitor.
//!
//! [`ResourceMonitor`] samples CPU and memory through a [`SystemProbe`],
//! keeps a bounded history, publishes debounced threshold events and derives a
//! [`ThrottleAction`] the orchestration layer applies to its concurrency and
//! pacing. The poll interval stretches under sustained load and shrinks back
//! to the configured base once load subsides.

mod config;
mod core;
mod debounce;
mod metrics;
mod probe;
mod throttle;

pub use config::MonitorConfig;
pub use core::{ResourceMonitor, UsageAverage};
pub use debounce::Debouncer;
pub use metrics::{init_monitor_metrics, MONITOR_METRICS};
pub use probe::{parse_cpu_times, parse_meminfo, CpuTimes, MemoryInfo, ProcfsProbe, SystemProbe};
pub use throttle::{ThrottleAction, ThrottleRecommendation};

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for monitor operations
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The probe could not read system counters
    #[error("Probe failed: {0}")]
    Probe(String),

    /// No probe implementation for this platform
    #[error("Resource probing is not supported on this platform")]
    Unsupported,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<MonitorError> for AppError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::InvalidConfig(msg) => AppError::Configuration(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Measured quantity a threshold applies to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceMetric {
    Cpu,
    Memory,
    Tabs,
}

/// One poll of system load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_available: u64,
    pub tab_count: u32,
    pub memory_pressure: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(ResourceMetric::Memory.to_string(), "memory");
        assert_eq!(serde_json::to_string(&ResourceMetric::Tabs).unwrap(), "\"tabs\"");
    }

    #[test]
    fn test_invalid_config_is_configuration_error() {
        let err: AppError = MonitorError::InvalidConfig("bad".to_string()).into();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        let err: AppError = MonitorError::Unsupported.into();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
