use crate::monitor::MonitorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval under normal load, and the floor during recovery
    pub base_interval_ms: u64,

    /// Ceiling for the backed-off poll interval
    pub max_interval_ms: u64,

    /// Interval multiplier applied while load stays at warning level
    pub backoff_factor: f64,

    /// Interval divisor applied once load subsides
    pub recovery_factor: f64,

    /// Consecutive warning-level samples before backing off
    pub sustained_samples: u32,

    /// Snapshots retained in the history ring
    pub history_size: usize,

    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warning_percent: f64,
    pub memory_critical_percent: f64,

    /// Memory usage at which `memory_pressure` is reported
    pub memory_pressure_percent: f64,

    /// Memory usage at which pressure becomes critical and work should stop
    pub memory_pressure_critical_percent: f64,

    /// Tab count considered the limit
    pub max_tabs: u32,

    /// Identical threshold notifications inside this window are dropped
    pub debounce_ms: u64,
}

impl MonitorConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.base_interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "base_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(MonitorError::InvalidConfig(
                "max_interval_ms must be at least base_interval_ms".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 || self.recovery_factor < 1.0 {
            return Err(MonitorError::InvalidConfig(
                "backoff_factor and recovery_factor must be at least 1.0".to_string(),
            ));
        }
        if self.history_size == 0 {
            return Err(MonitorError::InvalidConfig(
                "history_size must be greater than 0".to_string(),
            ));
        }

        let pairs = [
            ("cpu", self.cpu_warning_percent, self.cpu_critical_percent),
            ("memory", self.memory_warning_percent, self.memory_critical_percent),
            (
                "memory_pressure",
                self.memory_pressure_percent,
                self.memory_pressure_critical_percent,
            ),
        ];
        for (name, warning, critical) in pairs {
            if !(0.0..=100.0).contains(&warning) || !(0.0..=100.0).contains(&critical) {
                return Err(MonitorError::InvalidConfig(format!(
                    "{} thresholds must be percentages",
                    name
                )));
            }
            if warning > critical {
                return Err(MonitorError::InvalidConfig(format!(
                    "{} warning threshold exceeds its critical threshold",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 5_000,
            max_interval_ms: 30_000,
            backoff_factor: 1.5,
            recovery_factor: 1.2,
            sustained_samples: 3,
            history_size: 60,
            cpu_warning_percent: 70.0,
            cpu_critical_percent: 90.0,
            memory_warning_percent: 75.0,
            memory_critical_percent: 90.0,
            memory_pressure_percent: 85.0,
            memory_pressure_critical_percent: 95.0,
            max_tabs: 10,
            debounce_ms: 30_000,
        }
    }
}
