//! Configuration for the scheduler module

use crate::scheduler::{SchedulerError, SchedulerResult};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the task scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the scheduler starts at all
    pub enabled: bool,

    /// Timezone for cron expressions and weekday filters (e.g., "UTC", "America/New_York")
    pub timezone: String,

    /// Period of the tick that re-evaluates due schedules
    pub tick_interval_secs: u64,

    /// Delay before a continuous schedule fires again
    pub continuous_delay_ms: u64,

    /// Maximum number of registered schedules
    pub max_schedules: usize,

    /// Distinct cron expressions kept parsed
    pub cron_cache_capacity: u64,

    /// JSON file of schedule records imported at start-up
    pub import_path: Option<String>,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn continuous_delay(&self) -> Duration {
        Duration::from_millis(self.continuous_delay_ms)
    }

    pub fn tz(&self) -> SchedulerResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            SchedulerError::ConfigurationError(format!("unknown timezone '{}'", self.timezone))
        })
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.tz()?;
        if self.tick_interval_secs == 0 {
            return Err(SchedulerError::ConfigurationError(
                "tick_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_schedules == 0 {
            return Err(SchedulerError::ConfigurationError(
                "max_schedules must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_string(),
            tick_interval_secs: 60,
            continuous_delay_ms: 5_000,
            max_schedules: 1_000,
            cron_cache_capacity: 512,
            import_path: None,
        }
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.config.timezone = timezone.into();
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn continuous_delay(mut self, delay: Duration) -> Self {
        self.config.continuous_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn max_schedules(mut self, max: usize) -> Self {
        self.config.max_schedules = max;
        self
    }

    pub fn import_path(mut self, path: impl Into<String>) -> Self {
        self.config.import_path = Some(path.into());
        self
    }

    pub fn build(self) -> SchedulerResult<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .timezone("Europe/Berlin")
            .tick_interval(Duration::from_secs(30))
            .max_schedules(10)
            .build()
            .unwrap();
        assert_eq!(config.tz().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.tick_interval_secs, 30);
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let result = SchedulerConfig::builder().timezone("Mars/Olympus").build();
        assert!(matches!(result, Err(SchedulerError::ConfigurationError(_))));
    }
}
