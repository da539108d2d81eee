use crate::queue::QueueError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keyword queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of items held, whatever their status
    pub max_size: usize,

    /// Reject values already present (case-insensitive, trimmed)
    pub deduplicate: bool,

    pub default_priority: i32,

    pub default_max_retries: u32,

    /// Items handled per chunk in bulk adds and imports
    pub bulk_chunk_size: usize,

    /// How long computed statistics are reused
    pub stats_ttl_ms: u64,
}

impl QueueConfig {
    pub fn stats_ttl(&self) -> Duration {
        Duration::from_millis(self.stats_ttl_ms)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_size == 0 {
            return Err(QueueError::InvalidConfig(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.bulk_chunk_size == 0 {
            return Err(QueueError::InvalidConfig(
                "bulk_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            deduplicate: true,
            default_priority: 0,
            default_max_retries: 3,
            bulk_chunk_size: 500,
            stats_ttl_ms: 1_000,
        }
    }
}
