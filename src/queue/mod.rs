//! Priority keyword work queue.
//!
//! Items are kept in descending priority order (first-come first within a
//! priority). A case-insensitive index rejects duplicate values, and every
//! status change follows `pending -> processing -> completed | pending | failed`.

mod config;
mod core;
pub mod csv;
mod item;
mod metrics;

pub use config::QueueConfig;
pub use core::{BulkAddReport, FailOutcome, ImportSummary, KeywordQueue, QueueSnapshot, QueueStats};
pub use item::{ItemStatus, NewItem, QueuedItem};
pub use metrics::{init_queue_metrics, QUEUE_METRICS};

use crate::error::AppError;
use uuid::Uuid;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Keyword must not be blank")]
    EmptyValue,

    #[error("Duplicate keyword: {0}")]
    Duplicate(String),

    #[error("Queue is full ({max_size} items)")]
    Full { max_size: usize },

    #[error("Queue item not found: {0}")]
    NotFound(Uuid),

    #[error("Item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("CSV error on line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { .. } => AppError::Capacity(err.to_string()),
            QueueError::NotFound(id) => AppError::NotFound(format!("Queue item: {}", id)),
            QueueError::InvalidTransition { .. } => AppError::InvalidStateTransition(err.to_string()),
            QueueError::InvalidConfig(msg) => AppError::Configuration(msg),
            QueueError::EmptyValue | QueueError::Duplicate(_) | QueueError::Csv { .. } => {
                AppError::Validation(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_is_capacity_error() {
        let err: AppError = QueueError::Full { max_size: 10 }.into();
        assert_eq!(err.error_code(), "CAPACITY_ERROR");
    }
}
