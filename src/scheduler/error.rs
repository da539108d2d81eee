//! Error types for the scheduler module

use crate::cron::CronError;
use crate::error::AppError;
use crate::scheduler::ScheduleId;

/// Result type for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Schedule not found
    #[error("Schedule not found: {0}")]
    NotFound(ScheduleId),

    /// Schedule with this id is already registered
    #[error("Schedule already exists: {0}")]
    AlreadyExists(ScheduleId),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),

    /// Schedule fields are inconsistent with its type
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Imported record could not be read
    #[error("Invalid schedule record: {0}")]
    InvalidRecord(String),

    /// Too many schedules registered
    #[error("Schedule limit of {max} reached")]
    Capacity { max: usize },

    /// Operation needs an enabled schedule
    #[error("Schedule is disabled: {0}")]
    Disabled(ScheduleId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => AppError::NotFound(format!("schedule {}", id)),
            SchedulerError::Capacity { .. } => AppError::Capacity(err.to_string()),
            SchedulerError::Disabled(_) => AppError::InvalidStateTransition(err.to_string()),
            SchedulerError::ConfigurationError(msg) => AppError::Configuration(msg),
            SchedulerError::InvalidCron(_)
            | SchedulerError::InvalidSchedule(_)
            | SchedulerError::InvalidRecord(_)
            | SchedulerError::AlreadyExists(_) => AppError::Validation(err.to_string()),
        }
    }
}
