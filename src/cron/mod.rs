//! Five-field cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week`. Each field accepts
//! `*`, single values, comma lists, ranges `a-b`, steps `*/n`, `a/n` and
//! `a-b/n`, plus case-insensitive month (`jan`..`dec`) and weekday
//! (`sun`..`sat`) names.
//!
//! Day-of-month and day-of-week follow classic cron semantics: when both are
//! restricted a date matches if *either* matches.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use serp_orchestrator::cron::CronExpressionParser;
//!
//! let parsed = CronExpressionParser::parse("0 9 * * 1-5").unwrap();
//! let sunday = Utc.with_ymd_and_hms(2024, 1, 14, 9, 30, 0).unwrap();
//! let next = parsed.next_after(&sunday).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap());
//! ```

mod cache;
mod describe;
mod expression;
mod field;

pub use cache::CronCache;
pub use expression::{CronExpressionParser, CronValidation, ParsedCron, MAX_SCAN_MINUTES};
pub use field::{CronField, FieldKind};

use crate::error::AppError;

/// Result type for cron operations
pub type CronResult<T> = std::result::Result<T, CronError>;

/// Reasons an expression is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// Wrong number of whitespace-separated fields
    #[error("Cron expression must have 5 fields, found {found}: '{expression}'")]
    FieldCount { expression: String, found: usize },

    /// Numeric value outside the field's domain
    #[error("Value {value} out of range for {field} ({min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Token that is neither a number nor a known name
    #[error("Invalid {field} value '{token}'")]
    InvalidValue { field: &'static str, token: String },

    /// Zero or non-numeric step
    #[error("Invalid step '{step}' in {field}")]
    InvalidStep { field: &'static str, step: String },

    /// Reversed or malformed range
    #[error("Invalid range '{range}' in {field}")]
    InvalidRange { field: &'static str, range: String },
}

impl From<CronError> for AppError {
    fn from(err: CronError) -> Self {
        AppError::Validation(err.to_string())
    }
}
