//! Two-layer token-bucket admission control.
//!
//! Each protected resource (usually a search engine) has its own bucket,
//! concurrency cap and minimum spacing between requests. A global bucket and
//! concurrency counter are shared by all resources. Checks run in a fixed
//! order and the first failing check names the rejection reason.

mod bucket;
mod config;
mod core;
mod metrics;

pub use bucket::TokenBucket;
pub use config::{LimitConfig, RateLimiterConfig};
pub use core::{
    RateLimitDecision, RateLimiter, RateLimiterStats, RequestPermit, ResourceStatus,
};
pub use metrics::{init_rate_limiter_metrics, RATE_LIMITER_METRICS};

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Result type for rate limiter operations
pub type RateLimiterResult<T> = std::result::Result<T, RateLimiterError>;

/// Why a request was not admitted
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LimitReason {
    /// The resource bucket is empty
    EngineLimit,
    /// The shared bucket is empty
    GlobalLimit,
    /// Resource or global concurrency cap reached
    ConcurrentLimit,
    /// Too soon after the previous request to this resource
    MinDelay,
}

/// Errors that can occur in rate limiter operations
#[derive(Debug, thiserror::Error)]
pub enum RateLimiterError {
    #[error("Rate limit exceeded for '{resource}': {reason}")]
    Exceeded {
        resource: String,
        reason: LimitReason,
        retry_after_ms: u64,
    },

    #[error("Timed out after {waited_ms}ms waiting for rate limit on '{resource}'")]
    Timeout { resource: String, waited_ms: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<RateLimiterError> for AppError {
    fn from(err: RateLimiterError) -> Self {
        match err {
            RateLimiterError::Exceeded {
                resource,
                reason,
                retry_after_ms,
            } => AppError::RateLimitExceeded {
                resource,
                reason: reason.to_string(),
                retry_after_ms,
            },
            RateLimiterError::Timeout { resource, waited_ms } => AppError::Timeout(format!(
                "rate limit wait for '{}' after {}ms",
                resource, waited_ms
            )),
            RateLimiterError::InvalidConfig(msg) => AppError::Configuration(msg),
        }
    }
}
