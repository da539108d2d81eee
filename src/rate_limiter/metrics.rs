//! Prometheus metrics for the rate limiter.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

pub struct RateLimiterMetrics {
    /// Admission decisions by resource, outcome and reason
    pub decisions: CounterVec,

    /// Requests currently holding a permit
    pub active_requests: GaugeVec,
}

impl RateLimiterMetrics {
    fn new() -> Self {
        Self {
            decisions: CounterVec::new(
                Opts::new(
                    "rate_limiter_decisions_total",
                    "Admission decisions made by the rate limiter",
                )
                .namespace("serp_orchestrator"),
                &["resource", "outcome", "reason"],
            )
            .expect("Failed to create rate_limiter_decisions_total metric"),

            active_requests: GaugeVec::new(
                Opts::new(
                    "rate_limiter_active_requests",
                    "Requests currently in flight per resource",
                )
                .namespace("serp_orchestrator"),
                &["resource"],
            )
            .expect("Failed to create rate_limiter_active_requests metric"),
        }
    }
}

lazy_static! {
    pub static ref RATE_LIMITER_METRICS: RateLimiterMetrics = RateLimiterMetrics::new();
}

/// Initialize rate limiter metrics with the Prometheus registry
pub fn init_rate_limiter_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(RATE_LIMITER_METRICS.decisions.clone()))?;
    registry.register(Box::new(RATE_LIMITER_METRICS.active_requests.clone()))?;

    tracing::info!("Rate limiter metrics initialized");
    Ok(())
}
