//! Orchestration and resilience engine for scheduled search-engine automation.
//!
//! The crate decides *when* work runs ([`scheduler`], [`cron`]), *whether* it
//! is admitted ([`rate_limiter`], [`circuit_breaker`], [`monitor`]) and *how
//! often* it is retried ([`executor`], [`queue`]). Loading pages and solving
//! anything on them is left to the embedding application, which subscribes to
//! the [`events`] bus.

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod cron;
pub mod error;
pub mod events;
pub mod executor;
pub mod monitor;
pub mod persistence;
pub mod queue;
pub mod rate_limiter;
pub mod scheduler;

pub use error::{AppError, Result};

use prometheus::{Encoder, Registry, TextEncoder};

/// Register every subsystem's metrics with `registry`
pub fn init_metrics(registry: &Registry) -> std::result::Result<(), prometheus::Error> {
    circuit_breaker::init_circuit_breaker_metrics(registry)?;
    rate_limiter::init_rate_limiter_metrics(registry)?;
    queue::init_queue_metrics(registry)?;
    scheduler::init_scheduler_metrics(registry)?;
    monitor::init_monitor_metrics(registry)?;
    Ok(())
}

/// Render `registry` in the Prometheus text exposition format
pub fn gather_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_gather_metrics() {
        let registry = Registry::new();
        init_metrics(&registry).unwrap();

        queue::QUEUE_METRICS.items.with_label_values(&["pending"]).set(3.0);
        let text = gather_metrics(&registry);
        assert!(text.contains("serp_orchestrator_"));

        // registering twice is an error, not a panic
        assert!(init_metrics(&registry).is_err());
    }
}
