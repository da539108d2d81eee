//! Prometheus metrics for the resource monitor.

use lazy_static::lazy_static;
use prometheus::{Gauge, GaugeVec, IntCounter, Opts, Registry};

pub struct MonitorMetrics {
    /// Latest sampled usage by resource
    pub usage_percent: GaugeVec,

    /// Current adaptive poll interval
    pub poll_interval_seconds: Gauge,

    /// Samples that failed to read system counters
    pub probe_errors: IntCounter,
}

impl MonitorMetrics {
    fn new() -> Self {
        Self {
            usage_percent: GaugeVec::new(
                Opts::new("monitor_usage_percent", "Latest sampled resource usage")
                    .namespace("serp_orchestrator"),
                &["resource"],
            )
            .expect("Failed to create monitor_usage_percent metric"),

            poll_interval_seconds: Gauge::with_opts(
                Opts::new(
                    "monitor_poll_interval_seconds",
                    "Current resource monitor poll interval",
                )
                .namespace("serp_orchestrator"),
            )
            .expect("Failed to create monitor_poll_interval_seconds metric"),

            probe_errors: IntCounter::with_opts(
                Opts::new("monitor_probe_errors_total", "Failed resource samples")
                    .namespace("serp_orchestrator"),
            )
            .expect("Failed to create monitor_probe_errors_total metric"),
        }
    }
}

lazy_static! {
    pub static ref MONITOR_METRICS: MonitorMetrics = MonitorMetrics::new();
}

/// Initialize monitor metrics with the Prometheus registry
pub fn init_monitor_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(MONITOR_METRICS.usage_percent.clone()))?;
    registry.register(Box::new(MONITOR_METRICS.poll_interval_seconds.clone()))?;
    registry.register(Box::new(MONITOR_METRICS.probe_errors.clone()))?;

    tracing::info!("Monitor metrics initialized");
    Ok(())
}
