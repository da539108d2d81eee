//! Prometheus metrics for the scheduler module

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Scheduler metrics collection
pub struct SchedulerMetrics {
    /// Number of registered schedules by state
    pub schedules_total: GaugeVec,

    /// Number of schedule fires by type
    pub fires_total: CounterVec,

    /// Schedules that stopped after reaching max runs
    pub max_runs_reached_total: CounterVec,

    /// Time spent evaluating one tick
    pub tick_duration: HistogramVec,

    /// Last fire timestamp (Unix timestamp)
    pub last_fire: Gauge,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            schedules_total: GaugeVec::new(
                Opts::new("scheduler_schedules", "Registered schedules by state")
                    .namespace("serp_orchestrator"),
                &["state"],
            )
            .expect("Failed to create scheduler_schedules metric"),

            fires_total: CounterVec::new(
                Opts::new("scheduler_fires_total", "Total number of schedule fires")
                    .namespace("serp_orchestrator"),
                &["schedule_type"],
            )
            .expect("Failed to create scheduler_fires_total metric"),

            max_runs_reached_total: CounterVec::new(
                Opts::new(
                    "scheduler_max_runs_reached_total",
                    "Schedules disabled after reaching max runs",
                )
                .namespace("serp_orchestrator"),
                &["schedule_type"],
            )
            .expect("Failed to create scheduler_max_runs_reached_total metric"),

            tick_duration: HistogramVec::new(
                HistogramOpts::new(
                    "scheduler_tick_duration_seconds",
                    "Time spent evaluating due schedules",
                )
                .namespace("serp_orchestrator")
                .buckets(vec![0.0001, 0.001, 0.01, 0.1, 1.0]),
                &["trigger"],
            )
            .expect("Failed to create scheduler_tick_duration_seconds metric"),

            last_fire: Gauge::with_opts(
                Opts::new(
                    "scheduler_last_fire_timestamp",
                    "Unix timestamp of the last schedule fire",
                )
                .namespace("serp_orchestrator"),
            )
            .expect("Failed to create scheduler_last_fire_timestamp metric"),
        }
    }

    /// Record one schedule fire
    pub fn record_fire(&self, schedule_type: &str, timestamp: i64) {
        self.fires_total.with_label_values(&[schedule_type]).inc();
        self.last_fire.set(timestamp as f64);
    }

    /// Update schedule counts by state
    pub fn update_schedule_counts(&self, enabled: usize, disabled: usize) {
        self.schedules_total
            .with_label_values(&["enabled"])
            .set(enabled as f64);
        self.schedules_total
            .with_label_values(&["disabled"])
            .set(disabled as f64);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global scheduler metrics instance
    pub static ref SCHEDULER_METRICS: SchedulerMetrics = SchedulerMetrics::new();
}

/// Initialize scheduler metrics with the Prometheus registry
pub fn init_scheduler_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(SCHEDULER_METRICS.schedules_total.clone()))?;
    registry.register(Box::new(SCHEDULER_METRICS.fires_total.clone()))?;
    registry.register(Box::new(SCHEDULER_METRICS.max_runs_reached_total.clone()))?;
    registry.register(Box::new(SCHEDULER_METRICS.tick_duration.clone()))?;
    registry.register(Box::new(SCHEDULER_METRICS.last_fire.clone()))?;

    tracing::info!("Scheduler metrics initialized");
    Ok(())
}
