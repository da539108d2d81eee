//! Prometheus metrics for the keyword queue.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

pub struct QueueMetrics {
    /// Items by status, refreshed whenever statistics are recomputed
    pub items: GaugeVec,

    /// Queue operations by kind
    pub operations: CounterVec,
}

impl QueueMetrics {
    fn new() -> Self {
        Self {
            items: GaugeVec::new(
                Opts::new("queue_items", "Keyword queue items by status")
                    .namespace("serp_orchestrator"),
                &["status"],
            )
            .expect("Failed to create queue_items metric"),

            operations: CounterVec::new(
                Opts::new("queue_operations_total", "Keyword queue operations")
                    .namespace("serp_orchestrator"),
                &["operation"],
            )
            .expect("Failed to create queue_operations_total metric"),
        }
    }
}

lazy_static! {
    pub static ref QUEUE_METRICS: QueueMetrics = QueueMetrics::new();
}

/// Initialize queue metrics with the Prometheus registry
pub fn init_queue_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(QUEUE_METRICS.items.clone()))?;
    registry.register(Box::new(QUEUE_METRICS.operations.clone()))?;

    tracing::info!("Queue metrics initialized");
    Ok(())
}

pub(crate) fn record_operation(operation: &str) {
    QUEUE_METRICS
        .operations
        .with_label_values(&[operation])
        .inc();
}
