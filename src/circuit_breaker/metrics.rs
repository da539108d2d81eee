//! Prometheus metrics for proxy, search engine and API breakers.
//!
//! Every family carries a `service_type` label so dashboards can compare
//! proxy health against engine health without parsing breaker names.

use crate::circuit_breaker::{CircuitBreakerState, ServiceType, StateTransition};
use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Duration;
use strum::{Display, EnumString};

/// How a call that reached the protected operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Finished after the half-open period that admitted it had ended
    Stale,
}

/// Why a call never reached the protected operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    Open,
    /// Half-open, with every trial slot taken
    HalfOpenFull,
}

pub struct CircuitBreakerMetrics {
    /// 0 = closed, 1 = open, 2 = half-open
    pub state: GaugeVec,
    pub calls: CounterVec,
    pub rejections: CounterVec,
    pub call_duration: HistogramVec,
    pub transitions: CounterVec,
    /// Time from opening to closing again
    pub recovery_duration: HistogramVec,
}

impl CircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            state: GaugeVec::new(
                Opts::new(
                    "circuit_breaker_state",
                    "Breaker state per service (0=closed, 1=open, 2=half-open)",
                )
                .namespace("serp_orchestrator"),
                &["service_type", "service_id"],
            )
            .expect("Failed to create circuit_breaker_state metric"),

            calls: CounterVec::new(
                Opts::new(
                    "circuit_breaker_calls_total",
                    "Calls that reached the protected operation, by outcome",
                )
                .namespace("serp_orchestrator"),
                &["service_type", "service_id", "outcome"],
            )
            .expect("Failed to create circuit_breaker_calls_total metric"),

            rejections: CounterVec::new(
                Opts::new(
                    "circuit_breaker_rejections_total",
                    "Calls turned away without running, by reason",
                )
                .namespace("serp_orchestrator"),
                &["service_type", "service_id", "reason"],
            )
            .expect("Failed to create circuit_breaker_rejections_total metric"),

            // page loads through slow proxies run into tens of seconds
            call_duration: HistogramVec::new(
                HistogramOpts::new(
                    "circuit_breaker_call_duration_seconds",
                    "Duration of calls through breakers per service type",
                )
                .namespace("serp_orchestrator")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 45.0, 90.0]),
                &["service_type"],
            )
            .expect("Failed to create circuit_breaker_call_duration_seconds metric"),

            transitions: CounterVec::new(
                Opts::new(
                    "circuit_breaker_transitions_total",
                    "Breaker state transitions per service type",
                )
                .namespace("serp_orchestrator"),
                &["service_type", "from_state", "to_state"],
            )
            .expect("Failed to create circuit_breaker_transitions_total metric"),

            recovery_duration: HistogramVec::new(
                HistogramOpts::new(
                    "circuit_breaker_recovery_seconds",
                    "Time a service spent between opening and closing again",
                )
                .namespace("serp_orchestrator")
                .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
                &["service_type"],
            )
            .expect("Failed to create circuit_breaker_recovery_seconds metric"),
        }
    }

    pub fn record_call(&self, service_type: ServiceType, service_id: &str, outcome: CallOutcome) {
        self.calls
            .with_label_values(&[&service_type.to_string(), service_id, &outcome.to_string()])
            .inc();
    }

    pub fn observe_duration(&self, service_type: ServiceType, duration: Duration) {
        self.call_duration
            .with_label_values(&[&service_type.to_string()])
            .observe(duration.as_secs_f64());
    }

    pub fn record_rejection(&self, service_type: ServiceType, service_id: &str, reason: RejectReason) {
        self.rejections
            .with_label_values(&[&service_type.to_string(), service_id, &reason.to_string()])
            .inc();
    }

    pub fn set_state(&self, service_type: ServiceType, service_id: &str, state: CircuitBreakerState) {
        self.state
            .with_label_values(&[&service_type.to_string(), service_id])
            .set(state.to_metric_value());
    }

    pub fn record_transition(
        &self,
        service_type: ServiceType,
        service_id: &str,
        transition: &StateTransition,
    ) {
        self.set_state(service_type, service_id, transition.to);
        self.transitions
            .with_label_values(&[
                &service_type.to_string(),
                &transition.from.to_string(),
                &transition.to.to_string(),
            ])
            .inc();
    }

    pub fn record_recovery(&self, service_type: ServiceType, open_for: Duration) {
        self.recovery_duration
            .with_label_values(&[&service_type.to_string()])
            .observe(open_for.as_secs_f64());
    }
}

lazy_static! {
    pub static ref CIRCUIT_BREAKER_METRICS: CircuitBreakerMetrics = CircuitBreakerMetrics::new();
}

/// Register breaker metrics with the Prometheus registry
pub fn init_circuit_breaker_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    let metrics = &*CIRCUIT_BREAKER_METRICS;
    registry.register(Box::new(metrics.state.clone()))?;
    registry.register(Box::new(metrics.calls.clone()))?;
    registry.register(Box::new(metrics.rejections.clone()))?;
    registry.register(Box::new(metrics.call_duration.clone()))?;
    registry.register(Box::new(metrics.transitions.clone()))?;
    registry.register(Box::new(metrics.recovery_duration.clone()))?;

    tracing::info!("Circuit breaker metrics initialized");
    Ok(())
}
