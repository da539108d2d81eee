//! Circuit breaker state machine implementation.
//!
//! This module handles state transitions, the sliding failure window and
//! the counters exported in stats and snapshots.

use crate::circuit_breaker::{CircuitBreakerConfig, ServiceType};
use crate::clock::to_chrono;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// The current state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed - requests are allowed through, failures are counted
    Closed,
    /// Circuit is open - all requests are rejected, waiting for timeout
    Open,
    /// Circuit is half-open - testing recovery with limited requests
    HalfOpen,
}

impl CircuitBreakerState {
    /// Convert state to numeric value for Prometheus gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            CircuitBreakerState::Closed => 0.0,
            CircuitBreakerState::Open => 1.0,
            CircuitBreakerState::HalfOpen => 2.0,
        }
    }

    /// Check if requests should be allowed in this state
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen)
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Represents a state transition in the circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CircuitBreakerState,
    /// New state
    pub to: CircuitBreakerState,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition
    pub reason: String,
}

impl StateTransition {
    pub fn new(
        from: CircuitBreakerState,
        to: CircuitBreakerState,
        reason: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            from,
            to,
            timestamp,
            reason,
        }
    }
}

/// Outcomes recorded over a trailing time span
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: chrono::Duration,
    samples: VecDeque<(DateTime<Utc>, bool)>,
}

impl SlidingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span: to_chrono(span),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>, success: bool) {
        self.samples.push_back((at, success));
        self.prune(at);
    }

    /// Drop samples older than the span
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        while let Some((at, _)) = self.samples.front() {
            if *at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn total(&self) -> u32 {
        self.samples.len() as u32
    }

    pub fn failures(&self) -> u32 {
        self.samples.iter().filter(|(_, ok)| !ok).count() as u32
    }

    /// Failure percentage (0-100); zero when empty
    pub fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.failures() as f64 / self.samples.len() as f64 * 100.0
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Lifetime counters; they only ever grow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub timeouts: u64,
    pub trip_count: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_duration_ms: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl BreakerMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        let completed = self.successful_requests + self.failed_requests;
        if completed == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / completed as f64
        }
    }
}

/// Internal state data for the circuit breaker
#[derive(Debug, Clone)]
pub struct StateData {
    /// Current state
    pub state: CircuitBreakerState,
    pub metrics: BreakerMetrics,
    pub window: SlidingWindow,
    /// When the state was last changed
    pub last_state_change: DateTime<Utc>,
    /// When the circuit was opened (if in Open state)
    pub opened_at: Option<DateTime<Utc>>,
    /// Total number of state transitions
    pub transition_count: u64,
    /// Probes currently running in half-open state
    pub half_open_in_flight: u32,
}

impl StateData {
    /// Create new state data in Closed state
    pub fn new(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            metrics: BreakerMetrics::default(),
            window: SlidingWindow::new(window),
            last_state_change: now,
            opened_at: None,
            transition_count: 0,
            half_open_in_flight: 0,
        }
    }

    /// Record a successful request
    pub fn record_success(&mut self, now: DateTime<Utc>, duration_ms: u64) {
        self.metrics.total_requests += 1;
        self.metrics.successful_requests += 1;
        self.metrics.total_duration_ms += duration_ms;
        self.metrics.consecutive_failures = 0;
        self.metrics.consecutive_successes += 1;
        self.metrics.last_success_time = Some(now);
        self.window.record(now, true);
    }

    /// Record a failed request
    pub fn record_failure(&mut self, now: DateTime<Utc>, duration_ms: u64, timed_out: bool) {
        self.metrics.total_requests += 1;
        self.metrics.failed_requests += 1;
        self.metrics.total_duration_ms += duration_ms;
        if timed_out {
            self.metrics.timeouts += 1;
        }
        self.metrics.consecutive_successes = 0;
        self.metrics.consecutive_failures += 1;
        self.metrics.last_failure_time = Some(now);
        self.window.record(now, false);
    }

    /// Count a call whose outcome no longer bears on the current state
    pub fn record_stale(&mut self, duration_ms: u64, success: bool, timed_out: bool) {
        self.metrics.total_requests += 1;
        self.metrics.total_duration_ms += duration_ms;
        if success {
            self.metrics.successful_requests += 1;
        } else {
            self.metrics.failed_requests += 1;
        }
        if timed_out {
            self.metrics.timeouts += 1;
        }
    }

    /// Whether a trial slot granted at `generation` belongs to the current half-open period
    pub fn owns_trial(&self, generation: u64) -> bool {
        self.state == CircuitBreakerState::HalfOpen && self.transition_count == generation
    }

    pub fn record_rejection(&mut self) {
        self.metrics.rejected_requests += 1;
    }

    /// Whether the window warrants opening the circuit
    pub fn should_trip(&mut self, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> bool {
        self.window.prune(now);
        if self.window.failures() >= config.failure_threshold {
            return true;
        }
        self.window.total() >= config.minimum_request_threshold
            && self.window.failure_rate() >= config.failure_rate_threshold
    }

    /// Transition to a new state
    pub fn transition_to(
        &mut self,
        new_state: CircuitBreakerState,
        now: DateTime<Utc>,
    ) -> StateTransition {
        let transition =
            StateTransition::new(self.state, new_state, self.transition_reason(new_state), now);

        self.state = new_state;
        self.last_state_change = now;
        self.transition_count += 1;
        self.half_open_in_flight = 0;

        match new_state {
            CircuitBreakerState::Open => {
                self.opened_at = Some(now);
                self.metrics.trip_count += 1;
            }
            CircuitBreakerState::HalfOpen => {
                self.metrics.consecutive_successes = 0;
            }
            CircuitBreakerState::Closed => {
                self.opened_at = None;
                self.metrics.consecutive_failures = 0;
                self.metrics.consecutive_successes = 0;
                self.window.clear();
            }
        }

        transition
    }

    /// Get a human-readable reason for the state transition
    fn transition_reason(&self, new_state: CircuitBreakerState) -> String {
        match (self.state, new_state) {
            (CircuitBreakerState::Closed, CircuitBreakerState::Open) => format!(
                "Failure threshold exceeded ({} failures in window, {:.1}% failure rate)",
                self.window.failures(),
                self.window.failure_rate()
            ),
            (CircuitBreakerState::Open, CircuitBreakerState::HalfOpen) => {
                "Timeout period elapsed, testing recovery".to_string()
            }
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Closed) => format!(
                "Recovery successful ({} consecutive successes)",
                self.metrics.consecutive_successes
            ),
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Open) => {
                "Recovery test failed".to_string()
            }
            _ => format!("Transitioned from {} to {}", self.state, new_state),
        }
    }

    /// Check if enough time has passed to transition from Open to HalfOpen
    pub fn should_attempt_reset(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        if self.state != CircuitBreakerState::Open {
            return false;
        }

        match self.opened_at {
            Some(opened_at) => now.signed_duration_since(opened_at) >= to_chrono(timeout),
            None => false,
        }
    }

    /// When an open circuit will next admit a probe
    pub fn next_attempt_at(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        match (self.state, self.opened_at) {
            (CircuitBreakerState::Open, Some(opened_at)) => Some(opened_at + to_chrono(timeout)),
            _ => None,
        }
    }
}

/// Serializable breaker state for persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub key: String,
    pub service_type: ServiceType,
    pub service_id: String,
    pub config: CircuitBreakerConfig,
    pub state: CircuitBreakerState,
    pub metrics: BreakerMetrics,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
    pub transition_count: u64,
}
