//! Core circuit breaker implementation with async support.

use crate::circuit_breaker::metrics::{CallOutcome, RejectReason, CIRCUIT_BREAKER_METRICS};
use crate::circuit_breaker::{
    BreakerMetrics, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerResult,
    CircuitBreakerSnapshot, CircuitBreakerState, ServiceType, StateData, StateTransition,
};
use crate::clock::{SharedClock, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Callback invoked after every state transition, outside the state lock
pub type TransitionListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

enum CallFailure {
    Error(String),
    TimedOut,
}

/// A thread-safe, async circuit breaker
#[derive(Clone)]
pub struct CircuitBreaker {
    /// Registry key, `<service_type>:<service_id>`
    name: String,
    service_type: ServiceType,
    service_id: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<StateData>>,
    clock: SharedClock,
    listener: Option<TransitionListener>,
}

impl CircuitBreaker {
    /// Create a standalone breaker on the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::for_service(ServiceType::Other, name, config, SystemClock::shared())
    }

    /// Create a breaker for a specific protected service
    pub fn for_service(
        service_type: ServiceType,
        service_id: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        let service_id = service_id.into();
        let name = format!("{}:{}", service_type, service_id);
        info!(
            name = %name,
            config = ?config,
            "Creating new circuit breaker"
        );

        let state = StateData::new(config.sliding_window(), clock.now());
        Self {
            name,
            service_type,
            service_id,
            config,
            state: Arc::new(RwLock::new(state)),
            clock,
            listener: None,
        }
    }

    /// Attach a transition listener
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registry key of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Get the current state
    pub fn state(&self) -> CircuitBreakerState {
        self.state.read().state
    }

    /// Get the current configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call would be admitted right now.
    ///
    /// Moves an open circuit to half-open once the reset timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let (admit, transition) = {
            let mut state = self.state.write();
            let transition = self.maybe_half_open(&mut state, now);
            let admit = match state.state {
                CircuitBreakerState::Closed => true,
                CircuitBreakerState::Open => false,
                CircuitBreakerState::HalfOpen => {
                    state.half_open_in_flight < self.config.half_open_max_requests
                }
            };
            (admit, transition)
        };
        self.emit_all(transition);
        admit
    }

    /// Execute an async operation protected by the circuit breaker
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> CircuitBreakerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let trial = self.acquire()?;
        let mut slot = TrialSlot {
            breaker: self,
            active: trial,
        };

        let start = Instant::now();
        let outcome = match self.config.call_timeout() {
            Some(limit) => {
                tokio::select! {
                    result = f() => result.map_err(|e| CallFailure::Error(e.to_string())),
                    _ = self.clock.sleep(limit) => Err(CallFailure::TimedOut),
                }
            }
            None => f().await.map_err(|e| CallFailure::Error(e.to_string())),
        };
        let duration = start.elapsed();
        slot.active = None;

        CIRCUIT_BREAKER_METRICS.observe_duration(self.service_type, duration);

        let duration_ms = duration.as_millis() as u64;
        match outcome {
            Ok(value) => {
                self.on_success(duration_ms, trial);
                Ok(value)
            }
            Err(CallFailure::TimedOut) => {
                self.on_failure(duration_ms, trial, true, "call timed out");
                Err(CircuitBreakerError::Timeout)
            }
            Err(CallFailure::Error(message)) => {
                self.on_failure(duration_ms, trial, false, &message);
                Err(CircuitBreakerError::OperationFailed(message))
            }
        }
    }

    /// Execute an async operation, running `fallback` instead when the circuit is open
    pub async fn execute_with_fallback<F, Fut, FB, FutB, T, E>(
        &self,
        f: F,
        fallback: FB,
    ) -> CircuitBreakerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = T>,
        E: fmt::Display,
    {
        match self.execute(f).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open { .. }) => {
                debug!(
                    name = %self.name,
                    "Circuit breaker open, using fallback"
                );
                Ok(fallback().await)
            }
            Err(err) => Err(err),
        }
    }

    /// Report a success observed outside [`CircuitBreaker::execute`]
    pub fn record_success(&self) {
        self.on_success(0, None);
    }

    /// Report a failure observed outside [`CircuitBreaker::execute`]
    pub fn record_failure(&self, error: &str) {
        self.on_failure(0, None, false, error);
    }

    /// Admission check. A half-open trial slot comes back tagged with the
    /// transition generation it was granted in.
    fn acquire(&self) -> CircuitBreakerResult<Option<u64>> {
        let now = self.clock.now();
        let (result, transition) = {
            let mut state = self.state.write();
            let transition = self.maybe_half_open(&mut state, now);

            let result = match state.state {
                CircuitBreakerState::Closed => Ok(None),
                CircuitBreakerState::Open => {
                    state.record_rejection();
                    Err(RejectReason::Open)
                }
                CircuitBreakerState::HalfOpen => {
                    if state.half_open_in_flight >= self.config.half_open_max_requests {
                        state.record_rejection();
                        Err(RejectReason::HalfOpenFull)
                    } else {
                        state.half_open_in_flight += 1;
                        Ok(Some(state.transition_count))
                    }
                }
            };
            (result, transition)
        };

        self.emit_all(transition);
        result.map_err(|reason| {
            CIRCUIT_BREAKER_METRICS.record_rejection(self.service_type, &self.service_id, reason);
            debug!(name = %self.name, reason = %reason, "Call rejected");
            self.open_error()
        })
    }

    fn maybe_half_open(
        &self,
        state: &mut StateData,
        now: DateTime<Utc>,
    ) -> Option<StateTransition> {
        state
            .should_attempt_reset(self.config.reset_timeout(), now)
            .then(|| state.transition_to(CircuitBreakerState::HalfOpen, now))
    }

    fn release_trial(&self, generation: u64) {
        let mut state = self.state.write();
        if state.owns_trial(generation) {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    /// A trial slot granted before the last transition only counts towards totals
    fn settle_stale_trial(
        &self,
        state: &mut StateData,
        trial: Option<u64>,
        outcome: SettledCall,
    ) -> bool {
        let Some(generation) = trial else {
            return false;
        };
        if state.owns_trial(generation) {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            return false;
        }
        state.record_stale(outcome.duration_ms, outcome.success, outcome.timed_out);
        debug!(
            name = %self.name,
            trial_generation = generation,
            current_generation = state.transition_count,
            success = outcome.success,
            "Ignoring result from an earlier half-open period"
        );
        true
    }

    /// Handle successful operation
    fn on_success(&self, duration_ms: u64, trial: Option<u64>) {
        let now = self.clock.now();
        let (outcome, transition) = 'settle: {
            let mut state = self.state.write();
            let outcome = SettledCall {
                duration_ms,
                success: true,
                timed_out: false,
            };
            if self.settle_stale_trial(&mut state, trial, outcome) {
                break 'settle (CallOutcome::Stale, None);
            }
            state.record_success(now, duration_ms);

            debug!(
                name = %self.name,
                current_state = %state.state,
                consecutive_successes = state.metrics.consecutive_successes,
                "Operation succeeded"
            );

            let closing = state.state == CircuitBreakerState::HalfOpen
                && state.metrics.consecutive_successes >= self.config.success_threshold;
            if !closing {
                break 'settle (CallOutcome::Success, None);
            }
            if let Some(open_for) = state.opened_at.and_then(|at| (now - at).to_std().ok()) {
                CIRCUIT_BREAKER_METRICS.record_recovery(self.service_type, open_for);
            }
            (
                CallOutcome::Success,
                Some(state.transition_to(CircuitBreakerState::Closed, now)),
            )
        };

        CIRCUIT_BREAKER_METRICS.record_call(self.service_type, &self.service_id, outcome);
        self.emit_all(transition);
    }

    /// Handle failed operation
    fn on_failure(&self, duration_ms: u64, trial: Option<u64>, timed_out: bool, error: &str) {
        let now = self.clock.now();
        let (outcome, transition) = 'settle: {
            let mut state = self.state.write();
            let outcome = SettledCall {
                duration_ms,
                success: false,
                timed_out,
            };
            if self.settle_stale_trial(&mut state, trial, outcome) {
                break 'settle (CallOutcome::Stale, None);
            }
            state.record_failure(now, duration_ms, timed_out);

            warn!(
                name = %self.name,
                current_state = %state.state,
                consecutive_failures = state.metrics.consecutive_failures,
                error = %error,
                "Operation failed"
            );

            let outcome = if timed_out {
                CallOutcome::Timeout
            } else {
                CallOutcome::Failure
            };
            let current = state.state;
            let transition = match current {
                CircuitBreakerState::Closed if state.should_trip(&self.config, now) => {
                    Some(state.transition_to(CircuitBreakerState::Open, now))
                }
                // Any failure in half-open state reopens the circuit
                CircuitBreakerState::HalfOpen => {
                    Some(state.transition_to(CircuitBreakerState::Open, now))
                }
                _ => None,
            };
            (outcome, transition)
        };

        CIRCUIT_BREAKER_METRICS.record_call(self.service_type, &self.service_id, outcome);
        self.emit_all(transition);
    }

    fn open_error(&self) -> CircuitBreakerError {
        CircuitBreakerError::Open {
            service_type: self.service_type,
            service_id: self.service_id.clone(),
        }
    }

    fn emit_all(&self, transition: Option<StateTransition>) {
        if let Some(transition) = transition {
            self.log_transition(&transition);
            if let Some(listener) = &self.listener {
                listener(&transition);
            }
        }
    }

    /// Log and record state transition
    fn log_transition(&self, transition: &StateTransition) {
        info!(
            name = %self.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "Circuit breaker state transition"
        );

        CIRCUIT_BREAKER_METRICS.record_transition(self.service_type, &self.service_id, transition);
    }

    /// Get statistics for this circuit breaker
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.clock.now();
        let mut state = self.state.write();
        state.window.prune(now);
        CircuitBreakerStats {
            name: self.name.clone(),
            service_type: self.service_type,
            service_id: self.service_id.clone(),
            state: state.state,
            window_requests: state.window.total(),
            window_failures: state.window.failures(),
            failure_rate: state.window.failure_rate(),
            average_duration_ms: state.metrics.average_duration_ms(),
            metrics: state.metrics.clone(),
            transition_count: state.transition_count,
            last_state_change: state.last_state_change,
            opened_at: state.opened_at,
            next_attempt_at: state.next_attempt_at(self.config.reset_timeout()),
        }
    }

    /// Manually reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut state = self.state.write();
            (state.state != CircuitBreakerState::Closed)
                .then(|| state.transition_to(CircuitBreakerState::Closed, now))
        };
        self.emit_all(transition);
    }

    /// Force the circuit breaker to open state
    pub fn force_open(&self) {
        let now = self.clock.now();
        let transition = {
            let mut state = self.state.write();
            (state.state != CircuitBreakerState::Open)
                .then(|| state.transition_to(CircuitBreakerState::Open, now))
        };
        self.emit_all(transition);
    }

    /// Capture persisted state
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.read();
        CircuitBreakerSnapshot {
            key: self.name.clone(),
            service_type: self.service_type,
            service_id: self.service_id.clone(),
            config: self.config.clone(),
            state: state.state,
            metrics: state.metrics.clone(),
            opened_at: state.opened_at,
            last_state_change: state.last_state_change,
            transition_count: state.transition_count,
        }
    }

    /// Restore state and counters from a snapshot.
    ///
    /// The sliding window is not persisted and starts empty.
    pub fn restore(&self, snapshot: &CircuitBreakerSnapshot) {
        let mut state = self.state.write();
        state.state = snapshot.state;
        state.metrics = snapshot.metrics.clone();
        state.opened_at = match snapshot.state {
            CircuitBreakerState::Open => snapshot.opened_at.or(Some(snapshot.last_state_change)),
            _ => None,
        };
        state.last_state_change = snapshot.last_state_change;
        state.transition_count = snapshot.transition_count;
        state.half_open_in_flight = 0;
        state.window.clear();

        CIRCUIT_BREAKER_METRICS.set_state(self.service_type, &self.service_id, state.state);
        debug!(name = %self.name, state = %state.state, "Circuit breaker restored");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Returns the half-open slot if the call future is dropped before completing
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    active: Option<u64>,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.active {
            self.breaker.release_trial(generation);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SettledCall {
    duration_ms: u64,
    success: bool,
    timed_out: bool,
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub service_type: ServiceType,
    pub service_id: String,
    pub state: CircuitBreakerState,
    pub window_requests: u32,
    pub window_failures: u32,
    /// Failure percentage inside the sliding window
    pub failure_rate: f64,
    pub average_duration_ms: f64,
    pub metrics: BreakerMetrics,
    pub transition_count: u64,
    pub last_state_change: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    fn breaker(config: CircuitBreakerConfig, clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::for_service(ServiceType::Proxy, "p1", config, clock.clone())
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(|| async { Err::<i32, _>("upstream refused") })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) -> CircuitBreakerResult<i32> {
        breaker.execute(|| async { Ok::<_, String>(42) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_state() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.name(), "other:test");
    }

    #[tokio::test]
    async fn test_successful_call() {
        let clock = clock();
        let breaker = breaker(CircuitBreakerConfig::default(), &clock);
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
        assert_eq!(breaker.stats().metrics.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_failed_call_reports_message() {
        let clock = clock();
        let breaker = breaker(CircuitBreakerConfig::default(), &clock);
        let result = breaker
            .execute(|| async { Err::<i32, _>("connection reset") })
            .await;
        match result {
            Err(CircuitBreakerError::OperationFailed(msg)) => assert_eq!(msg, "connection reset"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(breaker.stats().metrics.rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_call_from_earlier_half_open_period_is_not_counted() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(3)
            .half_open_max_requests(1)
            .reset_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);
        fail(&breaker).await;
        clock.advance(Duration::from_secs(30));

        let (release_first, first_gate) = tokio::sync::oneshot::channel::<()>();
        let first = breaker.execute(|| async move {
            let _ = first_gate.await;
            Ok::<_, String>(1)
        });
        tokio::pin!(first);
        assert!(futures::poll!(&mut first).is_pending());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        // reopen and start a new half-open period while the first call runs
        breaker.record_failure("reset by peer");
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        clock.advance(Duration::from_secs(30));

        let (release_second, second_gate) = tokio::sync::oneshot::channel::<()>();
        let second = breaker.execute(|| async move {
            let _ = second_gate.await;
            Ok::<_, String>(2)
        });
        tokio::pin!(second);
        assert!(futures::poll!(&mut second).is_pending());
        assert!(!breaker.can_execute());

        release_first.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 1);
        assert!(!breaker.can_execute());
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitBreakerState::HalfOpen);
        assert_eq!(stats.metrics.consecutive_successes, 0);
        assert_eq!(stats.metrics.successful_requests, 1);

        release_second.send(()).unwrap();
        assert_eq!(second.await.unwrap(), 2);
        assert_eq!(breaker.stats().metrics.consecutive_successes, 1);
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn test_stale_trial_failure_does_not_reopen() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(1)
            .half_open_max_requests(2)
            .reset_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);
        fail(&breaker).await;
        clock.advance(Duration::from_secs(30));

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let slow = breaker.execute(|| async move {
            let _ = gate.await;
            Err::<i32, _>("late refusal")
        });
        tokio::pin!(slow);
        assert!(futures::poll!(&mut slow).is_pending());

        // a second trial call closes the circuit first
        assert_eq!(succeed(&breaker).await.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        release.send(()).unwrap();
        assert!(slow.await.is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.stats().metrics.failed_requests, 2);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_close() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .success_threshold(2)
            .reset_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);

        fail(&breaker).await;
        fail(&breaker).await;
        assert!(!breaker.can_execute());

        clock.advance(Duration::from_secs(30));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);

        fail(&breaker).await;
        clock.advance(Duration::from_secs(10));
        fail(&breaker).await;

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitBreakerState::Open);
        assert_eq!(stats.metrics.trip_count, 2);
        assert_eq!(stats.opened_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_fallback_on_open_circuit() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);

        fail(&breaker).await;
        fail(&breaker).await;

        let result = breaker
            .execute_with_fallback(|| async { Ok::<i32, String>(42) }, || async { 99 })
            .await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_call_timeout_counts_as_failure() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .call_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let breaker = breaker(config, &clock);

        let advancer = {
            let clock = clock.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                clock.advance(Duration::from_millis(50));
            })
        };

        let result = breaker
            .execute(|| async {
                std::future::pending::<()>().await;
                Ok::<i32, String>(1)
            })
            .await;
        advancer.await.unwrap();

        assert!(matches!(result, Err(CircuitBreakerError::Timeout)));
        assert_eq!(breaker.stats().metrics.timeouts, 1);
    }

    #[tokio::test]
    async fn test_listener_receives_transitions() {
        let clock = clock();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .build()
            .unwrap();
        let breaker = breaker(config, &clock).with_listener(Arc::new(move |t| {
            assert_eq!(t.from, CircuitBreakerState::Closed);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        fail(&breaker).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_reset_and_force_open() {
        let clock = clock();
        let breaker = breaker(CircuitBreakerConfig::default(), &clock);

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.stats().transition_count, 2);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let clock = clock();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .build()
            .unwrap();
        let original = breaker(config.clone(), &clock);
        fail(&original).await;

        let snapshot = original.snapshot();
        let restored = breaker(config, &clock);
        restored.restore(&snapshot);

        assert_eq!(restored.state(), CircuitBreakerState::Open);
        assert_eq!(restored.stats().metrics.failed_requests, 1);
        assert_eq!(restored.stats().opened_at, original.stats().opened_at);
    }
}
