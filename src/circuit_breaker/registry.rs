//! Registry managing one circuit breaker per protected service.

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistryConfig, CircuitBreakerSnapshot,
    CircuitBreakerState, CircuitBreakerStats, ServiceType, StateTransition,
};
use crate::clock::{SharedClock, SystemClock};
use crate::events::{CircuitEvent, EngineEvent, EventBus};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of all circuit breakers, keyed by `<service_type>:<service_id>`
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerRegistryConfig,
    clock: SharedClock,
    events: EventBus,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerRegistryConfig, clock: SharedClock, events: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
            events,
        }
    }

    pub fn key(service_type: ServiceType, service_id: &str) -> String {
        format!("{}:{}", service_type, service_id)
    }

    /// Get or lazily create the breaker for a service using the type preset
    pub fn get_breaker(&self, service_type: ServiceType, service_id: &str) -> Arc<CircuitBreaker> {
        let config = self.config.for_service_type(service_type);
        self.get_or_create(service_type, service_id, config)
    }

    pub fn get_proxy_breaker(&self, proxy_id: &str) -> Arc<CircuitBreaker> {
        self.get_breaker(ServiceType::Proxy, proxy_id)
    }

    pub fn get_search_engine_breaker(&self, engine: &str) -> Arc<CircuitBreaker> {
        self.get_breaker(ServiceType::SearchEngine, engine)
    }

    /// Get or create a breaker with an explicit config; an existing breaker keeps its config
    pub fn get_or_create(
        &self,
        service_type: ServiceType,
        service_id: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = Self::key(service_type, service_id);

        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                info!(name = %key, "Creating new circuit breaker in registry");
                let breaker = CircuitBreaker::for_service(
                    service_type,
                    service_id,
                    config,
                    self.clock.clone(),
                );
                Arc::new(self.attach_listener(breaker))
            })
            .clone()
    }

    fn attach_listener(&self, breaker: CircuitBreaker) -> CircuitBreaker {
        let events = self.events.clone();
        let key = breaker.name().to_string();
        let service_type = breaker.service_type();
        let service_id = breaker.service_id().to_string();

        breaker.with_listener(Arc::new(move |transition: &StateTransition| {
            let payload = CircuitEvent {
                key: key.clone(),
                service_type,
                service_id: service_id.clone(),
                from: transition.from,
                to: transition.to,
                reason: transition.reason.clone(),
                timestamp: transition.timestamp,
            };
            events.publish(EngineEvent::CircuitStateChange(payload.clone()));
            events.publish(match transition.to {
                CircuitBreakerState::Open => EngineEvent::CircuitOpen(payload),
                CircuitBreakerState::Closed => EngineEvent::CircuitClose(payload),
                CircuitBreakerState::HalfOpen => EngineEvent::CircuitHalfOpen(payload),
            });
        }))
    }

    /// Get an existing circuit breaker by key
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|entry| entry.value().clone())
    }

    /// Register a pre-configured circuit breaker, replacing any with the same key
    pub fn register(&self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let name = breaker.name().to_string();
        let arc_breaker = Arc::new(self.attach_listener(breaker));

        self.breakers.insert(name.clone(), arc_breaker.clone());
        info!(name = %name, "Registered circuit breaker");

        arc_breaker
    }

    /// Remove a circuit breaker from the registry
    pub fn remove(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        debug!(name = %key, "Removing circuit breaker from registry");
        self.breakers.remove(key).map(|(_, breaker)| breaker)
    }

    /// Get all circuit breaker keys
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Get statistics for all circuit breakers
    pub fn get_all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> = self
            .breakers
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset all circuit breakers to closed state
    pub fn reset_all(&self) {
        info!("Resetting all circuit breakers");
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Get count of circuit breakers in each state
    pub fn get_state_counts(&self) -> StateCount {
        let mut counts = StateCount::default();

        for entry in self.breakers.iter() {
            counts.add(entry.value().state());
        }

        counts
    }

    /// Check if any circuit breakers are open
    pub fn has_open_circuits(&self) -> bool {
        self.breakers
            .iter()
            .any(|entry| entry.value().state() == CircuitBreakerState::Open)
    }

    /// Totals across every breaker, grouped by service type
    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        let mut aggregate = AggregateMetrics::default();

        for entry in self.breakers.iter() {
            let stats = entry.value().stats();
            aggregate.total_breakers += 1;
            aggregate.by_state.add(stats.state);
            aggregate.total_requests += stats.metrics.total_requests;
            aggregate.total_failures += stats.metrics.failed_requests;
            aggregate.total_rejections += stats.metrics.rejected_requests;

            let summary = aggregate
                .by_service_type
                .entry(stats.service_type.to_string())
                .or_default();
            summary.breakers += 1;
            summary.requests += stats.metrics.total_requests;
            summary.failures += stats.metrics.failed_requests;
            if stats.state == CircuitBreakerState::Open {
                summary.open += 1;
            }
        }

        if aggregate.total_requests > 0 {
            aggregate.overall_failure_rate =
                aggregate.total_failures as f64 / aggregate.total_requests as f64 * 100.0;
        }
        aggregate
    }

    /// Get health check information
    pub fn health_check(&self) -> RegistryHealth {
        let state_counts = self.get_state_counts();
        let total = state_counts.total();

        RegistryHealth {
            total_breakers: total,
            closed: state_counts.closed,
            open: state_counts.open,
            half_open: state_counts.half_open,
            healthy: state_counts.open == 0,
        }
    }

    /// Snapshot of every breaker, sorted by key
    pub fn export_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<CircuitBreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Recreate breakers from snapshots; returns how many were restored
    pub fn import_snapshots(&self, snapshots: &[CircuitBreakerSnapshot]) -> usize {
        for snapshot in snapshots {
            let breaker = self.get_or_create(
                snapshot.service_type,
                &snapshot.service_id,
                snapshot.config.clone(),
            );
            breaker.restore(snapshot);
        }
        info!(count = snapshots.len(), "Imported circuit breaker snapshots");
        snapshots.len()
    }

    /// Clear all circuit breakers from the registry
    pub fn clear(&self) {
        info!("Clearing all circuit breakers from registry");
        self.breakers.clear();
    }

    /// Get the total number of circuit breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(
            CircuitBreakerRegistryConfig::default(),
            SystemClock::shared(),
            EventBus::default(),
        )
    }
}

/// Count of circuit breakers in each state
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateCount {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

impl StateCount {
    fn add(&mut self, state: CircuitBreakerState) {
        match state {
            CircuitBreakerState::Closed => self.closed += 1,
            CircuitBreakerState::Open => self.open += 1,
            CircuitBreakerState::HalfOpen => self.half_open += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.closed + self.open + self.half_open
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceTypeSummary {
    pub breakers: usize,
    pub open: usize,
    pub requests: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    pub total_breakers: usize,
    pub by_state: StateCount,
    pub by_service_type: HashMap<String, ServiceTypeSummary>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Lifetime failure percentage across all breakers
    pub overall_failure_rate: f64,
}

/// Health information for the circuit breaker registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub total_breakers: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub healthy: bool,
}
