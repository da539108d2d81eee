//! Typed publish/subscribe event stream.
//!
//! Every subsystem publishes [`EngineEvent`]s onto a shared [`EventBus`]. The
//! orchestration layer subscribes and wires them to browsing, persistence and
//! UI concerns that live outside this crate.

use crate::circuit_breaker::{CircuitBreakerState, ServiceType};
use crate::monitor::{ResourceMetric, ThrottleRecommendation};
use crate::rate_limiter::LimitReason;
use crate::scheduler::{Schedule, ScheduleId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

/// Default broadcast channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Circuit breaker state change payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitEvent {
    pub key: String,
    pub service_type: ServiceType,
    pub service_id: String,
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Threshold crossing payload from the resource monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub metric: ResourceMetric,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// Every event the engine emits
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    ScheduleAdded(Box<Schedule>),
    ScheduleRemoved { schedule_id: ScheduleId },
    ScheduleUpdated(Box<Schedule>),
    ScheduleEnabled(Box<Schedule>),
    ScheduleDisabled(Box<Schedule>),
    ScheduleMaxRunsReached(Box<Schedule>),

    /// A schedule fired; carries the schedule after its run bookkeeping
    TaskExecute(Box<Schedule>),
    TaskCompleted {
        task_id: Uuid,
        attempts: u32,
        duration_ms: u64,
    },
    TaskRetry {
        task_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    TaskFailed {
        task_id: Uuid,
        attempts: u32,
        error: String,
    },
    TaskCancelled { task_id: Uuid },

    CircuitStateChange(CircuitEvent),
    CircuitOpen(CircuitEvent),
    CircuitClose(CircuitEvent),
    CircuitHalfOpen(CircuitEvent),

    ThresholdWarning(ThresholdEvent),
    ThresholdCritical(ThresholdEvent),
    MemoryPressure(ThresholdEvent),
    MemoryPressureCritical(ThresholdEvent),
    ThrottleRecommended(ThrottleRecommendation),

    RateLimitAllowed {
        resource: String,
        remaining: u32,
    },
    RateLimitRejected {
        resource: String,
        reason: LimitReason,
        retry_after_ms: u64,
    },

    QueueItemFailed {
        item_id: Uuid,
        value: String,
        attempts: u32,
        error: Option<String>,
    },
}

impl EngineEvent {
    /// Stable wire name of the event
    pub fn event_name(&self) -> &'static str {
        match self {
            EngineEvent::ScheduleAdded(_) => "schedule:added",
            EngineEvent::ScheduleRemoved { .. } => "schedule:removed",
            EngineEvent::ScheduleUpdated(_) => "schedule:updated",
            EngineEvent::ScheduleEnabled(_) => "schedule:enabled",
            EngineEvent::ScheduleDisabled(_) => "schedule:disabled",
            EngineEvent::ScheduleMaxRunsReached(_) => "schedule:max-runs-reached",
            EngineEvent::TaskExecute(_) => "task:execute",
            EngineEvent::TaskCompleted { .. } => "task:completed",
            EngineEvent::TaskRetry { .. } => "task:retry",
            EngineEvent::TaskFailed { .. } => "task:failed",
            EngineEvent::TaskCancelled { .. } => "task:cancelled",
            EngineEvent::CircuitStateChange(_) => "circuit:stateChange",
            EngineEvent::CircuitOpen(_) => "circuit:open",
            EngineEvent::CircuitClose(_) => "circuit:close",
            EngineEvent::CircuitHalfOpen(_) => "circuit:halfOpen",
            EngineEvent::ThresholdWarning(_) => "threshold:warning",
            EngineEvent::ThresholdCritical(_) => "threshold:critical",
            EngineEvent::MemoryPressure(_) => "memory:pressure",
            EngineEvent::MemoryPressureCritical(_) => "memory:pressure:critical",
            EngineEvent::ThrottleRecommended(_) => "throttle:recommended",
            EngineEvent::RateLimitAllowed { .. } => "rate-limit:allowed",
            EngineEvent::RateLimitRejected { .. } => "rate-limit:rejected",
            EngineEvent::QueueItemFailed { .. } => "queue:item-failed",
        }
    }
}

/// Event wrapped with delivery metadata
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub name: &'static str,
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

impl EventEnvelope {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: event.event_name(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Counters over published events
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_name: HashMap<String, u64>,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl EventStats {
    fn record_event(&mut self, name: &str) {
        self.total_events += 1;
        *self.events_by_name.entry(name.to_string()).or_insert(0) += 1;
        self.last_event_time = Some(Utc::now());
    }
}

/// Broadcast bus shared by every subsystem
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    stats: Arc<RwLock<EventStats>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            stats: Arc::new(RwLock::new(EventStats::default())),
            capacity,
        }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EngineEvent) {
        let envelope = EventEnvelope::new(event);
        debug!(event = envelope.name, "Publishing event");

        self.stats.write().record_event(envelope.name);

        // A send error only means nobody is listening right now.
        if self.tx.send(envelope).is_err() {
            trace!("No subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

/// Drain every envelope currently buffered on a receiver
pub fn drain(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(envelope) => out.push(envelope),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(EngineEvent::TaskCancelled {
            task_id: Uuid::new_v4(),
        });
        assert_eq!(bus.stats().total_events, 1);
    }

    #[tokio::test]
    async fn test_subscribe_receives_named_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::RateLimitRejected {
            resource: "google".to_string(),
            reason: LimitReason::EngineLimit,
            retry_after_ms: 2000,
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.name, "rate-limit:rejected");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_stats_by_name() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        for _ in 0..3 {
            bus.publish(EngineEvent::RateLimitAllowed {
                resource: "bing".to_string(),
                remaining: 1,
            });
        }
        let stats = bus.stats();
        assert_eq!(stats.events_by_name.get("rate-limit:allowed"), Some(&3));
        assert_eq!(drain(&mut rx).len(), 3);
    }
}
