//! Executor wired to a virtual clock, shared by the executor test modules

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerRegistryConfig};
use crate::clock::ManualClock;
use crate::events::{drain, EventBus, EventEnvelope};
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::rate_limiter::{LimitConfig, RateLimiter, RateLimiterConfig};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

pub(super) struct Harness {
    pub executor: Arc<TaskExecutor>,
    pub limiter: Arc<RateLimiter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
}

pub(super) fn setup(config: ExecutorConfig) -> Harness {
    let clock = ManualClock::shared(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let events = EventBus::new(256);
    let limits = LimitConfig::new(100, Duration::from_secs(60))
        .with_max_concurrent(10)
        .with_min_delay(Duration::ZERO);
    let limiter_config = RateLimiterConfig {
        default_resource: limits.clone(),
        global: limits,
        ..RateLimiterConfig::default()
    };
    let limiter = Arc::new(RateLimiter::new(limiter_config, clock.clone(), events.clone()).unwrap());
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerRegistryConfig::default(),
        clock.clone(),
        events.clone(),
    ));
    let executor = Arc::new(
        TaskExecutor::new(
            config,
            limiter.clone(),
            breakers.clone(),
            clock.clone(),
            events.clone(),
        )
        .unwrap(),
    );
    Harness {
        executor,
        limiter,
        breakers,
        clock,
        events,
    }
}

pub(super) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Let spawned work run, then move the clock one second, `steps` times
pub(super) async fn drive(clock: &ManualClock, steps: u32) {
    for _ in 0..steps {
        settle().await;
        clock.advance(Duration::from_secs(1));
    }
}

/// `task:*` event names, oldest first
pub(super) fn names(rx: &mut Receiver<EventEnvelope>) -> Vec<&'static str> {
    drain(rx)
        .into_iter()
        .map(|e| e.name)
        .filter(|name| name.starts_with("task:"))
        .collect()
}
