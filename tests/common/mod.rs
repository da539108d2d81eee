//! Shared fixtures for the integration suites
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serp_orchestrator::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerRegistryConfig};
use serp_orchestrator::clock::ManualClock;
use serp_orchestrator::cron::CronCache;
use serp_orchestrator::events::{drain, EventBus, EventEnvelope};
use serp_orchestrator::executor::{ExecutorConfig, TaskExecutor};
use serp_orchestrator::queue::{KeywordQueue, QueueConfig};
use serp_orchestrator::rate_limiter::{LimitConfig, RateLimiter, RateLimiterConfig};
use serp_orchestrator::scheduler::{SchedulerConfig, TaskScheduler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Monday 2024-01-15 08:00 UTC
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    ManualClock::shared(start_time())
}

/// Let spawned tasks on the current-thread runtime catch up
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance the clock in `step` increments, letting tasks run in between
pub async fn advance_by(clock: &ManualClock, total: Duration, step: Duration) {
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        settle().await;
        clock.advance(step);
        elapsed += step;
    }
    settle().await;
}

pub fn event_names(rx: &mut Receiver<EventEnvelope>) -> Vec<&'static str> {
    drain(rx).into_iter().map(|envelope| envelope.name).collect()
}

/// Limits generous enough that only the test's own settings matter
pub fn relaxed_limits() -> RateLimiterConfig {
    let limits = LimitConfig::new(1_000, Duration::from_secs(60))
        .with_max_concurrent(50)
        .with_min_delay(Duration::ZERO);
    RateLimiterConfig {
        default_resource: limits.clone(),
        global: limits,
        ..RateLimiterConfig::default()
    }
}

/// Every engine component wired to one virtual clock and event bus
pub struct Engine {
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub scheduler: TaskScheduler,
    pub limiter: Arc<RateLimiter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub queue: Arc<KeywordQueue>,
    pub executor: Arc<TaskExecutor>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_configs(relaxed_limits(), ExecutorConfig::default())
    }

    pub fn with_configs(limits: RateLimiterConfig, executor: ExecutorConfig) -> Self {
        let clock = manual_clock();
        let events = EventBus::new(1024);
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            events.clone(),
            CronCache::default(),
        )
        .unwrap();
        let limiter = Arc::new(RateLimiter::new(limits, clock.clone(), events.clone()).unwrap());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerRegistryConfig::default(),
            clock.clone(),
            events.clone(),
        ));
        let queue = Arc::new(
            KeywordQueue::new(QueueConfig::default(), clock.clone(), events.clone()).unwrap(),
        );
        let executor = Arc::new(
            TaskExecutor::new(
                executor,
                limiter.clone(),
                breakers.clone(),
                clock.clone(),
                events.clone(),
            )
            .unwrap(),
        );
        Self {
            clock,
            events,
            scheduler,
            limiter,
            breakers,
            queue,
            executor,
        }
    }
}

/// Helper function to parse Prometheus exposition format
/// Returns a map of metric name to its lines for easy assertion
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}

/// Whether any sample line of `metric` carries `label="value"`
pub fn has_label(metrics: &HashMap<String, Vec<String>>, metric: &str, label: &str, value: &str) -> bool {
    let needle = format!("{}=\"{}\"", label, value);
    metrics
        .get(metric)
        .map(|lines| lines.iter().any(|line| !line.starts_with('#') && line.contains(&needle)))
        .unwrap_or(false)
}
