use crate::clock::SharedClock;
use crate::events::{EngineEvent, EventBus, ThresholdEvent};
use crate::monitor::metrics::MONITOR_METRICS;
use crate::monitor::{
    CpuTimes, Debouncer, MonitorConfig, MonitorResult, ResourceMetric, ResourceSnapshot,
    SystemProbe, ThrottleAction, ThrottleRecommendation,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mean usage over recent samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageAverage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub samples: usize,
}

#[derive(Debug)]
struct MonitorState {
    history: VecDeque<ResourceSnapshot>,
    previous_cpu: Option<CpuTimes>,
    interval: Duration,
    warning_streak: u32,
    tab_count: u32,
    debouncer: Debouncer,
}

/// Polls system load and turns it into events and throttle advice
pub struct ResourceMonitor {
    config: MonitorConfig,
    probe: Arc<dyn SystemProbe>,
    clock: SharedClock,
    events: EventBus,
    state: Mutex<MonitorState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ResourceMonitor {
    pub fn new(
        config: MonitorConfig,
        probe: Arc<dyn SystemProbe>,
        clock: SharedClock,
        events: EventBus,
    ) -> MonitorResult<Self> {
        config.validate()?;
        let state = MonitorState {
            history: VecDeque::with_capacity(config.history_size),
            previous_cpu: None,
            interval: config.base_interval(),
            warning_streak: 0,
            tab_count: 0,
            debouncer: Debouncer::new(config.debounce_window()),
        };
        Ok(Self {
            config,
            probe,
            clock,
            events,
            state: Mutex::new(state),
            cancel: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Take one sample: update history and poll interval, publish any
    /// threshold events that are not debounced
    pub fn sample(&self) -> MonitorResult<ResourceSnapshot> {
        let (cpu_times, memory) = match (self.probe.cpu_times(), self.probe.memory()) {
            (Ok(cpu), Ok(memory)) => (cpu, memory),
            (Err(e), _) | (_, Err(e)) => {
                MONITOR_METRICS.probe_errors.inc();
                return Err(e);
            }
        };
        let now = self.clock.now();

        let (snapshot, interval, events) = {
            let mut state = self.state.lock();

            let cpu_percent = match state.previous_cpu {
                Some(previous) => cpu_times.usage_since(&previous),
                None => cpu_times.usage(),
            };
            state.previous_cpu = Some(cpu_times);

            let memory_percent = memory.used_percent();
            let snapshot = ResourceSnapshot {
                cpu_percent,
                memory_percent,
                memory_used: memory.used(),
                memory_total: memory.total,
                memory_available: memory.available,
                tab_count: state.tab_count,
                memory_pressure: memory_percent >= self.config.memory_pressure_percent,
                timestamp: now,
            };

            state.history.push_back(snapshot.clone());
            while state.history.len() > self.config.history_size {
                state.history.pop_front();
            }

            self.adapt_interval(&mut state, &snapshot);
            let events = self.threshold_events(&mut state.debouncer, &snapshot);
            (snapshot, state.interval, events)
        };

        MONITOR_METRICS
            .usage_percent
            .with_label_values(&["cpu"])
            .set(snapshot.cpu_percent);
        MONITOR_METRICS
            .usage_percent
            .with_label_values(&["memory"])
            .set(snapshot.memory_percent);
        MONITOR_METRICS
            .poll_interval_seconds
            .set(interval.as_secs_f64());

        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            tabs = snapshot.tab_count,
            interval_ms = interval.as_millis() as u64,
            "Resource sample"
        );

        for event in events {
            self.events.publish(event);
        }
        Ok(snapshot)
    }

    fn adapt_interval(&self, state: &mut MonitorState, snapshot: &ResourceSnapshot) {
        let warning = snapshot.cpu_percent >= self.config.cpu_warning_percent
            || snapshot.memory_percent >= self.config.memory_warning_percent;

        if warning {
            state.warning_streak += 1;
            if state.warning_streak >= self.config.sustained_samples {
                state.interval = state
                    .interval
                    .mul_f64(self.config.backoff_factor)
                    .min(self.config.max_interval());
            }
        } else {
            state.warning_streak = 0;
            state.interval = state
                .interval
                .div_f64(self.config.recovery_factor)
                .max(self.config.base_interval());
        }
    }

    fn threshold_events(
        &self,
        debouncer: &mut Debouncer,
        snapshot: &ResourceSnapshot,
    ) -> Vec<EngineEvent> {
        let config = &self.config;
        let now = snapshot.timestamp;
        let mut candidates = Vec::new();

        let threshold = |metric, value, threshold| ThresholdEvent {
            metric,
            value,
            threshold,
            timestamp: now,
        };

        for (metric, value, warning, critical) in [
            (
                ResourceMetric::Cpu,
                snapshot.cpu_percent,
                config.cpu_warning_percent,
                config.cpu_critical_percent,
            ),
            (
                ResourceMetric::Memory,
                snapshot.memory_percent,
                config.memory_warning_percent,
                config.memory_critical_percent,
            ),
        ] {
            if value >= critical {
                candidates.push((
                    metric.to_string(),
                    value,
                    EngineEvent::ThresholdCritical(threshold(metric, value, critical)),
                ));
            } else if value >= warning {
                candidates.push((
                    metric.to_string(),
                    value,
                    EngineEvent::ThresholdWarning(threshold(metric, value, warning)),
                ));
            }
        }

        if snapshot.tab_count >= config.max_tabs {
            let tabs = snapshot.tab_count as f64;
            candidates.push((
                ResourceMetric::Tabs.to_string(),
                tabs,
                EngineEvent::ThresholdWarning(threshold(
                    ResourceMetric::Tabs,
                    tabs,
                    config.max_tabs as f64,
                )),
            ));
        }

        let memory = snapshot.memory_percent;
        if memory >= config.memory_pressure_critical_percent {
            candidates.push((
                "memory".to_string(),
                memory,
                EngineEvent::MemoryPressureCritical(threshold(
                    ResourceMetric::Memory,
                    memory,
                    config.memory_pressure_critical_percent,
                )),
            ));
        } else if snapshot.memory_pressure {
            candidates.push((
                "memory".to_string(),
                memory,
                EngineEvent::MemoryPressure(threshold(
                    ResourceMetric::Memory,
                    memory,
                    config.memory_pressure_percent,
                )),
            ));
        }

        let recommendation = ThrottleRecommendation::for_snapshot(snapshot, config);
        if !recommendation.action.is_none() {
            candidates.push((
                recommendation.action.name().to_string(),
                0.0,
                EngineEvent::ThrottleRecommended(recommendation),
            ));
        }

        candidates
            .into_iter()
            .filter_map(|(subject, value, event)| {
                let key = Debouncer::signature(event.event_name(), &subject, value);
                debouncer.should_emit(&key, now).then_some(event)
            })
            .collect()
    }

    /// Start the adaptive poll loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let token = {
            let mut cancel = self.cancel.lock();
            if cancel.is_some() {
                warn!("Resource monitor is already running");
                return false;
            }
            let token = CancellationToken::new();
            *cancel = Some(token.clone());
            token
        };

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                base_interval_ms = monitor.config.base_interval_ms,
                "Resource monitor started"
            );
            loop {
                if token.is_cancelled() {
                    break;
                }
                if let Err(e) = monitor.sample() {
                    warn!(error = %e, "Resource sample failed");
                }

                let interval = monitor.current_interval();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = monitor.clock.sleep(interval) => {}
                }
            }
            info!("Resource monitor stopped");
        });
        true
    }

    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Snapshots oldest first
    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ResourceSnapshot> {
        self.state.lock().history.back().cloned()
    }

    pub fn current_interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Tab count reported by the browsing layer; used from the next sample on
    pub fn set_tab_count(&self, count: u32) {
        self.state.lock().tab_count = count;
    }

    pub fn tab_count(&self) -> u32 {
        self.state.lock().tab_count
    }

    /// Action for the latest sample; `None` before the first sample
    pub fn throttle_action(&self) -> ThrottleAction {
        self.latest()
            .map(|snapshot| ThrottleAction::evaluate(&snapshot, &self.config).0)
            .unwrap_or(ThrottleAction::None)
    }

    pub fn throttle_action_for(&self, snapshot: &ResourceSnapshot) -> ThrottleRecommendation {
        ThrottleRecommendation::for_snapshot(snapshot, &self.config)
    }

    /// Mean of the last `samples` snapshots
    pub fn average_usage(&self, samples: usize) -> Option<UsageAverage> {
        let state = self.state.lock();
        let count = samples.min(state.history.len());
        if count == 0 {
            return None;
        }
        let recent = state.history.iter().rev().take(count);
        let (cpu, memory) = recent.fold((0.0, 0.0), |(cpu, memory), s| {
            (cpu + s.cpu_percent, memory + s.memory_percent)
        });
        Some(UsageAverage {
            cpu_percent: cpu / count as f64,
            memory_percent: memory / count as f64,
            samples: count,
        })
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("probe", &self.probe)
            .field("running", &self.is_running())
            .finish()
    }
}
