//! Core scheduler service implementation

use super::{
    config::SchedulerConfig,
    error::{SchedulerError, SchedulerResult},
    metrics::SCHEDULER_METRICS,
    schedule::{Schedule, ScheduleId, ScheduleRecord, ScheduleSpec, ScheduleType, ScheduleUpdate},
    timing::{self, TimingContext},
};
use crate::clock::{to_chrono, SharedClock};
use crate::cron::CronCache;
use crate::events::{EngineEvent, EventBus};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statistics about the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub disabled_schedules: usize,
    pub by_type: HashMap<String, usize>,
    pub total_runs: u64,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

/// A record that could not be imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub index: usize,
    pub id: String,
    pub error: String,
}

/// Outcome of a schedule import; failures never abort the batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: Vec<ScheduleId>,
    pub failed: Vec<ImportFailure>,
}

#[derive(Default)]
struct SchedulerState {
    schedules: HashMap<ScheduleId, Schedule>,
    /// Registration order; due schedules fire in this order
    order: Vec<ScheduleId>,
    timers: HashMap<ScheduleId, CancellationToken>,
}

impl SchedulerState {
    fn refresh_gauges(&self) {
        let enabled = self.schedules.values().filter(|s| s.enabled).count();
        SCHEDULER_METRICS.update_schedule_counts(enabled, self.schedules.len() - enabled);
    }

    fn disarm(&mut self, id: &ScheduleId) {
        if let Some(token) = self.timers.remove(id) {
            token.cancel();
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    timezone: Tz,
    clock: SharedClock,
    events: EventBus,
    cron: CronCache,
    state: Mutex<SchedulerState>,
    running: Mutex<Option<CancellationToken>>,
}

/// Owns schedule definitions and fires them when due.
///
/// Cloning is cheap and every clone drives the same schedules. While running,
/// each enabled schedule has a timer armed at its `next_run`, and a periodic
/// tick re-evaluates everything that is due.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: SharedClock,
        events: EventBus,
        cron: CronCache,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let timezone = config.tz()?;
        info!(timezone = %timezone, tick_secs = config.tick_interval_secs, "Initializing task scheduler");

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                timezone,
                clock,
                events,
                cron,
                state: Mutex::new(SchedulerState::default()),
                running: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Shape checks plus eager cron parsing
    fn validate(&self, schedule: &Schedule) -> SchedulerResult<()> {
        schedule.check_shape()?;
        if let Some(expression) = &schedule.cron_expression {
            if schedule.schedule_type == ScheduleType::Cron {
                self.inner.cron.get_or_parse(expression)?;
            }
        }
        Ok(())
    }

    fn next_run_for(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !schedule.enabled {
            return None;
        }

        let parsed = match (&schedule.schedule_type, &schedule.cron_expression) {
            (ScheduleType::Cron, Some(expression)) => match self.inner.cron.get_or_parse(expression) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(schedule = %schedule.label(), error = %e, "Cron expression no longer parses");
                    return None;
                }
            },
            _ => None,
        };

        let ctx = TimingContext {
            now,
            timezone: self.inner.timezone,
            continuous_delay: to_chrono(self.inner.config.continuous_delay()),
            cron: parsed.as_deref(),
        };
        timing::next_run(schedule, &ctx)
    }

    /// Register a schedule. Cron expressions are parsed here and a bad one
    /// blocks registration.
    pub fn add_schedule(&self, spec: ScheduleSpec) -> SchedulerResult<Schedule> {
        let now = self.inner.clock.now();
        let mut schedule = Schedule::from_spec(spec, now);
        self.validate(&schedule)?;
        schedule.next_run = self.next_run_for(&schedule, now);

        self.insert(schedule.clone())?;

        info!(
            schedule = %schedule.label(),
            schedule_type = %schedule.schedule_type,
            next_run = ?schedule.next_run,
            "Schedule added"
        );
        self.inner
            .events
            .publish(EngineEvent::ScheduleAdded(Box::new(schedule.clone())));
        self.arm(schedule.id, schedule.next_run);
        Ok(schedule)
    }

    fn insert(&self, schedule: Schedule) -> SchedulerResult<()> {
        let mut state = self.inner.state.lock();
        if state.schedules.contains_key(&schedule.id) {
            return Err(SchedulerError::AlreadyExists(schedule.id));
        }
        if state.schedules.len() >= self.inner.config.max_schedules {
            return Err(SchedulerError::Capacity {
                max: self.inner.config.max_schedules,
            });
        }
        state.order.push(schedule.id);
        state.schedules.insert(schedule.id, schedule);
        state.refresh_gauges();
        Ok(())
    }

    /// Apply `mutate` to a copy of the schedule, validate it, recompute its
    /// next run and store it
    fn modify(
        &self,
        id: ScheduleId,
        mutate: impl FnOnce(&mut Schedule),
    ) -> SchedulerResult<Schedule> {
        let now = self.inner.clock.now();
        let updated = {
            let mut state = self.inner.state.lock();
            let current = state
                .schedules
                .get(&id)
                .ok_or(SchedulerError::NotFound(id))?;

            let mut updated = current.clone();
            mutate(&mut updated);
            self.validate(&updated)?;
            updated.updated_at = now;
            updated.next_run = self.next_run_for(&updated, now);

            state.schedules.insert(id, updated.clone());
            state.refresh_gauges();
            updated
        };

        self.arm(id, updated.next_run);
        Ok(updated)
    }

    pub fn update_schedule(&self, id: ScheduleId, update: ScheduleUpdate) -> SchedulerResult<Schedule> {
        let schedule = self.modify(id, |schedule| update.apply(schedule))?;
        debug!(schedule = %schedule.label(), next_run = ?schedule.next_run, "Schedule updated");
        self.inner
            .events
            .publish(EngineEvent::ScheduleUpdated(Box::new(schedule.clone())));
        Ok(schedule)
    }

    pub fn enable(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let schedule = self.modify(id, |schedule| schedule.enabled = true)?;
        info!(schedule = %schedule.label(), next_run = ?schedule.next_run, "Schedule enabled");
        self.inner
            .events
            .publish(EngineEvent::ScheduleEnabled(Box::new(schedule.clone())));
        Ok(schedule)
    }

    pub fn disable(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let schedule = self.modify(id, |schedule| schedule.enabled = false)?;
        info!(schedule = %schedule.label(), "Schedule disabled");
        self.inner
            .events
            .publish(EngineEvent::ScheduleDisabled(Box::new(schedule.clone())));
        Ok(schedule)
    }

    /// Remove a schedule and its timer; other timers are untouched
    pub fn remove_schedule(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state
                .schedules
                .remove(&id)
                .ok_or(SchedulerError::NotFound(id))?;
            state.order.retain(|existing| *existing != id);
            state.disarm(&id);
            state.refresh_gauges();
            removed
        };

        info!(schedule = %removed.label(), "Schedule removed");
        self.inner
            .events
            .publish(EngineEvent::ScheduleRemoved { schedule_id: id });
        Ok(removed)
    }

    pub fn get_schedule(&self, id: ScheduleId) -> Option<Schedule> {
        self.inner.state.lock().schedules.get(&id).cloned()
    }

    /// Schedules in registration order
    pub fn list_schedules(&self) -> Vec<Schedule> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.schedules.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every enabled schedule whose next run has passed
    pub fn tick(&self) -> Vec<ScheduleId> {
        self.fire_due(None, "tick", None)
    }

    /// Fire a schedule immediately regardless of its next run
    pub fn fire_now(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let now = self.inner.clock.now();
        let (schedule, events) = {
            let mut state = self.inner.state.lock();
            let schedule = state
                .schedules
                .get_mut(&id)
                .ok_or(SchedulerError::NotFound(id))?;
            if !schedule.enabled {
                return Err(SchedulerError::Disabled(id));
            }
            let events = self.fire_locked(schedule, now);
            let schedule = schedule.clone();
            state.refresh_gauges();
            (schedule, events)
        };

        for event in events {
            self.inner.events.publish(event);
        }
        self.arm(id, schedule.next_run);
        Ok(schedule)
    }

    /// With a run token, nothing fires once that token is cancelled. `stop`
    /// cancels under the state lock, so the check below is final.
    fn fire_due(
        &self,
        only: Option<ScheduleId>,
        trigger: &str,
        run: Option<&CancellationToken>,
    ) -> Vec<ScheduleId> {
        let timer = SCHEDULER_METRICS
            .tick_duration
            .with_label_values(&[trigger])
            .start_timer();
        let now = self.inner.clock.now();

        let (fired, events) = {
            let mut guard = self.inner.state.lock();
            if run.map_or(false, |token| token.is_cancelled()) {
                debug!(trigger, "Scheduler stopped, skipping fire");
                return Vec::new();
            }
            let state = &mut *guard;
            let candidates: Vec<ScheduleId> = match only {
                Some(id) => vec![id],
                None => state.order.clone(),
            };

            let mut fired = Vec::new();
            let mut events = Vec::new();
            for id in candidates {
                let Some(schedule) = state.schedules.get_mut(&id) else {
                    continue;
                };
                let due = schedule.enabled && schedule.next_run.map_or(false, |at| at <= now);
                if due {
                    events.extend(self.fire_locked(schedule, now));
                    fired.push((id, schedule.next_run));
                }
            }
            if !fired.is_empty() {
                state.refresh_gauges();
            }
            (fired, events)
        };

        for event in events {
            self.inner.events.publish(event);
        }
        for (id, next_run) in &fired {
            self.arm(*id, *next_run);
        }
        timer.observe_duration();

        fired.into_iter().map(|(id, _)| id).collect()
    }

    /// Run bookkeeping for one fire and return the events to publish
    fn fire_locked(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Vec<EngineEvent> {
        schedule.run_count += 1;
        schedule.last_run = Some(now);
        schedule.updated_at = now;
        SCHEDULER_METRICS.record_fire(&schedule.schedule_type.to_string(), now.timestamp());

        let max_reached = schedule.max_runs_reached();
        if schedule.schedule_type == ScheduleType::OneTime || max_reached {
            schedule.enabled = false;
            schedule.next_run = None;
        } else {
            schedule.next_run = self.next_run_for(schedule, now);
        }

        info!(
            schedule = %schedule.label(),
            run_count = schedule.run_count,
            next_run = ?schedule.next_run,
            "Schedule fired"
        );

        let mut events = vec![EngineEvent::TaskExecute(Box::new(schedule.clone()))];
        if max_reached {
            SCHEDULER_METRICS
                .max_runs_reached_total
                .with_label_values(&[&schedule.schedule_type.to_string()])
                .inc();
            info!(schedule = %schedule.label(), max_runs = ?schedule.max_runs, "Schedule reached max runs");
            events.push(EngineEvent::ScheduleMaxRunsReached(Box::new(schedule.clone())));
        }
        events
    }

    /// Arm (or clear, for `None`) the timer of one schedule. No-op while stopped.
    fn arm(&self, id: ScheduleId, at: Option<DateTime<Utc>>) {
        let Some(root) = self.inner.running.lock().clone() else {
            return;
        };

        let mut state = self.inner.state.lock();
        state.disarm(&id);
        if root.is_cancelled() {
            return;
        }
        let Some(at) = at else {
            return;
        };
        let token = root.child_token();
        state.timers.insert(id, token.clone());
        drop(state);

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = scheduler.inner.clock.sleep_until(at) => {
                    scheduler.fire_due(Some(id), "timer", Some(&token));
                }
            }
        });
    }

    /// Start the tick loop and arm timers for every enabled schedule.
    /// Returns false when disabled by configuration or already running.
    pub fn start(&self) -> bool {
        if !self.inner.config.enabled {
            info!("Scheduler is disabled in configuration");
            return false;
        }

        let root = {
            let mut running = self.inner.running.lock();
            if running.is_some() {
                warn!("Scheduler is already running");
                return false;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let pending: Vec<(ScheduleId, Option<DateTime<Utc>>)> = self
            .list_schedules()
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| (s.id, s.next_run))
            .collect();
        for (id, next_run) in pending {
            self.arm(id, next_run);
        }

        let scheduler = self.clone();
        let tick = self.inner.config.tick_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = root.cancelled() => break,
                    _ = scheduler.inner.clock.sleep(tick) => {
                        let fired = scheduler.fire_due(None, "tick", Some(&root));
                        if !fired.is_empty() {
                            debug!(count = fired.len(), "Tick fired schedules");
                        }
                    }
                }
            }
            debug!("Scheduler tick loop exited");
        });

        info!(schedules = self.len(), "Scheduler started");
        true
    }

    /// Stop the tick loop and clear every pending timer
    pub fn stop(&self) {
        let Some(root) = self.inner.running.lock().take() else {
            warn!("Scheduler is not running");
            return;
        };
        let mut state = self.inner.state.lock();
        root.cancel();
        state.timers.clear();
        drop(state);
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Number of armed per-schedule timers
    pub fn armed_timers(&self) -> usize {
        self.inner.state.lock().timers.len()
    }

    pub fn get_stats(&self) -> SchedulerStats {
        let schedules = self.list_schedules();
        let enabled = schedules.iter().filter(|s| s.enabled).count();
        let mut by_type = HashMap::new();
        for schedule in &schedules {
            *by_type
                .entry(schedule.schedule_type.to_string())
                .or_insert(0) += 1;
        }

        SchedulerStats {
            total_schedules: schedules.len(),
            enabled_schedules: enabled,
            disabled_schedules: schedules.len() - enabled,
            by_type,
            total_runs: schedules.iter().map(|s| s.run_count).sum(),
            next_run: schedules.iter().filter_map(|s| s.next_run).min(),
            running: self.is_running(),
        }
    }

    pub fn export_schedules(&self) -> Vec<ScheduleRecord> {
        self.list_schedules().iter().map(ScheduleRecord::from).collect()
    }

    /// Import records one by one. Next runs are recomputed from the current
    /// time; run history is kept.
    pub fn import_schedules(&self, records: Vec<ScheduleRecord>) -> ImportReport {
        let now = self.inner.clock.now();
        let mut report = ImportReport::default();

        for (index, record) in records.into_iter().enumerate() {
            let id = record.id.clone();
            let result = Schedule::try_from(record).and_then(|mut schedule| {
                self.validate(&schedule)?;
                if schedule.schedule_type == ScheduleType::OneTime && schedule.last_run.is_some() {
                    schedule.enabled = false;
                }
                schedule.next_run = self.next_run_for(&schedule, now);
                self.insert(schedule.clone())?;
                Ok(schedule)
            });

            match result {
                Ok(schedule) => {
                    self.inner
                        .events
                        .publish(EngineEvent::ScheduleAdded(Box::new(schedule.clone())));
                    self.arm(schedule.id, schedule.next_run);
                    report.imported.push(schedule.id);
                }
                Err(e) => {
                    warn!(index, id = %id, error = %e, "Skipping schedule record");
                    report.failed.push(ImportFailure {
                        index,
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            imported = report.imported.len(),
            failed = report.failed.len(),
            "Schedules imported"
        );
        report
    }

    /// Import from a JSON array of records
    pub fn import_json(&self, json: &str) -> SchedulerResult<ImportReport> {
        let records: Vec<ScheduleRecord> = serde_json::from_str(json)
            .map_err(|e| SchedulerError::InvalidRecord(e.to_string()))?;
        Ok(self.import_schedules(records))
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("schedules", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::drain;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn start_time() -> DateTime<Utc> {
        // Sunday
        Utc.with_ymd_and_hms(2024, 1, 14, 9, 30, 0).unwrap()
    }

    fn setup(config: SchedulerConfig) -> (TaskScheduler, Arc<ManualClock>, EventBus) {
        let clock = ManualClock::shared(start_time());
        let events = EventBus::new(256);
        let scheduler =
            TaskScheduler::new(config, clock.clone(), events.clone(), CronCache::default()).unwrap();
        (scheduler, clock, events)
    }

    fn names(rx: &mut tokio::sync::broadcast::Receiver<crate::events::EventEnvelope>) -> Vec<&'static str> {
        drain(rx).iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_invalid_cron_blocks_registration() {
        let (scheduler, _, _) = setup(SchedulerConfig::default());
        let result = scheduler.add_schedule(ScheduleSpec::cron(json!({}), "61 * * * *"));
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cron_next_run_on_add() {
        let (scheduler, _, _) = setup(SchedulerConfig::default());
        let schedule = scheduler
            .add_schedule(ScheduleSpec::cron(json!({"keyword": "rust"}), "0 9 * * 1-5"))
            .unwrap();
        assert_eq!(
            schedule.next_run,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_one_time_fires_once_then_disables() {
        let (scheduler, clock, events) = setup(SchedulerConfig::default());
        let mut rx = events.subscribe();
        let at = start_time() + chrono::Duration::minutes(10);
        let id = scheduler
            .add_schedule(ScheduleSpec::one_time(json!({"keyword": "once"}), at))
            .unwrap()
            .id;

        assert!(scheduler.tick().is_empty());
        clock.advance(Duration::from_secs(600));
        assert_eq!(scheduler.tick(), vec![id]);
        clock.advance(Duration::from_secs(3600));
        assert!(scheduler.tick().is_empty());

        let schedule = scheduler.get_schedule(id).unwrap();
        assert_eq!(schedule.run_count, 1);
        assert!(!schedule.enabled);
        assert_eq!(schedule.next_run, None);
        assert_eq!(names(&mut rx), vec!["schedule:added", "task:execute"]);
    }

    #[test]
    fn test_recurring_max_runs() {
        let (scheduler, clock, events) = setup(SchedulerConfig::default());
        let mut rx = events.subscribe();
        let id = scheduler
            .add_schedule(ScheduleSpec::recurring(json!({}), 1).with_max_runs(2))
            .unwrap()
            .id;

        assert_eq!(scheduler.tick(), vec![id]);
        clock.advance(Duration::from_secs(60));
        assert_eq!(scheduler.tick(), vec![id]);
        clock.advance(Duration::from_secs(60));
        assert!(scheduler.tick().is_empty());

        let schedule = scheduler.get_schedule(id).unwrap();
        assert_eq!(schedule.run_count, 2);
        assert!(!schedule.enabled);
        assert_eq!(
            names(&mut rx),
            vec![
                "schedule:added",
                "task:execute",
                "task:execute",
                "schedule:max-runs-reached"
            ]
        );
    }

    #[test]
    fn test_task_execute_carries_updated_schedule() {
        let (scheduler, _, events) = setup(SchedulerConfig::default());
        let mut rx = events.subscribe();
        scheduler
            .add_schedule(ScheduleSpec::continuous(json!({"keyword": "loop"})))
            .unwrap();
        let id = scheduler.list_schedules()[0].id;
        scheduler.fire_now(id).unwrap();

        let fired = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e.event {
                EngineEvent::TaskExecute(schedule) => Some(schedule),
                _ => None,
            })
            .unwrap();
        assert_eq!(fired.run_count, 1);
        assert_eq!(fired.last_run, Some(start_time()));
        assert_eq!(
            fired.next_run,
            Some(start_time() + chrono::Duration::seconds(5))
        );
    }

    #[test]
    fn test_enable_disable_update_remove() {
        let (scheduler, _, events) = setup(SchedulerConfig::default());
        let mut rx = events.subscribe();
        let id = scheduler
            .add_schedule(ScheduleSpec::recurring(json!({}), 15).with_name("every-15"))
            .unwrap()
            .id;

        let disabled = scheduler.disable(id).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.next_run, None);
        assert!(matches!(scheduler.fire_now(id), Err(SchedulerError::Disabled(_))));

        let enabled = scheduler.enable(id).unwrap();
        assert_eq!(enabled.next_run, Some(start_time()));

        let bad = scheduler.update_schedule(
            id,
            ScheduleUpdate {
                interval_minutes: Some(0),
                ..Default::default()
            },
        );
        assert!(bad.is_err());
        assert_eq!(scheduler.get_schedule(id).unwrap().interval_minutes, Some(15));

        scheduler
            .update_schedule(
                id,
                ScheduleUpdate {
                    interval_minutes: Some(30),
                    ..Default::default()
                },
            )
            .unwrap();

        scheduler.remove_schedule(id).unwrap();
        assert!(matches!(
            scheduler.remove_schedule(id),
            Err(SchedulerError::NotFound(_))
        ));
        assert_eq!(
            names(&mut rx),
            vec![
                "schedule:added",
                "schedule:disabled",
                "schedule:enabled",
                "schedule:updated",
                "schedule:removed"
            ]
        );
    }

    #[test]
    fn test_capacity() {
        let (scheduler, _, _) = setup(SchedulerConfig {
            max_schedules: 1,
            ..Default::default()
        });
        scheduler.add_schedule(ScheduleSpec::continuous(json!({}))).unwrap();
        assert!(matches!(
            scheduler.add_schedule(ScheduleSpec::continuous(json!({}))),
            Err(SchedulerError::Capacity { max: 1 })
        ));
    }

    #[test]
    fn test_due_schedules_fire_in_registration_order() {
        let (scheduler, _, _) = setup(SchedulerConfig::default());
        let a = scheduler.add_schedule(ScheduleSpec::recurring(json!({}), 5)).unwrap().id;
        let b = scheduler.add_schedule(ScheduleSpec::recurring(json!({}), 5)).unwrap().id;
        assert_eq!(scheduler.tick(), vec![a, b]);
    }

    #[test]
    fn test_export_import_reports_per_record_failures() {
        let (source, _, _) = setup(SchedulerConfig::default());
        source
            .add_schedule(ScheduleSpec::cron(json!({"k": 1}), "*/15 * * * *"))
            .unwrap();
        let recurring = source
            .add_schedule(ScheduleSpec::recurring(json!({"k": 2}), 10))
            .unwrap();
        source.fire_now(recurring.id).unwrap();

        let mut records = source.export_schedules();
        let mut broken = records[0].clone();
        broken.id = uuid::Uuid::new_v4().to_string();
        broken.cron_expression = Some("not a cron".to_string());
        records.push(broken);

        let (target, _, _) = setup(SchedulerConfig::default());
        let report = target.import_schedules(records);
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);

        let imported = target.get_schedule(recurring.id).unwrap();
        assert_eq!(imported.run_count, 1);
        assert_eq!(
            imported.next_run,
            Some(start_time() + chrono::Duration::minutes(10))
        );

        let json = serde_json::to_string(&source.export_schedules()).unwrap();
        let (third, _, _) = setup(SchedulerConfig::default());
        assert_eq!(third.import_json(&json).unwrap().imported.len(), 2);
        assert!(third.import_json("{").is_err());
    }

    #[test]
    fn test_stats() {
        let (scheduler, _, _) = setup(SchedulerConfig::default());
        scheduler.add_schedule(ScheduleSpec::continuous(json!({}))).unwrap();
        scheduler
            .add_schedule(ScheduleSpec::cron(json!({}), "0 * * * *").disabled())
            .unwrap();
        let stats = scheduler.get_stats();
        assert_eq!(stats.total_schedules, 2);
        assert_eq!(stats.enabled_schedules, 1);
        assert_eq!(stats.by_type.get("cron"), Some(&1));
        assert!(!stats.running);
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_timers_fire_while_running_and_stop_clears_them() {
        let (scheduler, clock, _) = setup(SchedulerConfig::default());
        let id = scheduler
            .add_schedule(ScheduleSpec::cron(json!({}), "*/15 * * * *"))
            .unwrap()
            .id;

        assert!(scheduler.start());
        assert!(!scheduler.start());
        settle().await;
        assert_eq!(scheduler.armed_timers(), 1);

        clock.advance(Duration::from_secs(15 * 60));
        settle().await;
        let schedule = scheduler.get_schedule(id).unwrap();
        assert_eq!(schedule.run_count, 1);
        assert_eq!(
            schedule.next_run,
            Some(Utc.with_ymd_and_hms(2024, 1, 14, 10, 0, 0).unwrap())
        );

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.armed_timers(), 0);

        clock.advance(Duration::from_secs(30 * 60));
        settle().await;
        assert_eq!(scheduler.get_schedule(id).unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn test_stopped_schedulers_never_fire() {
        let clock = ManualClock::shared(start_time());
        let events = EventBus::new(1024);
        let mut rx = events.subscribe();
        let cache = CronCache::default();

        let mut schedulers = Vec::new();
        for _ in 0..50 {
            let scheduler = TaskScheduler::new(
                SchedulerConfig::default(),
                clock.clone(),
                events.clone(),
                cache.clone(),
            )
            .unwrap();
            scheduler
                .add_schedule(ScheduleSpec::cron(json!({}), "*/15 * * * *"))
                .unwrap();
            assert!(scheduler.start());
            schedulers.push(scheduler);
        }
        settle().await;
        drain(&mut rx);

        for scheduler in &schedulers {
            scheduler.stop();
        }
        // wake every sleeper in the same step as the cancellation
        clock.advance(Duration::from_secs(30 * 60));
        settle().await;

        let fired = drain(&mut rx)
            .iter()
            .filter(|e| e.name == "task:execute")
            .count();
        assert_eq!(fired, 0);
        for scheduler in &schedulers {
            assert_eq!(scheduler.armed_timers(), 0);
            assert!(scheduler.list_schedules().iter().all(|s| s.run_count == 0));
        }
    }

    #[tokio::test]
    async fn test_arm_after_stop_leaves_no_timer() {
        let (scheduler, _, _) = setup(SchedulerConfig::default());
        let id = scheduler
            .add_schedule(ScheduleSpec::recurring(json!({}), 5))
            .unwrap()
            .id;
        assert!(scheduler.start());
        let root = scheduler.inner.running.lock().clone().unwrap();

        scheduler.stop();
        // an arm that read the running token just before stop took it
        *scheduler.inner.running.lock() = Some(root);
        scheduler.arm(id, Some(start_time() + chrono::Duration::minutes(5)));
        assert_eq!(scheduler.armed_timers(), 0);
        *scheduler.inner.running.lock() = None;
    }

    #[tokio::test]
    async fn test_remove_clears_only_its_timer() {
        let (scheduler, clock, _) = setup(SchedulerConfig {
            tick_interval_secs: 3600,
            ..Default::default()
        });
        let keep = scheduler
            .add_schedule(ScheduleSpec::one_time(
                json!({}),
                start_time() + chrono::Duration::minutes(5),
            ))
            .unwrap()
            .id;
        let drop_id = scheduler
            .add_schedule(ScheduleSpec::one_time(
                json!({}),
                start_time() + chrono::Duration::minutes(5),
            ))
            .unwrap()
            .id;

        scheduler.start();
        settle().await;
        assert_eq!(scheduler.armed_timers(), 2);
        scheduler.remove_schedule(drop_id).unwrap();
        assert_eq!(scheduler.armed_timers(), 1);

        clock.advance(Duration::from_secs(300));
        settle().await;
        assert_eq!(scheduler.get_schedule(keep).unwrap().run_count, 1);
        assert_eq!(scheduler.armed_timers(), 0);
        scheduler.stop();
    }
}
