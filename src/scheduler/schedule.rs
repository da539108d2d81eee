//! Schedule definitions and their persisted record form.

use crate::scheduler::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a schedule
pub type ScheduleId = Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ScheduleType {
    /// Fires once at `start_time`
    OneTime,
    /// Fires every `interval_minutes`, optionally only on some weekdays
    Recurring,
    /// Fires again shortly after every run
    Continuous,
    /// Fires on a cron expression
    Cron,
}

/// A registered schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: Option<String>,
    pub schedule_type: ScheduleType,

    /// Opaque payload handed to the executor when the schedule fires
    pub task: serde_json::Value,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub interval_minutes: Option<u32>,

    /// Allowed weekdays, 0 = Sunday
    pub days_of_week: Option<Vec<u8>>,
    pub cron_expression: Option<String>,

    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub max_runs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub(crate) fn from_spec(spec: ScheduleSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            schedule_type: spec.schedule_type,
            task: spec.task,
            start_time: spec.start_time,
            end_time: spec.end_time,
            interval_minutes: spec.interval_minutes,
            days_of_week: spec.days_of_week,
            cron_expression: spec.cron_expression,
            enabled: spec.enabled,
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: spec.max_runs,
            created_at: now,
            updated_at: now,
        }
    }

    /// Label used in logs
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.id),
            None => self.id.to_string(),
        }
    }

    pub fn max_runs_reached(&self) -> bool {
        self.max_runs.map_or(false, |max| self.run_count >= max)
    }

    /// Structural checks that do not need the cron parser
    pub(crate) fn check_shape(&self) -> SchedulerResult<()> {
        let invalid = |msg: &str| Err(SchedulerError::InvalidSchedule(msg.to_string()));
        match self.schedule_type {
            ScheduleType::OneTime if self.start_time.is_none() => {
                return invalid("one-time schedules need a start_time")
            }
            ScheduleType::Recurring if self.interval_minutes.unwrap_or(0) == 0 => {
                return invalid("recurring schedules need interval_minutes of at least 1")
            }
            ScheduleType::Cron
                if self
                    .cron_expression
                    .as_deref()
                    .map_or(true, |e| e.trim().is_empty()) =>
            {
                return invalid("cron schedules need a cron_expression")
            }
            _ => {}
        }

        if let Some(days) = &self.days_of_week {
            if days.iter().any(|d| *d > 6) {
                return invalid("days_of_week values must be 0-6");
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end <= start {
                return invalid("end_time must be after start_time");
            }
        }
        if self.max_runs == Some(0) {
            return invalid("max_runs must be at least 1");
        }
        Ok(())
    }
}

/// Input for registering a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: Option<String>,
    pub schedule_type: ScheduleType,
    pub task: serde_json::Value,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub interval_minutes: Option<u32>,
    pub days_of_week: Option<Vec<u8>>,
    pub cron_expression: Option<String>,
    pub max_runs: Option<u64>,
    pub enabled: bool,
}

impl ScheduleSpec {
    fn new(schedule_type: ScheduleType, task: serde_json::Value) -> Self {
        Self {
            name: None,
            schedule_type,
            task,
            start_time: None,
            end_time: None,
            interval_minutes: None,
            days_of_week: None,
            cron_expression: None,
            max_runs: None,
            enabled: true,
        }
    }

    pub fn one_time(task: serde_json::Value, at: DateTime<Utc>) -> Self {
        Self::new(ScheduleType::OneTime, task).with_start(at)
    }

    pub fn recurring(task: serde_json::Value, interval_minutes: u32) -> Self {
        let mut spec = Self::new(ScheduleType::Recurring, task);
        spec.interval_minutes = Some(interval_minutes);
        spec
    }

    pub fn continuous(task: serde_json::Value) -> Self {
        Self::new(ScheduleType::Continuous, task)
    }

    pub fn cron(task: serde_json::Value, expression: impl Into<String>) -> Self {
        let mut spec = Self::new(ScheduleType::Cron, task);
        spec.cron_expression = Some(expression.into());
        spec
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn with_days_of_week(mut self, days: Vec<u8>) -> Self {
        self.days_of_week = Some(days);
        self
    }

    pub fn with_max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub task: Option<serde_json::Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub interval_minutes: Option<u32>,
    pub days_of_week: Option<Vec<u8>>,
    pub cron_expression: Option<String>,
    pub max_runs: Option<u64>,
}

impl ScheduleUpdate {
    pub(crate) fn apply(self, schedule: &mut Schedule) {
        if let Some(name) = self.name {
            schedule.name = Some(name);
        }
        if let Some(task) = self.task {
            schedule.task = task;
        }
        if let Some(start) = self.start_time {
            schedule.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            schedule.end_time = Some(end);
        }
        if let Some(interval) = self.interval_minutes {
            schedule.interval_minutes = Some(interval);
        }
        if let Some(days) = self.days_of_week {
            schedule.days_of_week = Some(days);
        }
        if let Some(expression) = self.cron_expression {
            schedule.cron_expression = Some(expression);
        }
        if let Some(max_runs) = self.max_runs {
            schedule.max_runs = Some(max_runs);
        }
    }
}

/// Flat, storage-friendly form of a schedule with RFC 3339 timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(default)]
    pub task: serde_json::Value,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub next_run: Option<String>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub max_runs: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_time(field: &str, value: &str) -> SchedulerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidRecord(format!("{} '{}': {}", field, value, e)))
}

fn parse_optional(field: &str, value: &Option<String>) -> SchedulerResult<Option<DateTime<Utc>>> {
    value.as_deref().map(|v| parse_time(field, v)).transpose()
}

impl From<&Schedule> for ScheduleRecord {
    fn from(schedule: &Schedule) -> Self {
        Self {
            id: schedule.id.to_string(),
            name: schedule.name.clone(),
            schedule_type: schedule.schedule_type.to_string(),
            task: schedule.task.clone(),
            start_time: schedule.start_time.as_ref().map(format_time),
            end_time: schedule.end_time.as_ref().map(format_time),
            interval_minutes: schedule.interval_minutes,
            days_of_week: schedule.days_of_week.clone(),
            cron_expression: schedule.cron_expression.clone(),
            enabled: schedule.enabled,
            last_run: schedule.last_run.as_ref().map(format_time),
            next_run: schedule.next_run.as_ref().map(format_time),
            run_count: schedule.run_count,
            max_runs: schedule.max_runs,
            created_at: format_time(&schedule.created_at),
            updated_at: format_time(&schedule.updated_at),
        }
    }
}

impl TryFrom<ScheduleRecord> for Schedule {
    type Error = SchedulerError;

    fn try_from(record: ScheduleRecord) -> SchedulerResult<Self> {
        let id = record
            .id
            .parse::<Uuid>()
            .map_err(|e| SchedulerError::InvalidRecord(format!("id '{}': {}", record.id, e)))?;
        let schedule_type = record.schedule_type.parse::<ScheduleType>().map_err(|_| {
            SchedulerError::InvalidRecord(format!("unknown type '{}'", record.schedule_type))
        })?;

        Ok(Self {
            id,
            name: record.name,
            schedule_type,
            task: record.task,
            start_time: parse_optional("startTime", &record.start_time)?,
            end_time: parse_optional("endTime", &record.end_time)?,
            interval_minutes: record.interval_minutes,
            days_of_week: record.days_of_week,
            cron_expression: record.cron_expression,
            enabled: record.enabled,
            last_run: parse_optional("lastRun", &record.last_run)?,
            next_run: parse_optional("nextRun", &record.next_run)?,
            run_count: record.run_count,
            max_runs: record.max_runs,
            created_at: parse_time("createdAt", &record.created_at)?,
            updated_at: parse_time("updatedAt", &record.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_type_wire_names() {
        assert_eq!(ScheduleType::OneTime.to_string(), "one-time");
        assert_eq!("cron".parse::<ScheduleType>().unwrap(), ScheduleType::Cron);
        assert_eq!(
            serde_json::to_string(&ScheduleType::Continuous).unwrap(),
            "\"continuous\""
        );
    }

    #[test]
    fn test_shape_checks() {
        let ok = Schedule::from_spec(ScheduleSpec::recurring(json!({}), 30), now());
        assert!(ok.check_shape().is_ok());

        let zero = Schedule::from_spec(ScheduleSpec::recurring(json!({}), 0), now());
        assert!(zero.check_shape().is_err());

        let days = Schedule::from_spec(
            ScheduleSpec::recurring(json!({}), 5).with_days_of_week(vec![1, 7]),
            now(),
        );
        assert!(days.check_shape().is_err());

        let blank_cron = Schedule::from_spec(ScheduleSpec::cron(json!({}), "  "), now());
        assert!(blank_cron.check_shape().is_err());

        let inverted = Schedule::from_spec(
            ScheduleSpec::continuous(json!({}))
                .with_start(now())
                .with_end(now() - chrono::Duration::hours(1)),
            now(),
        );
        assert!(inverted.check_shape().is_err());
    }

    #[test]
    fn test_record_round_trip_normalises_dates() {
        let mut schedule = Schedule::from_spec(
            ScheduleSpec::cron(json!({"keyword": "rust"}), "0 9 * * 1-5").with_name("weekday"),
            now(),
        );
        schedule.last_run = Some(now());

        let record = ScheduleRecord::from(&schedule);
        assert_eq!(record.schedule_type, "cron");
        assert_eq!(record.created_at, "2024-01-10T08:00:00.000Z");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "cron");
        assert_eq!(json["cronExpression"], "0 9 * * 1-5");

        let back = Schedule::try_from(record).unwrap();
        assert_eq!(back, schedule);
    }

    #[test]
    fn test_record_rejects_bad_fields() {
        let mut record = ScheduleRecord::from(&Schedule::from_spec(
            ScheduleSpec::continuous(json!(null)),
            now(),
        ));
        record.created_at = "yesterday".to_string();
        assert!(matches!(
            Schedule::try_from(record.clone()),
            Err(SchedulerError::InvalidRecord(_))
        ));

        record.created_at = "2024-01-10T08:00:00+02:00".to_string();
        record.schedule_type = "hourly".to_string();
        assert!(Schedule::try_from(record).is_err());
    }
}
