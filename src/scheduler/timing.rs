//! Next-run computation.
//!
//! The next run of a schedule depends only on its type, the current time, its
//! last run and its interval or cron expression.

use crate::cron::ParsedCron;
use crate::scheduler::{Schedule, ScheduleType};
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;

/// Days probed forward when a recurring schedule is limited to some weekdays
const WEEKDAY_PROBE_DAYS: i64 = 7;

/// Inputs that are not part of the schedule itself
#[derive(Debug, Clone, Copy)]
pub struct TimingContext<'a> {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub continuous_delay: Duration,
    pub cron: Option<&'a ParsedCron>,
}

/// When `schedule` should next fire, or `None` if it never will again
pub fn next_run(schedule: &Schedule, ctx: &TimingContext<'_>) -> Option<DateTime<Utc>> {
    if schedule.max_runs_reached() {
        return None;
    }

    let candidate = match schedule.schedule_type {
        ScheduleType::OneTime => one_time(schedule, ctx.now),
        ScheduleType::Recurring => recurring(schedule, ctx),
        ScheduleType::Continuous => continuous(schedule, ctx),
        ScheduleType::Cron => cron(schedule, ctx),
    }?;

    match schedule.end_time {
        Some(end) if candidate > end => None,
        _ => Some(candidate),
    }
}

fn one_time(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if schedule.last_run.is_some() {
        return None;
    }
    schedule.start_time.filter(|start| *start > now)
}

fn recurring(schedule: &Schedule, ctx: &TimingContext<'_>) -> Option<DateTime<Utc>> {
    let interval = Duration::minutes(i64::from(schedule.interval_minutes?));
    let base = match (schedule.last_run, schedule.start_time) {
        (Some(last), _) => last + interval,
        (None, Some(start)) => start,
        (None, None) => ctx.now,
    };
    let candidate = base.max(ctx.now);

    match schedule.days_of_week.as_deref() {
        Some(days) if !days.is_empty() => (0..WEEKDAY_PROBE_DAYS)
            .map(|offset| candidate + Duration::days(offset))
            .find(|time| {
                let weekday = time.with_timezone(&ctx.timezone).weekday();
                days.contains(&(weekday.num_days_from_sunday() as u8))
            }),
        _ => Some(candidate),
    }
}

fn continuous(schedule: &Schedule, ctx: &TimingContext<'_>) -> Option<DateTime<Utc>> {
    let soon = ctx.now + ctx.continuous_delay;
    match schedule.start_time {
        Some(start) if start > soon => Some(start),
        _ => Some(soon),
    }
}

fn cron(schedule: &Schedule, ctx: &TimingContext<'_>) -> Option<DateTime<Utc>> {
    let parsed = ctx.cron?;
    let from = match schedule.start_time {
        // the start minute itself is eligible
        Some(start) if start > ctx.now => start - Duration::minutes(1),
        _ => ctx.now,
    };
    parsed
        .next_after(&from.with_timezone(&ctx.timezone))
        .map(|next| next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScheduleSpec;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx(now: DateTime<Utc>) -> TimingContext<'static> {
        TimingContext {
            now,
            timezone: Tz::UTC,
            continuous_delay: Duration::seconds(5),
            cron: None,
        }
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    #[test]
    fn test_one_time_future_only() {
        let schedule = Schedule::from_spec(ScheduleSpec::one_time(json!({}), at(15, 9, 0)), at(14, 0, 0));
        assert_eq!(next_run(&schedule, &ctx(at(14, 0, 0))), Some(at(15, 9, 0)));
        assert_eq!(next_run(&schedule, &ctx(at(15, 9, 1))), None);

        let mut fired = schedule.clone();
        fired.last_run = Some(at(14, 1, 0));
        assert_eq!(next_run(&fired, &ctx(at(14, 2, 0))), None);
    }

    #[test]
    fn test_recurring_interval_and_clamp() {
        let mut schedule = Schedule::from_spec(ScheduleSpec::recurring(json!({}), 30), at(14, 0, 0));
        assert_eq!(next_run(&schedule, &ctx(at(14, 8, 0))), Some(at(14, 8, 0)));

        schedule.last_run = Some(at(14, 8, 0));
        assert_eq!(next_run(&schedule, &ctx(at(14, 8, 1))), Some(at(14, 8, 30)));
        // overdue runs are clamped to now
        assert_eq!(next_run(&schedule, &ctx(at(14, 10, 0))), Some(at(14, 10, 0)));
    }

    #[test]
    fn test_recurring_weekday_filter() {
        // 2024-01-13 is a Saturday; only Monday (1) allowed
        let mut schedule = Schedule::from_spec(
            ScheduleSpec::recurring(json!({}), 60).with_days_of_week(vec![1]),
            at(13, 0, 0),
        );
        schedule.last_run = Some(at(13, 9, 0));
        assert_eq!(next_run(&schedule, &ctx(at(13, 9, 30))), Some(at(15, 10, 0)));
    }

    #[test]
    fn test_continuous_small_delay() {
        let schedule = Schedule::from_spec(ScheduleSpec::continuous(json!({})), at(14, 0, 0));
        let next = next_run(&schedule, &ctx(at(14, 8, 0))).unwrap();
        assert_eq!(next - at(14, 8, 0), Duration::seconds(5));
    }

    #[test]
    fn test_cron_uses_parsed_expression_and_end_time() {
        let parsed = ParsedCron::parse("0 9 * * 1-5").unwrap();
        let schedule = Schedule::from_spec(ScheduleSpec::cron(json!({}), "0 9 * * 1-5"), at(1, 0, 0));
        let context = TimingContext {
            cron: Some(&parsed),
            ..ctx(at(14, 9, 30))
        };
        assert_eq!(next_run(&schedule, &context), Some(at(15, 9, 0)));

        let ended = Schedule {
            end_time: Some(at(15, 8, 0)),
            ..schedule
        };
        assert_eq!(next_run(&ended, &context), None);
    }

    #[test]
    fn test_cron_start_minute_is_eligible() {
        let parsed = ParsedCron::parse("*/15 * * * *").unwrap();
        let schedule = Schedule::from_spec(
            ScheduleSpec::cron(json!({}), "*/15 * * * *").with_start(at(20, 12, 0)),
            at(1, 0, 0),
        );
        let context = TimingContext {
            cron: Some(&parsed),
            ..ctx(at(14, 0, 0))
        };
        assert_eq!(next_run(&schedule, &context), Some(at(20, 12, 0)));
    }

    #[test]
    fn test_cron_in_timezone() {
        let parsed = ParsedCron::parse("0 9 * * *").unwrap();
        let schedule = Schedule::from_spec(ScheduleSpec::cron(json!({}), "0 9 * * *"), at(1, 0, 0));
        let context = TimingContext {
            timezone: chrono_tz::America::New_York,
            cron: Some(&parsed),
            ..ctx(at(14, 12, 0))
        };
        // 09:00 EST is 14:00 UTC
        assert_eq!(next_run(&schedule, &context), Some(at(14, 14, 0)));
    }

    #[test]
    fn test_max_runs_stops_schedule() {
        let mut schedule = Schedule::from_spec(
            ScheduleSpec::recurring(json!({}), 1).with_max_runs(2),
            at(14, 0, 0),
        );
        schedule.run_count = 2;
        assert_eq!(next_run(&schedule, &ctx(at(14, 1, 0))), None);
    }
}
