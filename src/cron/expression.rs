//! Parsed expressions, date matching and next-fire computation.

use super::field::{CronField, FieldKind};
use super::{CronError, CronResult};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Upper bound on the forward scan: one year of minutes
pub const MAX_SCAN_MINUTES: u32 = 525_600;

/// A fully expanded five-field expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCron {
    /// Whitespace-normalised source text
    pub expression: String,
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl ParsedCron {
    pub fn parse(expression: &str) -> CronResult<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount {
                expression: expression.to_string(),
                found: parts.len(),
            });
        }

        Ok(Self {
            expression: parts.join(" "),
            minute: CronField::parse(parts[0], FieldKind::Minute)?,
            hour: CronField::parse(parts[1], FieldKind::Hour)?,
            day_of_month: CronField::parse(parts[2], FieldKind::DayOfMonth)?,
            month: CronField::parse(parts[3], FieldKind::Month)?,
            day_of_week: CronField::parse(parts[4], FieldKind::DayOfWeek)?,
        })
    }

    /// Whether the minute containing `time` is a fire time
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        self.minute.contains(time.minute())
            && self.hour.contains(time.hour())
            && self.month.contains(time.month())
            && self.day_matches(time.day(), time.weekday().num_days_from_sunday())
    }

    fn day_matches(&self, day_of_month: u32, day_of_week: u32) -> bool {
        let dom_restricted = !self.day_of_month.is_wildcard;
        let dow_restricted = !self.day_of_week.is_wildcard;

        match (dom_restricted, dow_restricted) {
            (true, true) => {
                self.day_of_month.contains(day_of_month) || self.day_of_week.contains(day_of_week)
            }
            (true, false) => self.day_of_month.contains(day_of_month),
            (false, true) => self.day_of_week.contains(day_of_week),
            (false, false) => true,
        }
    }

    /// First fire time strictly after the minute containing `from`
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut candidate = from
            .clone()
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);

        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate = candidate + Duration::minutes(1);
        }
        None
    }

    /// Up to `count` consecutive fire times after `from`
    pub fn next_n<Tz: TimeZone>(&self, from: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = from.clone();
        while out.len() < count {
            match self.next_after(&cursor) {
                Some(next) => {
                    cursor = next.clone();
                    out.push(next);
                }
                None => break,
            }
        }
        out
    }
}

/// Non-throwing validation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronValidation {
    pub valid: bool,
    pub error: Option<String>,
}

/// Stateless entry point mirroring the parser's public operations
pub struct CronExpressionParser;

impl CronExpressionParser {
    pub fn parse(expression: &str) -> CronResult<ParsedCron> {
        ParsedCron::parse(expression)
    }

    pub fn validate(expression: &str) -> CronValidation {
        match ParsedCron::parse(expression) {
            Ok(_) => CronValidation {
                valid: true,
                error: None,
            },
            Err(err) => CronValidation {
                valid: false,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn get_next_execution<Tz: TimeZone>(
        parsed: &ParsedCron,
        from: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        parsed.next_after(from)
    }

    pub fn get_next_executions<Tz: TimeZone>(
        parsed: &ParsedCron,
        from: &DateTime<Tz>,
        count: usize,
    ) -> Vec<DateTime<Tz>> {
        parsed.next_n(from, count)
    }

    pub fn describe(parsed: &ParsedCron) -> String {
        parsed.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_field_count() {
        assert!(matches!(
            ParsedCron::parse("* * * *"),
            Err(CronError::FieldCount { found: 4, .. })
        ));
        assert!(ParsedCron::parse("* * * * * *").is_err());
        assert!(ParsedCron::parse("").is_err());
    }

    #[test]
    fn test_expression_is_normalised() {
        let parsed = ParsedCron::parse("  0   9 *  * 1-5 ").unwrap();
        assert_eq!(parsed.expression, "0 9 * * 1-5");
    }

    #[test]
    fn test_wildcard_next_is_next_minute() {
        let parsed = ParsedCron::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 10, 12, 34, 56).unwrap();
        assert_eq!(parsed.next_after(&from), Some(at(2024, 3, 10, 12, 35)));

        let on_boundary = at(2024, 3, 10, 12, 34);
        assert_eq!(parsed.next_after(&on_boundary), Some(at(2024, 3, 10, 12, 35)));
    }

    #[test]
    fn test_weekday_morning_from_sunday() {
        let parsed = ParsedCron::parse("0 9 * * 1-5").unwrap();
        let sunday = at(2024, 1, 14, 9, 30);
        assert_eq!(parsed.next_after(&sunday), Some(at(2024, 1, 15, 9, 0)));
    }

    #[test]
    fn test_dom_dow_or_semantics() {
        let parsed = ParsedCron::parse("0 0 15 * 1-5").unwrap();

        // Saturday the 15th: day-of-month matches only
        assert!(parsed.matches(&at(2024, 6, 15, 0, 0)));
        // Tuesday the 4th: weekday matches only
        assert!(parsed.matches(&at(2024, 6, 4, 0, 0)));
        // Sunday the 16th: neither
        assert!(!parsed.matches(&at(2024, 6, 16, 0, 0)));
    }

    #[test]
    fn test_only_dom_restricted() {
        let parsed = ParsedCron::parse("0 0 1 * *").unwrap();
        assert!(parsed.matches(&at(2024, 2, 1, 0, 0)));
        assert!(!parsed.matches(&at(2024, 2, 5, 0, 0)));
    }

    #[test]
    fn test_next_n_monthly() {
        let parsed = ParsedCron::parse("30 6 1 * *").unwrap();
        let runs = parsed.next_n(&at(2024, 1, 20, 0, 0), 3);
        assert_eq!(
            runs,
            vec![at(2024, 2, 1, 6, 30), at(2024, 3, 1, 6, 30), at(2024, 4, 1, 6, 30)]
        );
    }

    #[test]
    fn test_impossible_date_returns_none() {
        let parsed = ParsedCron::parse("0 0 31 2 *").unwrap();
        assert_eq!(parsed.next_after(&at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_leap_day() {
        let parsed = ParsedCron::parse("0 12 29 feb *").unwrap();
        assert_eq!(
            parsed.next_after(&at(2024, 1, 1, 0, 0)),
            Some(at(2024, 2, 29, 12, 0))
        );
    }

    #[test]
    fn test_timezone_evaluation() {
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        let parsed = ParsedCron::parse("0 9 * * *").unwrap();
        // 12:00 UTC is 07:00 in New York during January
        let from = at(2024, 1, 10, 12, 0).with_timezone(&tz);
        let next = parsed.next_after(&from).unwrap();
        assert_eq!(next.with_timezone(&Utc), at(2024, 1, 10, 14, 0));
    }

    #[test]
    fn test_validate() {
        assert!(CronExpressionParser::validate("*/5 * * * *").valid);
        let result = CronExpressionParser::validate("61 * * * *");
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("minute"));
    }
}
