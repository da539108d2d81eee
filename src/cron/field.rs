//! Single cron field parsing and expansion.

use super::{CronError, CronResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Which of the five positions a field occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Minute,
        FieldKind::Hour,
        FieldKind::DayOfMonth,
        FieldKind::Month,
        FieldKind::DayOfWeek,
    ];

    /// Inclusive domain of the field
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 6),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }

    fn alias(&self, token: &str) -> Option<u32> {
        let position = |names: &[&str]| names.iter().position(|n| *n == token);
        match self {
            FieldKind::Month => position(&MONTH_NAMES).map(|i| i as u32 + 1),
            FieldKind::DayOfWeek => position(&WEEKDAY_NAMES).map(|i| i as u32),
            _ => None,
        }
    }

    /// Turn a number or name into an in-domain value
    fn resolve(&self, token: &str) -> CronResult<u32> {
        let (min, max) = self.bounds();
        let token = token.trim().to_ascii_lowercase();

        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            let value: u32 = token.parse().map_err(|_| CronError::InvalidValue {
                field: self.name(),
                token: token.clone(),
            })?;
            if value < min || value > max {
                return Err(CronError::OutOfRange {
                    field: self.name(),
                    value,
                    min,
                    max,
                });
            }
            return Ok(value);
        }

        self.alias(&token).ok_or(CronError::InvalidValue {
            field: self.name(),
            token,
        })
    }
}

/// One parsed field: its source text and the expanded value set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronField {
    pub raw: String,
    pub values: BTreeSet<u32>,
    pub is_wildcard: bool,
}

impl CronField {
    pub fn parse(raw: &str, kind: FieldKind) -> CronResult<Self> {
        let raw = raw.trim();
        let (min, max) = kind.bounds();
        let mut values = BTreeSet::new();

        for part in raw.split(',') {
            if part.is_empty() {
                return Err(CronError::InvalidValue {
                    field: kind.name(),
                    token: raw.to_string(),
                });
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step_str)) => {
                    let step = step_str
                        .parse::<u32>()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| CronError::InvalidStep {
                            field: kind.name(),
                            step: step_str.to_string(),
                        })?;
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let start = kind.resolve(a)?;
                let end = kind.resolve(b)?;
                if start > end {
                    return Err(CronError::InvalidRange {
                        field: kind.name(),
                        range: range.to_string(),
                    });
                }
                (start, end)
            } else {
                let value = kind.resolve(range)?;
                // `a/n` runs from `a` to the end of the domain
                if step.is_some() {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                values.insert(value);
                match value.checked_add(step) {
                    Some(next) => value = next,
                    None => break,
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            values,
            is_wildcard: raw == "*",
        })
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// Single concrete value, if the field expands to exactly one
    pub fn single(&self) -> Option<u32> {
        if self.values.len() == 1 {
            self.values.iter().next().copied()
        } else {
            None
        }
    }

    /// `n` for fields written as `*/n`
    pub fn every(&self) -> Option<u32> {
        self.raw.strip_prefix("*/")?.parse().ok()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.values.iter().copied().collect()
    }
}

pub(super) fn month_name(month: u32) -> &'static str {
    const FULL: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    FULL.get(month.saturating_sub(1) as usize).copied().unwrap_or("?")
}

pub(super) fn weekday_name(day: u32) -> &'static str {
    const FULL: [&str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];
    FULL.get(day as usize).copied().unwrap_or("?")
}
