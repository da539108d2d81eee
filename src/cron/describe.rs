//! Human-readable rendering of parsed expressions.

use super::field::{month_name, weekday_name, CronField};
use super::ParsedCron;

const WEEKDAYS: [u32; 5] = [1, 2, 3, 4, 5];
const WEEKENDS: [u32; 2] = [0, 6];

impl ParsedCron {
    /// Summary such as "At 09:00 on weekdays" or "Every 15 minutes"
    pub fn describe(&self) -> String {
        let mut parts = vec![self.describe_time()];

        if let Some(days) = self.describe_days() {
            parts.push(days);
        }

        if !self.month.is_wildcard {
            let months: Vec<&str> = self.month.values.iter().map(|m| month_name(*m)).collect();
            parts.push(format!("in {}", months.join(", ")));
        }

        parts.join(" ")
    }

    fn describe_time(&self) -> String {
        let minute = &self.minute;
        let hour = &self.hour;

        match (minute.is_wildcard, hour.is_wildcard) {
            (true, true) => "Every minute".to_string(),
            (true, false) => format!("Every minute during hours {}", join(hour)),
            (false, true) => {
                if let Some(n) = minute.every() {
                    format!("Every {} minutes", n)
                } else if let Some(m) = minute.single() {
                    format!("At minute {} of every hour", m)
                } else {
                    format!("At minutes {} of every hour", join(minute))
                }
            }
            (false, false) => match (minute.single(), hour.single(), hour.every()) {
                (Some(m), Some(h), _) => format!("At {:02}:{:02}", h, m),
                (Some(m), None, Some(n)) => format!("At minute {} every {} hours", m, n),
                (Some(m), None, None) if hour.values.len() <= 6 => {
                    let times: Vec<String> = hour
                        .values
                        .iter()
                        .map(|h| format!("{:02}:{:02}", h, m))
                        .collect();
                    format!("At {}", times.join(", "))
                }
                _ => format!("At minutes {} past hours {}", join(minute), join(hour)),
            },
        }
    }

    fn describe_days(&self) -> Option<String> {
        let dom = (!self.day_of_month.is_wildcard)
            .then(|| format!("on day {} of the month", join(&self.day_of_month)));
        let dow = (!self.day_of_week.is_wildcard).then(|| describe_weekdays(&self.day_of_week));

        match (dom, dow) {
            (Some(dom), Some(dow)) => Some(format!("{} or {}", dom, dow)),
            (Some(dom), None) => Some(dom),
            (None, Some(dow)) => Some(dow),
            (None, None) => None,
        }
    }
}

fn describe_weekdays(field: &CronField) -> String {
    let values = field.to_vec();
    if values == WEEKDAYS {
        "on weekdays".to_string()
    } else if values == WEEKENDS {
        "on weekends".to_string()
    } else {
        let names: Vec<&str> = values.iter().map(|d| weekday_name(*d)).collect();
        format!("on {}", names.join(", "))
    }
}

fn join(field: &CronField) -> String {
    field
        .values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
