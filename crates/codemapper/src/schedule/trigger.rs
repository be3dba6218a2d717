//! Recurrence rules: `every <N><unit>` intervals and five-field cron.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Days searched ahead for a cron match before giving up (covers leap-day rules).
const CRON_SEARCH_DAYS: u32 = 366 * 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid schedule '{0}': expected 'every <N><s|m|h|d>' or a 5-field cron expression")]
    InvalidInterval(String),
    #[error("Invalid cron expression '{spec}': {reason}")]
    InvalidCron { spec: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval { seconds: u64 },
    Cron(CronSchedule),
}

impl Trigger {
    /// Five whitespace-separated fields not starting with `every` is cron;
    /// anything else must be an interval.
    pub fn parse(spec: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        if fields.len() == 5 && !spec.trim_start().starts_with("every") {
            return CronSchedule::parse(spec).map(Trigger::Cron);
        }
        parse_interval(spec).map(|seconds| Trigger::Interval { seconds })
    }

    /// First fire time strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval { seconds } => {
                let step = Duration::try_seconds(i64::try_from(*seconds).ok()?)?;
                after.clone().checked_add_signed(step)
            }
            Trigger::Cron(cron) => cron.next_after(after),
        }
    }
}

fn interval_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^every\s+(\d+)\s*(s|m|h|d)$").ok())
        .as_ref()
}

/// `every 30m` -> 1800. `N` must be positive.
pub fn parse_interval(spec: &str) -> Result<u64, ScheduleError> {
    let invalid = || ScheduleError::InvalidInterval(spec.to_string());
    let lowered = spec.trim().to_lowercase();
    let caps = interval_regex()
        .and_then(|re| re.captures(&lowered))
        .ok_or_else(invalid)?;
    let value: u64 = caps[1].parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86_400,
    };
    value.checked_mul(unit).ok_or_else(invalid)
}

/// Parsed cron expression. Every field must match (day-of-month and
/// day-of-week are ANDed). Evaluated at minute resolution in the
/// timezone of the instant passed to [`CronSchedule::next_after`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    /// Bit 0 = Sunday
    days_of_week: u8,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"],
};
// 7 is accepted as a second Sunday and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

impl CronSchedule {
    pub fn parse(spec: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        let invalid = |reason: String| ScheduleError::InvalidCron {
            spec: spec.to_string(),
            reason,
        };
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(invalid)?;
        let hours = parse_field(fields[1], &HOUR).map_err(invalid)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(invalid)?;
        let months = parse_field(fields[3], &MONTH).map_err(invalid)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(invalid)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
        })
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.months & (1 << date.month()) != 0
            && self.days_of_month & (1 << date.day()) != 0
            && self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0
    }

    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let start = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        let mut date = start.date();
        for _ in 0..CRON_SEARCH_DAYS {
            if self.matches_date(date) {
                let first_day = date == start.date();
                for hour in 0..24u32 {
                    if self.hours & (1 << hour) == 0 || (first_day && hour < start.hour()) {
                        continue;
                    }
                    for minute in 0..60u32 {
                        if self.minutes & (1 << minute) == 0 {
                            continue;
                        }
                        if first_day && hour == start.hour() && minute < start.minute() {
                            continue;
                        }
                        let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(hour, minute, 0)?);
                        // Wall-clock times skipped by a DST jump have no instant.
                        if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                            if candidate > *after {
                                return Some(candidate);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty entry in {} field", spec.name));
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", spec.name));
                }
                if step > spec.max - spec.min {
                    return Err(format!("step {} too large for {} field", step, spec.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, spec)?;
            let hi = parse_value(b, spec)?;
            if lo > hi {
                return Err(format!("descending range '{}' in {} field", range, spec.name));
            }
            (lo, hi)
        } else {
            let value = parse_value(range, spec)?;
            // `5/15` runs from 5 to the field maximum.
            (value, if step.is_some() { spec.max } else { value })
        };

        let step = step.unwrap_or(1);
        let mut value = lo;
        while value <= hi {
            mask |= 1 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }
    Ok(mask)
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lowered = token.to_ascii_lowercase();
    if let Some(idx) = spec.names.iter().position(|name| *name == lowered) {
        return Ok(idx as u32 + spec.min);
    }
    let value: u32 = token
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", token, spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}
