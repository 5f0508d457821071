//! Five-field cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week`, with day-of-week
//! counted from Sunday = 0. Each field accepts `*`, comma lists, inclusive
//! ranges (`a-b`), and steps (`*/n`, `a-b/n`). Values outside the field's
//! range are dropped silently; a field left empty never matches.
//!
//! Day-of-month and day-of-week are ANDed like every other field. Classic cron
//! ORs them when both are restricted, so `0 0 13 * 5` here fires only on a
//! Friday the 13th.

use std::iter::StepBy;
use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use thiserror::Error;

/// Minutes in a (non-leap) year; the forward scan gives up after this many.
const MAX_SCAN_MINUTES: u32 = 525_600;

/// Named schedules offered to users as presets.
pub const COMMON_SCHEDULES: &[(&str, &str)] = &[
    ("every_minute", "* * * * *"),
    ("every_5_minutes", "*/5 * * * *"),
    ("every_15_minutes", "*/15 * * * *"),
    ("every_30_minutes", "*/30 * * * *"),
    ("hourly", "0 * * * *"),
    ("daily", "0 0 * * *"),
    ("daily_9am", "0 9 * * *"),
    ("weekly", "0 0 * * 0"),
    ("monthly", "0 0 1 * *"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression must have 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field token '{token}'")]
    InvalidToken { field: &'static str, token: String },

    #[error("step must be positive in {field} field token '{token}'")]
    ZeroStep { field: &'static str, token: String },
}

/// Accepted values of one field, as a bitmask over 0..=63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet(u64);

impl FieldSet {
    fn insert(&mut self, value: u32) {
        self.0 |= 1 << value;
    }

    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Accepted values in ascending order.
    pub fn values(&self) -> Vec<u32> {
        (0..64).filter(|v| self.contains(*v)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const WEEKDAY: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 6 };

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub minutes: FieldSet,
    pub hours: FieldSet,
    pub days: FieldSet,
    pub months: FieldSet,
    pub weekdays: FieldSet,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = parts.as_slice() else {
            return Err(CronError::FieldCount(parts.len()));
        };

        Ok(Self {
            minutes: parse_field(minute, MINUTE)?,
            hours: parse_field(hour, HOUR)?,
            days: parse_field(day, DAY)?,
            months: parse_field(month, MONTH)?,
            weekdays: parse_field(weekday, WEEKDAY)?,
        })
    }

    /// True when every field accepts the corresponding component of `at`.
    pub fn matches<T: Datelike + Timelike>(&self, at: &T) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.days.contains(at.day())
            && self.months.contains(at.month())
            && self.weekdays.contains(at.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `from`, scanning at most a year.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(from) + TimeDelta::minutes(1);
        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += TimeDelta::minutes(1);
        }
        None
    }
}

impl std::str::FromStr for Schedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

/// Does `expr` match `at`? Unparseable expressions never match.
pub fn matches<T: Datelike + Timelike>(expr: &str, at: &T) -> bool {
    match Schedule::parse(expr) {
        Ok(schedule) => schedule.matches(at),
        Err(e) => {
            tracing::debug!(%expr, error = %e, "Ignoring unparseable schedule");
            false
        }
    }
}

/// Next minute after `from` matched by `expr`.
///
/// Returns `from + 365 days` when the expression is invalid or nothing
/// matches within a year.
pub fn next_match(expr: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    Schedule::parse(expr)
        .ok()
        .and_then(|s| s.next_after(from))
        .unwrap_or_else(|| from + TimeDelta::days(365))
}

pub fn validate(expr: &str) -> bool {
    Schedule::parse(expr).is_ok()
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<FieldSet, CronError> {
    let mut set = FieldSet::default();
    for token in field.split(',') {
        for value in parse_token(token.trim(), spec)? {
            if (spec.min..=spec.max).contains(&value) {
                set.insert(value);
            }
        }
    }
    Ok(set)
}

/// Expand one comma-separated token. The upper bound is clamped to the
/// field maximum; values below the minimum are dropped by the caller.
fn parse_token(token: &str, spec: FieldSpec) -> Result<StepBy<RangeInclusive<u32>>, CronError> {
    let invalid = || CronError::InvalidToken {
        field: spec.name,
        token: token.to_string(),
    };
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());

    let (range, step) = match token.split_once('/') {
        Some((range, step)) => {
            let step = number(step)?;
            if step == 0 {
                return Err(CronError::ZeroStep {
                    field: spec.name,
                    token: token.to_string(),
                });
            }
            (range, step)
        }
        None => (token, 1),
    };

    let (start, end) = if range == "*" {
        (spec.min, spec.max)
    } else if let Some((a, b)) = range.split_once('-') {
        (number(a)?, number(b)?)
    } else {
        // A bare value with a step (`5/10`) still means just that value.
        let v = number(range)?;
        (v, v)
    };

    // A reversed range (`10-5`) or a start past the maximum yields nothing.
    Ok((start..=end.min(spec.max)).step_by(step as usize))
}
