//! Cron expression parser.
//!
//! Supports "SEC MIN HOUR DOM MON DOW" (6 fields) and "MIN HOUR DOM MON DOW"
//! (5 fields, seconds fixed at 0). Each field accepts `*`, `?`, `N`, `A-B`,
//! `*/N`, `A/N`, `A-B/N` and comma lists; months and weekdays also accept
//! three-letter names, and weekday `7` is Sunday. `@yearly`, `@annually`,
//! `@monthly`, `@weekly`, `@daily`, `@midnight` and `@hourly` are shorthands.
//!
//! Matching runs on local wall-clock time in the schedule's timezone.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// How far ahead `next_after` searches before concluding the expression
/// never fires (e.g. `0 0 0 30 2 *`).
const SEARCH_YEARS: i32 = 5;

/// A parsed cron expression. Each field is a bitset of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset of `names[0]` (1 for months, 0 for weekdays).
    name_base: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], name_base: 0 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY_OF_MONTH: FieldSpec =
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: FieldSpec =
    FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, name_base: 1 };
// 7 is accepted and folded onto 0 (Sunday).
const DAY_OF_WEEK: FieldSpec =
    FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, name_base: 0 };

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let trimmed = expression.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * 0",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            other if other.starts_with('@') => {
                return Err(format!("unknown descriptor '{trimmed}'"));
            }
            _ => trimmed,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let fields: Vec<&str> = match fields.len() {
            6 => fields,
            5 => std::iter::once("0").chain(fields).collect(),
            n => {
                return Err(format!(
                    "expected 5 or 6 fields (SEC MIN HOUR DOM MON DOW), got {n} in '{trimmed}'"
                ))
            }
        };

        let mut days_of_week = parse_field(fields[5], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: trimmed.to_string(),
            seconds: parse_field(fields[0], &SECOND)?,
            minutes: parse_field(fields[1], &MINUTE)?,
            hours: parse_field(fields[2], &HOUR)?,
            days_of_month: parse_field(fields[3], &DAY_OF_MONTH)?,
            months: parse_field(fields[4], &MONTH)?,
            days_of_week,
            dom_restricted: !is_wildcard(fields[3]),
            dow_restricted: !is_wildcard(fields[5]),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First instant strictly after `after` matching the expression, in the
    /// same timezone. Local times skipped by a DST gap never fire; repeated
    /// local times fire once, at the earlier instant.
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        let tz = after.timezone();
        let start = after.naive_local();
        let limit_year = start.year() + SEARCH_YEARS;
        let mut t = start.with_nanosecond(0)? + Duration::seconds(1);

        loop {
            if t.year() > limit_year {
                return None;
            }
            if !has(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !has(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }

            if let Some(fire) = tz.from_local_datetime(&t).earliest() {
                if fire > *after {
                    return Some(fire);
                }
            }
            t += Duration::seconds(1);
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has(self.days_of_month, date.day());
        let dow = has(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

fn has(bits: u64, value: u32) -> bool {
    bits & (1u64 << value) != 0
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_value(raw: &str, kind: &FieldSpec) -> Result<u32, String> {
    let value = match raw.parse::<u32>() {
        Ok(n) => n,
        Err(_) => kind
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(raw))
            .map(|i| i as u32 + kind.name_base)
            .ok_or_else(|| format!("invalid {} value '{raw}'", kind.name))?,
    };
    if value < kind.min || value > kind.max {
        return Err(format!(
            "{} value {value} out of range {}-{}",
            kind.name, kind.min, kind.max
        ));
    }
    Ok(value)
}

fn parse_field(field: &str, kind: &FieldSpec) -> Result<u64, String> {
    let mut bits = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid {} step '{step}'", kind.name))?;
                if step == 0 {
                    return Err(format!("{} step must be positive", kind.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if is_wildcard(range) {
            (kind.min, kind.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (parse_value(a, kind)?, parse_value(b, kind)?);
            if a > b {
                return Err(format!("{} range {a}-{b} is reversed", kind.name));
            }
            (a, b)
        } else {
            let a = parse_value(range, kind)?;
            // "A/N" means every N starting at A.
            (a, if step.is_some() { kind.max } else { a })
        };

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            bits |= 1 << v;
        }
    }
    Ok(bits)
}
