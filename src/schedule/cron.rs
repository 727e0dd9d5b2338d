//! Five-field cron parsing and next-fire evaluation.
//!
//! Supports `*`, comma lists, `a-b` ranges, `*/n` and `a-b/n` steps, and
//! `L` in the day-of-month field. Fires are whole minutes. When both
//! day-of-month and weekday are restricted, both must match — the same
//! conjunction launchd applies to `StartCalendarInterval` records, so the
//! evaluator and the installed triggers agree.

use crate::error::{CronError, Result};
use chrono::{Datelike, Days, NaiveDateTime, Timelike};

/// Upper bound on evaluation steps. An expression that matches nothing
/// within this many day/month hops never fires (e.g. February 30th).
const MAX_STEPS: u32 = 20_000;

/// One cron field, expanded to its value set at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*` — matches everything.
    Any,
    /// Sorted, deduplicated list of admissible values.
    Values(Vec<u32>),
}

impl CronField {
    /// Whether `v` is admissible.
    #[must_use]
    pub fn matches(&self, v: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(values) => values.binary_search(&v).is_ok(),
        }
    }

    /// The expanded value list, or `None` for a wildcard.
    #[must_use]
    pub fn values(&self) -> Option<&[u32]> {
        match self {
            Self::Any => None,
            Self::Values(values) => Some(values),
        }
    }
}

/// Day-of-month field: a normal field or the `L` (last day) marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOfMonth {
    /// Plain field.
    Field(CronField),
    /// `L` — the last day of whatever month is being examined.
    Last,
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    /// Minute field (0–59).
    pub minute: CronField,
    /// Hour field (0–23).
    pub hour: CronField,
    /// Day-of-month field (1–31 or `L`).
    pub day: DayOfMonth,
    /// Month field (1–12).
    pub month: CronField,
    /// Weekday field (0–6, Sunday = 0; an input 7 normalizes to 0).
    pub weekday: CronField,
    source: String,
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl CronExpr {
    /// Parse a five-field expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::Schedule(format!(
                "cron expression '{expr}' must have exactly 5 fields, got {}",
                fields.len()
            )));
        }

        let minute = parse_field(fields[0], 0, 59, false)?;
        let hour = parse_field(fields[1], 0, 23, false)?;
        let day = if fields[2].eq_ignore_ascii_case("L") {
            DayOfMonth::Last
        } else {
            DayOfMonth::Field(parse_field(fields[2], 1, 31, false)?)
        };
        let month = parse_field(fields[3], 1, 12, false)?;
        let weekday = parse_field(fields[4], 0, 7, true)?;

        Ok(Self {
            minute,
            hour,
            day,
            month,
            weekday,
            source: fields.join(" "),
        })
    }

    /// Smallest fire time `t' >= from`, or `None` when the expression
    /// never fires within the evaluation horizon.
    #[must_use]
    pub fn next_fire(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = ceil_to_minute(from)?;

        for _ in 0..MAX_STEPS {
            if !self.month.matches(t.month()) {
                t = first_minute_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t
                    .date()
                    .checked_add_days(Days::new(1))?
                    .and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.matches(t.hour()) {
                t = t
                    .with_minute(0)?
                    .checked_add_signed(chrono::TimeDelta::hours(1))?;
                continue;
            }
            if !self.minute.matches(t.minute()) {
                t = t.checked_add_signed(chrono::TimeDelta::minutes(1))?;
                continue;
            }
            return Some(t);
        }
        None
    }

    /// Day gate. Day-of-month and weekday are ANDed when both are
    /// restricted, matching launchd calendar-interval semantics.
    fn day_matches(&self, t: &NaiveDateTime) -> bool {
        let dom_ok = match &self.day {
            DayOfMonth::Last => t.day() == last_day_of_month(t.year(), t.month()),
            DayOfMonth::Field(field) => field.matches(t.day()),
        };
        let dow_ok = self.weekday.matches(t.weekday().num_days_from_sunday());
        dom_ok && dow_ok
    }
}

/// Parse one field into its expanded value set.
///
/// `wrap_seven` folds an input of 7 to 0 (weekday field, where both mean
/// Sunday).
fn parse_field(field: &str, min: u32, max: u32, wrap_seven: bool) -> Result<CronField> {
    if field == "*" {
        return Ok(CronField::Any);
    }
    if field.contains('W') || field.contains('#') {
        return Err(CronError::Schedule(format!(
            "cron field '{field}' uses an unsupported symbol (W and # are not evaluated)"
        )));
    }

    let mut values: Vec<u32> = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| bad_field(field))?;
                if step == 0 {
                    return Err(bad_field(field));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| bad_field(field))?;
            let b: u32 = b.parse().map_err(|_| bad_field(field))?;
            (a, b)
        } else {
            let v: u32 = range.parse().map_err(|_| bad_field(field))?;
            (v, v)
        };

        if lo > hi || lo < min || hi > max {
            return Err(bad_field(field));
        }

        let mut v = lo;
        while v <= hi {
            values.push(if wrap_seven && v == 7 { 0 } else { v });
            v += step;
        }
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(bad_field(field));
    }
    Ok(CronField::Values(values))
}

fn bad_field(field: &str) -> CronError {
    CronError::Schedule(format!("invalid cron field '{field}'"))
}

/// Days in the given month.
#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    for day in (28..=31).rev() {
        if chrono::NaiveDate::from_ymd_opt(year, month, day).is_some() {
            return day;
        }
    }
    28
}

fn ceil_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let truncated = t.with_second(0)?.with_nanosecond(0)?;
    if truncated < t {
        truncated.checked_add_signed(chrono::TimeDelta::minutes(1))
    } else {
        Some(truncated)
    }
}

fn first_minute_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    chrono::NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
