//! Schedule model: phrase normalization, cron evaluation, due-ness.
//!
//! Interval jobs are compared by wall-clock differencing so that time spent
//! asleep accumulates into "overdue" instead of sliding the next occurrence
//! into the future. Cron jobs walk the calendar directly; the native
//! scheduler anchors them to wall time already.

pub mod cron;
pub mod phrases;

pub use cron::{CronExpr, CronField, DayOfMonth};
pub use phrases::{NEVER_EXPR, REBOOT_MARKER, parse_cron_expression};

use crate::error::{CronError, Result};
use crate::job::JobSpec;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Interval assumed for expressions whose gap cannot be computed.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// A job's timing, after normalization.
#[derive(Debug, Clone)]
pub enum Timing {
    /// Fixed interval in wall-clock time.
    Interval(Duration),
    /// Calendar schedule.
    Cron(CronExpr),
    /// Run at login/load only.
    Reboot,
}

/// Resolve a job's timing from its definition.
pub fn timing_for(spec: &JobSpec) -> Result<Timing> {
    if let Some(ms) = spec.interval {
        return Ok(Timing::Interval(Duration::from_millis(ms)));
    }
    let Some(schedule) = spec.schedule.as_deref() else {
        return Err(CronError::Config(format!(
            "job '{}' has neither schedule nor interval",
            spec.id
        )));
    };
    let normalized = parse_cron_expression(schedule)?;
    if normalized == REBOOT_MARKER {
        return Ok(Timing::Reboot);
    }
    Ok(Timing::Cron(CronExpr::parse(&normalized)?))
}

/// Effective interval between runs, used for due-ness and stale-lock
/// thresholds. Cron schedules report the gap between their next two fires;
/// irregular or never-firing expressions fall back to 24 hours.
pub fn effective_interval(spec: &JobSpec) -> Result<Duration> {
    match timing_for(spec)? {
        Timing::Interval(interval) => Ok(interval),
        Timing::Reboot => Ok(FALLBACK_INTERVAL),
        Timing::Cron(expr) => Ok(cron_gap(&expr, Local::now().naive_local())
            .unwrap_or(FALLBACK_INTERVAL)),
    }
}

/// Gap between the next two fires after `from`.
pub(crate) fn cron_gap(expr: &CronExpr, from: NaiveDateTime) -> Option<Duration> {
    let t1 = expr.next_fire(from)?;
    let t2 = expr.next_fire(t1.checked_add_signed(chrono::TimeDelta::minutes(1))?)?;
    (t2 - t1).to_std().ok()
}

/// Whether the job is due: never ran, or the effective interval has
/// elapsed since the last successful run.
pub fn should_run(spec: &JobSpec, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool> {
    let Some(last) = last_run else {
        return Ok(true);
    };
    let interval = effective_interval(spec)?;
    let elapsed = now.signed_duration_since(last);
    let interval = chrono::TimeDelta::from_std(interval)
        .unwrap_or_else(|_| chrono::TimeDelta::MAX);
    Ok(elapsed >= interval)
}

/// When the job fires next. Cron: the next calendar fire after `now`.
/// Interval: `last_run + interval`, or `now` if it never ran. Run-at-load
/// schedules have no next time.
pub fn next_run(
    spec: &JobSpec,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match timing_for(spec)? {
        Timing::Reboot => Ok(None),
        Timing::Interval(interval) => {
            let delta = chrono::TimeDelta::from_std(interval)
                .unwrap_or_else(|_| chrono::TimeDelta::zero());
            Ok(Some(last_run.map_or(now, |last| last + delta)))
        }
        Timing::Cron(expr) => {
            let local = now.with_timezone(&Local);
            Ok(next_fire_local(&expr, local).map(|t| t.with_timezone(&Utc)))
        }
    }
}

/// Next fire in the system local time zone.
///
/// A fire landing inside a DST spring-forward gap is skipped; an ambiguous
/// fall-back time resolves to the earlier instant.
pub fn next_fire_local(expr: &CronExpr, from: DateTime<Local>) -> Option<DateTime<Local>> {
    let mut naive = from.naive_local();
    for _ in 0..4 {
        let t = expr.next_fire(naive)?;
        match Local.from_local_datetime(&t) {
            chrono::LocalResult::Single(dt) => return Some(dt),
            chrono::LocalResult::Ambiguous(earlier, _) => return Some(earlier),
            chrono::LocalResult::None => {
                naive = t.checked_add_signed(chrono::TimeDelta::minutes(1))?;
            }
        }
    }
    None
}

/// Short human description for list/status output.
#[must_use]
pub fn describe(spec: &JobSpec) -> String {
    if let Some(ms) = spec.interval {
        let secs = ms / 1000;
        if secs % 3600 == 0 && secs >= 3600 {
            return format!("every {}h", secs / 3600);
        }
        if secs % 60 == 0 && secs >= 60 {
            return format!("every {}m", secs / 60);
        }
        return format!("every {secs}s");
    }
    spec.schedule.clone().unwrap_or_else(|| "unscheduled".to_owned())
}
