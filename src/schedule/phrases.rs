//! Human schedule phrases normalized to five-field cron expressions.
//!
//! Phrases are matched case-insensitively with collapsed whitespace. A
//! string that already looks like a five-field expression passes through
//! unchanged. `reboot`/`startup` normalize to the [`REBOOT_MARKER`], which
//! the launchd adapter turns into a run-at-load trigger.

use crate::error::{CronError, Result};

/// Marker for run-at-load schedules (`@reboot` in cron dialects).
pub const REBOOT_MARKER: &str = "@reboot";

/// Cron expression that never fires (February 30th).
pub const NEVER_EXPR: &str = "0 0 30 2 *";

/// Normalize a schedule string to a five-field cron expression or the
/// [`REBOOT_MARKER`].
pub fn parse_cron_expression(input: &str) -> Result<String> {
    let normalized = normalize(input);
    if normalized.is_empty() {
        return Err(CronError::Schedule("schedule must not be empty".to_owned()));
    }

    if normalized == "@reboot" || normalized == "reboot" || normalized == "startup" {
        return Ok(REBOOT_MARKER.to_owned());
    }
    if let Some(expr) = five_field_passthrough(&normalized) {
        return Ok(expr);
    }
    if let Some(expr) = fixed_phrase(&normalized) {
        return Ok(expr.to_owned());
    }
    if let Some(expr) = quantified_phrase(&normalized)? {
        return Ok(expr);
    }
    if let Some(rest) = normalized.strip_prefix("at ") {
        let (hour, minute) = parse_time(rest)?;
        return Ok(format!("{minute} {hour} * * *"));
    }
    if let Some(rest) = normalized.strip_prefix("on ") {
        return on_phrase(rest);
    }

    Err(CronError::Schedule(format!(
        "unrecognized schedule: '{}'",
        input.trim()
    )))
}

/// Lowercase, trim, collapse runs of whitespace to single spaces.
fn normalize(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A string of five fields each matching `^[*0-9,\-/LW#]+$` passes
/// through. Unsupported symbols are rejected later by the evaluator.
fn five_field_passthrough(s: &str) -> Option<String> {
    let fields: Vec<&str> = s.split(' ').collect();
    if fields.len() != 5 {
        return None;
    }
    let valid = fields.iter().all(|f| {
        !f.is_empty()
            && f.chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '*' | ',' | '-' | '/' | 'l' | 'w' | '#'))
    });
    if !valid {
        return None;
    }
    // Canonical uppercase for the L/W markers.
    Some(fields.join(" ").to_uppercase())
}

fn fixed_phrase(s: &str) -> Option<&'static str> {
    let expr = match s {
        "every minute" => "* * * * *",
        "every hour" | "hourly" => "0 * * * *",
        "every day" | "daily" => "0 0 * * *",
        "every week" | "weekly" => "0 0 * * 0",
        "every month" | "monthly" => "0 0 1 * *",
        "every year" | "yearly" | "annually" => "0 0 1 1 *",
        "midnight" => "0 0 * * *",
        "noon" => "0 12 * * *",
        "morning" => "0 9 * * *",
        "evening" => "0 18 * * *",
        "never" => NEVER_EXPR,
        "business hours" => "0 9-17 * * 1-5",
        "first day of month" => "0 0 1 * *",
        "middle of month" => "0 0 15 * *",
        "last day of month" => "0 0 L * *",
        "weekdays" => "0 0 * * 1-5",
        "weekends" => "0 0 * * 0,6",
        _ => return weekday_number(s).map(weekday_midnight),
    };
    Some(expr)
}

fn weekday_midnight(day: u32) -> &'static str {
    match day {
        0 => "0 0 * * 0",
        1 => "0 0 * * 1",
        2 => "0 0 * * 2",
        3 => "0 0 * * 3",
        4 => "0 0 * * 4",
        5 => "0 0 * * 5",
        _ => "0 0 * * 6",
    }
}

fn weekday_number(name: &str) -> Option<u32> {
    let day = match name {
        "sunday" | "sun" => 0,
        "monday" | "mon" => 1,
        "tuesday" | "tue" | "tues" => 2,
        "wednesday" | "wed" => 3,
        "thursday" | "thu" | "thurs" => 4,
        "friday" | "fri" => 5,
        "saturday" | "sat" => 6,
        _ => return None,
    };
    Some(day)
}

/// `[every] N <unit>[s]` — e.g. "every 5 minutes", "2 hours".
fn quantified_phrase(s: &str) -> Result<Option<String>> {
    let body = s.strip_prefix("every ").unwrap_or(s);
    let Some((count, unit)) = body.split_once(' ') else {
        return Ok(None);
    };
    let Ok(n) = count.parse::<u32>() else {
        return Ok(None);
    };
    let unit = unit.strip_suffix('s').unwrap_or(unit);

    let expr = match unit {
        "minute" => match n {
            0 => return Err(too_small(s)),
            1 => "* * * * *".to_owned(),
            2..=59 => format!("*/{n} * * * *"),
            _ => return Err(too_coarse(s, "minutes", 59)),
        },
        "hour" => match n {
            0 => return Err(too_small(s)),
            1 => "0 * * * *".to_owned(),
            2..=23 => format!("0 */{n} * * *"),
            _ => return Err(too_coarse(s, "hours", 23)),
        },
        "day" => match n {
            0 => return Err(too_small(s)),
            1 => "0 0 * * *".to_owned(),
            2..=31 => format!("0 0 */{n} * *"),
            _ => return Err(too_coarse(s, "days", 31)),
        },
        "week" => match n {
            0 => return Err(too_small(s)),
            1 => "0 0 * * 0".to_owned(),
            2..=4 => format!("0 0 */{} * *", n * 7),
            _ => return Err(too_coarse(s, "weeks", 4)),
        },
        "month" => match n {
            0 => return Err(too_small(s)),
            1 => "0 0 1 * *".to_owned(),
            2..=12 => format!("0 0 1 */{n} *"),
            _ => return Err(too_coarse(s, "months", 12)),
        },
        _ => return Ok(None),
    };
    Ok(Some(expr))
}

fn too_small(s: &str) -> CronError {
    CronError::Schedule(format!("schedule '{s}' must repeat at least once per unit"))
}

fn too_coarse(s: &str, unit: &str, max: u32) -> CronError {
    CronError::Schedule(format!(
        "schedule '{s}' exceeds {max} {unit}; use an interval instead"
    ))
}

/// `on <list|Nth of month> [at H:MM[ am|pm]]`.
fn on_phrase(rest: &str) -> Result<String> {
    let (subject, time) = match rest.split_once(" at ") {
        Some((subject, time)) => (subject.trim(), Some(time.trim())),
        None => (rest.trim(), None),
    };
    let (hour, minute) = match time {
        Some(time) => parse_time(time)?,
        None => (0, 0),
    };

    if let Some(day) = ordinal_of_month(subject)? {
        return Ok(format!("{minute} {hour} {day} * *"));
    }

    let days = weekday_list(subject)?;
    Ok(format!("{minute} {hour} * * {days}"))
}

/// `<N>(st|nd|rd|th) of month` → day-of-month, or `None` when the subject
/// is not an ordinal phrase.
fn ordinal_of_month(subject: &str) -> Result<Option<u32>> {
    let Some(ordinal) = subject.strip_suffix(" of month") else {
        return Ok(None);
    };
    let digits: String = ordinal.chars().take_while(char::is_ascii_digit).collect();
    let suffix = &ordinal[digits.len()..];
    if digits.is_empty() || !matches!(suffix, "st" | "nd" | "rd" | "th") {
        return Err(CronError::Schedule(format!(
            "invalid day-of-month phrase '{subject}'"
        )));
    }
    let day: u32 = digits
        .parse()
        .map_err(|_| CronError::Schedule(format!("invalid day-of-month '{digits}'")))?;
    if !(1..=31).contains(&day) {
        return Err(CronError::Schedule(format!(
            "day-of-month {day} is out of range 1-31"
        )));
    }
    Ok(Some(day))
}

/// Comma-separated weekday names plus the words `weekdays`/`weekends`.
fn weekday_list(subject: &str) -> Result<String> {
    // Keep the compact range forms when the list is a single word.
    match subject {
        "weekdays" => return Ok("1-5".to_owned()),
        "weekends" => return Ok("0,6".to_owned()),
        _ => {}
    }

    let mut days: Vec<u32> = Vec::new();
    for item in subject.split(',') {
        let item = item.trim();
        match item {
            "weekdays" => days.extend(1..=5),
            "weekends" => days.extend([0, 6]),
            _ => match weekday_number(item) {
                Some(day) => days.push(day),
                None => {
                    return Err(CronError::Schedule(format!(
                        "unknown weekday '{item}'"
                    )));
                }
            },
        }
    }
    days.sort_unstable();
    days.dedup();
    if days.is_empty() {
        return Err(CronError::Schedule("empty weekday list".to_owned()));
    }
    Ok(days
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

/// `H[:MM][ am|pm]`. `12 am` is hour 0, `12 pm` is hour 12, and `pm`
/// otherwise adds 12 to a 1–11 hour.
fn parse_time(s: &str) -> Result<(u32, u32)> {
    let s = s.trim();
    let (clock, meridiem) = if let Some(clock) = s.strip_suffix("am") {
        (clock.trim_end(), Some(false))
    } else if let Some(clock) = s.strip_suffix("pm") {
        (clock.trim_end(), Some(true))
    } else {
        (s, None)
    };

    let (hour_str, minute_str) = match clock.split_once(':') {
        Some((h, m)) => (h, m),
        None => (clock, "0"),
    };
    let hour: u32 = hour_str
        .trim()
        .parse()
        .map_err(|_| bad_time(s))?;
    let minute: u32 = minute_str
        .trim()
        .parse()
        .map_err(|_| bad_time(s))?;
    if minute > 59 {
        return Err(bad_time(s));
    }

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return Err(bad_time(s));
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, false) => h,
                (h, true) => h + 12,
            }
        }
        None => {
            if hour > 23 {
                return Err(bad_time(s));
            }
            hour
        }
    };
    Ok((hour, minute))
}

fn bad_time(s: &str) -> CronError {
    CronError::Schedule(format!("invalid time '{s}'"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn parse(s: &str) -> String {
        parse_cron_expression(s).unwrap()
    }

    #[test]
    fn period_words() {
        assert_eq!(parse("every minute"), "* * * * *");
        assert_eq!(parse("every hour"), "0 * * * *");
        assert_eq!(parse("hourly"), "0 * * * *");
        assert_eq!(parse("every day"), "0 0 * * *");
        assert_eq!(parse("daily"), "0 0 * * *");
        assert_eq!(parse("every week"), "0 0 * * 0");
        assert_eq!(parse("weekly"), "0 0 * * 0");
        assert_eq!(parse("every month"), "0 0 1 * *");
        assert_eq!(parse("monthly"), "0 0 1 * *");
        assert_eq!(parse("every year"), "0 0 1 1 *");
        assert_eq!(parse("yearly"), "0 0 1 1 *");
        assert_eq!(parse("annually"), "0 0 1 1 *");
    }

    #[test]
    fn quantified_phrases() {
        assert_eq!(parse("every 5 minutes"), "*/5 * * * *");
        assert_eq!(parse("every 2 hours"), "0 */2 * * *");
        assert_eq!(parse("every 3 days"), "0 0 */3 * *");
        assert_eq!(parse("every 2 weeks"), "0 0 */14 * *");
        assert_eq!(parse("every 6 months"), "0 0 1 */6 *");
        // "every" is optional.
        assert_eq!(parse("5 minutes"), "*/5 * * * *");
        assert_eq!(parse("2 hours"), "0 */2 * * *");
        // A count of one collapses to the period form.
        assert_eq!(parse("every 1 minute"), "* * * * *");
        assert_eq!(parse("every 1 hour"), "0 * * * *");
    }

    #[test]
    fn quantified_out_of_range_is_an_error() {
        assert!(parse_cron_expression("every 90 minutes").is_err());
        assert!(parse_cron_expression("every 0 hours").is_err());
        assert!(parse_cron_expression("every 13 months").is_err());
    }

    #[test]
    fn time_phrases() {
        assert_eq!(parse("at 7:30"), "30 7 * * *");
        assert_eq!(parse("at 16:45"), "45 16 * * *");
        assert_eq!(parse("at 9:00 am"), "0 9 * * *");
        assert_eq!(parse("at 5:15 pm"), "15 17 * * *");
        assert_eq!(parse("at 12:30 am"), "30 0 * * *");
        assert_eq!(parse("at 12:30 pm"), "30 12 * * *");
        assert_eq!(parse("midnight"), "0 0 * * *");
        assert_eq!(parse("noon"), "0 12 * * *");
        assert_eq!(parse("morning"), "0 9 * * *");
        assert_eq!(parse("evening"), "0 18 * * *");
    }

    #[test]
    fn weekday_phrases() {
        assert_eq!(parse("sunday"), "0 0 * * 0");
        assert_eq!(parse("monday"), "0 0 * * 1");
        assert_eq!(parse("saturday"), "0 0 * * 6");
        assert_eq!(parse("weekdays"), "0 0 * * 1-5");
        assert_eq!(parse("weekends"), "0 0 * * 0,6");
    }

    #[test]
    fn on_list_phrases() {
        assert_eq!(
            parse("on monday,wednesday,friday at 9:00"),
            "0 9 * * 1,3,5"
        );
        assert_eq!(parse("on monday, friday at 5 pm"), "0 17 * * 1,5");
        assert_eq!(parse("on weekdays at 8:15"), "15 8 * * 1-5");
        assert_eq!(parse("on weekends at 10:00 am"), "0 10 * * 0,6");
        // Mixed lists expand the shorthand words.
        assert_eq!(parse("on weekends,monday at 6:00"), "0 6 * * 0,1,6");
        // Without a time, midnight.
        assert_eq!(parse("on tuesday"), "0 0 * * 2");
    }

    #[test]
    fn monthly_phrases() {
        assert_eq!(parse("on 15th of month at 3:00 pm"), "0 15 15 * *");
        assert_eq!(parse("on 1st of month at 9:00"), "0 9 1 * *");
        assert_eq!(parse("on 2nd of month"), "0 0 2 * *");
        assert_eq!(parse("on 3rd of month at 12:00 am"), "0 0 3 * *");
        assert_eq!(parse("first day of month"), "0 0 1 * *");
        assert_eq!(parse("middle of month"), "0 0 15 * *");
        assert_eq!(parse("last day of month"), "0 0 L * *");
    }

    #[test]
    fn specials() {
        assert_eq!(parse("never"), NEVER_EXPR);
        assert_eq!(parse("reboot"), REBOOT_MARKER);
        assert_eq!(parse("startup"), REBOOT_MARKER);
        assert_eq!(parse("business hours"), "0 9-17 * * 1-5");
    }

    #[test]
    fn passthrough_five_field() {
        assert_eq!(parse("*/5 * * * *"), "*/5 * * * *");
        assert_eq!(parse("0 9 * * 1-5"), "0 9 * * 1-5");
        assert_eq!(parse("0 0 l * *"), "0 0 L * *");
        // Extra whitespace collapses.
        assert_eq!(parse("  0   9 * * 1  "), "0 9 * * 1");
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(parse("  Every 5 MINUTES "), "*/5 * * * *");
        assert_eq!(parse("At 12:30 PM"), "30 12 * * *");
        assert_eq!(parse("ON MONDAY,FRIDAY AT 9:00"), "0 9 * * 1,5");
    }

    #[test]
    fn garbage_is_rejected() {
        for s in ["", "whenever", "every blue moon", "at 25:00", "at 9:75", "on 32nd of month"] {
            assert!(parse_cron_expression(s).is_err(), "{s:?} should fail");
        }
    }

    #[test]
    fn am_pm_mapping_edges() {
        assert_eq!(parse("at 12 am"), "0 0 * * *");
        assert_eq!(parse("at 12 pm"), "0 12 * * *");
        assert_eq!(parse("at 1 pm"), "0 13 * * *");
        assert_eq!(parse("at 11 pm"), "0 23 * * *");
        assert!(parse_cron_expression("at 13 pm").is_err());
        assert!(parse_cron_expression("at 0 am").is_err());
    }
}
