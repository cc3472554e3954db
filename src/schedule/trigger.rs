use std::fmt;

use chrono::{Datelike, Duration, Local, NaiveTime, TimeZone, Weekday};
use log::warn;
use pest::Parser;
use thiserror::Error;

use super::cron::CronSchedule;
use super::{Rule, ScheduleParser};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub(crate) struct ScheduleParseError(pub(crate) String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minutes,
    Hours,
}

impl IntervalUnit {
    /// Length of `value` units in seconds, `None` on overflow
    pub fn to_seconds(self, value: i64) -> Option<i64> {
        match self {
            Self::Minutes => value.checked_mul(60),
            Self::Hours => value.checked_mul(3600),
        }
    }
}

/// When a scheduled task fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval { unit: IntervalUnit, every: i64 },
    DailyAt { hour: u32, minute: u32 },
    WeeklyAt { weekday: Weekday, hour: u32, minute: u32 },
    Cron(CronSchedule),
}

impl Trigger {
    pub const HOURLY: Trigger = Trigger::Interval {
        unit: IntervalUnit::Hours,
        every: 1,
    };

    /// Trigger for a schedule string, falling back to hourly when the
    /// string can't be understood. Never fails.
    pub fn from_spec(spec: &str) -> Trigger {
        match parse_schedule(spec) {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!("Invalid schedule '{}' ({}), running hourly instead", spec, e);
                Trigger::HOURLY
            }
        }
    }

    pub fn is_valid_spec(spec: &str) -> bool {
        parse_schedule(spec).is_ok()
    }

    /// Next fire time strictly after `from_time` (unix seconds). `None` only
    /// for cron expressions that can never match a real date.
    pub fn next_after(&self, from_time: i64) -> Option<i64> {
        match self {
            Trigger::Interval { unit, every } => unit
                .to_seconds(*every)
                .and_then(|secs| from_time.checked_add(secs)),
            Trigger::DailyAt { hour, minute } => next_local_time(from_time, *hour, *minute, |_| true),
            Trigger::WeeklyAt {
                weekday,
                hour,
                minute,
            } => next_local_time(from_time, *hour, *minute, |day| day == *weekday),
            Trigger::Cron(cron) => cron.next_after(from_time),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { unit, every } => {
                let unit = match (unit, every) {
                    (IntervalUnit::Minutes, 1) => "minute",
                    (IntervalUnit::Minutes, _) => "minutes",
                    (IntervalUnit::Hours, 1) => "hour",
                    (IntervalUnit::Hours, _) => "hours",
                };
                write!(f, "interval[every {} {}]", every, unit)
            }
            Trigger::DailyAt { hour, minute } => write!(f, "daily[{:02}:{:02}]", hour, minute),
            Trigger::WeeklyAt {
                weekday,
                hour,
                minute,
            } => write!(f, "weekly[{} {:02}:{:02}]", weekday, hour, minute),
            Trigger::Cron(cron) => write!(f, "cron[{}]", cron.expr()),
        }
    }
}

/// Parse a schedule string. Case and surrounding whitespace are ignored.
pub(crate) fn parse_schedule(spec: &str) -> Result<Trigger, ScheduleParseError> {
    let normalized = spec.trim().to_lowercase();
    let mut pairs = ScheduleParser::parse(Rule::schedule, &normalized)
        .map_err(|e| ScheduleParseError(format!("unrecognized schedule: {}", e.variant.message())))?;

    let body = pairs
        .next()
        .and_then(|schedule| schedule.into_inner().next())
        .ok_or_else(|| ScheduleParseError("empty schedule".to_string()))?;

    match body.as_rule() {
        Rule::hourly => Ok(Trigger::HOURLY),
        Rule::daily => Ok(Trigger::DailyAt { hour: 0, minute: 0 }),
        Rule::weekly => Ok(Trigger::WeeklyAt {
            weekday: Weekday::Mon,
            hour: 0,
            minute: 0,
        }),
        Rule::every => {
            let mut inner = body.into_inner();
            let every: i64 = inner
                .next()
                .and_then(|n| n.as_str().parse().ok())
                .ok_or_else(|| ScheduleParseError("interval count out of range".to_string()))?;
            if every == 0 {
                return Err(ScheduleParseError("interval must be at least 1".to_string()));
            }
            let unit = match inner.next().map(|u| u.as_rule()) {
                Some(Rule::minutes) => IntervalUnit::Minutes,
                Some(Rule::hours) => IntervalUnit::Hours,
                _ => return Err(ScheduleParseError("missing interval unit".to_string())),
            };
            if unit.to_seconds(every).is_none() {
                return Err(ScheduleParseError("interval count out of range".to_string()));
            }
            Ok(Trigger::Interval { unit, every })
        }
        Rule::cron => Ok(Trigger::Cron(CronSchedule::from_pair(body)?)),
        other => Err(ScheduleParseError(format!("unexpected {:?}", other))),
    }
}

fn next_local_time<F>(from_time: i64, hour: u32, minute: u32, day_ok: F) -> Option<i64>
where
    F: Fn(Weekday) -> bool,
{
    let from_local = Local.timestamp_opt(from_time, 0).single()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    // Eight days reaches the same weekday next week even when today's slot has passed
    for days_ahead in 0..=8 {
        let date = from_local.date_naive() + Duration::days(days_ahead);
        if !day_ok(date.weekday()) {
            continue;
        }
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate.timestamp() > from_time {
                return Some(candidate.timestamp());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Wednesday, January 15, 2025, 10:30:00 local time
    fn base_time() -> i64 {
        local(2025, 1, 15, 10, 30)
    }

    fn local(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
        Local
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap()
            .timestamp()
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse_schedule("hourly").unwrap(), Trigger::HOURLY);
        assert_eq!(
            parse_schedule("  DAILY ").unwrap(),
            Trigger::DailyAt { hour: 0, minute: 0 }
        );
        assert_eq!(
            parse_schedule("Weekly").unwrap(),
            Trigger::WeeklyAt {
                weekday: Weekday::Mon,
                hour: 0,
                minute: 0
            }
        );
    }

    #[test]
    fn test_every_n_units() {
        assert_eq!(
            parse_schedule("every_30_minutes").unwrap(),
            Trigger::Interval {
                unit: IntervalUnit::Minutes,
                every: 30
            }
        );
        assert_eq!(
            parse_schedule("every_6_hours").unwrap(),
            Trigger::Interval {
                unit: IntervalUnit::Hours,
                every: 6
            }
        );
        assert!(parse_schedule("every_0_minutes").is_err());
        assert!(parse_schedule("every_5_days").is_err());
        assert!(parse_schedule("every__minutes").is_err());
    }

    #[test]
    fn test_invalid_degrades_to_hourly() {
        assert_eq!(Trigger::from_spec("not a valid spec"), Trigger::HOURLY);
        assert_eq!(Trigger::from_spec(""), Trigger::HOURLY);
        assert_eq!(Trigger::from_spec("hourlyish"), Trigger::HOURLY);
        assert_eq!(Trigger::from_spec("61 * * * *"), Trigger::HOURLY);
        assert_eq!(Trigger::from_spec("* * * *"), Trigger::HOURLY);
        assert!(!Trigger::is_valid_spec("not a valid spec"));
        assert!(Trigger::is_valid_spec("*/15 9-17 * * mon-fri"));
    }

    #[test]
    fn test_oversized_interval_degrades_to_hourly() {
        assert!(parse_schedule("every_9000000000000000_hours").is_err());
        assert_eq!(Trigger::from_spec("every_9000000000000000_hours"), Trigger::HOURLY);
        assert_eq!(Trigger::from_spec("every_99999999999999999999_minutes"), Trigger::HOURLY);

        // largest count that still fits
        let max_hours = i64::MAX / 3600;
        assert!(Trigger::is_valid_spec(&format!("every_{}_hours", max_hours)));
        let trigger = Trigger::from_spec(&format!("every_{}_hours", max_hours));
        assert_eq!(trigger.next_after(base_time()), None);
    }

    #[test]
    fn test_interval_next() {
        let trigger = Trigger::from_spec("every_30_minutes");
        assert_eq!(trigger.next_after(1_000), Some(1_000 + 1_800));
        assert_eq!(Trigger::HOURLY.next_after(1_000), Some(4_600));
    }

    #[test]
    fn test_daily_next_is_tomorrow_midnight() {
        let next = Trigger::from_spec("daily").next_after(base_time()).unwrap();
        assert_eq!(next, local(2025, 1, 16, 0, 0));
    }

    #[test]
    fn test_weekly_next_is_monday_midnight() {
        // from Wednesday
        let next = Trigger::from_spec("weekly").next_after(base_time()).unwrap();
        assert_eq!(next, local(2025, 1, 20, 0, 0));

        // exactly on the slot moves a full week ahead
        let monday = local(2025, 1, 20, 0, 0);
        let next = Trigger::from_spec("weekly").next_after(monday).unwrap();
        assert_eq!(next, local(2025, 1, 27, 0, 0));
    }

    #[test]
    fn test_cron_every_fifteen_minutes() {
        let trigger = Trigger::from_spec("*/15 * * * *");
        assert!(matches!(trigger, Trigger::Cron(_)));
        assert_eq!(trigger.next_after(base_time()), Some(local(2025, 1, 15, 10, 45)));
    }

    #[test]
    fn test_cron_weekday_names_and_ranges() {
        // Saturday 2025-01-18 09:00 -> next weekday slot is Monday
        let trigger = Trigger::from_spec("0 9-17 * * mon-fri");
        let saturday = local(2025, 1, 18, 9, 0);
        assert_eq!(trigger.next_after(saturday), Some(local(2025, 1, 20, 9, 0)));

        // same day, later hour
        assert_eq!(trigger.next_after(base_time()), Some(local(2025, 1, 15, 11, 0)));
    }

    #[test]
    fn test_cron_sunday_as_seven() {
        let zero = Trigger::from_spec("0 12 * * 0");
        let seven = Trigger::from_spec("0 12 * * 7");
        assert_eq!(zero.next_after(base_time()), Some(local(2025, 1, 19, 12, 0)));
        assert_eq!(seven.next_after(base_time()), zero.next_after(base_time()));
    }

    #[test]
    fn test_cron_day_of_month_or_day_of_week() {
        // the 1st of the month, or any Friday
        let trigger = Trigger::from_spec("0 0 1 * fri");
        assert_eq!(trigger.next_after(base_time()), Some(local(2025, 1, 17, 0, 0)));
        let friday_night = local(2025, 1, 31, 1, 0);
        assert_eq!(trigger.next_after(friday_night), Some(local(2025, 2, 1, 0, 0)));
    }

    #[test]
    fn test_cron_month_names_and_lists() {
        let trigger = Trigger::from_spec("30 6 1,15 mar,jun *");
        assert_eq!(trigger.next_after(base_time()), Some(local(2025, 3, 1, 6, 30)));
    }

    #[test]
    fn test_cron_impossible_date_never_fires() {
        let trigger = parse_schedule("0 0 30 feb *").unwrap();
        assert_eq!(trigger.next_after(base_time()), None);
    }

    #[test]
    fn test_cron_rejects_bad_fields() {
        assert!(parse_schedule("0 24 * * *").is_err());
        assert!(parse_schedule("0 0 0 * *").is_err());
        assert!(parse_schedule("0 0 * 13 *").is_err());
        assert!(parse_schedule("*/0 * * * *").is_err());
        assert!(parse_schedule("10-5 * * * *").is_err());
        assert!(parse_schedule("0 0 * * funday").is_err());
        assert!(parse_schedule("0 0 * * xyz").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Trigger::HOURLY.to_string(), "interval[every 1 hour]");
        assert_eq!(
            Trigger::from_spec("every_30_minutes").to_string(),
            "interval[every 30 minutes]"
        );
        assert_eq!(Trigger::from_spec("daily").to_string(), "daily[00:00]");
        assert_eq!(Trigger::from_spec("weekly").to_string(), "weekly[Mon 00:00]");
        assert_eq!(
            Trigger::from_spec("*/5   *  * * *").to_string(),
            "cron[*/5 * * * *]"
        );
    }
}
