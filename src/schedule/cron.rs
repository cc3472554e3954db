use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};
use pest::iterators::Pair;

use super::trigger::ScheduleParseError;
use super::Rule;

/// Days scanned before giving up on an expression that can never fire
/// ("0 0 30 2 *"). Eight years covers every leap-day combination.
const SEARCH_DAYS: u32 = 366 * 8;
const MINUTES_PER_DAY: u32 = 24 * 60;

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day of month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"],
};
// 7 is accepted as a second spelling of Sunday
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// Five-field cron expression compiled to bitmasks.
///
/// Follows classic cron: when both day-of-month and day-of-week are
/// restricted, a day matching either one fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
    expr: String,
}

impl CronSchedule {
    pub(super) fn from_pair(pair: Pair<Rule>) -> Result<Self, ScheduleParseError> {
        let expr = pair.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
        let mut fields = pair.into_inner();
        let mut next_field = |spec: &FieldSpec| {
            fields
                .next()
                .ok_or_else(|| ScheduleParseError(format!("missing {} field", spec.name)))
                .and_then(|field| parse_field(field, spec))
        };

        let (minutes, _) = next_field(&MINUTE)?;
        let (hours, _) = next_field(&HOUR)?;
        let (days_of_month, dom_restricted) = next_field(&DAY_OF_MONTH)?;
        let (months, _) = next_field(&MONTH)?;
        let (mut days_of_week, dow_restricted) = next_field(&DAY_OF_WEEK)?;

        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(CronSchedule {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
            expr,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching local minute strictly after `from_time`
    pub fn next_after(&self, from_time: i64) -> Option<i64> {
        let start = Local.timestamp_opt(from_time, 0).single()?.naive_local();
        let mut date = start.date();
        let mut first_minute = start.hour() * 60 + start.minute() + 1;

        for _ in 0..SEARCH_DAYS {
            if first_minute < MINUTES_PER_DAY && self.day_matches(date) {
                for minute_of_day in first_minute..MINUTES_PER_DAY {
                    let (hour, minute) = (minute_of_day / 60, minute_of_day % 60);
                    if self.hours & (1 << hour) == 0 || self.minutes & (1 << minute) == 0 {
                        continue;
                    }
                    // Local times skipped by a DST jump simply don't fire
                    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                        if local.timestamp() > from_time {
                            return Some(local.timestamp());
                        }
                    }
                }
            }
            date = date.succ_opt()?;
            first_minute = 0;
        }

        None
    }
}

fn parse_field(pair: Pair<Rule>, spec: &FieldSpec) -> Result<(u64, bool), ScheduleParseError> {
    let restricted = !pair.as_str().starts_with('*');
    let mut mask = 0u64;

    for item in pair.into_inner() {
        let mut parts = item.into_inner();
        let base = parts
            .next()
            .ok_or_else(|| ScheduleParseError(format!("empty {} item", spec.name)))?;
        let step = match parts.next() {
            Some(step) => {
                let step: u32 = step
                    .as_str()
                    .parse()
                    .map_err(|_| ScheduleParseError(format!("bad {} step '{}'", spec.name, step.as_str())))?;
                if step == 0 {
                    return Err(ScheduleParseError(format!("{} step must be positive", spec.name)));
                }
                Some(step)
            }
            None => None,
        };

        let (low, high) = match base.as_rule() {
            Rule::star => (spec.min, spec.max),
            Rule::range => {
                let mut ends = base.into_inner();
                let low = parse_value(ends.next(), spec)?;
                let high = parse_value(ends.next(), spec)?;
                if low > high {
                    return Err(ScheduleParseError(format!(
                        "{} range {}-{} is reversed",
                        spec.name, low, high
                    )));
                }
                (low, high)
            }
            Rule::value => {
                let value = parse_value(Some(base), spec)?;
                match step {
                    Some(_) => (value, spec.max),
                    None => (value, value),
                }
            }
            other => {
                return Err(ScheduleParseError(format!("unexpected {:?} in {}", other, spec.name)))
            }
        };

        let step = usize::try_from(step.unwrap_or(1)).unwrap_or(1);
        for value in (low..=high).step_by(step) {
            mask |= 1 << value;
        }
    }

    Ok((mask, restricted))
}

fn parse_value(pair: Option<Pair<Rule>>, spec: &FieldSpec) -> Result<u32, ScheduleParseError> {
    let text = pair
        .map(|p| p.as_str())
        .ok_or_else(|| ScheduleParseError(format!("missing {} value", spec.name)))?;

    let value = match text.parse::<u32>() {
        Ok(number) => number,
        Err(_) => spec
            .names
            .iter()
            .position(|name| *name == text)
            .map(|index| index as u32 + spec.min)
            .ok_or_else(|| ScheduleParseError(format!("unknown {} name '{}'", spec.name, text)))?,
    };

    if value < spec.min || value > spec.max {
        return Err(ScheduleParseError(format!(
            "{} value {} outside {}-{}",
            spec.name, value, spec.min, spec.max
        )));
    }
    Ok(value)
}
