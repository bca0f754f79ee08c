//! Cron expression parsing and matching.
//!
//! Supports: "MIN HOUR DOM MON DOW" (5 fields, no seconds, UTC)
//! Each field: `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S`, or comma lists of those.
//! Example: "0 8 * * 1-5" = weekdays at 08:00
//!
//! Day matching follows classic cron: when both DOM and DOW are restricted,
//! a day matches if either one matches.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_DAYS: u32 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("cron expression '{0}' must have 5 fields (MIN HOUR DOM MON DOW)")]
    FieldCount(String),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("interval must be greater than zero")]
    ZeroInterval,
}

/// One cron field as a bitmask of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// False when the field starts with `*` (matters for DOM/DOW).
    restricted: bool,
}

impl Field {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let [min, hour, dom, mon, dow] = parts.as_slice() else {
            return Err(CronError::FieldCount(expression.to_string()));
        };

        let mut days_of_week = parse_field(dow, "day-of-week", 0, 7)?;
        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits | 1) & !(1u64 << 7);
        }

        Ok(Self {
            minutes: parse_field(min, "minute", 0, 59)?,
            hours: parse_field(hour, "hour", 0, 23)?,
            days_of_month: parse_field(dom, "day-of-month", 1, 31)?,
            months: parse_field(mon, "month", 1, 12)?,
            days_of_week,
        })
    }

    /// Does `at` (truncated to the minute) match this schedule?
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(at.minute())
            && self.hours.contains(at.hour())
            && self.months.contains(at.month())
            && self.day_matches(at.date_naive())
    }

    /// The first matching minute strictly after `after`.
    ///
    /// Returns `None` when nothing matches within the search horizon
    /// (e.g. "0 0 31 2 *").
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let mut date = start.date_naive();

        for day in 0..SEARCH_HORIZON_DAYS {
            if self.months.contains(date.month()) && self.day_matches(date) {
                let first_day = day == 0;
                let first_hour = if first_day { start.hour() } else { 0 };
                for hour in first_hour..24 {
                    if !self.hours.contains(hour) {
                        continue;
                    }
                    let first_minute = if first_day && hour == first_hour {
                        start.minute()
                    } else {
                        0
                    };
                    if let Some(minute) = (first_minute..60).find(|m| self.minutes.contains(*m)) {
                        let naive = date.and_hms_opt(hour, minute, 0)?;
                        return Some(Utc.from_utc_datetime(&naive));
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

fn parse_field(raw: &str, field: &'static str, min: u32, max: u32) -> Result<Field, CronError> {
    let invalid = || CronError::InvalidField {
        field,
        value: raw.to_string(),
    };

    let mut bits = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid())?;
            let b: u32 = b.parse().map_err(|_| invalid())?;
            (a, b)
        } else {
            let n: u32 = range.parse().map_err(|_| invalid())?;
            // "N/S" means "from N to the end, every S"
            if step.is_some() { (n, max) } else { (n, n) }
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        for value in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            bits |= 1u64 << value;
        }
    }

    Ok(Field {
        bits,
        restricted: !raw.starts_with('*'),
    })
}
