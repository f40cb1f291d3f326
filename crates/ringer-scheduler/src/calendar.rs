//! Calendar matcher: partial calendar pattern → next matching instant.
//!
//! Fields: year, month (1-12), day (1-31), weekday (1 = Sunday .. 7 = Saturday),
//! hour (0-23), minute (0-59), second (0-59). Unset fields are wildcards.
//! Text form: "YEAR MONTH DAY HOUR MINUTE SECOND WEEKDAY", `*` for unset,
//! e.g. "* * 1 8 30 0 *" = every 1st of the month at 08:30:00.
//!
//! All matching happens in UTC. The search jumps by the coarsest field that
//! fails instead of scanning second by second.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use ringer_core::{Result, RingerError};
use serde::{Deserialize, Serialize};

/// How many years past `after` an open-ended pattern is searched before giving up.
/// Wide enough for Feb 29 combined with a weekday.
pub const SEARCH_HORIZON_YEARS: i32 = 100;

/// A partial calendar pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<u32>,
}

impl CalendarPattern {
    /// True when no field is set; such a pattern matches every second.
    pub fn is_wildcard(&self) -> bool {
        *self == Self::default()
    }

    /// Reject out-of-range fields and month/day pairs no calendar has.
    pub fn validate(&self) -> Result<()> {
        check_range("month", self.month, 1, 12)?;
        check_range("day", self.day, 1, 31)?;
        check_range("weekday", self.weekday, 1, 7)?;
        check_range("hour", self.hour, 0, 23)?;
        check_range("minute", self.minute, 0, 59)?;
        check_range("second", self.second, 0, 59)?;
        if let (Some(month), Some(day)) = (self.month, self.day) {
            if day > max_days_in_month(month) {
                return Err(RingerError::InvalidSchedule(format!(
                    "day {day} never occurs in month {month}"
                )));
            }
        }
        Ok(())
    }

    /// Whether every set field agrees with `at`.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        fn ok<T: PartialEq>(field: Option<T>, value: T) -> bool {
            field.is_none_or(|f| f == value)
        }
        ok(self.year, at.year())
            && ok(self.month, at.month())
            && ok(self.day, at.day())
            && ok(self.weekday, at.weekday().number_from_sunday())
            && ok(self.hour, at.hour())
            && ok(self.minute, at.minute())
            && ok(self.second, at.second())
    }
}

fn check_range(name: &str, value: Option<u32>, min: u32, max: u32) -> Result<()> {
    match value {
        Some(v) if v < min || v > max => Err(RingerError::InvalidSchedule(format!(
            "{name} {v} out of range {min}-{max}"
        ))),
        _ => Ok(()),
    }
}

/// Longest a month can be in any year (February counts its leap day).
fn max_days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn midnight(year: i32, month: u32, day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    if t.month() == 12 {
        midnight(t.year() + 1, 1, 1)
    } else {
        midnight(t.year(), t.month() + 1, 1)
    }
}

fn start_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

fn truncate_to_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), 0, 0)
}

fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), t.minute(), 0)
}

/// Earliest instant strictly after `after` (at whole-second granularity) whose
/// calendar fields satisfy every set field of `pattern`.
///
/// Returns `None` for out-of-range or impossible patterns, and when nothing
/// matches within [`SEARCH_HORIZON_YEARS`] (or after the pattern's fixed year).
pub fn next_match(pattern: &CalendarPattern, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if pattern.validate().is_err() {
        return None;
    }

    let start = after
        .with_nanosecond(0)?
        .checked_add_signed(Duration::seconds(1))?;
    if pattern.is_wildcard() {
        return Some(start);
    }
    let last_year = match pattern.year {
        Some(y) => y,
        None => start.year().saturating_add(SEARCH_HORIZON_YEARS),
    };

    let mut t = start.naive_utc();
    loop {
        if t.year() > last_year {
            return None;
        }

        if let Some(year) = pattern.year {
            if t.year() < year {
                t = midnight(year, 1, 1)?;
                continue;
            }
        }

        if let Some(month) = pattern.month {
            if t.month() != month {
                t = if t.month() < month {
                    midnight(t.year(), month, 1)?
                } else {
                    midnight(t.year() + 1, month, 1)?
                };
                continue;
            }
        }

        if let Some(day) = pattern.day {
            if t.day() != day {
                t = if t.day() < day && day <= days_in_month(t.year(), t.month()) {
                    midnight(t.year(), t.month(), day)?
                } else {
                    start_of_next_month(t)?
                };
                continue;
            }
        }

        if let Some(weekday) = pattern.weekday {
            let current = t.weekday().number_from_sunday();
            if current != weekday {
                let ahead = (weekday + 7 - current) % 7;
                t = t
                    .date()
                    .checked_add_signed(Duration::days(i64::from(ahead)))?
                    .and_hms_opt(0, 0, 0)?;
                continue;
            }
        }

        if let Some(hour) = pattern.hour {
            if t.hour() != hour {
                t = if t.hour() < hour {
                    t.date().and_hms_opt(hour, 0, 0)?
                } else {
                    start_of_next_day(t)?
                };
                continue;
            }
        }

        if let Some(minute) = pattern.minute {
            if t.minute() != minute {
                t = if t.minute() < minute {
                    t.date().and_hms_opt(t.hour(), minute, 0)?
                } else {
                    truncate_to_hour(t)?.checked_add_signed(Duration::hours(1))?
                };
                continue;
            }
        }

        if let Some(second) = pattern.second {
            if t.second() != second {
                t = if t.second() < second {
                    t.date().and_hms_opt(t.hour(), t.minute(), second)?
                } else {
                    truncate_to_minute(t)?.checked_add_signed(Duration::minutes(1))?
                };
                continue;
            }
        }

        return Some(t.and_utc());
    }
}

impl fmt::Display for CalendarPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field<T: fmt::Display>(v: Option<T>) -> String {
            v.map(|x| x.to_string()).unwrap_or_else(|| "*".into())
        }
        write!(
            f,
            "{} {} {} {} {} {} {}",
            field(self.year),
            field(self.month),
            field(self.day),
            field(self.hour),
            field(self.minute),
            field(self.second),
            field(self.weekday)
        )
    }
}

impl FromStr for CalendarPattern {
    type Err = RingerError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 7 {
            return Err(RingerError::InvalidSchedule(format!(
                "calendar pattern '{s}' needs 7 fields: YEAR MONTH DAY HOUR MINUTE SECOND WEEKDAY"
            )));
        }

        fn parse<T: FromStr>(raw: &str) -> Result<Option<T>> {
            if raw == "*" {
                return Ok(None);
            }
            raw.parse()
                .map(Some)
                .map_err(|_| RingerError::InvalidSchedule(format!("bad calendar field '{raw}'")))
        }

        let pattern = Self {
            year: parse(parts[0])?,
            month: parse(parts[1])?,
            day: parse(parts[2])?,
            hour: parse(parts[3])?,
            minute: parse(parts[4])?,
            second: parse(parts[5])?,
            weekday: parse(parts[6])?,
        };
        pattern.validate()?;
        Ok(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_wildcard_is_next_second() {
        let after = at(2026, 2, 22, 10, 30, 0) + Duration::milliseconds(750);
        let next = next_match(&CalendarPattern::default(), after).unwrap();
        assert_eq!(next, at(2026, 2, 22, 10, 30, 1));
    }

    #[test]
    fn test_daily_time() {
        let pattern = CalendarPattern {
            hour: Some(8),
            minute: Some(30),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 2, 22, 7, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 8, 30, 0));

        // Already past today's slot: tomorrow.
        let next = next_match(&pattern, at(2026, 2, 22, 8, 30, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 30, 0));
    }

    #[test]
    fn test_unset_second_matches_within_the_minute() {
        let pattern = CalendarPattern {
            hour: Some(8),
            minute: Some(30),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 2, 22, 8, 30, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 8, 30, 1));
        let next = next_match(&pattern, at(2026, 2, 22, 8, 30, 59)).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 30, 0));
    }

    #[test]
    fn test_minute_only_fires_every_hour() {
        let pattern = CalendarPattern {
            minute: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 2, 22, 10, 30, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0, 0));
        // Second is a wildcard, so the very next second still matches.
        let next = next_match(&pattern, next).unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0, 1));
    }

    #[test]
    fn test_first_of_month() {
        let pattern = CalendarPattern {
            day: Some(1),
            hour: Some(8),
            minute: Some(30),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 12, 15, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2027, 1, 1, 8, 30, 0));
    }

    #[test]
    fn test_day_31_skips_short_months() {
        let pattern = CalendarPattern {
            day: Some(31),
            hour: Some(0),
            minute: Some(0),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 4, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 5, 31, 0, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        let pattern = CalendarPattern {
            month: Some(2),
            day: Some(29),
            hour: Some(12),
            minute: Some(0),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2025, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 12, 0, 0));
    }

    #[test]
    fn test_weekday_sunday_is_one() {
        // 2026-02-22 is a Sunday.
        let pattern = CalendarPattern {
            weekday: Some(1),
            hour: Some(9),
            minute: Some(0),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 2, 18, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 9, 0, 0));
    }

    #[test]
    fn test_day_and_weekday_both_required() {
        // Friday the 13th. 2026-02-13 and 2026-03-13 are both Fridays.
        let pattern = CalendarPattern {
            day: Some(13),
            weekday: Some(6),
            hour: Some(0),
            minute: Some(0),
            second: Some(0),
            ..Default::default()
        };
        let next = next_match(&pattern, at(2026, 2, 14, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 13, 0, 0, 0));
        assert_eq!(next.weekday(), chrono::Weekday::Fri);

        // Neither "any 13th" (2026-04-13 is a Monday) nor "any Friday" qualifies alone.
        let next = next_match(&pattern, next).unwrap();
        assert_eq!(next, at(2026, 11, 13, 0, 0, 0));
    }

    #[test]
    fn test_feb_31_never_matches() {
        let pattern = CalendarPattern {
            month: Some(2),
            day: Some(31),
            ..Default::default()
        };
        assert!(next_match(&pattern, at(2026, 1, 1, 0, 0, 0)).is_none());
        assert!(pattern.validate().is_err());
    }

    #[test]
    fn test_leap_day_in_common_year_never_matches() {
        let pattern = CalendarPattern {
            year: Some(2027),
            month: Some(2),
            day: Some(29),
            ..Default::default()
        };
        assert!(pattern.validate().is_ok());
        assert!(next_match(&pattern, at(2026, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn test_past_year_never_matches() {
        let pattern = CalendarPattern {
            year: Some(2020),
            ..Default::default()
        };
        assert!(next_match(&pattern, at(2026, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn test_out_of_range_field() {
        let pattern = CalendarPattern {
            hour: Some(24),
            ..Default::default()
        };
        assert!(matches!(
            pattern.validate(),
            Err(RingerError::InvalidSchedule(_))
        ));
        assert!(next_match(&pattern, Utc::now()).is_none());
    }

    #[test]
    fn test_end_of_time_has_no_match() {
        let last = DateTime::<Utc>::MAX_UTC;
        assert!(next_match(&CalendarPattern::default(), last).is_none());
        let january = CalendarPattern {
            month: Some(1),
            ..Default::default()
        };
        assert!(next_match(&january, last - Duration::days(3)).is_none());
        let midnight = CalendarPattern {
            hour: Some(0),
            ..Default::default()
        };
        assert!(next_match(&midnight, last - Duration::hours(12)).is_none());
    }

    #[test]
    fn test_match_string() {
        let pattern: CalendarPattern = "* * 1 8 30 0 *".parse().unwrap();
        assert_eq!(pattern.day, Some(1));
        assert_eq!(pattern.hour, Some(8));
        assert_eq!(pattern.minute, Some(30));
        assert_eq!(pattern.second, Some(0));
        assert!(pattern.year.is_none());
        assert!(pattern.weekday.is_none());
        assert_eq!(pattern.to_string(), "* * 1 8 30 0 *");
    }

    #[test]
    fn test_invalid_match_string() {
        assert!("bad".parse::<CalendarPattern>().is_err());
        assert!("* * x * * * *".parse::<CalendarPattern>().is_err());
        assert!("* 2 31 * * * *".parse::<CalendarPattern>().is_err());
    }

    #[test]
    fn test_json_skips_unset_fields() {
        let pattern = CalendarPattern {
            hour: Some(8),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&pattern).unwrap(), r#"{"hour":8}"#);
    }

    fn instant() -> impl Strategy<Value = DateTime<Utc>> {
        // 2001-09-09 .. 2033-05-18, with sub-second noise.
        (1_000_000_000i64..2_000_000_000, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
    }

    proptest! {
        #[test]
        fn prop_wildcard_is_truncated_plus_one(after in instant()) {
            let next = next_match(&CalendarPattern::default(), after).unwrap();
            prop_assert_eq!(next.timestamp(), after.timestamp() + 1);
            prop_assert_eq!(next.timestamp_subsec_nanos(), 0);
        }

        #[test]
        fn prop_result_is_after_and_satisfies_pattern(
            after in instant(),
            day in proptest::option::of(1u32..=28),
            weekday in proptest::option::of(1u32..=7),
            hour in proptest::option::of(0u32..=23),
            minute in proptest::option::of(0u32..=59),
            second in proptest::option::of(0u32..=59),
        ) {
            let pattern = CalendarPattern {
                day,
                weekday,
                hour,
                minute,
                second,
                ..Default::default()
            };
            let next = next_match(&pattern, after).unwrap();
            prop_assert!(next > after);
            prop_assert!(pattern.matches(next));
        }

        #[test]
        fn prop_fully_specified_finds_the_one_instant(
            target in instant(),
            lead_secs in 1i64..(8 * 366 * 86_400),
        ) {
            let target = target.with_nanosecond(0).unwrap();
            let pattern = CalendarPattern {
                year: Some(target.year()),
                month: Some(target.month()),
                day: Some(target.day()),
                weekday: Some(target.weekday().number_from_sunday()),
                hour: Some(target.hour()),
                minute: Some(target.minute()),
                second: Some(target.second()),
            };
            let after = target - Duration::seconds(lead_secs);
            prop_assert_eq!(next_match(&pattern, after), Some(target));
            prop_assert_eq!(next_match(&pattern, target), None);
        }

        #[test]
        fn prop_impossible_month_day_never_matches(
            after in instant(),
            short_month in prop::sample::select(vec![2u32, 4, 6, 9, 11]),
        ) {
            let pattern = CalendarPattern {
                month: Some(short_month),
                day: Some(31),
                ..Default::default()
            };
            prop_assert_eq!(next_match(&pattern, after), None);
        }
    }
}
