//! Schedule model: when a notification should (re)fire.
//!
//! Wire form (what callers submit and what is persisted):
//! `{ "at": "...Z", "repeats": bool, "every": "day", "count": 3, "on": {...},
//! "allowWhileIdle": bool }`.
//! When several triggers are present, `at` wins over `every`, which wins over `on`.

use chrono::{DateTime, Duration, Utc};
use ringer_core::{Result, RingerError};
use serde::{Deserialize, Serialize};

use crate::calendar::{self, CalendarPattern};

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Unit of a fixed repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalUnit {
    Year,
    Month,
    TwoWeeks,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl IntervalUnit {
    /// Length of one unit. Years and months are approximations (52 weeks, 30 days).
    pub fn millis(self) -> i64 {
        match self {
            Self::Year => 52 * WEEK_MS,
            Self::Month => 30 * DAY_MS,
            Self::TwoWeeks => 2 * WEEK_MS,
            Self::Week => WEEK_MS,
            Self::Day => DAY_MS,
            Self::Hour => HOUR_MS,
            Self::Minute => MINUTE_MS,
            Self::Second => SECOND_MS,
        }
    }

    /// `count` units as a duration.
    pub fn period(self, count: u32) -> Result<Duration> {
        if count == 0 {
            return Err(RingerError::InvalidSchedule("count must be positive".into()));
        }
        i64::from(count)
            .checked_mul(self.millis())
            .and_then(Duration::try_milliseconds)
            .ok_or_else(|| {
                RingerError::InvalidSchedule(format!("interval of {count} x {self:?} overflows"))
            })
    }
}

/// The three kinds of trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fire at `at`. With `repeats`, keep firing with period `at - now` (taken at arm time).
    OneShot { at: DateTime<Utc>, repeats: bool },
    /// Fire every `count` × `every`, first one period from now.
    FixedInterval { every: IntervalUnit, count: u32 },
    /// Fire whenever the calendar pattern matches.
    CalendarMatch { on: CalendarPattern },
}

/// A validated, immutable schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSchedule", into = "WireSchedule")]
pub struct Schedule {
    pub trigger: Trigger,
    /// Ask for delivery even while the device is idle/dozing.
    pub allow_while_idle: bool,
}

impl Schedule {
    pub fn one_shot(at: DateTime<Utc>, repeats: bool) -> Self {
        Self {
            trigger: Trigger::OneShot { at, repeats },
            allow_while_idle: false,
        }
    }

    pub fn every(every: IntervalUnit, count: u32) -> Self {
        Self {
            trigger: Trigger::FixedInterval { every, count },
            allow_while_idle: false,
        }
    }

    pub fn on(pattern: CalendarPattern) -> Self {
        Self {
            trigger: Trigger::CalendarMatch { on: pattern },
            allow_while_idle: false,
        }
    }

    pub fn with_allow_while_idle(mut self, allow: bool) -> Self {
        self.allow_while_idle = allow;
        self
    }

    /// Next fire instant after `now`.
    ///
    /// `Ok(None)` means the schedule has no further occurrence (a calendar
    /// pattern that is exhausted or impossible). A one-shot whose time is not
    /// in the future is a caller error.
    pub fn next_fire_time(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match &self.trigger {
            Trigger::OneShot { at, .. } => {
                if *at > now {
                    Ok(Some(*at))
                } else {
                    Err(RingerError::InvalidSchedule(format!(
                        "scheduled time must be after current time (at {at}, now {now})"
                    )))
                }
            }
            Trigger::FixedInterval { every, count } => {
                let period = every.period(*count)?;
                now.checked_add_signed(period).map(Some).ok_or_else(|| {
                    RingerError::InvalidSchedule(format!(
                        "interval of {count} x {every:?} runs past the supported date range"
                    ))
                })
            }
            Trigger::CalendarMatch { on } => Ok(calendar::next_match(on, now)),
        }
    }

    /// Fixed repeat period, if the schedule repeats on one.
    /// Calendar matches never have one: each occurrence is planned separately.
    pub fn repeat_period(&self, now: DateTime<Utc>) -> Option<Duration> {
        match &self.trigger {
            Trigger::OneShot { at, repeats: true } if *at > now => Some(*at - now),
            Trigger::OneShot { .. } => None,
            Trigger::FixedInterval { every, count } => every.period(*count).ok(),
            Trigger::CalendarMatch { .. } => None,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !matches!(self.trigger, Trigger::OneShot { repeats: false, .. })
    }

    /// Whether the persisted record may go once the current occurrence is done.
    pub fn is_removable(&self) -> bool {
        !self.is_repeating()
    }
}

/// Removable check for an optional schedule. Unscheduled notifications are removable.
pub fn is_removable(schedule: Option<&Schedule>) -> bool {
    schedule.is_none_or(Schedule::is_removable)
}

/// Loose caller-facing shape of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<IntervalUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CalendarPattern>,
    #[serde(default)]
    pub allow_while_idle: bool,
}

impl TryFrom<WireSchedule> for Schedule {
    type Error = RingerError;

    fn try_from(wire: WireSchedule) -> Result<Self> {
        let trigger = if let Some(at) = wire.at {
            Trigger::OneShot {
                at,
                repeats: wire.repeats.unwrap_or(false),
            }
        } else if let Some(every) = wire.every {
            let count = wire.count.unwrap_or(1);
            every.period(count)?;
            Trigger::FixedInterval { every, count }
        } else if let Some(on) = wire.on {
            on.validate()?;
            Trigger::CalendarMatch { on }
        } else {
            return Err(RingerError::InvalidSchedule(
                "schedule needs one of 'at', 'every' or 'on'".into(),
            ));
        };
        Ok(Self {
            trigger,
            allow_while_idle: wire.allow_while_idle,
        })
    }
}

impl From<Schedule> for WireSchedule {
    fn from(schedule: Schedule) -> Self {
        let mut wire = WireSchedule {
            allow_while_idle: schedule.allow_while_idle,
            ..Default::default()
        };
        match schedule.trigger {
            Trigger::OneShot { at, repeats } => {
                wire.at = Some(at);
                wire.repeats = Some(repeats);
            }
            Trigger::FixedInterval { every, count } => {
                wire.every = Some(every);
                wire.count = Some(count);
            }
            Trigger::CalendarMatch { on } => wire.on = Some(on),
        }
        wire
    }
}
