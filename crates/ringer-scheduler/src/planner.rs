//! Trigger planner: turns a schedule into concrete alarm parameters.
//!
//! Pure: the same schedule, `now` and capability flag always give the same plan.

use chrono::{DateTime, Duration, Utc};
use ringer_core::Result;
use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

/// Parameters handed to the alarm service for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmPlan {
    pub fire_at: DateTime<Utc>,
    /// Set for fixed-period schedules; the alarm service re-arms by itself.
    #[serde(default, with = "duration_ms")]
    pub repeat_period: Option<Duration>,
    pub allow_while_idle: bool,
    pub exact: bool,
}

impl ArmPlan {
    /// First occurrence of this plan's cadence strictly after `now`.
    ///
    /// Fixed-period plans advance by whole periods, so the cadence is kept.
    /// Returns `None` for a single-shot plan whose time has passed.
    pub fn resume_after(&self, now: DateTime<Utc>) -> Option<ArmPlan> {
        if self.fire_at > now {
            return Some(*self);
        }
        let period_ms = self.repeat_period?.num_milliseconds();
        if period_ms <= 0 {
            return None;
        }
        let behind_ms = (now - self.fire_at).num_milliseconds();
        let periods = behind_ms / period_ms + 1;
        let advance = Duration::try_milliseconds(periods.checked_mul(period_ms)?)?;
        let fire_at = self.fire_at.checked_add_signed(advance)?;
        Some(ArmPlan { fire_at, ..*self })
    }
}

/// Compute the arm for `schedule` as of `now`.
///
/// Single-shot arms (one-shots and each calendar occurrence) ask for an exact
/// alarm; fixed-period arms are inexact, like any platform repeating alarm.
/// When exact alarms are not permitted the plan is downgraded and a warning is
/// logged; the fire time is unchanged.
///
/// `Ok(None)` means there is nothing left to arm.
pub fn plan(
    schedule: &Schedule,
    now: DateTime<Utc>,
    exact_alarms_permitted: bool,
) -> Result<Option<ArmPlan>> {
    let Some(fire_at) = schedule.next_fire_time(now)? else {
        return Ok(None);
    };
    let repeat_period = schedule.repeat_period(now);

    let wants_exact = repeat_period.is_none();
    if wants_exact && !exact_alarms_permitted {
        tracing::warn!(
            "⚠️ Exact alarms not permitted; arm for {} downgraded to inexact",
            fire_at
        );
    }

    Ok(Some(ArmPlan {
        fire_at,
        repeat_period,
        allow_while_idle: schedule.allow_while_idle,
        exact: wants_exact && exact_alarms_permitted,
    }))
}

mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.num_milliseconds()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.and_then(Duration::try_milliseconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarPattern;
    use crate::schedule::IntervalUnit;
    use chrono::TimeZone;
    use ringer_core::RingerError;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_repeating_one_shot() {
        let schedule = Schedule::one_shot(now() + Duration::seconds(10), true);
        let arm = plan(&schedule, now(), true).unwrap().unwrap();
        assert_eq!(arm.fire_at, now() + Duration::seconds(10));
        assert_eq!(arm.repeat_period, Some(Duration::seconds(10)));
        assert!(!arm.exact);
    }

    #[test]
    fn test_one_shot_is_exact_when_permitted() {
        let schedule = Schedule::one_shot(now() + Duration::minutes(5), false);
        let arm = plan(&schedule, now(), true).unwrap().unwrap();
        assert!(arm.exact);
        assert!(arm.repeat_period.is_none());
        assert!(!arm.allow_while_idle);
    }

    #[test]
    fn test_downgrade_keeps_fire_time() {
        let schedule =
            Schedule::one_shot(now() + Duration::minutes(5), false).with_allow_while_idle(true);
        let exact = plan(&schedule, now(), true).unwrap().unwrap();
        let inexact = plan(&schedule, now(), false).unwrap().unwrap();
        assert!(!inexact.exact);
        assert_eq!(inexact.fire_at, exact.fire_at);
        assert!(inexact.allow_while_idle);
    }

    #[test]
    fn test_fixed_interval_sets_period() {
        let schedule = Schedule::every(IntervalUnit::Hour, 2);
        let arm = plan(&schedule, now(), true).unwrap().unwrap();
        assert_eq!(arm.fire_at, now() + Duration::hours(2));
        assert_eq!(arm.repeat_period, Some(Duration::hours(2)));
    }

    #[test]
    fn test_calendar_never_sets_period() {
        let schedule = Schedule::on(CalendarPattern {
            day: Some(1),
            hour: Some(8),
            minute: Some(30),
            second: Some(0),
            ..Default::default()
        });
        let first = plan(&schedule, now(), true).unwrap().unwrap();
        assert_eq!(first.fire_at, Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap());
        assert!(first.repeat_period.is_none());
        assert!(first.exact);

        // Re-planning from the fired instant gives the following occurrence.
        let second = plan(&schedule, first.fire_at, true).unwrap().unwrap();
        assert_eq!(second.fire_at, Utc.with_ymd_and_hms(2026, 4, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_exhausted_calendar_plans_nothing() {
        let schedule = Schedule::on(CalendarPattern {
            year: Some(2025),
            ..Default::default()
        });
        assert!(plan(&schedule, now(), true).unwrap().is_none());
    }

    #[test]
    fn test_past_one_shot_is_error() {
        let schedule = Schedule::one_shot(now() - Duration::seconds(1), false);
        assert!(matches!(
            plan(&schedule, now(), true),
            Err(RingerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_plan_is_idempotent() {
        let schedules = [
            Schedule::one_shot(now() + Duration::seconds(10), true),
            Schedule::every(IntervalUnit::Week, 1),
            Schedule::on(CalendarPattern {
                weekday: Some(2),
                ..Default::default()
            }),
        ];
        for schedule in &schedules {
            for permitted in [true, false] {
                assert_eq!(
                    plan(schedule, now(), permitted).unwrap(),
                    plan(schedule, now(), permitted).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_resume_keeps_cadence() {
        let arm = ArmPlan {
            fire_at: now(),
            repeat_period: Some(Duration::minutes(10)),
            allow_while_idle: false,
            exact: false,
        };
        let resumed = arm.resume_after(now() + Duration::minutes(25)).unwrap();
        assert_eq!(resumed.fire_at, now() + Duration::minutes(30));

        // Exactly on a boundary moves to the next one.
        let resumed = arm.resume_after(now() + Duration::minutes(30)).unwrap();
        assert_eq!(resumed.fire_at, now() + Duration::minutes(40));

        let single = ArmPlan {
            repeat_period: None,
            ..arm
        };
        assert!(single.resume_after(now() + Duration::seconds(1)).is_none());
        assert_eq!(single.resume_after(now() - Duration::seconds(1)), Some(single));
    }

    #[test]
    fn test_resume_near_max_date_gives_up() {
        let arm = ArmPlan {
            fire_at: DateTime::<Utc>::MAX_UTC - Duration::days(1),
            repeat_period: Some(Duration::days(7)),
            allow_while_idle: false,
            exact: false,
        };
        assert!(arm.resume_after(DateTime::<Utc>::MAX_UTC).is_none());
    }

    #[test]
    fn test_huge_interval_plans_an_error() {
        let schedule = Schedule::every(IntervalUnit::Day, 100_000_000);
        assert!(matches!(
            plan(&schedule, now(), true),
            Err(RingerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_plan_json_stores_period_in_millis() {
        let arm = ArmPlan {
            fire_at: now(),
            repeat_period: Some(Duration::seconds(10)),
            allow_while_idle: true,
            exact: false,
        };
        let json = serde_json::to_value(arm).unwrap();
        assert_eq!(json["repeat_period"], 10_000);
        let back: ArmPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, arm);
    }
}
