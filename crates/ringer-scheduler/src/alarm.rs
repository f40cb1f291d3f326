//! Alarm service: "call me back for notification X at time T".
//!
//! The orchestrator only talks to the [`AlarmService`] trait. [`TimerAlarms`]
//! is the in-process implementation: alarms live in memory and are popped by
//! polling [`TimerAlarms::due`] (see `engine::spawn_alarm_loop`).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use ringer_core::Result;

use crate::planner::ArmPlan;

/// One arm request. `payload` is opaque to the alarm service.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmRequest {
    pub id: i32,
    pub plan: ArmPlan,
    pub payload: Vec<u8>,
}

/// Receipt for an arm. A later arm for the same id gets a higher generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmHandle {
    pub id: i32,
    pub generation: u64,
}

/// Delivered by the alarm service when an armed alarm goes off.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmFire {
    pub id: i32,
    /// The instant the alarm was armed for; the actual callback may be later.
    pub scheduled_for: DateTime<Utc>,
    /// The plan that was armed.
    pub plan: ArmPlan,
    pub payload: Vec<u8>,
}

/// Platform wake-up primitive.
pub trait AlarmService: Send + Sync {
    /// Arm the alarm for `request.id`, replacing any earlier arm for that id.
    fn arm(&self, request: ArmRequest) -> Result<AlarmHandle>;

    /// Cancel the alarm for `id`. Cancelling nothing is not an error.
    fn cancel(&self, id: i32) -> Result<()>;

    /// Whether an alarm for `id` is currently armed.
    fn is_armed(&self, id: i32) -> bool;
}

#[derive(Debug, Clone)]
struct Armed {
    plan: ArmPlan,
    payload: Vec<u8>,
}

/// In-memory alarm table. Fixed-period alarms re-arm themselves when they fire.
#[derive(Debug, Default)]
pub struct TimerAlarms {
    armed: Mutex<HashMap<i32, Armed>>,
    generation: AtomicU64,
}

impl TimerAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop every alarm due at `now`, earliest first (ties by id).
    pub fn due(&self, now: DateTime<Utc>) -> Vec<AlarmFire> {
        let mut table = self.table();
        let due_ids: Vec<i32> = table
            .iter()
            .filter(|(_, a)| a.plan.fire_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut fires = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let Some(armed) = table.remove(&id) else {
                continue;
            };
            fires.push(AlarmFire {
                id,
                scheduled_for: armed.plan.fire_at,
                plan: armed.plan,
                payload: armed.payload.clone(),
            });
            if armed.plan.repeat_period.is_some() {
                if let Some(next) = armed.plan.resume_after(now) {
                    table.insert(
                        id,
                        Armed {
                            plan: next,
                            payload: armed.payload,
                        },
                    );
                }
            }
        }
        fires.sort_by_key(|f| (f.scheduled_for, f.id));
        fires
    }

    /// Put a single-shot fire back so the next `due` pass delivers it again.
    ///
    /// Does nothing when the id was armed again in the meantime, or when the
    /// plan is fixed-period (those re-arm themselves in `due`). Returns whether
    /// the fire was put back.
    pub fn retry(&self, fire: AlarmFire) -> bool {
        if fire.plan.repeat_period.is_some() {
            return false;
        }
        match self.table().entry(fire.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!("⏰ Alarm {} put back for retry", fire.id);
                slot.insert(Armed {
                    plan: fire.plan,
                    payload: fire.payload,
                });
                true
            }
        }
    }

    /// Current plan for `id`, if armed.
    pub fn plan_for(&self, id: i32) -> Option<ArmPlan> {
        self.table().get(&id).map(|a| a.plan)
    }

    /// Earliest armed fire time.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.table().values().map(|a| a.plan.fire_at).min()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl AlarmService for TimerAlarms {
    fn arm(&self, request: ArmRequest) -> Result<AlarmHandle> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            "⏰ Arm {} at {} (exact={}, while_idle={}, repeat={:?})",
            request.id,
            request.plan.fire_at,
            request.plan.exact,
            request.plan.allow_while_idle,
            request.plan.repeat_period
        );
        self.table().insert(
            request.id,
            Armed {
                plan: request.plan,
                payload: request.payload,
            },
        );
        Ok(AlarmHandle {
            id: request.id,
            generation,
        })
    }

    fn cancel(&self, id: i32) -> Result<()> {
        if self.table().remove(&id).is_some() {
            tracing::debug!("⏰ Alarm {} cancelled", id);
        }
        Ok(())
    }

    fn is_armed(&self, id: i32) -> bool {
        self.table().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap()
    }

    fn request(id: i32, fire_at: DateTime<Utc>, repeat: Option<Duration>) -> ArmRequest {
        ArmRequest {
            id,
            plan: ArmPlan {
                fire_at,
                repeat_period: repeat,
                allow_while_idle: false,
                exact: true,
            },
            payload: vec![id as u8],
        }
    }

    #[test]
    fn test_rearm_supersedes() {
        let alarms = TimerAlarms::new();
        let first = alarms.arm(request(1, now(), None)).unwrap();
        let second = alarms
            .arm(request(1, now() + Duration::minutes(5), None))
            .unwrap();
        assert!(second.generation > first.generation);
        assert_eq!(alarms.len(), 1);
        assert_eq!(
            alarms.plan_for(1).unwrap().fire_at,
            now() + Duration::minutes(5)
        );
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let alarms = TimerAlarms::new();
        alarms.arm(request(1, now(), None)).unwrap();
        alarms.cancel(1).unwrap();
        alarms.cancel(1).unwrap();
        alarms.cancel(42).unwrap();
        assert!(!alarms.is_armed(1));
        assert!(alarms.is_empty());
    }

    #[test]
    fn test_due_pops_in_order() {
        let alarms = TimerAlarms::new();
        alarms
            .arm(request(2, now() + Duration::seconds(2), None))
            .unwrap();
        alarms
            .arm(request(1, now() + Duration::seconds(1), None))
            .unwrap();
        alarms
            .arm(request(3, now() + Duration::hours(1), None))
            .unwrap();

        assert!(alarms.due(now()).is_empty());
        let fires = alarms.due(now() + Duration::seconds(5));
        let ids: Vec<i32> = fires.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(fires[0].payload, vec![1]);
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms.next_fire_at(), Some(now() + Duration::hours(1)));
    }

    #[test]
    fn test_retry_puts_single_shot_back() {
        let alarms = TimerAlarms::new();
        alarms.arm(request(1, now(), None)).unwrap();
        let fire = alarms.due(now()).remove(0);
        assert!(!alarms.is_armed(1));

        assert!(alarms.retry(fire.clone()));
        assert_eq!(alarms.plan_for(1), Some(fire.plan));
        assert_eq!(alarms.due(now() + Duration::seconds(1)).len(), 1);

        // A newer arm wins over the retry.
        alarms.arm(request(1, now() + Duration::hours(1), None)).unwrap();
        assert!(!alarms.retry(fire));
        assert_eq!(
            alarms.plan_for(1).unwrap().fire_at,
            now() + Duration::hours(1)
        );
    }

    #[test]
    fn test_retry_ignores_fixed_period() {
        let alarms = TimerAlarms::new();
        alarms
            .arm(request(7, now(), Some(Duration::seconds(10))))
            .unwrap();
        let fire = alarms.due(now()).remove(0);
        assert!(!alarms.retry(fire));
        assert_eq!(
            alarms.plan_for(7).unwrap().fire_at,
            now() + Duration::seconds(10)
        );
    }

    #[test]
    fn test_repeating_alarm_rearms_itself() {
        let alarms = TimerAlarms::new();
        alarms
            .arm(request(
                7,
                now() + Duration::seconds(10),
                Some(Duration::seconds(10)),
            ))
            .unwrap();

        let fires = alarms.due(now() + Duration::seconds(10));
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].scheduled_for, now() + Duration::seconds(10));
        assert_eq!(
            alarms.plan_for(7).unwrap().fire_at,
            now() + Duration::seconds(20)
        );

        // Missed several periods: one fire, cadence kept.
        let fires = alarms.due(now() + Duration::seconds(55));
        assert_eq!(fires.len(), 1);
        assert_eq!(
            alarms.plan_for(7).unwrap().fire_at,
            now() + Duration::seconds(60)
        );
    }
}
