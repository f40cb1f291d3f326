//! Scheduling orchestrator: drives the planner, alarm service, record store
//! and delivery sink for every notification id.
//!
//! Two entry points may run concurrently: alarm fires and user interactions.
//! Both go through a per-id lock, so work on one id is serialized while
//! different ids proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use ringer_core::{DeliveryDefaults, Result, RingerConfig, RingerError};
use serde::Serialize;

use crate::actions::{self, ActionGroup, ActionGroupTable, InteractionEvent, Resolution};
use crate::alarm::{AlarmFire, AlarmService, ArmRequest, TimerAlarms};
use crate::notify::DeliverySink;
use crate::payload::{NotificationPayload, NotificationRecord};
use crate::planner::{self, ArmPlan};
use crate::schedule::Trigger;
use crate::store::NotificationStore;

/// Host capabilities and defaults, resolved once at construction.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub exact_alarms_permitted: bool,
    pub notifications_enabled: bool,
    pub defaults: DeliveryDefaults,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            exact_alarms_permitted: true,
            notifications_enabled: true,
            defaults: DeliveryDefaults::default(),
        }
    }
}

impl From<&RingerConfig> for SchedulerOptions {
    fn from(config: &RingerConfig) -> Self {
        Self {
            exact_alarms_permitted: config.scheduler.exact_alarms_permitted,
            notifications_enabled: config.scheduler.notifications_enabled,
            defaults: config.defaults.clone(),
        }
    }
}

/// Result of a startup reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Ids that had no live arm and were armed again.
    pub rearmed: Vec<i32>,
    /// Ids whose last occurrence passed while nothing was armed; deleted.
    pub missed: Vec<i32>,
}

#[derive(Default)]
struct IdLocks {
    locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl IdLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<i32, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` holding the lock for `id`. The entry is dropped again once no
    /// other caller holds or waits on it.
    fn with<T>(&self, id: i32, f: impl FnOnce() -> T) -> T {
        let lock = self.table().entry(id).or_default().clone();
        let out = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only taken and released under the table lock, so the
        // last one out sees a count of 1.
        let mut locks = self.table();
        drop(lock);
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }
        out
    }
}

/// What reconcile did with one record.
enum Reconciled {
    Skipped,
    Rearmed,
    Missed,
}

/// A validated batch item, ready to apply.
struct Prepared {
    id: i32,
    payload: NotificationPayload,
    plan: Option<ArmPlan>,
    bytes: Vec<u8>,
}

/// The orchestrator. Cheap to share behind an `Arc`.
pub struct NotificationScheduler {
    store: Arc<dyn NotificationStore>,
    alarms: Arc<dyn AlarmService>,
    sink: Arc<dyn DeliverySink>,
    actions: RwLock<ActionGroupTable>,
    options: SchedulerOptions,
    locks: IdLocks,
}

impl NotificationScheduler {
    /// Create the orchestrator and load the registered action groups from the store.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        alarms: Arc<dyn AlarmService>,
        sink: Arc<dyn DeliverySink>,
        options: SchedulerOptions,
    ) -> Result<Self> {
        let table = ActionGroupTable::from_groups(store.action_groups()?);
        tracing::debug!("📋 Loaded {} action group(s)", table.len());
        Ok(Self {
            store,
            alarms,
            sink,
            actions: RwLock::new(table),
            options,
            locks: IdLocks::default(),
        })
    }

    /// Submit a batch of notifications.
    ///
    /// The whole batch is validated before anything is touched. Scheduled
    /// items are persisted and armed; unscheduled items are shown right away.
    /// If a store or alarm call fails midway, already-applied items are put
    /// back the way they were and the error is returned.
    pub fn schedule(
        &self,
        payloads: Vec<NotificationPayload>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i32>> {
        if !self.options.notifications_enabled {
            return Err(RingerError::NotificationsDisabled);
        }

        let mut batch = Vec::with_capacity(payloads.len());
        for mut payload in payloads {
            let id = payload.require_id()?;
            payload.apply_defaults(&self.options.defaults);
            let plan = match &payload.schedule {
                Some(schedule) => {
                    match planner::plan(schedule, now, self.options.exact_alarms_permitted)? {
                        Some(plan) => Some(plan),
                        None => {
                            return Err(RingerError::InvalidSchedule(format!(
                                "notification {id} has no future occurrence"
                            )));
                        }
                    }
                }
                None => None,
            };
            let bytes = payload.encode()?;
            batch.push(Prepared {
                id,
                payload,
                plan,
                bytes,
            });
        }

        let mut applied = Vec::with_capacity(batch.len());
        for item in &batch {
            if let Err(e) = self.apply(item, now, &mut applied) {
                tracing::warn!("⚠️ Batch failed at notification {}: {e}; rolling back", item.id);
                self.rollback(applied, now);
                return Err(e);
            }
        }

        for item in &batch {
            if !item.payload.update_silently {
                self.sink.dismiss(item.id);
            }
            match item.plan {
                Some(plan) => tracing::info!(
                    "📅 Notification {} scheduled for {} (exact={})",
                    item.id,
                    plan.fire_at,
                    plan.exact
                ),
                None => {
                    self.sink.show(&item.payload);
                    self.sink.received(&item.payload);
                }
            }
        }

        Ok(batch.iter().map(|item| item.id).collect())
    }

    /// Persist and arm one item. The prior record is pushed onto `applied`
    /// before any side effect, so a partial failure can be rolled back.
    fn apply(
        &self,
        item: &Prepared,
        now: DateTime<Utc>,
        applied: &mut Vec<(i32, Option<NotificationRecord>)>,
    ) -> Result<()> {
        self.locks.with(item.id, || {
            let previous = self.store.get(item.id)?;
            applied.push((item.id, previous));

            self.alarms.cancel(item.id)?;
            match item.plan {
                Some(plan) => {
                    let record =
                        NotificationRecord::new(item.id, item.payload.clone(), Some(plan), now);
                    self.store.put(&record)?;
                    let handle = self.alarms.arm(ArmRequest {
                        id: item.id,
                        plan,
                        payload: item.bytes.clone(),
                    })?;
                    tracing::debug!("⏰ Armed {} (generation {})", handle.id, handle.generation);
                }
                None => {
                    // Immediate notifications are never persisted.
                    self.store.delete(item.id)?;
                }
            }
            Ok(())
        })
    }

    fn rollback(&self, applied: Vec<(i32, Option<NotificationRecord>)>, now: DateTime<Utc>) {
        for (id, previous) in applied.into_iter().rev() {
            self.locks.with(id, || {
                if let Err(e) = self.alarms.cancel(id) {
                    tracing::warn!("⚠️ Rollback: cancel {} failed: {e}", id);
                }
                let restored = match previous {
                    Some(record) => self.restore(&record, now),
                    None => self.store.delete(id).map(|_| ()),
                };
                if let Err(e) = restored {
                    tracing::warn!("⚠️ Rollback: restore {} failed: {e}", id);
                }
            });
        }
    }

    fn restore(&self, record: &NotificationRecord, now: DateTime<Utc>) -> Result<()> {
        self.store.put(record)?;
        if let Some(plan) = record.plan.and_then(|p| p.resume_after(now)) {
            self.alarms.arm(ArmRequest {
                id: record.id,
                plan,
                payload: record.payload.encode()?,
            })?;
        }
        Ok(())
    }

    /// Handle an alarm going off.
    ///
    /// Calendar matches are re-armed for their next occurrence and the record
    /// is updated before the notification is shown. Returns the shown payload,
    /// or `None` when the record no longer exists.
    pub fn on_alarm_fired(
        &self,
        fire: AlarmFire,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationPayload>> {
        self.locks.with(fire.id, || self.deliver(fire, now))
    }

    fn deliver(&self, fire: AlarmFire, now: DateTime<Utc>) -> Result<Option<NotificationPayload>> {
        let Some(mut record) = self.store.get(fire.id)? else {
            tracing::warn!(
                "⚠️ Alarm {} fired but its record is gone; skipping delivery",
                fire.id
            );
            return Ok(None);
        };

        let next_plan = match record.schedule() {
            Some(schedule) if matches!(schedule.trigger, Trigger::CalendarMatch { .. }) => {
                let from = now.max(fire.scheduled_for);
                let next = planner::plan(schedule, from, self.options.exact_alarms_permitted)?;
                if let Some(plan) = next {
                    self.alarms.arm(ArmRequest {
                        id: record.id,
                        plan,
                        payload: record.payload.encode()?,
                    })?;
                    tracing::debug!(
                        "⏰ Calendar match {} re-armed for {}",
                        record.id,
                        plan.fire_at
                    );
                }
                next
            }
            // Fixed periods are re-armed by the alarm service itself.
            _ => record.plan.and_then(|p| p.resume_after(now)),
        };

        if record.is_removable() || next_plan.is_none() {
            self.store.delete(record.id)?;
        } else {
            record.state = record.state.fired();
            record.plan = next_plan;
            record.updated_at = now;
            self.store.put(&record)?;
        }

        tracing::info!("🔔 Notification {} fired", record.id);
        self.sink.show(&record.payload);
        Ok(Some(record.payload))
    }

    /// Handle a user interaction with a delivered notification.
    pub fn resolve_interaction(
        &self,
        event: InteractionEvent,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        self.locks.with(event.notification_id, || self.interact(event, now))
    }

    fn interact(&self, event: InteractionEvent, now: DateTime<Utc>) -> Result<Resolution> {
        let id = event.notification_id;
        let record = self.store.get(id)?;
        let resolution = {
            let table = self.actions.read().unwrap_or_else(PoisonError::into_inner);
            actions::resolve(record.as_ref(), &table, &event)
        };

        if resolution.should_dismiss_visible {
            self.sink.dismiss(id);
        }
        if resolution.should_delete_persisted {
            self.alarms.cancel(id)?;
            self.store.delete(id)?;
        } else if let Some(mut record) = record {
            record.state = record.state.interacted();
            record.updated_at = now;
            self.store.put(&record)?;
        }

        tracing::info!(
            "👆 Notification {} action '{}' (dismiss={}, delete={})",
            id,
            resolution.action_id,
            resolution.should_dismiss_visible,
            resolution.should_delete_persisted
        );
        Ok(resolution)
    }

    /// Dismiss, disarm and forget every id. Unknown ids are fine.
    pub fn cancel(&self, ids: &[i32]) -> Result<()> {
        for &id in ids {
            self.locks.with(id, || -> Result<()> {
                self.sink.dismiss(id);
                self.alarms.cancel(id)?;
                if self.store.delete(id)? {
                    tracing::info!("🗑️ Notification {} cancelled", id);
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// All persisted records.
    pub fn pending(&self) -> Result<Vec<NotificationRecord>> {
        self.store.list()
    }

    /// The subset of `ids` that still have a record. Empty `ids` means all.
    pub fn list_pending(&self, ids: &[i32]) -> Result<Vec<i32>> {
        self.store.list_pending(ids)
    }

    /// Persist action groups and reload the in-memory table from the store.
    pub fn register_action_types(&self, groups: &[ActionGroup]) -> Result<()> {
        for group in groups {
            self.store.put_action_group(group)?;
        }
        let table = ActionGroupTable::from_groups(self.store.action_groups()?);
        tracing::info!("📋 Registered {} action group(s), {} total", groups.len(), table.len());
        *self.actions.write().unwrap_or_else(PoisonError::into_inner) = table;
        Ok(())
    }

    /// Registered action groups, ordered by id.
    pub fn action_groups(&self) -> Vec<ActionGroup> {
        let table = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        let mut groups: Vec<ActionGroup> = table.groups().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    /// Re-arm every persisted record that has no live arm. Run once at startup.
    ///
    /// Calendar matches are planned afresh from `now`; fixed periods resume on
    /// their original cadence; one-shots still in the future are armed again;
    /// one-shots whose time has passed are deleted.
    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for record in self.store.list()? {
            let id = record.id;
            match self.locks.with(id, || self.reconcile_one(record, now))? {
                Reconciled::Skipped => {}
                Reconciled::Rearmed => report.rearmed.push(id),
                Reconciled::Missed => report.missed.push(id),
            }
        }

        if !report.rearmed.is_empty() || !report.missed.is_empty() {
            tracing::info!(
                "🔄 Reconciled: {} re-armed, {} missed",
                report.rearmed.len(),
                report.missed.len()
            );
        }
        Ok(report)
    }

    fn reconcile_one(
        &self,
        mut record: NotificationRecord,
        now: DateTime<Utc>,
    ) -> Result<Reconciled> {
        if self.alarms.is_armed(record.id) {
            return Ok(Reconciled::Skipped);
        }
        let Some(schedule) = record.schedule() else {
            return Ok(Reconciled::Skipped);
        };

        let plan = match (&schedule.trigger, record.plan) {
            (Trigger::CalendarMatch { .. }, _) => {
                planner::plan(schedule, now, self.options.exact_alarms_permitted)?
            }
            (_, Some(last)) => last.resume_after(now),
            (_, None) => planner::plan(schedule, now, self.options.exact_alarms_permitted)
                .ok()
                .flatten(),
        };

        match plan {
            Some(plan) => {
                self.alarms.arm(ArmRequest {
                    id: record.id,
                    plan,
                    payload: record.payload.encode()?,
                })?;
                record.plan = Some(plan);
                record.updated_at = now;
                self.store.put(&record)?;
                Ok(Reconciled::Rearmed)
            }
            None => {
                tracing::warn!(
                    "⚠️ Notification {} missed its last occurrence while not armed; removing",
                    record.id
                );
                self.store.delete(record.id)?;
                Ok(Reconciled::Missed)
            }
        }
    }
}

/// Deliver every alarm `alarms` has due at `now`.
///
/// A single-shot fire whose delivery fails is put back into `alarms`, so the
/// next pass retries it instead of leaving the record with no live arm.
pub fn fire_due(
    scheduler: &NotificationScheduler,
    alarms: &TimerAlarms,
    now: DateTime<Utc>,
) -> Vec<NotificationPayload> {
    let mut delivered = Vec::new();
    for fire in alarms.due(now) {
        let id = fire.id;
        match scheduler.on_alarm_fired(fire.clone(), now) {
            Ok(Some(payload)) => delivered.push(payload),
            Ok(None) => {}
            Err(e) => {
                if alarms.retry(fire) {
                    tracing::warn!("⚠️ Delivery of {} failed: {e}; retrying next tick", id);
                } else {
                    tracing::warn!("⚠️ Delivery of {} failed: {e}", id);
                }
            }
        }
    }
    delivered
}

/// Run the in-process alarm loop: poll `alarms` every `tick` and feed fires to
/// the scheduler. Never returns; spawn it.
pub async fn spawn_alarm_loop(
    scheduler: Arc<NotificationScheduler>,
    alarms: Arc<TimerAlarms>,
    tick: std::time::Duration,
) {
    tracing::info!("⏰ Alarm loop started (tick every {}ms)", tick.as_millis());

    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let delivered = fire_due(&scheduler, &alarms, Utc::now());
        if !delivered.is_empty() {
            tracing::debug!("⏰ Tick delivered {} notification(s)", delivered.len());
        }
    }
}
