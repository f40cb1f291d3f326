//! # Ringer Scheduler
//!
//! Local notification scheduling: when to fire, and what a tap or an action
//! button does afterwards.
//!
//! ## Design Principles
//! - Pure core: calendar matching, schedule model, planner and action
//!   resolution do no I/O and hold no hidden state
//! - Alarm service, record store and delivery sink are traits, injected
//! - State lives in the record store, so a restart loses nothing
//! - SQLite persistence by default, JSON files or memory as alternatives
//!
//! ## Architecture
//! ```text
//! schedule(batch)
//!   ├── Schedule: at / every / on → next fire time
//!   ├── Planner: exact or inexact, repeat period, allow-while-idle
//!   ├── NotificationStore.put(record)
//!   └── AlarmService.arm(id, plan, payload bytes)
//!
//! on_alarm_fired(id)
//!   ├── NotificationStore.get(id)
//!   ├── calendar match → plan next occurrence → re-arm
//!   ├── removable → delete, else update state
//!   └── DeliverySink.show
//!
//! resolve_interaction(id, action)
//!   ├── ActionGroupTable lookup (tap / dismiss always dismiss)
//!   └── dismiss visible / delete record / mark resolved
//! ```

pub mod actions;
pub mod alarm;
pub mod calendar;
pub mod engine;
pub mod notify;
pub mod payload;
pub mod persistence;
pub mod planner;
pub mod schedule;
pub mod store;

pub use actions::{
    ActionDefinition, ActionGroup, ActionGroupTable, DeliveryState, InteractionEvent, Resolution,
};
pub use alarm::{AlarmFire, AlarmHandle, AlarmService, ArmRequest, TimerAlarms};
pub use calendar::{CalendarPattern, next_match};
pub use engine::{
    NotificationScheduler, ReconcileReport, SchedulerOptions, fire_due, spawn_alarm_loop,
};
pub use notify::{DeliveryEvent, DeliveryKind, DeliverySink, LogSink};
pub use payload::{NotificationPayload, NotificationRecord};
pub use persistence::SqliteStore;
pub use planner::{ArmPlan, plan};
pub use schedule::{IntervalUnit, Schedule, Trigger};
pub use store::{JsonFileStore, MemoryStore, NotificationStore};
