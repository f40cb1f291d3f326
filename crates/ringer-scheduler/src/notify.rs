//! Delivery sink: where shown / dismissed / received signals go.
//! Rendering is the host's business; the orchestrator only says what happened.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::NotificationPayload;

/// Max entries kept in [`LogSink`] history.
pub const HISTORY_LIMIT: usize = 100;

/// Host-side surface for visible notifications.
pub trait DeliverySink: Send + Sync {
    /// Put the notification in the visible list (or refresh it in place).
    fn show(&self, payload: &NotificationPayload);

    /// Remove the visible notification for `id`. No-op if not visible.
    fn dismiss(&self, id: i32);

    /// Signal listeners that an immediate notification was delivered.
    fn received(&self, payload: &NotificationPayload);
}

/// What kind of signal was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Shown,
    Dismissed,
    Received,
}

/// One entry in the sink history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub kind: DeliveryKind,
    pub id: i32,
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Sink that logs every signal and keeps the last [`HISTORY_LIMIT`] of them.
#[derive(Debug, Default)]
pub struct LogSink {
    history: Mutex<VecDeque<DeliveryEvent>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kind: DeliveryKind, id: i32, title: Option<&str>) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(DeliveryEvent {
            kind,
            id,
            title: title.map(str::to_string),
            timestamp: Utc::now(),
        });
        // Ring buffer
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    /// Snapshot of the history, oldest first.
    pub fn history(&self) -> Vec<DeliveryEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().cloned().collect()
    }

    /// Ids of the history entries of one kind, oldest first.
    pub fn of_kind(&self, kind: DeliveryKind) -> Vec<i32> {
        self.history()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect()
    }
}

impl DeliverySink for LogSink {
    fn show(&self, payload: &NotificationPayload) {
        let id = payload.id.unwrap_or_default();
        tracing::info!("🔔 [{}] {}: {}", id, payload.title, payload.body);
        self.record(DeliveryKind::Shown, id, Some(&payload.title));
    }

    fn dismiss(&self, id: i32) {
        tracing::debug!("🧹 Dismissed {}", id);
        self.record(DeliveryKind::Dismissed, id, None);
    }

    fn received(&self, payload: &NotificationPayload) {
        let id = payload.id.unwrap_or_default();
        tracing::debug!("📨 Received {}", id);
        self.record(DeliveryKind::Received, id, Some(&payload.title));
    }
}
