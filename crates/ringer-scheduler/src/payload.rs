//! Notification payload and the record persisted for it.
//!
//! The payload has a fixed, versioned schema. It is encoded once at submission
//! and the alarm service carries the bytes without looking inside.

use chrono::{DateTime, Utc};
use ringer_core::{DeliveryDefaults, Result, RingerError};
use serde::{Deserialize, Serialize};

use crate::actions::DeliveryState;
use crate::planner::ArmPlan;
use crate::schedule::{self, Schedule};

/// Current payload schema version.
pub const PAYLOAD_VERSION: u32 = 1;

fn current_version() -> u32 {
    PAYLOAD_VERSION
}

/// Everything the caller submits for one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    /// Required; kept optional here so a missing id can be reported instead of
    /// failing the whole parse.
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Action group offered on this notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Free-form caller data, echoed back on interaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    /// Re-submitting this id leaves the visible notification in place.
    #[serde(default)]
    pub update_silently: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
}

impl NotificationPayload {
    pub fn new(id: i32, title: &str, body: &str) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            id: Some(id),
            title: title.to_string(),
            body: body.to_string(),
            large_body: None,
            summary_text: None,
            group: None,
            channel_id: None,
            action_type_id: None,
            schedule: None,
            extra: None,
            update_silently: false,
            sound: None,
            small_icon: None,
            icon_color: None,
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_action_type(mut self, action_type_id: &str) -> Self {
        self.action_type_id = Some(action_type_id.to_string());
        self
    }

    /// The notification id, or `MissingIdentifier`.
    pub fn require_id(&self) -> Result<i32> {
        self.id.ok_or(RingerError::MissingIdentifier)
    }

    pub fn is_removable(&self) -> bool {
        schedule::is_removable(self.schedule.as_ref())
    }

    /// Fill unset presentation fields from the configured defaults.
    pub fn apply_defaults(&mut self, defaults: &DeliveryDefaults) {
        if self.sound.is_none() {
            self.sound.clone_from(&defaults.sound);
        }
        if self.small_icon.is_none() {
            self.small_icon.clone_from(&defaults.small_icon);
        }
        if self.icon_color.is_none() {
            self.icon_color.clone_from(&defaults.icon_color);
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload: Self = serde_json::from_slice(bytes)?;
        if payload.version > PAYLOAD_VERSION {
            return Err(RingerError::InvalidPayload(format!(
                "unsupported payload version {} (max {PAYLOAD_VERSION})",
                payload.version
            )));
        }
        Ok(payload)
    }
}

/// What the record store keeps per notification id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i32,
    pub payload: NotificationPayload,
    pub state: DeliveryState,
    /// Last arm handed to the alarm service, if any.
    #[serde(default)]
    pub plan: Option<ArmPlan>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(
        id: i32,
        payload: NotificationPayload,
        plan: Option<ArmPlan>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            state: DeliveryState::Undelivered,
            plan,
            updated_at: now,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.payload.schedule.as_ref()
    }

    pub fn action_type_id(&self) -> Option<&str> {
        self.payload.action_type_id.as_deref()
    }

    pub fn is_removable(&self) -> bool {
        self.payload.is_removable()
    }
}
