//! Action resolution: what a user interaction does to a delivered notification.
//!
//! Pure decision logic: given the persisted record (or the payload carried by
//! the event when the record is already gone), the action-group table and the
//! interaction, decide whether to dismiss the visible notification and whether
//! to delete the record. No I/O happens here.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::payload::{NotificationPayload, NotificationRecord};

/// Reserved action id for a tap on the notification body.
pub const TAP_ACTION: &str = "tap";
/// Reserved action id for a swipe-away / clear.
pub const DISMISS_ACTION: &str = "dismiss";

fn bool_true() -> bool {
    true
}

/// A flag that counts as `true` unless explicitly `false`.
fn flag_or_true<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(serde_json::Value::deserialize(d)?.as_bool().unwrap_or(true))
}

fn flag_or_false<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(serde_json::Value::deserialize(d)?.as_bool().unwrap_or(false))
}

/// One button offered on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "input", default, deserialize_with = "flag_or_false")]
    pub accepts_input: bool,
    #[serde(rename = "openApp", default = "bool_true", deserialize_with = "flag_or_true")]
    pub opens_host: bool,
    #[serde(
        rename = "dismissNotification",
        default = "bool_true",
        deserialize_with = "flag_or_true"
    )]
    pub dismisses_on_invoke: bool,
}

impl ActionDefinition {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            accepts_input: false,
            opens_host: true,
            dismisses_on_invoke: true,
        }
    }
}

/// A named, ordered set of actions, referenced by a payload's `actionTypeId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub id: String,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

/// All registered action groups, keyed by group id.
#[derive(Debug, Clone, Default)]
pub struct ActionGroupTable {
    groups: HashMap<String, ActionGroup>,
}

impl ActionGroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: impl IntoIterator<Item = ActionGroup>) -> Self {
        let mut table = Self::new();
        for group in groups {
            table.insert(group);
        }
        table
    }

    /// Add or replace a group.
    pub fn insert(&mut self, group: ActionGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn get(&self, action_type_id: &str) -> Option<&[ActionDefinition]> {
        self.groups.get(action_type_id).map(|g| g.actions.as_slice())
    }

    /// Find one action inside one group.
    pub fn find(&self, action_type_id: &str, action_id: &str) -> Option<&ActionDefinition> {
        self.get(action_type_id)?.iter().find(|a| a.id == action_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ActionGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Lifecycle of a single notification id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Submitted, not shown yet.
    Undelivered,
    /// Shown to the user.
    Delivered,
    /// The user interacted with it.
    Resolved,
}

impl DeliveryState {
    /// State after an occurrence is shown. A repeating record that was
    /// resolved becomes delivered again.
    pub fn fired(self) -> Self {
        match self {
            Self::Undelivered | Self::Delivered | Self::Resolved => Self::Delivered,
        }
    }

    /// State after an interaction. Only something that was shown can be
    /// resolved; an undelivered record keeps waiting for its occurrence.
    pub fn interacted(self) -> Self {
        match self {
            Self::Undelivered => Self::Undelivered,
            Self::Delivered | Self::Resolved => Self::Resolved,
        }
    }
}

/// A user interaction reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub notification_id: i32,
    pub action_id: String,
    /// Free text typed into an input action, if the host captured any.
    #[serde(default)]
    pub input: Option<String>,
    /// Copy of the payload carried by the host callback. Only consulted when
    /// the record store no longer has the record.
    #[serde(default)]
    pub payload: Option<NotificationPayload>,
}

impl InteractionEvent {
    pub fn new(notification_id: i32, action_id: &str) -> Self {
        Self {
            notification_id,
            action_id: action_id.to_string(),
            input: None,
            payload: None,
        }
    }

    pub fn tap(notification_id: i32) -> Self {
        Self::new(notification_id, TAP_ACTION)
    }

    pub fn dismiss(notification_id: i32) -> Self {
        Self::new(notification_id, DISMISS_ACTION)
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.input = Some(input.to_string());
        self
    }

    pub fn with_payload(mut self, payload: NotificationPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_reserved(&self) -> bool {
        self.action_id == TAP_ACTION || self.action_id == DISMISS_ACTION
    }
}

/// Outcome of resolving one interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub notification_id: i32,
    pub action_id: String,
    pub should_dismiss_visible: bool,
    pub should_delete_persisted: bool,
    pub captured_input: Option<String>,
    pub echoed_payload: Option<NotificationPayload>,
    /// The action id was not in the notification's group; defaults were applied.
    pub unknown_action: bool,
}

/// Decide what an interaction does.
///
/// `record` is the store's copy and always wins; the payload carried on the
/// event is the fallback for records that were already deleted.
pub fn resolve(
    record: Option<&NotificationRecord>,
    table: &ActionGroupTable,
    event: &InteractionEvent,
) -> Resolution {
    let payload = record.map(|r| &r.payload).or(event.payload.as_ref());

    let mut definition = None;
    let mut unknown_action = false;
    let dismisses = if event.is_reserved() {
        true
    } else {
        let action_type_id = payload.and_then(|p| p.action_type_id.as_deref());
        match action_type_id.and_then(|t| table.find(t, &event.action_id)) {
            Some(found) => {
                definition = Some(found);
                found.dismisses_on_invoke
            }
            None => {
                tracing::warn!(
                    "⚠️ Action '{}' not found for actionTypeId={:?}, notification {}; dismissing",
                    event.action_id,
                    action_type_id,
                    event.notification_id
                );
                unknown_action = true;
                true
            }
        }
    };

    let removable = payload.is_none_or(NotificationPayload::is_removable);
    let captured_input = definition
        .filter(|d| d.accepts_input)
        .and(event.input.clone());

    Resolution {
        notification_id: event.notification_id,
        action_id: event.action_id.clone(),
        should_dismiss_visible: dismisses,
        should_delete_persisted: dismisses && removable,
        captured_input,
        echoed_payload: payload.cloned(),
        unknown_action,
    }
}
