//! SQLite-backed record store. Survives restarts; one connection behind a mutex.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ringer_core::{Result, RingerError};

use crate::actions::{ActionGroup, DeliveryState};
use crate::payload::{NotificationPayload, NotificationRecord};
use crate::planner::ArmPlan;
use crate::store::NotificationStore;

/// SQLite persistence for notification records and action groups.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| RingerError::Storage(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// In-memory database, gone when dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| RingerError::Storage(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            -- One row per notification id
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY,
                payload TEXT NOT NULL,          -- versioned payload JSON
                state TEXT NOT NULL DEFAULT 'undelivered',
                plan TEXT,                      -- JSON ArmPlan of the last arm
                updated_at TEXT NOT NULL
            );

            -- Action groups keyed by actionTypeId
            CREATE TABLE IF NOT EXISTS action_groups (
                id TEXT PRIMARY KEY,
                actions TEXT NOT NULL           -- JSON array of action definitions
            );
         ",
            )
            .map_err(|e| RingerError::Storage(format!("Migration: {e}")))?;
        Ok(())
    }
}

fn state_name(state: DeliveryState) -> &'static str {
    match state {
        DeliveryState::Undelivered => "undelivered",
        DeliveryState::Delivered => "delivered",
        DeliveryState::Resolved => "resolved",
    }
}

fn parse_state(name: &str) -> DeliveryState {
    match name {
        "delivered" => DeliveryState::Delivered,
        "resolved" => DeliveryState::Resolved,
        _ => DeliveryState::Undelivered,
    }
}

type RawRow = (i32, String, String, Option<String>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record((id, payload, state, plan, updated_at): RawRow) -> Result<NotificationRecord> {
    let payload = NotificationPayload::decode(payload.as_bytes())?;
    let plan: Option<ArmPlan> = plan.as_deref().map(serde_json::from_str).transpose()?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RingerError::Storage(format!("Bad updated_at for {id}: {e}")))?;
    Ok(NotificationRecord {
        id,
        payload,
        state: parse_state(&state),
        plan,
        updated_at,
    })
}

impl NotificationStore for SqliteStore {
    fn get(&self, id: i32) -> Result<Option<NotificationRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, payload, state, plan, updated_at FROM notifications WHERE id = ?1")
            .map_err(|e| RingerError::Storage(format!("Load notification: {e}")))?;
        let mut rows = stmt
            .query_map([id], read_row)
            .map_err(|e| RingerError::Storage(format!("Load notification: {e}")))?;
        match rows.next() {
            Some(row) => {
                let raw = row.map_err(|e| RingerError::Storage(format!("Load notification: {e}")))?;
                into_record(raw).map(Some)
            }
            None => Ok(None),
        }
    }

    fn put(&self, record: &NotificationRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        let plan = record.plan.map(|p| serde_json::to_string(&p)).transpose()?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO notifications (id, payload, state, plan, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.id,
                    payload,
                    state_name(record.state),
                    plan,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RingerError::Storage(format!("Save notification: {e}")))?;
        Ok(())
    }

    fn delete(&self, id: i32) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM notifications WHERE id = ?1", [id])
            .map_err(|e| RingerError::Storage(format!("Delete notification: {e}")))?;
        Ok(changed > 0)
    }

    fn list(&self) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, payload, state, plan, updated_at FROM notifications ORDER BY id")
            .map_err(|e| RingerError::Storage(format!("List notifications: {e}")))?;
        let raws = stmt
            .query_map([], read_row)
            .map_err(|e| RingerError::Storage(format!("List notifications: {e}")))?
            .collect::<rusqlite::Result<Vec<RawRow>>>()
            .map_err(|e| RingerError::Storage(format!("List notifications: {e}")))?;
        raws.into_iter().map(into_record).collect()
    }

    fn list_pending(&self, ids: &[i32]) -> Result<Vec<i32>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id FROM notifications ORDER BY id")
            .map_err(|e| RingerError::Storage(format!("List pending: {e}")))?;
        let stored = stmt
            .query_map([], |row| row.get::<_, i32>(0))
            .map_err(|e| RingerError::Storage(format!("List pending: {e}")))?
            .collect::<rusqlite::Result<Vec<i32>>>()
            .map_err(|e| RingerError::Storage(format!("List pending: {e}")))?;
        if ids.is_empty() {
            return Ok(stored);
        }
        Ok(ids.iter().copied().filter(|id| stored.contains(id)).collect())
    }

    fn put_action_group(&self, group: &ActionGroup) -> Result<()> {
        let actions = serde_json::to_string(&group.actions)?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO action_groups (id, actions) VALUES (?1, ?2)",
                rusqlite::params![group.id, actions],
            )
            .map_err(|e| RingerError::Storage(format!("Save action group: {e}")))?;
        Ok(())
    }

    fn action_groups(&self) -> Result<Vec<ActionGroup>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, actions FROM action_groups ORDER BY id")
            .map_err(|e| RingerError::Storage(format!("Load action groups: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| RingerError::Storage(format!("Load action groups: {e}")))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()
            .map_err(|e| RingerError::Storage(format!("Load action groups: {e}")))?;
        rows.into_iter()
            .map(|(id, actions)| {
                Ok(ActionGroup {
                    id,
                    actions: serde_json::from_str(&actions)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionDefinition;
    use crate::calendar::CalendarPattern;
    use crate::schedule::Schedule;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("ringer-sqlite-test");
        std::fs::remove_dir_all(&dir).ok();
        let db = SqliteStore::open(&dir.join("test.db")).unwrap();
        assert!(db.list().unwrap().is_empty());
        drop(db);
        // Migrations are idempotent.
        let db = SqliteStore::open(&dir.join("test.db")).unwrap();
        assert!(db.list().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_record() {
        let db = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let payload = NotificationPayload::new(11, "Standup", "now")
            .with_schedule(Schedule::on(CalendarPattern {
                hour: Some(9),
                ..Default::default()
            }))
            .with_action_type("reply");
        let mut record = NotificationRecord::new(
            11,
            payload,
            Some(ArmPlan {
                fire_at: now + Duration::hours(1),
                repeat_period: None,
                allow_while_idle: true,
                exact: true,
            }),
            now,
        );
        record.state = DeliveryState::Delivered;
        db.put(&record).unwrap();

        let loaded = db.get(11).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(db.get(12).unwrap().is_none());
        assert_eq!(db.list_pending(&[11, 12]).unwrap(), vec![11]);

        assert!(db.delete(11).unwrap());
        assert!(!db.delete(11).unwrap());
        assert!(db.list().unwrap().is_empty());
    }

    #[test]
    fn test_action_groups() {
        let db = SqliteStore::open_in_memory().unwrap();
        let mut send = ActionDefinition::new("send", "Send");
        send.accepts_input = true;
        send.dismisses_on_invoke = false;
        let group = ActionGroup {
            id: "reply".into(),
            actions: vec![send],
        };
        db.put_action_group(&group).unwrap();
        db.put_action_group(&group).unwrap();
        assert_eq!(db.action_groups().unwrap(), vec![group]);
    }
}
