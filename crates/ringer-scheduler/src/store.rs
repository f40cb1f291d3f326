//! Record store: persisted notification records and action groups.
//!
//! [`NotificationStore`] is the seam the orchestrator uses. Implementations:
//! - [`MemoryStore`]: process-local, for tests and embedding.
//! - [`JsonFileStore`]: JSON files in a directory, human-readable.
//! - `persistence::SqliteStore`: SQLite, the default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ringer_core::{Result, RingerError};

use crate::actions::ActionGroup;
use crate::payload::NotificationRecord;

/// Key-value storage for notification records (by id) and action groups (by group id).
///
/// Every call either fully succeeds or fails without a partial write.
pub trait NotificationStore: Send + Sync {
    fn get(&self, id: i32) -> Result<Option<NotificationRecord>>;

    /// Insert or replace the record for `record.id`.
    fn put(&self, record: &NotificationRecord) -> Result<()>;

    /// Remove the record. Returns whether one existed.
    fn delete(&self, id: i32) -> Result<bool>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<NotificationRecord>>;

    /// The subset of `ids` that still have a record. Empty `ids` means all.
    fn list_pending(&self, ids: &[i32]) -> Result<Vec<i32>> {
        let stored: Vec<i32> = self.list()?.into_iter().map(|r| r.id).collect();
        if ids.is_empty() {
            return Ok(stored);
        }
        Ok(ids.iter().copied().filter(|id| stored.contains(id)).collect())
    }

    /// Insert or replace an action group.
    fn put_action_group(&self, group: &ActionGroup) -> Result<()>;

    fn action_groups(&self) -> Result<Vec<ActionGroup>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<i32, NotificationRecord>>,
    groups: Mutex<BTreeMap<String, ActionGroup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for MemoryStore {
    fn get(&self, id: i32) -> Result<Option<NotificationRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&id).cloned())
    }

    fn put(&self, record: &NotificationRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn delete(&self, id: i32) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(&id).is_some())
    }

    fn list(&self) -> Result<Vec<NotificationRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn put_action_group(&self, group: &ActionGroup) -> Result<()> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    fn action_groups(&self) -> Result<Vec<ActionGroup>> {
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(groups.values().cloned().collect())
    }
}

const RECORDS_FILE: &str = "notifications.json";
const ACTION_TYPES_FILE: &str = "action_types.json";

/// File-based store: one JSON file for records, one for action groups.
/// Every write rewrites the file via a temp file + rename.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store in `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn read<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let file = self.path.join(name);
        if !file.exists() {
            return Ok(T::default());
        }
        let json = std::fs::read_to_string(&file)?;
        serde_json::from_str(&json)
            .map_err(|e| RingerError::Storage(format!("Failed to parse {}: {e}", file.display())))
    }

    fn write<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let file = self.path.join(name);
        let tmp = self.path.join(format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &file)?;
        tracing::debug!("💾 Saved {}", file.display());
        Ok(())
    }

    fn records(&self) -> Result<BTreeMap<i32, NotificationRecord>> {
        let list: Vec<NotificationRecord> = self.read(RECORDS_FILE)?;
        Ok(list.into_iter().map(|r| (r.id, r)).collect())
    }

    fn save_records(&self, records: &BTreeMap<i32, NotificationRecord>) -> Result<()> {
        let list: Vec<&NotificationRecord> = records.values().collect();
        self.write(RECORDS_FILE, &list)
    }
}

impl NotificationStore for JsonFileStore {
    fn get(&self, id: i32) -> Result<Option<NotificationRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.records()?.remove(&id))
    }

    fn put(&self, record: &NotificationRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.records()?;
        records.insert(record.id, record.clone());
        self.save_records(&records)
    }

    fn delete(&self, id: i32) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.records()?;
        if records.remove(&id).is_none() {
            return Ok(false);
        }
        self.save_records(&records)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<NotificationRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.records()?.into_values().collect())
    }

    fn put_action_group(&self, group: &ActionGroup) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut groups: Vec<ActionGroup> = self.read(ACTION_TYPES_FILE)?;
        groups.retain(|g| g.id != group.id);
        groups.push(group.clone());
        self.write(ACTION_TYPES_FILE, &groups)
    }

    fn action_groups(&self) -> Result<Vec<ActionGroup>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read(ACTION_TYPES_FILE)
    }
}
