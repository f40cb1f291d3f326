//! Ringer configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RingerError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: DeliveryDefaults,
}

impl RingerConfig {
    /// Load config from the default path (~/.ringer/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RingerError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RingerError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RingerError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Ringer home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ringer")
    }
}

/// Scheduling policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the host allows exact-time alarms. When false every plan is
    /// downgraded to inexact.
    #[serde(default = "bool_true")]
    pub exact_alarms_permitted: bool,
    #[serde(default = "bool_true")]
    pub notifications_enabled: bool,
    /// Poll period of the in-process alarm loop.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn bool_true() -> bool { true }
fn default_tick_interval_ms() -> u64 { 1000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            exact_alarms_permitted: true,
            notifications_enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Which record store backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Json,
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// SQLite file, or directory for the json backend. `~` is expanded.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_backend() -> StorageBackend { StorageBackend::Sqlite }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    /// Resolved storage location, with tilde expansion and a per-backend default.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => match self.backend {
                StorageBackend::Sqlite => RingerConfig::home_dir().join("notifications.db"),
                StorageBackend::Json => RingerConfig::home_dir().join("store"),
            },
        }
    }
}

/// Delivery defaults, resolved once and handed to the orchestrator by value.
/// Applied to a submitted payload only where the payload leaves a field unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDefaults {
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub small_icon: Option<String>,
    #[serde(default)]
    pub icon_color: Option<String>,
}
