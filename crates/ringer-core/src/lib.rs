//! # Ringer Core
//!
//! Types shared by every Ringer crate: the error enum and the TOML config.

pub mod config;
pub mod error;

pub use config::{DeliveryDefaults, RingerConfig, SchedulerConfig, StorageBackend, StorageConfig};
pub use error::{Result, RingerError};
