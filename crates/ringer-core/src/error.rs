//! Error type shared across Ringer crates.

use thiserror::Error;

/// Everything that can go wrong while scheduling, firing or resolving a notification.
///
/// Unknown action ids and denied exact-alarm capability are not errors: both
/// degrade to a default and are logged as warnings.
#[derive(Debug, Error)]
pub enum RingerError {
    /// The schedule can never produce a future fire time (past one-shot,
    /// impossible calendar pattern, zero count, overflowing interval).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A submitted notification carried no id. Fails the whole batch.
    #[error("Notification missing identifier")]
    MissingIdentifier,

    #[error("Notifications not enabled on this device")]
    NotificationsDisabled,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Alarm service error: {0}")]
    Alarm(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RingerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = RingerError::InvalidSchedule("scheduled time must be after current time".into());
        assert_eq!(
            e.to_string(),
            "Invalid schedule: scheduled time must be after current time"
        );
        assert_eq!(
            RingerError::MissingIdentifier.to_string(),
            "Notification missing identifier"
        );
    }

    #[test]
    fn test_io_conversion() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/here/ringer.toml")?)
        }
        assert!(matches!(read(), Err(RingerError::Io(_))));
    }
}
