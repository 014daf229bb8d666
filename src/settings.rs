use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User-editable connection settings. Created with defaults when the store
/// is built, replaced wholesale via `SyncStore::set_connection_settings`,
/// never mutated by pushed data. Changing them does not reconnect by itself;
/// that is a separate explicit action.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub tracker_ip: String,
    /// Kept as a string to match the backend's configure endpoint, but it
    /// must parse as a port number.
    pub tracker_port: String,
    /// Where direct downloads are materialized. Advisory: the backend never
    /// sees this path.
    pub download_dir: PathBuf,
    pub auto_seed: bool,
    pub use_local_tracker: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            tracker_ip: "127.0.0.1".to_string(),
            tracker_port: "12345".to_string(),
            download_dir: PathBuf::from("./downloads"),
            auto_seed: true,
            use_local_tracker: true,
        }
    }
}

impl ConnectionSettings {
    /// Check the fields the backend will actually reject.
    pub fn validate(&self) -> Result<()> {
        if self.tracker_ip.trim().is_empty() {
            bail!("Tracker IP cannot be empty");
        }
        self.tracker_port
            .parse::<u16>()
            .map(|_| ())
            .with_context(|| format!("Invalid tracker port: {}", self.tracker_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_tracker() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.tracker_ip, "127.0.0.1");
        assert_eq!(settings.tracker_port, "12345");
        assert_eq!(settings.download_dir, PathBuf::from("./downloads"));
        assert!(settings.auto_seed);
        assert!(settings.use_local_tracker);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let settings = ConnectionSettings {
            tracker_port: "not-a-port".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_tracker_ip_is_rejected() {
        let settings = ConnectionSettings {
            tracker_ip: "  ".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
