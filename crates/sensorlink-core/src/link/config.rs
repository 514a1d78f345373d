//! Link timing configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::settings::SettingsError;

/// Timing and retry policy for the link manager
///
/// All delays are in milliseconds so the struct round-trips through JSON
/// config files unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Pause after closing a previous link, before forced release
    pub settle_delay_ms: u64,
    /// Number of open attempts per connect
    pub open_attempts: u32,
    /// Pause between failed open attempts
    pub backoff_ms: u64,
    /// Upper bound on flush+close during disconnect
    pub disconnect_timeout_ms: u64,
    /// Upper bound on a single send
    pub send_timeout_ms: u64,
    /// Pause between disconnect and connect on a forced reconnect
    pub reconnect_delay_ms: u64,
    /// Run the forced-release sequence before opening
    pub force_release: bool,
    /// DTR assert/de-assert pulse width
    pub release_pulse_ms: u64,
    /// Pause after the DTR pulse
    pub release_pause_ms: u64,
    /// Number of open/close cycles
    pub release_cycle_count: u32,
    /// Pause after each cycle
    pub release_cycle_pause_ms: u64,
    /// Final pause before the real open attempts
    pub release_final_settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            open_attempts: 3,
            backoff_ms: 2000,
            disconnect_timeout_ms: 3000,
            send_timeout_ms: 1000,
            reconnect_delay_ms: 3000,
            // Only Windows is known to hold a closed COM port busy
            force_release: cfg!(windows),
            release_pulse_ms: 100,
            release_pause_ms: 1000,
            release_cycle_count: 5,
            release_cycle_pause_ms: 300,
            release_final_settle_ms: 2500,
        }
    }
}

impl LinkConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Settle delay
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Backoff between open attempts
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Disconnect timeout
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"backoff_ms": 500, "force_release": true}"#).unwrap();
        assert_eq!(config.backoff(), Duration::from_millis(500));
        assert!(config.force_release);
        assert_eq!(config.open_attempts, 3);
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.json");
        std::fs::write(&path, r#"{"open_attempts": 5}"#).unwrap();

        let config = LinkConfig::from_file(&path).unwrap();
        assert_eq!(config.open_attempts, 5);
        assert_eq!(config.settle_delay_ms, 1000);
    }
}
