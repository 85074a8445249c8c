//! Runtime configuration.
//!
//! Loaded from TOML; every key is optional and falls back to the values the
//! supported gamepads were tuned with.
//!
//! ```toml
//! hardware_filter = "vid_2717&pid_3144"
//! scan_interval_ms = 5000
//! read_timeout_ms = 1000
//! guide_pulse_ms = 200
//! rumble_timeout_ms = 3000
//! hide_devices = true
//! max_bridges = 4
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Case-insensitive substring matched against device paths.
    pub hardware_filter: String,
    pub scan_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub guide_pulse_ms: u64,
    pub rumble_timeout_ms: u64,
    /// Ask the visibility collaborator to hide bridged devices.
    pub hide_devices: bool,
    /// Upper bound on simultaneous bridges. `None` = unlimited.
    pub max_bridges: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hardware_filter: "vid_2717&pid_3144".into(),
            scan_interval_ms: 5000,
            read_timeout_ms: 1000,
            guide_pulse_ms: 200,
            rumble_timeout_ms: 3000,
            hide_devices: true,
            max_bridges: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Per-bridge timings.
    pub fn timing(&self) -> BridgeTiming {
        BridgeTiming {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            guide_pulse: Duration::from_millis(self.guide_pulse_ms),
            rumble_timeout: Duration::from_millis(self.rumble_timeout_ms),
        }
    }
}

/// Timings every bridge runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeTiming {
    /// Upper bound on one blocking read; also bounds cancellation latency.
    pub read_timeout: Duration,
    /// How long a synthesized guide press stays asserted.
    pub guide_pulse: Duration,
    /// Motors are reset after this long without a new feedback command.
    pub rumble_timeout: Duration,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Config::default().timing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.timing().read_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.timing().guide_pulse, Duration::from_millis(200));
        assert_eq!(cfg.timing().rumble_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.scan_interval(), Duration::from_secs(5));
        assert_eq!(cfg.max_bridges, None);
    }

    #[test]
    fn partial_file_overrides_keys() {
        let cfg = Config::from_toml_str(
            r#"
            hardware_filter = "VID_1234"
            max_bridges = 4
            hide_devices = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hardware_filter, "VID_1234");
        assert_eq!(cfg.max_bridges, Some(4));
        assert!(!cfg.hide_devices);
        assert_eq!(cfg.scan_interval_ms, 5000);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = Config::from_toml_str("scan_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
