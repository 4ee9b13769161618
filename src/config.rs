//! Configuration for the lemonpi_bled daemon.
//!
//! Loaded from a YAML file; every field has a default, so an absent file
//! yields a fully working configuration.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Daemon configuration.
///
/// # Example
///
/// ```yaml
/// local_name: lemon-pi
/// adapter: hci0
/// advertising_restart_ms: 1000
/// thermometer_poll_seconds: 5
/// test_mode: false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local name carried in the advertising payload.
    #[serde(default = "defaults::local_name")]
    pub local_name: String,

    /// Bluetooth adapter to use (`hci0`-style); the first adapter exposing
    /// a GATT manager when unset.
    #[serde(default)]
    pub adapter: Option<String>,

    /// Debounce before advertising resumes after the last client leaves.
    #[serde(default = "defaults::advertising_restart_ms")]
    pub advertising_restart_ms: u64,

    /// CPU thermometer polling interval.
    #[serde(default = "defaults::thermometer_poll_seconds")]
    pub thermometer_poll_seconds: u64,

    /// Synthetic GPS cadence in test mode.
    #[serde(default = "defaults::synthetic_gps_interval_seconds")]
    pub synthetic_gps_interval_seconds: u64,

    /// Synthetic OBD cadence in test mode.
    #[serde(default = "defaults::synthetic_obd_interval_seconds")]
    pub synthetic_obd_interval_seconds: u64,

    /// Run with synthetic GPS and OBD data instead of hardware readers.
    #[serde(default)]
    pub test_mode: bool,
}

mod defaults {
    pub fn local_name() -> String {
        "lemon-pi".to_string()
    }

    pub fn advertising_restart_ms() -> u64 {
        1000
    }

    pub fn thermometer_poll_seconds() -> u64 {
        5
    }

    pub fn synthetic_gps_interval_seconds() -> u64 {
        1
    }

    pub fn synthetic_obd_interval_seconds() -> u64 {
        10
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_name: defaults::local_name(),
            adapter: None,
            advertising_restart_ms: defaults::advertising_restart_ms(),
            thermometer_poll_seconds: defaults::thermometer_poll_seconds(),
            synthetic_gps_interval_seconds: defaults::synthetic_gps_interval_seconds(),
            synthetic_obd_interval_seconds: defaults::synthetic_obd_interval_seconds(),
            test_mode: false,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or the defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("no config file given, using defaults");
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_match_the_protocol_expectations() {
        let config = Config::default();
        assert_eq!(config.local_name, "lemon-pi");
        assert_eq!(config.advertising_restart_ms, 1000);
        assert_eq!(config.thermometer_poll_seconds, 5);
        assert!(!config.test_mode);
        assert_eq!(config.adapter, None);
    }

    #[test]
    fn missing_path_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.local_name, "lemon-pi");
    }

    #[test]
    fn yaml_overrides_land() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "local_name: track-car\nadapter: hci1\nadvertising_restart_ms: 250\ntest_mode: true"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.local_name, "track-car");
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.advertising_restart_ms, 250);
        assert!(config.test_mode);
        // Untouched fields keep their defaults.
        assert_eq!(config.thermometer_poll_seconds, 5);
    }

    #[test]
    fn unreadable_path_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/lemonpi.yml"))).is_err());
    }
}
