//! `[sensor]` table: which source to poll and how it is addressed.
//!
//! ```toml
//! [sensor]
//! kind = "onewire"
//! poll_interval_ms = 1000
//!
//! [sensor.onewire]
//! names_file = "/etc/sensorbee/probes.json"
//! ```

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Temperature, humidity and pressure.
    #[default]
    Bme280,
    /// Ambient light.
    Max44009,
    /// Any number of DS18B20-style probes on the w1 bus.
    Onewire,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Bme280 => "bme280",
            SensorKind::Max44009 => "max44009",
            SensorKind::Onewire => "onewire",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_kind_settings"))]
pub struct SensorConfig {
    pub kind: SensorKind,

    /// First segment of every state topic.
    #[validate(length(min = 1, message = "State root cannot be empty"), custom(function = "validate_topic_segment"))]
    pub state_root: String,

    /// First segment of every discovery topic.
    #[validate(length(min = 1, message = "Discovery prefix cannot be empty"), custom(function = "validate_topic_segment"))]
    pub discovery_prefix: String,

    #[validate(range(max = 2, message = "QoS must be 0, 1 or 2"))]
    pub qos: u8,

    /// Pause after every poll iteration.
    #[validate(range(min = 10, max = 3_600_000, message = "Poll interval must be between 10 ms and 1 hour"))]
    pub poll_interval_ms: u64,

    #[validate(nested)]
    pub bme280: Bme280Config,

    #[validate(nested)]
    pub max44009: Max44009Config,

    #[validate(nested)]
    pub onewire: OneWireConfig,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            kind: SensorKind::default(),
            state_root: "nick".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            qos: 1,
            poll_interval_ms: 1000,
            bme280: Bme280Config::default(),
            max44009: Max44009Config::default(),
            onewire: OneWireConfig::default(),
        }
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn validate_kind_settings(config: &SensorConfig) -> Result<(), ValidationError> {
    if config.kind == SensorKind::Onewire && config.onewire.names_file.is_none() {
        return Err(ValidationError::new("missing_names_file")
            .with_message("sensor.onewire.names_file is required for kind = \"onewire\"".into()));
    }
    Ok(())
}

fn validate_topic_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.contains(['+', '#']) || segment.starts_with('/') || segment.ends_with('/') {
        return Err(ValidationError::new("invalid_topic_segment")
            .with_message(format!("'{segment}' is not a valid topic prefix").into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Bme280Config {
    pub i2c_bus: u8,

    #[validate(custom(function = "validate_bme280_address"))]
    pub address: u16,

    /// Wait between triggering a forced conversion and reading it back.
    #[validate(range(min = 10, max = 1000, message = "Settle delay must be between 10 and 1000 ms"))]
    pub settle_ms: u64,
}

impl Default for Bme280Config {
    fn default() -> Self {
        Bme280Config {
            i2c_bus: 1,
            address: 0x76,
            settle_ms: 100,
        }
    }
}

impl Bme280Config {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn validate_bme280_address(address: u16) -> Result<(), ValidationError> {
    match address {
        0x76 | 0x77 => Ok(()),
        other => Err(ValidationError::new("invalid_i2c_address")
            .with_message(format!("BME280 address must be 0x76 or 0x77, got {other:#04x}").into())),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Max44009Config {
    pub i2c_bus: u8,

    #[validate(custom(function = "validate_max44009_address"))]
    pub address: u16,
}

impl Default for Max44009Config {
    fn default() -> Self {
        Max44009Config {
            i2c_bus: 1,
            address: 0x4A,
        }
    }
}

fn validate_max44009_address(address: u16) -> Result<(), ValidationError> {
    match address {
        0x4A | 0x4B => Ok(()),
        other => Err(ValidationError::new("invalid_i2c_address")
            .with_message(format!("MAX44009 address must be 0x4A or 0x4B, got {other:#04x}").into())),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OneWireConfig {
    /// sysfs directory holding one entry per probe.
    pub devices_dir: PathBuf,

    /// JSON object mapping probe id to display name.
    pub names_file: Option<PathBuf>,

    /// Publish discovery for probes that show up during polling.
    pub announce_late_probes: bool,

    /// Leave out probes that fail to read instead of failing the scan.
    /// A scan where every probe fails is still an error.
    pub skip_failed_probes: bool,
}

impl Default for OneWireConfig {
    fn default() -> Self {
        OneWireConfig {
            devices_dir: PathBuf::from("/sys/bus/w1/devices"),
            names_file: None,
            announce_late_probes: true,
            skip_failed_probes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.kind, SensorKind::Bme280);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.bme280.settle(), Duration::from_millis(100));
        assert_eq!(config.max44009.address, 0x4A);
        assert!(config.onewire.announce_late_probes);
        assert!(!config.onewire.skip_failed_probes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_kind_from_toml() {
        let config: SensorConfig = toml::from_str(
            r#"
            kind = "onewire"
            [onewire]
            names_file = "/etc/sensorbee/probes.json"
            announce_late_probes = false
            skip_failed_probes = true
            "#,
        )
        .unwrap();
        assert_eq!(config.kind, SensorKind::Onewire);
        assert!(!config.onewire.announce_late_probes);
        assert!(config.onewire.skip_failed_probes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_onewire_without_names_file_is_invalid() {
        let config = SensorConfig {
            kind: SensorKind::Onewire,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wildcard_roots() {
        let config = SensorConfig {
            state_root: "nick/#".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_foreign_bme280_address() {
        let config = SensorConfig {
            bme280: Bme280Config {
                address: 0x10,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BME280 address must be 0x76 or 0x77"));

        let alternate = Bme280Config {
            address: 0x77,
            ..Default::default()
        };
        assert!(alternate.validate().is_ok());
    }

    #[test]
    fn test_rejects_foreign_max44009_address() {
        let config: SensorConfig = toml::from_str(
            r#"
            kind = "max44009"
            [max44009]
            address = 0x10
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MAX44009 address must be 0x4A or 0x4B"));

        let alternate = Max44009Config {
            address: 0x4B,
            ..Default::default()
        };
        assert!(alternate.validate().is_ok());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SensorKind::Max44009.to_string(), "max44009");
    }
}
