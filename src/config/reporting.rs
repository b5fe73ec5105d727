//! `[reporting]` table: when a new reading is worth publishing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReportingConfig {
    /// Publish at least this often even without a significant change.
    #[validate(range(min = 1, max = 86_400, message = "Heartbeat must be between 1 s and 1 day"))]
    pub heartbeat_secs: u64,

    /// °C
    #[validate(range(min = 0.0, message = "Thresholds cannot be negative"))]
    pub temperature_delta: f64,

    /// hPa
    #[validate(range(min = 0.0, message = "Thresholds cannot be negative"))]
    pub pressure_delta: f64,

    /// %RH
    #[validate(range(min = 0.0, message = "Thresholds cannot be negative"))]
    pub humidity_delta: f64,

    /// Report illuminance when it grows or shrinks by more than this factor.
    #[validate(range(min = 1.0, message = "Illuminance ratio must be at least 1"))]
    pub illuminance_ratio: f64,

    /// °C, one-wire probes.
    #[validate(range(min = 0.0, message = "Thresholds cannot be negative"))]
    pub probe_temperature_delta: f64,

    /// Failed reads tolerated in a row before the run fails; 0 fails on the first.
    pub max_consecutive_read_failures: u32,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        ReportingConfig {
            heartbeat_secs: 60,
            temperature_delta: 0.5,
            pressure_delta: 1.0,
            humidity_delta: 1.0,
            illuminance_ratio: 10.0,
            probe_temperature_delta: 1.0,
            max_consecutive_read_failures: 0,
        }
    }
}

impl ReportingConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReportingConfig::default();
        assert_eq!(config.heartbeat(), Duration::from_secs(60));
        assert_eq!(config.temperature_delta, 0.5);
        assert_eq!(config.illuminance_ratio, 10.0);
        assert_eq!(config.max_consecutive_read_failures, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let config = ReportingConfig {
            pressure_delta: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shrinking_ratio() {
        let config = ReportingConfig {
            illuminance_ratio: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_table() {
        let config: ReportingConfig = toml::from_str("heartbeat_secs = 300").unwrap();
        assert_eq!(config.heartbeat_secs, 300);
        assert_eq!(config.humidity_delta, 1.0);
    }
}
