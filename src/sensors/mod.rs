//! Sensor sources and the reporting services built on them.
//!
//! A [`SensorSource`] only knows how to read hardware. Each kind module pairs
//! a source with the discovery layout and change policy for that kind and
//! exposes it to the lifecycle as a `ReportingService`.

pub mod bme280;
pub mod bus;
pub mod max44009;
pub mod onewire;

use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    config::{sensor::SensorKind, Config},
    core::{
        error::{BoxError, ReportResult},
        lifecycle::ReportingService,
        policy::ChangePolicy,
        reading::Reading,
        topics::TopicLayout,
    },
};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("I2C bus {bus} error: {source}")]
    Bus {
        bus: u8,
        #[source]
        source: BoxError,
    },

    #[error("Unexpected chip at 0x{address:02X}: expected id 0x{expected:02X}, found 0x{found:02X}")]
    UnexpectedChip { address: u16, expected: u8, found: u8 },

    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("CRC check failed for device {device}")]
    Crc { device: String },

    /// The chip reported a value outside its measuring range.
    #[error("Reading out of range: {0}")]
    OutOfRange(String),

    #[error("Sensor did not respond within {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Sensor support not compiled in: {0}")]
    NotSupported(&'static str),

    #[error("Invalid name map '{path}': {reason}")]
    NameMap { path: PathBuf, reason: String },
}

pub type SensorResult<T> = Result<T, SensorError>;

/// Hardware access for one sensor kind.
#[async_trait]
pub trait SensorSource: Send {
    type Output: Send;

    /// One-time setup before the first read.
    async fn configure(&mut self) -> SensorResult<()> {
        Ok(())
    }

    async fn read(&mut self) -> SensorResult<Reading<Self::Output>>;
}

/// Settings every service needs regardless of kind.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub layout: TopicLayout,
    pub policy: ChangePolicy,
    pub poll_interval: std::time::Duration,
}

impl ServiceContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            layout: TopicLayout::from_config(config),
            policy: ChangePolicy::from_config(&config.reporting),
            poll_interval: config.sensor.poll_interval(),
        }
    }
}

/// Picks the service for the configured sensor kind.
pub fn build_service(config: &Config) -> ReportResult<Box<dyn ReportingService>> {
    let shared = ServiceContext::from_config(config);
    match config.sensor.kind {
        SensorKind::Bme280 => bme280::service(&config.sensor.bme280, shared),
        SensorKind::Max44009 => max44009::service(&config.sensor.max44009, shared),
        SensorKind::Onewire => onewire::service(&config.sensor.onewire, shared),
    }
}

#[cfg(not(feature = "i2c"))]
pub(crate) fn not_supported(kind: &'static str) -> crate::core::error::ReportError {
    crate::core::error::ReportError::FatalConfig(SensorError::NotSupported(kind).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ReportError;

    #[test]
    fn test_error_messages() {
        let err = SensorError::UnexpectedChip {
            address: 0x76,
            expected: 0x60,
            found: 0x58,
        };
        assert_eq!(
            err.to_string(),
            "Unexpected chip at 0x76: expected id 0x60, found 0x58"
        );
        assert_eq!(
            SensorError::Crc {
                device: "28-0001".into()
            }
            .to_string(),
            "CRC check failed for device 28-0001"
        );
    }

    #[test]
    fn test_onewire_service_needs_names_file() {
        let mut config = Config::default();
        config.sensor.kind = SensorKind::Onewire;
        assert!(matches!(
            build_service(&config),
            Err(ReportError::FatalConfig(_))
        ));
    }
}
