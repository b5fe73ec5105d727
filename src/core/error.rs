use thiserror::Error;

use crate::sensors::SensorError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type ReportResult<T> = Result<T, ReportError>;

/// Why a reporting run ended early.
///
/// Everything except `Cancelled` is logged and turns into a process
/// shutdown request with a failing exit code.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A required setting or file is missing or unusable; raised before any I/O.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] BoxError),

    /// Configuring or reading the sensor failed.
    #[error("Sensor failure: {0}")]
    Sensor(#[from] SensorError),

    #[error("Failed to publish to '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },

    /// The run was cancelled while waiting; not a failure.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ReportError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ReportError::Cancelled)
    }

    pub fn publish(topic: impl Into<String>, source: BoxError) -> Self {
        ReportError::Publish {
            topic: topic.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_publish_error_keeps_source() {
        let err = ReportError::publish("nick/sensor/a/state", "broker went away".into());
        assert_eq!(
            err.to_string(),
            "Failed to publish to 'nick/sensor/a/state': broker went away"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_sensor_error_converts() {
        let err: ReportError = SensorError::Timeout { after_ms: 100 }.into();
        assert!(matches!(err, ReportError::Sensor(_)));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_cancelled_is_cancellation() {
        assert!(ReportError::Cancelled.is_cancellation());
    }
}
