//! Broker connection settings and per-message endpoint metadata.
//!
//! `Config` is deserialized from the `[transport]` table of the agent's TOML
//! file and validated with `validator` before any socket is opened:
//!
//! ```toml
//! [transport]
//! host = "mqtt.home.lan"
//! client_id = "livingroom"
//! username = "sensor"
//! password = "secret"
//!
//! [transport.tls]
//! ca_cert_path = "/etc/sensorbee/ca.pem"
//! ```
//!
//! `host` and `client_id` have no usable default; leaving either out fails
//! validation. The client id doubles as the sensor name inside topics, so it
//! must not contain MQTT topic separators or wildcards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(length(min = 1, max = 255, message = "Host must be between 1 and 255 characters"))]
    pub host: String,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    #[validate(
        length(min = 1, max = 36, message = "Client ID must be between 1 and 36 characters"),
        custom(function = "validate_client_id")
    )]
    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Seconds to wait for the first CONNACK.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    pub clean_session: bool,

    #[validate(range(min = 1, max = 1000, message = "Max inflight must be between 1 and 1000"))]
    pub max_inflight: u16,

    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    #[validate(range(
        min = 64,
        message = "Max packet size must be between 64 and 65535 bytes"
    ))]
    pub max_packet_size: Option<u16>,

    /// Publishes that may be queued towards the event loop before `publish` waits.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Request channel capacity must be between 1 and 1000"
    ))]
    pub request_channel_capacity: usize,

    /// First delay (seconds) after a lost connection.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect multiplier must be between 1 and 30"
    ))]
    pub reconnect_multiplier: f64,

    /// 0 lets the delay schedule decide when to give up.
    #[validate(range(max = 1000, message = "Max reconnect attempts must not exceed 1000"))]
    pub max_reconnect_attempts: u32,

    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::new(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            connection_timeout: 30,
            clean_session: true,
            max_inflight: 10,
            keep_alive: 60,
            max_packet_size: None,
            request_channel_capacity: 10,
            reconnect_delay: 1,
            max_reconnect_delay: 60,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: 0,
            tls: None,
        }
    }
}

impl Config {
    /// Credentials are only sent when a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }
}

fn validate_client_id(id: &str) -> Result<(), ValidationError> {
    if id.chars().any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace()) {
        return Err(ValidationError::new("invalid_client_id")
            .with_message(format!("Client ID '{id}' must not contain '/', '+', '#' or whitespace").into()));
    }
    Ok(())
}

/// Server-authenticated TLS, optionally with a client certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tls"))]
pub struct TlsConfig {
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }
}

fn validate_tls(tls: &TlsConfig) -> Result<(), ValidationError> {
    let Some(ca) = tls.ca_cert_path.as_deref() else {
        return Err(ValidationError::new("missing_ca_cert")
            .with_message("CA certificate path is required when [tls] is present".into()));
    };
    validate_file_path(ca)?;

    match (tls.client_cert_path.as_deref(), tls.client_key_path.as_deref()) {
        (Some(cert), Some(key)) => {
            validate_file_path(cert)?;
            validate_file_path(key)
        }
        (None, None) => Ok(()),
        _ => Err(ValidationError::new("incomplete_client_auth").with_message(
            "Both client certificate and key must be provided or neither".into(),
        )),
    }
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::new("empty_path").with_message("File path cannot be empty".into()));
    }
    if !Path::new(path).is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    Ok(())
}

/// Where and how a single message is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EndpointMetadata {
    #[validate(range(max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    #[validate(
        length(min = 1, message = "Topic must not be empty"),
        custom(function = "validate_publish_topic")
    )]
    pub topic: String,

    pub retain: bool,
}

impl EndpointMetadata {
    /// Retained publish; every message this agent sends is retained.
    pub fn retained(topic: impl Into<String>, qos: u8) -> Self {
        Self {
            qos,
            topic: topic.into(),
            retain: true,
        }
    }
}

fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        return Err(ValidationError::new("wildcard_topic")
            .with_message(format!("Cannot publish to wildcard topic '{topic}'").into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn valid_config() -> Config {
        Config {
            host: "localhost".into(),
            client_id: "livingroom".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 1883);
        assert!(config.clean_session);
        assert_eq!(config.connection_timeout, 30);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_host_and_client_id_are_required() {
        let errors = Config::default().validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("host"));
        assert!(fields.contains_key("client_id"));

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_client_id_rejects_topic_characters() {
        for bad in ["living/room", "sensor+", "a#", "two words"] {
            let config = Config {
                client_id: bad.into(),
                ..valid_config()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_client_id_too_long() {
        let config = Config {
            client_id: "x".repeat(37),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials() {
        let mut config = valid_config();
        assert_eq!(config.credentials(), None);

        config.username = Some("user".into());
        assert_eq!(config.credentials(), Some(("user", "")));

        config.password = Some("pass".into());
        assert_eq!(config.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn test_tls_requires_existing_ca() {
        let config = Config {
            tls: Some(TlsConfig::with_ca_only("/nonexistent/ca.pem")),
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let mut ca = NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();
        let config = Config {
            tls: Some(TlsConfig::with_ca_only(ca.path().to_str().unwrap())),
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_partial_client_auth_rejected() {
        let ca = NamedTempFile::new().unwrap();
        let cert = NamedTempFile::new().unwrap();
        let tls = TlsConfig {
            ca_cert_path: Some(ca.path().to_str().unwrap().into()),
            client_cert_path: Some(cert.path().to_str().unwrap().into()),
            client_key_path: None,
        };
        assert!(!tls.has_client_auth());
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_endpoint_metadata_validation() {
        assert!(EndpointMetadata::retained("nick/sensor/a/state", 1).validate().is_ok());
        assert!(EndpointMetadata::retained("", 1).validate().is_err());
        assert!(EndpointMetadata::retained("nick/+/state", 1).validate().is_err());
        assert!(EndpointMetadata::retained("nick/state", 3).validate().is_err());
    }

    #[test]
    fn test_retained_constructor() {
        let meta = EndpointMetadata::retained("a/b", 0);
        assert!(meta.retain);
        assert_eq!(meta.qos, 0);
        assert_eq!(meta.topic, "a/b");
    }
}
