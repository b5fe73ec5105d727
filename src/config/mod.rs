//! Agent configuration: one TOML file, validated once at startup.
//!
//! ```toml
//! [transport]
//! host = "mqtt.home.lan"
//! client_id = "livingroom"
//!
//! [sensor]
//! kind = "bme280"
//!
//! [reporting]
//! heartbeat_secs = 60
//! ```
//!
//! The file is located through `SENSORBEE_CONFIG`, falling back to
//! `/etc/sensorbee/config.toml`. `SENSORBEE_SENSOR_NAME` and
//! `SENSORBEE_SERVER` override the client id and broker host after parsing.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{logger::LoggerConfig, reporting::ReportingConfig, sensor::SensorConfig};

pub mod logger;
pub mod reporting;
pub mod sensor;

pub type TransportConfig = sensorbee_mqtt::Config;

pub const CONFIG_ENV: &str = "SENSORBEE_CONFIG";
pub const SENSOR_NAME_ENV: &str = "SENSORBEE_SENSOR_NAME";
pub const SERVER_ENV: &str = "SENSORBEE_SERVER";
const DEFAULT_CONFIG_PATH: &str = "/etc/sensorbee/config.toml";

#[doc(hidden)]
pub fn early_line(level: &str, args: fmt::Arguments<'_>) {
    let timestamp = time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default();
    let level = match level {
        "ERROR" => console::style(level).red(),
        "WARN" => console::style(level).yellow(),
        _ => console::style(level).green(),
    };
    println!("{}  {} {}", console::style(timestamp).dim(), level, args);
}

/// Timestamped console lines for use before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => { $crate::config::early_line("INFO", format_args!($($arg)*)) };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => { $crate::config::early_line("WARN", format_args!($($arg)*)) };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => { $crate::config::early_line("ERROR", format_args!($($arg)*)) };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub transport: TransportConfig,

    #[validate(nested)]
    pub sensor: SensorConfig,

    #[validate(nested)]
    pub reporting: ReportingConfig,
}

impl Config {
    /// Locates, parses, overrides from the environment and validates.
    pub fn new() -> Result<Self, ConfigError> {
        let path = Self::get_config_path()?;
        Self::load_with(&path, |key| std::env::var(key).ok())
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found; set {CONFIG_ENV} or create {DEFAULT_CONFIG_PATH}"
        )))
    }

    /// Loads `path` without consulting the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |_| None)
    }

    /// Loads `path`, taking overrides from `lookup` (usually `std::env::var`).
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_overrides(lookup);
        config.check()?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Blank override values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = present(SENSOR_NAME_ENV) {
            self.transport.client_id = name.trim().to_string();
        }
        if let Some(server) = present(SERVER_ENV) {
            self.transport.host = server.trim().to_string();
        }
    }

    /// Runs every validation rule; the sensor name and server are checked
    /// first so their absence gets a readable message.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.transport.client_id.trim().is_empty() {
            return Err(ConfigError::Config(format!(
                "Sensor name is required: set transport.client_id or {SENSOR_NAME_ENV}"
            )));
        }
        if self.transport.host.trim().is_empty() {
            return Err(ConfigError::Config(format!(
                "Broker server is required: set transport.host or {SERVER_ENV}"
            )));
        }
        self.validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Name of this sensor in topics and discovery ids.
    pub fn sensor_name(&self) -> &str {
        &self.transport.client_id
    }
}
