//! `[logger]` table.
//!
//! ```toml
//! [logger]
//! level = "debug"
//!
//! [logger.console]
//! format = "json"
//! ansi_colors = false
//!
//! [logger.journald]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    #[default]
    Rfc3339,
    Unix,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// Used when `RUST_LOG` is not set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(custom(function = "validate_timestamp_format"))]
    pub timestamp_format: TimestampFormat,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            timestamp_format: TimestampFormat::default(),
            console: Some(ConsoleConfig::default()),
            journald: Some(JournaldConfig::default()),
        }
    }
}

impl LoggerConfig {
    pub fn console_enabled(&self) -> bool {
        self.console.as_ref().is_some_and(|c| c.enabled)
    }

    pub fn journald_enabled(&self) -> bool {
        self.journald.as_ref().is_some_and(|j| j.enabled)
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")
            .with_message(format!("Invalid log level: {level}").into())),
    }
}

fn validate_timestamp_format(format: &TimestampFormat) -> Result<(), ValidationError> {
    match format {
        TimestampFormat::Custom(pattern) if pattern.trim().is_empty() => Err(ValidationError::new(
            "invalid_timestamp_format",
        )
        .with_message("Custom timestamp format cannot be empty".into())),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub show_target: bool,
    pub show_thread_ids: bool,
    /// Emit span close events (with timings).
    pub show_spans: bool,
    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JournaldConfig {
    pub enabled: bool,

    #[validate(length(min = 1, message = "Journald identifier cannot be empty"))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "sensorbee".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoggerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.console_enabled());
        assert!(!config.journald_enabled());
    }

    #[test]
    fn test_level_is_case_insensitive() {
        let config = LoggerConfig {
            level: "DEBUG".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_custom_timestamp() {
        let config = LoggerConfig {
            timestamp_format: TimestampFormat::Custom(" ".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_format_from_toml() {
        let config: LoggerConfig = toml::from_str(
            r#"
            level = "warn"
            [console]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.console.unwrap().format, LogFormat::Json);
    }

    #[test]
    fn test_journald_requires_identifier() {
        let config = LoggerConfig {
            journald: Some(JournaldConfig {
                enabled: true,
                identifier: String::new(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
