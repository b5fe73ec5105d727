//! Tracing subscriber setup: a console layer in the configured format and an
//! optional systemd journald layer, both filtered by `RUST_LOG` or, when it
//! is unset, by `logger.level`.

use std::{
    fmt,
    io,
    time::SystemTime,
};

use thiserror::Error;
use time::{format_description::OwnedFormatItem, OffsetDateTime};
use tracing_subscriber::{
    fmt::{format::FmtSpan, format::Writer, time::FormatTime},
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    #[error("Invalid custom timestamp format: {0}")]
    TimestampFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    #[error("Failed to initialize journald logger while console logging is enabled")]
    JournaldFailedWithConsoleEnabled,
}

/// Timestamp rendering for the console layer.
#[derive(Debug, Clone)]
pub enum Timestamp {
    Rfc3339,
    Unix,
    Custom(OwnedFormatItem),
}

impl Timestamp {
    pub fn from_config(format: &TimestampFormat) -> Result<Self, LoggerError> {
        Ok(match format {
            TimestampFormat::Rfc3339 => Timestamp::Rfc3339,
            TimestampFormat::Unix => Timestamp::Unix,
            TimestampFormat::Custom(pattern) => Timestamp::Custom(
                time::format_description::parse_owned::<2>(pattern)
                    .map_err(|e| LoggerError::TimestampFormat(e.to_string()))?,
            ),
        })
    }

    fn render(&self) -> Result<String, fmt::Error> {
        match self {
            Timestamp::Rfc3339 => OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .map_err(|_| fmt::Error),
            Timestamp::Unix => {
                let since_epoch = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default();
                Ok(format!("{}.{:06}", since_epoch.as_secs(), since_epoch.subsec_micros()))
            }
            Timestamp::Custom(items) => OffsetDateTime::now_utc()
                .format(items)
                .map_err(|_| fmt::Error),
        }
    }
}

impl FormatTime for Timestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        w.write_str(&self.render()?)
    }
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Timestamp::from_config(&config.timestamp_format)?;
        Ok(LoggerManager { config })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Installs the global subscriber. Can only succeed once per process.
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            let timestamp = Timestamp::from_config(&self.config.timestamp_format)?;
            layers.push(console_layer(console, timestamp, self.filter()));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match tracing_journald::layer() {
                Ok(layer) => {
                    let layer = layer.with_syslog_identifier(journald.identifier.clone());
                    layers.push(layer.with_filter(self.filter()).boxed());
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console_enabled() {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }
}

fn console_layer(config: &ConsoleConfig, timestamp: Timestamp, filter: EnvFilter) -> BoxedLayer {
    let span_events = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    macro_rules! finish {
        ($layer:expr) => {
            $layer
                .with_timer(timestamp)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(io::stdout)
                .with_filter(filter)
                .boxed()
        };
    }

    match config.format {
        LogFormat::Json => finish!(tracing_subscriber::fmt::layer().json()),
        LogFormat::Pretty => finish!(tracing_subscriber::fmt::layer().pretty()),
        LogFormat::Compact => finish!(tracing_subscriber::fmt::layer().compact()),
    }
}
