//! sensorbee: polls physical sensors and republishes their readings over
//! MQTT using Home Assistant discovery.
//!
//! ## Modules
//!
//! * `config`: TOML configuration with `validator` rules and environment
//!   overrides for the sensor name and broker server.
//!
//! * `core`: The reporting lifecycle shared by every sensor kind:
//!   - change policy (thresholds and heartbeat)
//!   - discovery and state publishers
//!   - broker seams (`Connector`, `Session`, `Publisher`)
//!   - run context, lifecycle phases and errors
//!
//! * `sensors`: Sources and reporting services for BME280, MAX44009 and
//!   one-wire temperature probes.
//!
//! * `logger`: `tracing` setup: console output (compact, pretty, JSON) and
//!   optional systemd journald.
//!
//! ## Features
//!
//! * `i2c`: Linux I2C drivers for BME280 and MAX44009 via `rppal`
//!   (default: enabled). One-wire probes work without it.

pub mod config;
pub mod core;
pub mod logger;
pub mod sensors;
