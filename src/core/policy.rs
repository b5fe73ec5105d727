//! Decides whether a fresh reading is worth publishing.
//!
//! A reading is reported when any of these holds:
//! - it is the first one seen for that sensor instance;
//! - the heartbeat deadline of the last report has passed (`now > next_due`);
//! - it differs from the last *reported* value by more than the threshold
//!   for its kind (see [`Significance`]).
//!
//! The deadline comparison is strict, as are all threshold comparisons.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::reporting::ReportingConfig;

/// Per-kind change thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub illuminance_ratio: f64,
    pub probe_temperature: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ReportingConfig::default())
    }
}

impl From<&ReportingConfig> for Thresholds {
    fn from(config: &ReportingConfig) -> Self {
        Self {
            temperature: config.temperature_delta,
            pressure: config.pressure_delta,
            humidity: config.humidity_delta,
            illuminance_ratio: config.illuminance_ratio,
            probe_temperature: config.probe_temperature_delta,
        }
    }
}

/// `|new - old| > threshold`
pub fn exceeds_delta(previous: f64, current: f64, threshold: f64) -> bool {
    (current - previous).abs() > threshold
}

/// `new > old * ratio || new < old / ratio`
pub fn exceeds_ratio(previous: f64, current: f64, ratio: f64) -> bool {
    current > previous * ratio || current < previous / ratio
}

/// Implemented by every value kind a sensor instance reports.
pub trait Significance {
    fn differs_significantly(&self, previous: &Self, thresholds: &Thresholds) -> bool;
}

/// Mutable record kept per sensor instance by the poll loop that owns it.
#[derive(Debug, Clone)]
pub struct SensorState<V> {
    id: String,
    display_name: String,
    last_value: Option<V>,
    last_report: Option<Instant>,
    next_due: Option<Instant>,
}

impl<V> SensorState<V> {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_value: None,
            last_report: None,
            next_due: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn last_value(&self) -> Option<&V> {
        self.last_value.as_ref()
    }

    pub fn last_report(&self) -> Option<Instant> {
        self.last_report
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn has_reported(&self) -> bool {
        self.last_value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangePolicy {
    heartbeat: Duration,
    thresholds: Thresholds,
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self::from_config(&ReportingConfig::default())
    }
}

impl ChangePolicy {
    pub fn new(heartbeat: Duration, thresholds: Thresholds) -> Self {
        Self {
            heartbeat,
            thresholds,
        }
    }

    pub fn from_config(config: &ReportingConfig) -> Self {
        Self::new(config.heartbeat(), Thresholds::from(config))
    }

    pub fn should_report<V: Significance>(
        &self,
        state: &SensorState<V>,
        candidate: &V,
        now: Instant,
    ) -> bool {
        match (&state.last_value, state.next_due) {
            (Some(previous), Some(due)) => {
                now > due || candidate.differs_significantly(previous, &self.thresholds)
            }
            _ => true,
        }
    }

    /// Call only after the value has actually been published.
    pub fn record<V>(&self, state: &mut SensorState<V>, reported: V, now: Instant) {
        state.last_value = Some(reported);
        state.last_report = Some(now);
        state.next_due = Some(now + self.heartbeat);
    }
}
