//! Topic layout shared by discovery and state messages.
//!
//! ```text
//! {state_root}/sensor/{sensor}/state                     fixed-schema sources
//! {state_root}/sensor/{sensor}/{instance}/state          one-wire probes
//! {discovery_prefix}/sensor/{sensor_id}/{class}/config   discovery
//! ```

use std::fmt;

use crate::config::Config;

/// Home Assistant device class of one published attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Temperature,
    Humidity,
    Pressure,
    Illuminance,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Temperature => "temperature",
            DeviceClass::Humidity => "humidity",
            DeviceClass::Pressure => "pressure",
            DeviceClass::Illuminance => "illuminance",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            DeviceClass::Temperature => "°C",
            DeviceClass::Humidity => "%",
            DeviceClass::Pressure => "hPa",
            DeviceClass::Illuminance => "lx",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    sensor_name: String,
    state_root: String,
    discovery_prefix: String,
    qos: u8,
}

impl TopicLayout {
    pub fn new(
        sensor_name: impl Into<String>,
        state_root: impl Into<String>,
        discovery_prefix: impl Into<String>,
        qos: u8,
    ) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            state_root: state_root.into(),
            discovery_prefix: discovery_prefix.into(),
            qos,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sensor_name(),
            config.sensor.state_root.as_str(),
            config.sensor.discovery_prefix.as_str(),
            config.sensor.qos,
        )
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn shared_state_topic(&self) -> String {
        format!("{}/sensor/{}/state", self.state_root, self.sensor_name)
    }

    pub fn instance_state_topic(&self, instance: &str) -> String {
        format!("{}/sensor/{}/{}/state", self.state_root, self.sensor_name, instance)
    }

    pub fn discovery_topic(&self, sensor_id: &str, class: DeviceClass) -> String {
        format!("{}/sensor/{}/{}/config", self.discovery_prefix, sensor_id, class)
    }
}
