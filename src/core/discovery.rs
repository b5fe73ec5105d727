//! Home Assistant MQTT discovery: one retained config message per sensor
//! attribute, telling the hub where the state lives and how to extract the
//! value from it.

use serde::Serialize;
use sensorbee_mqtt::EndpointMetadata;
use tracing::info;

use super::{
    context::RunContext,
    error::{ReportError, ReportResult},
    publisher::Publisher,
    topics::{DeviceClass, TopicLayout},
};

/// Identity of one published attribute; built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDescriptor {
    pub sensor_id: String,
    pub display_name: String,
    pub state_topic: String,
    pub device_class: DeviceClass,
    pub value_field: String,
    pub unit: &'static str,
}

/// Wire shape of the discovery message.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DiscoveryPayload<'a> {
    pub name: &'a str,
    pub device_class: &'a str,
    pub state_topic: &'a str,
    pub unit_of_measurement: &'a str,
    pub value_template: String,
}

impl DiscoveryDescriptor {
    /// Attribute of a fixed-schema source sharing the sensor's state topic,
    /// named `{sensor}_{class}`.
    pub fn shared(layout: &TopicLayout, class: DeviceClass, value_field: &str) -> Self {
        Self {
            sensor_id: layout.sensor_name().to_string(),
            display_name: format!("{}_{}", layout.sensor_name(), class),
            state_topic: layout.shared_state_topic(),
            device_class: class,
            value_field: value_field.to_string(),
            unit: class.unit(),
        }
    }

    /// One-wire probe with its own state topic under its display name.
    pub fn probe(layout: &TopicLayout, probe_id: &str, display_name: &str) -> Self {
        let class = DeviceClass::Temperature;
        Self {
            sensor_id: format!("{}_{}", layout.sensor_name(), probe_id),
            display_name: format!("{}_{}", layout.sensor_name(), display_name),
            state_topic: layout.instance_state_topic(display_name),
            device_class: class,
            value_field: "temperature".to_string(),
            unit: class.unit(),
        }
    }

    pub fn topic(&self, layout: &TopicLayout) -> String {
        layout.discovery_topic(&self.sensor_id, self.device_class)
    }

    pub fn payload(&self) -> DiscoveryPayload<'_> {
        DiscoveryPayload {
            name: &self.display_name,
            device_class: self.device_class.as_str(),
            state_topic: &self.state_topic,
            unit_of_measurement: self.unit,
            value_template: format!("{{{{ value_json.{} }}}}", self.value_field),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryPublisher {
    layout: TopicLayout,
}

impl DiscoveryPublisher {
    pub fn new(layout: TopicLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    /// Retained, so republishing the same descriptor is harmless.
    pub async fn announce(
        &self,
        publisher: &dyn Publisher,
        descriptor: &DiscoveryDescriptor,
        ctx: &RunContext,
    ) -> ReportResult<()> {
        let topic = descriptor.topic(&self.layout);
        let meta = EndpointMetadata::retained(topic.as_str(), self.layout.qos());
        let payload = descriptor.payload();

        ctx.guard(publisher.publish(&payload, &meta))
            .await?
            .map_err(|e| ReportError::publish(topic.as_str(), e))?;

        info!(
            sensor_id = %descriptor.sensor_id,
            class = %descriptor.device_class,
            "Discovery sent to {topic}"
        );
        Ok(())
    }
}
