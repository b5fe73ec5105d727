//! Seams between the lifecycle and the broker.
//!
//! [`Publisher`] takes type-erased payloads (`erased_serde`) so services can
//! hand over any `Serialize` record through a trait object. [`Connector`]
//! opens a [`Session`] once per run; the MQTT implementations wrap
//! `sensorbee_mqtt`.

use async_trait::async_trait;
use sensorbee_mqtt::{EndpointMetadata, MqttInstance, MqttManager};
use tracing::{info, warn};

use super::error::BoxError;
use crate::config::TransportConfig;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        data: &(dyn erased_serde::Serialize + Send + Sync),
        meta: &EndpointMetadata,
    ) -> Result<(), BoxError>;
}

/// An accepted broker connection.
#[async_trait]
pub trait Session: Send + Sync {
    fn publisher(&self) -> &dyn Publisher;

    /// Releases the connection after flushing queued publishes.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, BoxError>;
}

pub struct MqttConnector {
    config: TransportConfig,
}

impl MqttConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, BoxError> {
        let instance = MqttManager::from_config(self.config.clone())?.connect().await?;
        Ok(Box::new(MqttSession::new(instance)))
    }
}

pub struct MqttSession {
    instance: MqttInstance,
    publisher: MqttPublisher,
}

impl MqttSession {
    pub fn new(instance: MqttInstance) -> Self {
        let publisher = MqttPublisher(instance.publisher());
        Self {
            instance,
            publisher,
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    fn publisher(&self) -> &dyn Publisher {
        &self.publisher
    }

    async fn close(self: Box<Self>) {
        match self.instance.shutdown().await {
            Ok(()) => info!("Broker connection {} released", self.instance.client_id()),
            Err(e) => warn!(
                "Broker connection {} closed with error: {e}",
                self.instance.client_id()
            ),
        }
    }
}

pub struct MqttPublisher(sensorbee_mqtt::Publisher);

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        data: &(dyn erased_serde::Serialize + Send + Sync),
        meta: &EndpointMetadata,
    ) -> Result<(), BoxError> {
        self.0.publish(data, meta).await?;
        Ok(())
    }
}
