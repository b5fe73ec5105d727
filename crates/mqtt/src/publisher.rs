use std::sync::Arc;

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;
use validator::Validate;

use super::{
    config::EndpointMetadata, error::TransferError, manager::PublishDrain, state::ConnectionState,
};

/// JSON publisher bound to one `MqttInstance`.
///
/// `publish` returns once the packet is queued on the client; delivery and
/// acknowledgement are handled by the connection kernel.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    drain: Arc<PublishDrain>,
}

impl Publisher {
    pub(crate) fn new(
        client: AsyncClient,
        state: watch::Receiver<ConnectionState>,
        drain: Arc<PublishDrain>,
    ) -> Self {
        Self {
            client,
            state,
            drain,
        }
    }

    pub async fn publish<T>(&self, data: &T, metadata: &EndpointMetadata) -> Result<(), TransferError>
    where
        T: Serialize + ?Sized,
    {
        metadata
            .validate()
            .map_err(|e| TransferError::InvalidMetadata(e.to_string()))?;

        let state = self.state.borrow().clone();
        if state.is_terminal() {
            return Err(TransferError::ConnectionClosed(state.to_string()));
        }

        let payload = serde_json::to_vec(data).map_err(|e| TransferError::Serialization(e.to_string()))?;
        let qos = qos_from_u8(metadata.qos)?;

        let _guard = self.drain.enter();
        trace!(
            topic = %metadata.topic,
            qos = metadata.qos,
            retain = metadata.retain,
            bytes = payload.len(),
            "Publishing"
        );
        self.client
            .publish(&metadata.topic, qos, metadata.retain, payload)
            .await?;
        Ok(())
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, must be 0, 1, or 2"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::{EventLoop, MqttOptions};
    use serde_json::json;

    use super::*;

    fn publisher_with_state(
        state: ConnectionState,
    ) -> (Publisher, EventLoop, watch::Sender<ConnectionState>) {
        let (client, event_loop) = AsyncClient::new(MqttOptions::new("pub-test", "localhost", 1883), 10);
        let (tx, rx) = watch::channel(state);
        let publisher = Publisher::new(client, rx, Arc::new(PublishDrain::default()));
        (publisher, event_loop, tx)
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_u8(3), Err(TransferError::InvalidMetadata(_))));
    }

    #[tokio::test]
    async fn test_publish_queues_when_connected() {
        let (publisher, _event_loop, _tx) = publisher_with_state(ConnectionState::Connected);
        let meta = EndpointMetadata::retained("nick/sensor/a/state", 1);

        publisher.publish(&json!({"temperature": 21.5}), &meta).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_rejected_after_kernel_stopped() {
        let (publisher, _event_loop, _tx) =
            publisher_with_state(ConnectionState::Disconnected("refused".into()));
        let meta = EndpointMetadata::retained("nick/sensor/a/state", 1);

        let result = publisher.publish(&json!({}), &meta).await;
        assert!(matches!(result, Err(TransferError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic() {
        let (publisher, _event_loop, _tx) = publisher_with_state(ConnectionState::Connected);
        let meta = EndpointMetadata::retained("nick/#", 1);

        let result = publisher.publish(&json!({}), &meta).await;
        assert!(matches!(result, Err(TransferError::InvalidMetadata(_))));
    }

    #[tokio::test]
    async fn test_publish_while_reconnecting_is_queued() {
        let (publisher, _event_loop, tx) = publisher_with_state(ConnectionState::Connected);
        tx.send(ConnectionState::Reconnecting(2.0)).unwrap();
        let meta = EndpointMetadata::retained("nick/sensor/a/state", 0);

        assert!(publisher.publish(&json!({"lux": 1.0}), &meta).await.is_ok());
    }
}
