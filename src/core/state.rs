use sensorbee_mqtt::EndpointMetadata;
use tracing::debug;

use super::{
    context::RunContext,
    error::{ReportError, ReportResult},
    publisher::Publisher,
    topics::TopicLayout,
};

/// Publishes flat JSON state records, retained.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    layout: TopicLayout,
}

impl StatePublisher {
    pub fn new(layout: TopicLayout) -> Self {
        Self { layout }
    }

    /// `{root}/sensor/{sensor}/state`
    pub async fn publish_shared(
        &self,
        publisher: &dyn Publisher,
        record: &(dyn erased_serde::Serialize + Send + Sync),
        ctx: &RunContext,
    ) -> ReportResult<()> {
        self.publish_to(publisher, self.layout.shared_state_topic(), record, ctx)
            .await
    }

    /// `{root}/sensor/{sensor}/{instance}/state`
    pub async fn publish_instance(
        &self,
        publisher: &dyn Publisher,
        instance: &str,
        record: &(dyn erased_serde::Serialize + Send + Sync),
        ctx: &RunContext,
    ) -> ReportResult<()> {
        self.publish_to(publisher, self.layout.instance_state_topic(instance), record, ctx)
            .await
    }

    async fn publish_to(
        &self,
        publisher: &dyn Publisher,
        topic: String,
        record: &(dyn erased_serde::Serialize + Send + Sync),
        ctx: &RunContext,
    ) -> ReportResult<()> {
        let meta = EndpointMetadata::retained(topic.as_str(), self.layout.qos());
        ctx.guard(publisher.publish(record, &meta))
            .await?
            .map_err(|e| ReportError::publish(topic.as_str(), e))?;
        debug!("State published to {topic}");
        Ok(())
    }
}
