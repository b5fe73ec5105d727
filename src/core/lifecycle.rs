//! The reporting lifecycle shared by every sensor kind.
//!
//! `ReportingLifecycle` owns one run: configure the source, connect, announce
//! discovery, then poll until cancelled. The kind-specific steps are supplied
//! by a [`ReportingService`]; the broker by a [`Connector`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::{
    context::RunContext,
    error::{ReportError, ReportResult},
    phase::{LifecyclePhase, PhaseTracker},
    publisher::{Connector, Publisher},
};

/// What one poll iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub published: usize,
    pub skipped: usize,
}

impl PollOutcome {
    pub fn published() -> Self {
        Self {
            published: 1,
            skipped: 0,
        }
    }

    pub fn skipped() -> Self {
        Self {
            published: 0,
            skipped: 1,
        }
    }

    pub fn merge(&mut self, other: PollOutcome) {
        self.published += other.published;
        self.skipped += other.skipped;
    }
}

/// Kind-specific capabilities plugged into the lifecycle.
#[async_trait]
pub trait ReportingService: Send {
    /// Short kind name used in logs.
    fn kind(&self) -> &'static str;

    /// One-time source setup before the broker is contacted.
    async fn configure(&mut self, _ctx: &RunContext) -> ReportResult<()> {
        Ok(())
    }

    /// Announces every statically known attribute.
    async fn send_discovery(&mut self, publisher: &dyn Publisher, ctx: &RunContext)
        -> ReportResult<()>;

    /// Reads once and publishes what the change policy lets through.
    async fn poll(&mut self, publisher: &dyn Publisher, ctx: &RunContext)
        -> ReportResult<PollOutcome>;

    /// Delay between two polls.
    fn pacing(&self) -> Duration;
}

pub struct ReportingLifecycle {
    service: Box<dyn ReportingService>,
    connector: Box<dyn Connector>,
    phase: PhaseTracker,
    read_failure_budget: u32,
}

impl ReportingLifecycle {
    pub fn new(service: Box<dyn ReportingService>, connector: Box<dyn Connector>) -> Self {
        Self {
            service,
            connector,
            phase: PhaseTracker::default(),
            read_failure_budget: 0,
        }
    }

    /// Consecutive sensor read failures tolerated before the loop gives up.
    pub fn with_read_failure_budget(mut self, budget: u32) -> Self {
        self.read_failure_budget = budget;
        self
    }

    pub fn phase(&self) -> &PhaseTracker {
        &self.phase
    }

    /// Runs to completion.
    ///
    /// Returns `Ok` on cancellation. Any other failure is logged, moves the
    /// phase to `Failed`, requests a process shutdown and is returned.
    pub async fn run(self, ctx: &RunContext) -> ReportResult<()> {
        let span = ctx.span().clone();
        self.execute(ctx).instrument(span).await
    }

    async fn execute(mut self, ctx: &RunContext) -> ReportResult<()> {
        info!(kind = self.service.kind(), "Starting up");

        let result = match self.drive(ctx).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) if ctx.is_cancelled() => {
                debug!("Ignoring error raised while stopping: {e}");
                Ok(())
            }
            Err(e) => {
                error!("Error running: {e}");
                self.phase.set(LifecyclePhase::Failed(e.to_string()));
                ctx.request_shutdown(e.to_string()).await;
                Err(e)
            }
        };
        if result.is_ok() {
            self.phase.set(LifecyclePhase::Stopping);
        }

        info!("Finishing");
        result
    }

    async fn drive(&mut self, ctx: &RunContext) -> ReportResult<()> {
        self.service.configure(ctx).await?;

        let session = ctx
            .guard(self.connector.connect())
            .await?
            .map_err(ReportError::Connect)?;
        self.phase.set(LifecyclePhase::Connected);
        info!("Connected to broker");

        let result = self.report(session.publisher(), ctx).await;
        if result.is_ok() || ctx.is_cancelled() {
            self.phase.set(LifecyclePhase::Stopping);
        }
        session.close().await;
        result
    }

    async fn report(&mut self, publisher: &dyn Publisher, ctx: &RunContext) -> ReportResult<()> {
        self.service.send_discovery(publisher, ctx).await?;
        self.phase.set(LifecyclePhase::Announced);

        self.phase.set(LifecyclePhase::Polling);
        let mut failures = 0u32;
        while !ctx.is_cancelled() {
            match self.service.poll(publisher, ctx).await {
                Ok(outcome) => {
                    failures = 0;
                    trace!(
                        published = outcome.published,
                        skipped = outcome.skipped,
                        "Poll finished"
                    );
                }
                Err(ReportError::Sensor(e)) if failures < self.read_failure_budget => {
                    failures += 1;
                    warn!(
                        "Sensor read failed ({failures}/{}): {e}",
                        self.read_failure_budget
                    );
                }
                Err(e) => return Err(e),
            }
            ctx.sleep(self.service.pacing()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use serde_json::json;
    use sensorbee_mqtt::EndpointMetadata;
    use tracing::info_span;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        core::testing::{wait_for_records, ConnectMode, MockConnector, RecordingPublisher},
        sensors::SensorError,
    };

    /// Publishes one discovery message and, per poll, the next scripted
    /// value (or error) to a state topic.
    struct ScriptedService {
        configure_error: Option<String>,
        polls: VecDeque<Result<u32, SensorError>>,
        polled: Arc<AtomicUsize>,
    }

    impl ScriptedService {
        fn new(polls: Vec<Result<u32, SensorError>>) -> Self {
            Self {
                configure_error: None,
                polls: polls.into(),
                polled: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ReportingService for ScriptedService {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn configure(&mut self, _ctx: &RunContext) -> ReportResult<()> {
            match self.configure_error.take() {
                Some(reason) => Err(ReportError::FatalConfig(reason)),
                None => Ok(()),
            }
        }

        async fn send_discovery(
            &mut self,
            publisher: &dyn Publisher,
            ctx: &RunContext,
        ) -> ReportResult<()> {
            let meta = EndpointMetadata::retained("homeassistant/sensor/test/temperature/config", 1);
            ctx.guard(publisher.publish(&json!({ "name": "test" }), &meta))
                .await?
                .map_err(|e| ReportError::publish(meta.topic.as_str(), e))
        }

        async fn poll(
            &mut self,
            publisher: &dyn Publisher,
            ctx: &RunContext,
        ) -> ReportResult<PollOutcome> {
            self.polled.fetch_add(1, Ordering::SeqCst);
            let value = match self.polls.pop_front() {
                Some(next) => next?,
                None => ctx.guard(std::future::pending::<u32>()).await?,
            };
            let meta = EndpointMetadata::retained("nick/sensor/test/state", 1);
            ctx.guard(publisher.publish(&json!({ "value": value }), &meta))
                .await?
                .map_err(|e| ReportError::publish(meta.topic.as_str(), e))?;
            Ok(PollOutcome::published())
        }

        fn pacing(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn test_context() -> RunContext {
        RunContext::new(info_span!("sensor", name = "test"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_precedes_state_and_cancel_stops_cleanly() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let closed = connector.closed_flag();
        let service = ScriptedService::new(vec![Ok(1), Ok(2)]);

        let lifecycle = ReportingLifecycle::new(Box::new(service), Box::new(connector));
        let phase = lifecycle.phase().subscribe();
        let ctx = test_context();

        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { lifecycle.run(&run_ctx).await });

        wait_for_records(&publisher, 3).await;
        assert_eq!(*phase.borrow(), LifecyclePhase::Polling);

        ctx.cancel();
        handle.await.unwrap().unwrap();

        let topics = publisher.topics();
        assert_eq!(
            topics,
            vec![
                "homeassistant/sensor/test/temperature/config",
                "nick/sensor/test/state",
                "nick/sensor/test/state",
            ]
        );
        assert!(publisher.records().iter().all(|r| r.retain));
        assert_eq!(*phase.borrow(), LifecyclePhase::Stopping);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!ctx.shutdown().is_requested());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_connect_failure_requests_shutdown() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector =
            MockConnector::new(publisher.clone(), ConnectMode::Refuse("connection refused".into()));
        let service = ScriptedService::new(vec![Ok(1)]);
        let lifecycle = ReportingLifecycle::new(Box::new(service), Box::new(connector));
        let phase = lifecycle.phase().subscribe();
        let ctx = test_context();

        let err = lifecycle.run(&ctx).await.unwrap_err();

        assert!(matches!(err, ReportError::Connect(_)));
        assert!(matches!(*phase.borrow(), LifecyclePhase::Failed(_)));
        assert!(ctx.shutdown().is_requested());
        assert!(publisher.records().is_empty());
        assert!(logs_contain("Failed to connect to broker"));
        assert!(logs_contain("Finishing"));
    }

    #[tokio::test]
    async fn test_configure_failure_never_connects() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let connects = connector.connect_count();
        let mut service = ScriptedService::new(vec![]);
        service.configure_error = Some("names file missing".into());

        let ctx = test_context();
        let err = ReportingLifecycle::new(Box::new(service), Box::new(connector))
            .run(&ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::FatalConfig(_)));
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert!(ctx.shutdown().is_requested());
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal_and_releases_connection() {
        let publisher = Arc::new(RecordingPublisher::failing_on("/config"));
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let closed = connector.closed_flag();
        let service = ScriptedService::new(vec![Ok(1)]);
        let polled = service.polled.clone();

        let ctx = test_context();
        let err = ReportingLifecycle::new(Box::new(service), Box::new(connector))
            .run(&ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::Publish { .. }));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_state_publish_failure_fails_the_run() {
        let publisher = Arc::new(RecordingPublisher::failing_on("/state"));
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let closed = connector.closed_flag();
        let service = ScriptedService::new(vec![Ok(1), Ok(2)]);
        let polled = service.polled.clone();
        let lifecycle = ReportingLifecycle::new(Box::new(service), Box::new(connector));
        let phase = lifecycle.phase().subscribe();

        let ctx = test_context();
        let err = lifecycle.run(&ctx).await.unwrap_err();

        assert!(matches!(
            &err,
            ReportError::Publish { topic, .. } if topic == "nick/sensor/test/state"
        ));
        assert!(matches!(*phase.borrow(), LifecyclePhase::Failed(_)));
        assert!(ctx.shutdown().is_requested());
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(polled.load(Ordering::SeqCst), 1);
        assert_eq!(
            publisher.topics(),
            vec!["homeassistant/sensor/test/temperature/config"]
        );
        assert!(logs_contain("Failed to publish to 'nick/sensor/test/state'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failures_within_budget_are_tolerated() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let service = ScriptedService::new(vec![
            Err(SensorError::Timeout { after_ms: 10 }),
            Ok(1),
            Err(SensorError::Timeout { after_ms: 10 }),
            Err(SensorError::Timeout { after_ms: 10 }),
        ]);

        let ctx = test_context();
        let err = ReportingLifecycle::new(Box::new(service), Box::new(connector))
            .with_read_failure_budget(1)
            .run(&ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::Sensor(SensorError::Timeout { .. })));
        assert_eq!(publisher.count_for("nick/sensor/test/state"), 1);
    }

    #[tokio::test]
    async fn test_first_read_failure_is_fatal_by_default() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Accept);
        let service = ScriptedService::new(vec![Err(SensorError::Timeout { after_ms: 10 })]);

        let ctx = test_context();
        let result = ReportingLifecycle::new(Box::new(service), Box::new(connector))
            .run(&ctx)
            .await;

        assert!(matches!(result, Err(ReportError::Sensor(_))));
        assert!(ctx.shutdown().is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_connect_is_not_an_error() {
        let publisher = Arc::new(RecordingPublisher::default());
        let connector = MockConnector::new(publisher.clone(), ConnectMode::Hang);
        let service = ScriptedService::new(vec![Ok(1)]);
        let lifecycle = ReportingLifecycle::new(Box::new(service), Box::new(connector));
        let phase = lifecycle.phase().subscribe();
        let ctx = test_context();

        let token = ctx.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });

        lifecycle.run(&ctx).await.unwrap();
        assert_eq!(*phase.borrow(), LifecyclePhase::Stopping);
        assert!(!ctx.shutdown().is_requested());
        assert!(publisher.records().is_empty());
    }
}
