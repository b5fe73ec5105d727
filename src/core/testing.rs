//! Test doubles for the broker and sensor seams.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use sensorbee_mqtt::EndpointMetadata;

use super::{
    error::BoxError,
    publisher::{Connector, Publisher, Session},
    reading::Reading,
};
use crate::sensors::{SensorResult, SensorSource};

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub json: serde_json::Value,
}

/// Records every publish; optionally fails those whose topic contains a
/// fragment.
#[derive(Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<Published>>,
    fail_on: Option<String>,
}

impl RecordingPublisher {
    pub fn failing_on(fragment: &str) -> Self {
        Self {
            records: Mutex::default(),
            fail_on: Some(fragment.to_string()),
        }
    }

    pub fn records(&self) -> Vec<Published> {
        self.records.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.topic).collect()
    }

    pub fn count_for(&self, topic: &str) -> usize {
        self.records().iter().filter(|r| r.topic == topic).count()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<serde_json::Value> {
        self.records()
            .into_iter()
            .filter(|r| r.topic == topic)
            .map(|r| r.json)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        data: &(dyn erased_serde::Serialize + Send + Sync),
        meta: &EndpointMetadata,
    ) -> Result<(), BoxError> {
        if let Some(fragment) = &self.fail_on {
            if meta.topic.contains(fragment.as_str()) {
                return Err(format!("injected failure for {}", meta.topic).into());
            }
        }
        let json = serde_json::to_value(data)?;
        self.records.lock().unwrap().push(Published {
            topic: meta.topic.clone(),
            qos: meta.qos,
            retain: meta.retain,
            json,
        });
        Ok(())
    }
}

/// Polls until the publisher holds at least `count` records.
pub async fn wait_for_records(publisher: &RecordingPublisher, count: usize) {
    for _ in 0..10_000 {
        if publisher.records().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} publishes, got {}",
        publisher.records().len()
    );
}

pub enum ConnectMode {
    Accept,
    Refuse(String),
    /// Never completes; only cancellation ends the wait.
    Hang,
}

pub struct MockConnector {
    publisher: Arc<RecordingPublisher>,
    mode: ConnectMode,
    closed: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(publisher: Arc<RecordingPublisher>, mode: ConnectMode) -> Self {
        Self {
            publisher,
            mode,
            closed: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub fn connect_count(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, BoxError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            ConnectMode::Accept => Ok(Box::new(MockSession {
                publisher: self.publisher.clone(),
                closed: self.closed.clone(),
            })),
            ConnectMode::Refuse(reason) => Err(reason.clone().into()),
            ConnectMode::Hang => std::future::pending().await,
        }
    }
}

struct MockSession {
    publisher: Arc<RecordingPublisher>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Session for MockSession {
    fn publisher(&self) -> &dyn Publisher {
        &*self.publisher
    }

    async fn close(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Replays scripted readings stamped with the current tokio time, then
/// waits forever.
pub struct FakeSource<T> {
    script: VecDeque<SensorResult<T>>,
    configured: Arc<AtomicBool>,
}

impl<T> FakeSource<T> {
    pub fn new(script: Vec<SensorResult<T>>) -> Self {
        Self {
            script: script.into(),
            configured: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn of(values: Vec<T>) -> Self {
        Self::new(values.into_iter().map(Ok).collect())
    }

    pub fn configured_flag(&self) -> Arc<AtomicBool> {
        self.configured.clone()
    }
}

#[async_trait]
impl<T: Send> SensorSource for FakeSource<T> {
    type Output = T;

    async fn configure(&mut self) -> SensorResult<()> {
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&mut self) -> SensorResult<Reading<T>> {
        match self.script.pop_front() {
            Some(next) => next.map(Reading::now),
            None => std::future::pending().await,
        }
    }
}
