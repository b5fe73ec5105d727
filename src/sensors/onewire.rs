//! DS18B20-family temperature probes on the Linux one-wire bus.
//!
//! Every probe appears under the sysfs devices directory as `28-xxxxxxxxxxxx`
//! (or the `10-`/`22-` families) with a `w1_slave` file holding the last
//! conversion. Each probe is its own sensor instance with its own state
//! topic, named through a JSON map of probe id to display name.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::{SensorError, SensorResult, SensorSource, ServiceContext};
use crate::{
    config::sensor::OneWireConfig,
    core::{
        context::RunContext,
        discovery::{DiscoveryDescriptor, DiscoveryPublisher},
        error::{ReportError, ReportResult},
        lifecycle::{PollOutcome, ReportingService},
        policy::{exceeds_delta, ChangePolicy, SensorState, Significance, Thresholds},
        publisher::Publisher,
        reading::Reading,
        state::StatePublisher,
    },
};

const PROBE_FAMILIES: [&str; 3] = ["28-", "10-", "22-"];
const SLAVE_FILE: &str = "w1_slave";

/// Probe id to display name, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap(BTreeMap<String, String>);

impl NameMap {
    pub async fn load(path: &Path) -> SensorResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SensorError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let map = serde_json::from_str(&raw).map_err(|e| SensorError::NameMap {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self(map))
    }

    pub fn get(&self, probe_id: &str) -> Option<&str> {
        self.0.get(probe_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parses a `w1_slave` file:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(device: &str, contents: &str) -> SensorResult<f64> {
    let mut lines = contents.lines();
    let crc_ok = lines
        .next()
        .is_some_and(|line| line.trim_end().ends_with("YES"));
    if !crc_ok {
        return Err(SensorError::Crc {
            device: device.to_string(),
        });
    }

    let parse_error = |reason: String| SensorError::Parse {
        what: format!("{SLAVE_FILE} of {device}"),
        reason,
    };
    let raw = lines
        .next()
        .and_then(|line| line.rsplit_once("t="))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| parse_error("missing t= field".into()))?;
    let millidegrees: i32 = raw
        .parse()
        .map_err(|e| parse_error(format!("'{raw}': {e}")))?;

    Ok(f64::from(millidegrees) / 1000.0)
}

/// One probe's value within a bus scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReading {
    pub device: String,
    pub temperature: f64,
}

/// Scans the sysfs devices directory.
#[derive(Debug, Clone)]
pub struct OneWireBus {
    devices_dir: PathBuf,
    skip_failed: bool,
}

impl OneWireBus {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
            skip_failed: false,
        }
    }

    /// Leave failing probes out of the batch instead of failing the scan.
    pub fn skip_failed(mut self, skip: bool) -> Self {
        self.skip_failed = skip;
        self
    }

    async fn probe_ids(&self) -> SensorResult<Vec<String>> {
        let wrap = |source| SensorError::FileRead {
            path: self.devices_dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.devices_dir).await.map_err(wrap)?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(wrap)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if PROBE_FAMILIES.iter().any(|family| name.starts_with(family)) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read_probe(&self, device: &str) -> SensorResult<f64> {
        let path = self.devices_dir.join(device).join(SLAVE_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SensorError::FileRead { path, source })?;
        parse_w1_slave(device, &contents)
    }
}

#[async_trait]
impl SensorSource for OneWireBus {
    type Output = Vec<ProbeReading>;

    async fn configure(&mut self) -> SensorResult<()> {
        let ids = self.probe_ids().await?;
        info!(
            "One-wire bus at {} has {} probe(s)",
            self.devices_dir.display(),
            ids.len()
        );
        Ok(())
    }

    /// The first failing probe fails the scan unless skipping is enabled.
    /// Even then a scan where no listed probe could be read is an error.
    async fn read(&mut self) -> SensorResult<Reading<Vec<ProbeReading>>> {
        let mut readings = Vec::new();
        let mut last_error = None;
        for device in self.probe_ids().await? {
            match self.read_probe(&device).await {
                Ok(temperature) => readings.push(ProbeReading {
                    device,
                    temperature,
                }),
                Err(e) if self.skip_failed => {
                    warn!("Skipping probe {device}: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        match last_error {
            Some(e) if readings.is_empty() => Err(e),
            _ => Ok(Reading::now(readings)),
        }
    }
}

/// State record of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeTemperature {
    pub temperature: f64,
}

impl Significance for ProbeTemperature {
    fn differs_significantly(&self, previous: &Self, thresholds: &Thresholds) -> bool {
        exceeds_delta(
            previous.temperature,
            self.temperature,
            thresholds.probe_temperature,
        )
    }
}

pub struct OneWireService<S> {
    source: S,
    names_file: PathBuf,
    names: NameMap,
    announce_late: bool,
    discovery: DiscoveryPublisher,
    states: StatePublisher,
    policy: ChangePolicy,
    probes: HashMap<String, SensorState<ProbeTemperature>>,
    announced: HashSet<String>,
    pacing: Duration,
}

impl<S> OneWireService<S>
where
    S: SensorSource<Output = Vec<ProbeReading>>,
{
    pub fn new(
        source: S,
        names_file: impl Into<PathBuf>,
        announce_late: bool,
        shared: ServiceContext,
    ) -> Self {
        Self {
            source,
            names_file: names_file.into(),
            names: NameMap::default(),
            announce_late,
            discovery: DiscoveryPublisher::new(shared.layout.clone()),
            states: StatePublisher::new(shared.layout),
            policy: shared.policy,
            probes: HashMap::new(),
            announced: HashSet::new(),
            pacing: shared.poll_interval,
        }
    }
}

#[async_trait]
impl<S> ReportingService for OneWireService<S>
where
    S: SensorSource<Output = Vec<ProbeReading>>,
{
    fn kind(&self) -> &'static str {
        "onewire"
    }

    async fn configure(&mut self, ctx: &RunContext) -> ReportResult<()> {
        let names = ctx
            .guard(NameMap::load(&self.names_file))
            .await?
            .map_err(|e| ReportError::FatalConfig(e.to_string()))?;
        info!(
            "Loaded {} probe name(s) from {}",
            names.len(),
            self.names_file.display()
        );
        self.names = names;

        ctx.guard(self.source.configure()).await??;
        Ok(())
    }

    async fn send_discovery(
        &mut self,
        publisher: &dyn Publisher,
        ctx: &RunContext,
    ) -> ReportResult<()> {
        for (id, name) in self.names.iter() {
            let descriptor = DiscoveryDescriptor::probe(self.discovery.layout(), id, name);
            self.discovery.announce(publisher, &descriptor, ctx).await?;
            self.announced.insert(id.to_string());
        }
        Ok(())
    }

    async fn poll(
        &mut self,
        publisher: &dyn Publisher,
        ctx: &RunContext,
    ) -> ReportResult<PollOutcome> {
        let batch = ctx.guard(self.source.read()).await??;
        let captured_at = batch.captured_at;
        let mut outcome = PollOutcome::default();

        for probe in batch.value {
            let names = &self.names;
            let state = self.probes.entry(probe.device.clone()).or_insert_with(|| {
                let name = match names.get(&probe.device) {
                    Some(name) => name.to_string(),
                    None => {
                        warn!("Failed to find name for {}", probe.device);
                        probe.device.clone()
                    }
                };
                SensorState::new(probe.device.clone(), name)
            });

            let candidate = ProbeTemperature {
                temperature: probe.temperature,
            };
            if !self.policy.should_report(state, &candidate, captured_at) {
                trace!(device = %probe.device, "Probe within threshold");
                outcome.merge(PollOutcome::skipped());
                continue;
            }

            if !self.announced.contains(&probe.device) {
                if self.announce_late {
                    let descriptor = DiscoveryDescriptor::probe(
                        self.discovery.layout(),
                        &probe.device,
                        state.display_name(),
                    );
                    self.discovery.announce(publisher, &descriptor, ctx).await?;
                    self.announced.insert(probe.device.clone());
                } else {
                    debug!(device = %probe.device, "Publishing state without discovery");
                }
            }

            self.states
                .publish_instance(publisher, state.display_name(), &candidate, ctx)
                .await?;
            self.policy.record(state, candidate, captured_at);
            outcome.merge(PollOutcome::published());
        }

        Ok(outcome)
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }
}

pub fn service(
    config: &OneWireConfig,
    shared: ServiceContext,
) -> ReportResult<Box<dyn ReportingService>> {
    let names_file = config.names_file.clone().ok_or_else(|| {
        ReportError::FatalConfig("sensor.onewire.names_file is required for one-wire probes".into())
    })?;
    Ok(Box::new(OneWireService::new(
        OneWireBus::new(&config.devices_dir).skip_failed(config.skip_failed_probes),
        names_file,
        config.announce_late_probes,
        shared,
    )))
}
