//! Maxim MAX44009 ambient light sensor.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, trace};

use super::{bus::RegisterBus, SensorError, SensorResult, SensorSource, ServiceContext};
use crate::{
    config::sensor::Max44009Config,
    core::{
        context::RunContext,
        discovery::{DiscoveryDescriptor, DiscoveryPublisher},
        error::ReportResult,
        lifecycle::{PollOutcome, ReportingService},
        policy::{exceeds_ratio, ChangePolicy, SensorState, Significance, Thresholds},
        publisher::Publisher,
        reading::Reading,
        state::StatePublisher,
        topics::DeviceClass,
    },
};

const REG_CONFIG: u8 = 0x02;
const REG_LUX_HIGH: u8 = 0x03;
const REG_LUX_LOW: u8 = 0x04;

/// Default mode: measure every 800 ms, automatic range.
const CONFIG_DEFAULT: u8 = 0x00;
const EXPONENT_OVERRANGE: u8 = 0x0F;
const LUX_PER_COUNT: f64 = 0.045;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Illuminance {
    pub lux: f64,
}

impl Significance for Illuminance {
    fn differs_significantly(&self, previous: &Self, thresholds: &Thresholds) -> bool {
        exceeds_ratio(previous.lux, self.lux, thresholds.illuminance_ratio)
    }
}

/// Lux from the two result registers: 4-bit exponent, 8-bit mantissa.
pub fn decode_lux(high: u8, low: u8) -> SensorResult<f64> {
    let exponent = high >> 4;
    if exponent == EXPONENT_OVERRANGE {
        return Err(SensorError::OutOfRange(format!(
            "illuminance over range (registers 0x{high:02X} 0x{low:02X})"
        )));
    }
    let mantissa = ((high & 0x0F) << 4) | (low & 0x0F);
    Ok(f64::from(1u32 << exponent) * f64::from(mantissa) * LUX_PER_COUNT)
}

pub struct Max44009<B> {
    bus: B,
    address: u16,
}

impl<B: RegisterBus> Max44009<B> {
    pub fn new(bus: B, address: u16) -> Self {
        Self { bus, address }
    }
}

#[async_trait]
impl<B: RegisterBus> SensorSource for Max44009<B> {
    type Output = Illuminance;

    async fn configure(&mut self) -> SensorResult<()> {
        self.bus.write_register(REG_CONFIG, CONFIG_DEFAULT)?;
        info!("MAX44009 at 0x{:02X} reset", self.address);
        Ok(())
    }

    async fn read(&mut self) -> SensorResult<Reading<Illuminance>> {
        // Separate transfers; the chip does not auto-increment.
        let high = self.bus.read_register(REG_LUX_HIGH)?;
        let low = self.bus.read_register(REG_LUX_LOW)?;
        Ok(Reading::now(Illuminance {
            lux: decode_lux(high, low)?,
        }))
    }
}

pub struct Max44009Service<S> {
    source: S,
    discovery: DiscoveryPublisher,
    states: StatePublisher,
    policy: ChangePolicy,
    state: SensorState<Illuminance>,
    pacing: Duration,
}

impl<S> Max44009Service<S>
where
    S: SensorSource<Output = Illuminance>,
{
    pub fn new(source: S, shared: ServiceContext) -> Self {
        let name = shared.layout.sensor_name().to_string();
        Self {
            source,
            discovery: DiscoveryPublisher::new(shared.layout.clone()),
            states: StatePublisher::new(shared.layout),
            policy: shared.policy,
            state: SensorState::new(name.clone(), name),
            pacing: shared.poll_interval,
        }
    }
}

#[async_trait]
impl<S> ReportingService for Max44009Service<S>
where
    S: SensorSource<Output = Illuminance>,
{
    fn kind(&self) -> &'static str {
        "max44009"
    }

    async fn configure(&mut self, ctx: &RunContext) -> ReportResult<()> {
        ctx.guard(self.source.configure()).await??;
        Ok(())
    }

    async fn send_discovery(
        &mut self,
        publisher: &dyn Publisher,
        ctx: &RunContext,
    ) -> ReportResult<()> {
        let descriptor =
            DiscoveryDescriptor::shared(self.discovery.layout(), DeviceClass::Illuminance, "lux");
        self.discovery.announce(publisher, &descriptor, ctx).await
    }

    async fn poll(
        &mut self,
        publisher: &dyn Publisher,
        ctx: &RunContext,
    ) -> ReportResult<PollOutcome> {
        let reading = ctx.guard(self.source.read()).await??;
        if !self
            .policy
            .should_report(&self.state, &reading.value, reading.captured_at)
        {
            trace!(lux = reading.value.lux, "Illuminance within ratio");
            return Ok(PollOutcome::skipped());
        }

        self.states.publish_shared(publisher, &reading.value, ctx).await?;
        self.policy
            .record(&mut self.state, reading.value, reading.captured_at);
        Ok(PollOutcome::published())
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }
}

pub fn service(
    config: &Max44009Config,
    shared: ServiceContext,
) -> ReportResult<Box<dyn ReportingService>> {
    #[cfg(feature = "i2c")]
    {
        let bus = super::bus::LinuxI2c::open(config.i2c_bus, config.address)?;
        Ok(Box::new(Max44009Service::new(
            Max44009::new(bus, config.address),
            shared,
        )))
    }
    #[cfg(not(feature = "i2c"))]
    {
        let _ = (config, shared);
        Err(super::not_supported("max44009 (build with the `i2c` feature)"))
    }
}
