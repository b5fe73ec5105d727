//! Bosch BME280 temperature / humidity / pressure sensor.
//!
//! The chip runs in forced mode with 1x oversampling on every channel and
//! the IIR filter off: each read triggers one conversion, waits the settle
//! delay, then compensates the raw sample with the factory calibration.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::{bus::RegisterBus, SensorError, SensorResult, SensorSource, ServiceContext};
use crate::{
    config::sensor::Bme280Config,
    core::{
        context::RunContext,
        discovery::{DiscoveryDescriptor, DiscoveryPublisher},
        error::ReportResult,
        lifecycle::{PollOutcome, ReportingService},
        policy::{exceeds_delta, ChangePolicy, SensorState, Significance, Thresholds},
        publisher::Publisher,
        reading::Reading,
        state::StatePublisher,
        topics::{DeviceClass, TopicLayout},
    },
};

const CHIP_ID: u8 = 0x60;

const REG_CALIB_TP: u8 = 0x88;
const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_H: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_DATA: u8 = 0xF7;

const OVERSAMPLING_1X: u8 = 0b001;
const MODE_SLEEP: u8 = 0b00;
const MODE_FORCED: u8 = 0b01;
const FILTER_OFF: u8 = 0x00;
const STATUS_MEASURING: u8 = 0b1000;

/// Raw value the chip reports for a channel that was skipped.
const SKIPPED_20BIT: u32 = 0x80000;

const fn ctrl_meas(mode: u8) -> u8 {
    (OVERSAMPLING_1X << 5) | (OVERSAMPLING_1X << 2) | mode
}

/// One compensated sample. Field order is the wire order of the state JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bme280Reading {
    /// %RH
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    /// °C
    pub temperature: f64,
}

impl Significance for Bme280Reading {
    fn differs_significantly(&self, previous: &Self, thresholds: &Thresholds) -> bool {
        exceeds_delta(previous.temperature, self.temperature, thresholds.temperature)
            || exceeds_delta(previous.pressure, self.pressure, thresholds.pressure)
            || exceeds_delta(previous.humidity, self.humidity, thresholds.humidity)
    }
}

/// Factory trimming parameters (`dig_*` in the datasheet).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

impl Calibration {
    /// `tp` is the block at 0x88..=0xA1, `h` the block at 0xE1..=0xE7.
    pub fn parse(tp: &[u8; 26], h: &[u8; 7]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);

        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            h1: tp[25],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            h4: (i16::from(h[3] as i8) << 4) | i16::from(h[4] & 0x0F),
            h5: (i16::from(h[5] as i8) << 4) | i16::from(h[4] >> 4),
            h6: h[6] as i8,
        }
    }

    /// Floating-point compensation from the datasheet.
    pub fn compensate(&self, raw: RawSample) -> SensorResult<Bme280Reading> {
        if raw.temperature == SKIPPED_20BIT {
            return Err(SensorError::OutOfRange(
                "temperature channel was skipped".into(),
            ));
        }

        let adc_t = f64::from(raw.temperature);
        let t1 = f64::from(self.t1);
        let var1 = (adc_t / 16384.0 - t1 / 1024.0) * f64::from(self.t2);
        let var2 = (adc_t / 131072.0 - t1 / 8192.0).powi(2) * f64::from(self.t3);
        let t_fine = var1 + var2;
        let temperature = t_fine / 5120.0;

        Ok(Bme280Reading {
            humidity: self.humidity(t_fine, f64::from(raw.humidity)),
            pressure: self.pressure(t_fine, f64::from(raw.pressure))? / 100.0,
            temperature,
        })
    }

    /// Pascal.
    fn pressure(&self, t_fine: f64, adc_p: f64) -> SensorResult<f64> {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f64::from(self.p6) / 32768.0;
        var2 += var1 * f64::from(self.p5) * 2.0;
        var2 = var2 / 4.0 + f64::from(self.p4) * 65536.0;
        var1 = (f64::from(self.p3) * var1 * var1 / 524288.0 + f64::from(self.p2) * var1)
            / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f64::from(self.p1);
        if var1 == 0.0 {
            return Err(SensorError::OutOfRange(
                "pressure compensation divides by zero".into(),
            ));
        }

        let mut p = 1048576.0 - adc_p;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f64::from(self.p9) * p * p / 2147483648.0;
        let var2 = p * f64::from(self.p8) / 32768.0;
        Ok(p + (var1 + var2 + f64::from(self.p7)) / 16.0)
    }

    /// Relative humidity, clamped to 0..=100.
    fn humidity(&self, t_fine: f64, adc_h: f64) -> f64 {
        let var = t_fine - 76800.0;
        let var = (adc_h - (f64::from(self.h4) * 64.0 + f64::from(self.h5) / 16384.0 * var))
            * (f64::from(self.h2) / 65536.0
                * (1.0
                    + f64::from(self.h6) / 67108864.0
                        * var
                        * (1.0 + f64::from(self.h3) / 67108864.0 * var)));
        let var = var * (1.0 - f64::from(self.h1) * var / 524288.0);
        var.clamp(0.0, 100.0)
    }
}

/// Uncompensated ADC values from registers 0xF7..=0xFE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub pressure: u32,
    pub temperature: u32,
    pub humidity: u32,
}

impl RawSample {
    pub fn from_bytes(data: &[u8; 8]) -> Self {
        let twenty_bit = |msb: u8, lsb: u8, xlsb: u8| {
            (u32::from(msb) << 12) | (u32::from(lsb) << 4) | (u32::from(xlsb) >> 4)
        };
        Self {
            pressure: twenty_bit(data[0], data[1], data[2]),
            temperature: twenty_bit(data[3], data[4], data[5]),
            humidity: (u32::from(data[6]) << 8) | u32::from(data[7]),
        }
    }
}

/// Driver over any [`RegisterBus`].
pub struct Bme280<B> {
    bus: B,
    address: u16,
    settle: Duration,
    calibration: Option<Calibration>,
}

impl<B: RegisterBus> Bme280<B> {
    pub fn new(bus: B, address: u16, settle: Duration) -> Self {
        Self {
            bus,
            address,
            settle,
            calibration: None,
        }
    }

    fn init(&mut self) -> SensorResult<Calibration> {
        let found = self.bus.read_register(REG_CHIP_ID)?;
        if found != CHIP_ID {
            return Err(SensorError::UnexpectedChip {
                address: self.address,
                expected: CHIP_ID,
                found,
            });
        }

        let mut tp = [0u8; 26];
        let mut h = [0u8; 7];
        self.bus.read_registers(REG_CALIB_TP, &mut tp)?;
        self.bus.read_registers(REG_CALIB_H, &mut h)?;
        let calibration = Calibration::parse(&tp, &h);

        // ctrl_hum only takes effect after a ctrl_meas write.
        self.bus.write_register(REG_CTRL_HUM, OVERSAMPLING_1X)?;
        self.bus.write_register(REG_CONFIG, FILTER_OFF)?;
        self.bus.write_register(REG_CTRL_MEAS, ctrl_meas(MODE_SLEEP))?;

        debug!(address = self.address, "BME280 calibrated: {calibration:?}");
        self.calibration = Some(calibration);
        Ok(calibration)
    }
}

#[async_trait]
impl<B: RegisterBus> SensorSource for Bme280<B> {
    type Output = Bme280Reading;

    async fn configure(&mut self) -> SensorResult<()> {
        self.init()?;
        info!("BME280 at 0x{:02X} configured", self.address);
        Ok(())
    }

    async fn read(&mut self) -> SensorResult<Reading<Bme280Reading>> {
        let calibration = match self.calibration {
            Some(calibration) => calibration,
            None => self.init()?,
        };

        self.bus.write_register(REG_CTRL_MEAS, ctrl_meas(MODE_FORCED))?;
        tokio::time::sleep(self.settle).await;

        if self.bus.read_register(REG_STATUS)? & STATUS_MEASURING != 0 {
            return Err(SensorError::Timeout {
                after_ms: self.settle.as_millis() as u64,
            });
        }

        let mut data = [0u8; 8];
        self.bus.read_registers(REG_DATA, &mut data)?;
        let value = calibration.compensate(RawSample::from_bytes(&data))?;
        Ok(Reading::now(value))
    }
}

/// Three attributes sharing the sensor's state topic.
pub struct Bme280Service<S> {
    source: S,
    discovery: DiscoveryPublisher,
    states: StatePublisher,
    policy: ChangePolicy,
    state: SensorState<Bme280Reading>,
    pacing: Duration,
}

impl<S> Bme280Service<S>
where
    S: SensorSource<Output = Bme280Reading>,
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

    fn descriptors(layout: &TopicLayout) -> [DiscoveryDescriptor; 3] {
        [
            DeviceClass::Humidity,
            DeviceClass::Temperature,
            DeviceClass::Pressure,
        ]
        .map(|class| DiscoveryDescriptor::shared(layout, class, class.as_str()))
    }
}

#[async_trait]
impl<S> ReportingService for Bme280Service<S>
where
    S: SensorSource<Output = Bme280Reading>,
{
    fn kind(&self) -> &'static str {
        "bme280"
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
        for descriptor in Self::descriptors(self.discovery.layout()) {
            self.discovery.announce(publisher, &descriptor, ctx).await?;
        }
        Ok(())
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
            trace!("Reading within thresholds: {:?}", reading.value);
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
    config: &Bme280Config,
    shared: ServiceContext,
) -> ReportResult<Box<dyn ReportingService>> {
    #[cfg(feature = "i2c")]
    {
        let bus = super::bus::LinuxI2c::open(config.i2c_bus, config.address)?;
        let driver = Bme280::new(bus, config.address, config.settle());
        Ok(Box::new(Bme280Service::new(driver, shared)))
    }
    #[cfg(not(feature = "i2c"))]
    {
        let _ = (config, shared);
        Err(super::not_supported("bme280 (build with the `i2c` feature)"))
    }
}
