//! Register-level access to an I2C peripheral.

use super::SensorResult;

/// Byte-register access to one slave address.
pub trait RegisterBus: Send {
    /// Reads `buf.len()` bytes starting at `register`.
    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> SensorResult<()>;

    fn write_register(&mut self, register: u8, value: u8) -> SensorResult<()>;

    fn read_register(&mut self, register: u8) -> SensorResult<u8> {
        let mut buf = [0u8; 1];
        self.read_registers(register, &mut buf)?;
        Ok(buf[0])
    }
}

#[cfg(feature = "i2c")]
pub use linux::LinuxI2c;

#[cfg(feature = "i2c")]
mod linux {
    use rppal::i2c::I2c;
    use tracing::debug;

    use super::RegisterBus;
    use crate::sensors::{SensorError, SensorResult};

    /// `/dev/i2c-{bus}` through rppal.
    pub struct LinuxI2c {
        bus: u8,
        device: I2c,
    }

    impl LinuxI2c {
        pub fn open(bus: u8, address: u16) -> SensorResult<Self> {
            let wrap = |e: rppal::i2c::Error| SensorError::Bus {
                bus,
                source: Box::new(e),
            };
            let mut device = I2c::with_bus(bus).map_err(wrap)?;
            device.set_slave_address(address).map_err(wrap)?;
            debug!("Opened /dev/i2c-{bus} at 0x{address:02X}");
            Ok(Self { bus, device })
        }

        fn wrap(&self, e: rppal::i2c::Error) -> SensorError {
            SensorError::Bus {
                bus: self.bus,
                source: Box::new(e),
            }
        }
    }

    impl RegisterBus for LinuxI2c {
        fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> SensorResult<()> {
            self.device
                .write_read(&[register], buf)
                .map_err(|e| self.wrap(e))
        }

        fn write_register(&mut self, register: u8, value: u8) -> SensorResult<()> {
            self.device
                .smbus_write_byte(register, value)
                .map_err(|e| self.wrap(e))
        }
    }
}
