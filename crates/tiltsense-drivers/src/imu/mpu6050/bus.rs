//! Register access with bounded retries.
//!
//! Exhausting the retries of any transaction moves the driver into the
//! sticky `I2cError` state.

use embedded_hal::i2c::I2c;
use tiltsense_hal::imu::{DeviceState, ImuError, ImuResult};

use super::{Mpu6050, registers};

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
{
    /// Read `buf.len()` consecutive registers starting at `register`.
    ///
    /// On failure `buf` is zero-filled.
    pub fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> ImuResult<()> {
        for _ in 0..registers::READ_ATTEMPTS {
            if self
                .i2c
                .write_read(self.config.address, &[register], buf)
                .is_ok()
            {
                return Ok(());
            }
        }

        buf.fill(0);
        error!("mpu6050: reading {:#x} failed", register);
        self.set_state(DeviceState::I2cError);
        Err(ImuError::Communication)
    }

    pub fn read_register(&mut self, register: u8) -> ImuResult<u8> {
        let mut buf = [0u8; 1];
        self.read_registers(register, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian 16 bit value
    pub fn read_word(&mut self, register: u8) -> ImuResult<i16> {
        let mut buf = [0u8; 2];
        self.read_registers(register, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Write one register, optionally reading it back until it matches
    pub fn write_register(&mut self, register: u8, value: u8, verify: bool) -> ImuResult<()> {
        for _ in 0..registers::WRITE_ATTEMPTS {
            if self
                .i2c
                .write(self.config.address, &[register, value])
                .is_err()
            {
                continue;
            }

            if !verify {
                return Ok(());
            }

            // single raw read, a failed check only costs this attempt
            let mut readback = [0u8; 1];
            if self
                .i2c
                .write_read(self.config.address, &[register], &mut readback)
                .is_ok()
                && readback[0] == value
            {
                return Ok(());
            }
        }

        error!("mpu6050: writing {:#x} to {:#x} failed", value, register);
        self.set_state(DeviceState::I2cError);
        Err(ImuError::Communication)
    }

    /// Read-modify-write of the bits selected by `mask`
    pub fn update_register_bits(
        &mut self,
        register: u8,
        value: u8,
        mask: u8,
        verify: bool,
    ) -> ImuResult<()> {
        let current = self.read_register(register)?;
        self.write_register(register, (value & mask) | (current & !mask), verify)
    }
}
