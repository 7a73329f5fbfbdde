//! Register-level MPU-6050 stand-in for host tests.
//!
//! Measurements are generated from a noiseless model: true gravity and
//! rotation plus a per-axis bias, shifted by whatever sits in the offset
//! registers and by the self-test actuation when its bits are set. The
//! full-scale bits are honoured, so the same model reads correctly at every
//! range.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use heapless::HistoryBuffer;
use nalgebra::Vector3;
use tiltsense_hal::imu::Axis;

use crate::imu::mpu6050::{AccelRange, GyroRange, factory_trim, registers};

/// Writes remembered by [`SimulatedMpu6050::writes`]
pub const WRITE_LOG_LEN: usize = 256;

const REGISTER_COUNT: usize = 128;
const POWER_ON_PWR_MGMT_1: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedBusError {
    /// Transaction to an address nobody answers
    Nack,
    /// Failure requested by the test
    Injected,
}

impl i2c::Error for SimulatedBusError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimulatedBusError::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            SimulatedBusError::Injected => ErrorKind::Other,
        }
    }
}

pub struct SimulatedMpu6050 {
    address: u8,
    registers: [u8; REGISTER_COUNT],
    pointer: u8,

    /// Specific force in g
    gravity: Vector3<f32>,
    accel_bias: Vector3<f32>,
    /// Angular rate in °/s
    rate: Vector3<f32>,
    gyro_bias: Vector3<f32>,
    temperature: f32,

    self_test_codes: [u8; 6],
    self_test_scale: [f32; 6],

    frozen: heapless::Vec<u8, 8>,
    fail_next: u32,
    fail_at: Option<u32>,
    transactions: u32,
    signal_path_resets: u32,
    write_log: HistoryBuffer<(u8, u8), WRITE_LOG_LEN>,
}

impl Default for SimulatedMpu6050 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMpu6050 {
    /// Level, motionless part at 0x68 with a small bias on every axis
    pub fn new() -> Self {
        let mut sim = Self {
            address: 0x68,
            registers: [0; REGISTER_COUNT],
            pointer: 0,
            gravity: Vector3::new(0.0, 0.0, 1.0),
            accel_bias: Vector3::new(0.02, -0.03, 0.05),
            rate: Vector3::zeros(),
            gyro_bias: Vector3::new(1.5, -0.8, 0.3),
            temperature: 30.0,
            self_test_codes: [14, 15, 16, 12, 13, 14],
            self_test_scale: [1.0; 6],
            frozen: heapless::Vec::new(),
            fail_next: 0,
            fail_at: None,
            transactions: 0,
            signal_path_resets: 0,
            write_log: HistoryBuffer::new(),
        };
        sim.registers[registers::WHO_AM_I as usize] = registers::DEVICE_ID;
        sim.registers[registers::PWR_MGMT_1 as usize] = POWER_ON_PWR_MGMT_1;
        sim.store_self_test_codes();
        sim
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Specific force along the sensor axes, in g
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    pub fn set_accel_bias(&mut self, bias: Vector3<f32>) {
        self.accel_bias = bias;
    }

    /// True angular rate in °/s
    pub fn set_rate(&mut self, rate: Vector3<f32>) {
        self.rate = rate;
    }

    pub fn set_gyro_bias(&mut self, bias: Vector3<f32>) {
        self.gyro_bias = bias;
    }

    pub fn set_temperature(&mut self, celsius: f32) {
        self.temperature = celsius;
    }

    /// Factory self-test codes in axis order Ax..Gz
    pub fn set_self_test_codes(&mut self, codes: [u8; 6]) {
        self.self_test_codes = codes;
        self.store_self_test_codes();
    }

    /// Scale the self-test actuation of one axis; 1.0 is a healthy part
    pub fn set_self_test_scale(&mut self, axis: Axis, scale: f32) {
        self.self_test_scale[axis.index()] = scale;
    }

    pub fn register(&self, register: u8) -> u8 {
        self.registers[register as usize % REGISTER_COUNT]
    }

    /// Poke a register without going through the bus
    pub fn set_register(&mut self, register: u8, value: u8) {
        self.registers[register as usize % REGISTER_COUNT] = value;
    }

    /// Acknowledge writes to `register` but never store them
    pub fn freeze_register(&mut self, register: u8) {
        self.frozen.push(register).ok();
    }

    /// Fail the next `count` transactions
    pub fn fail_next(&mut self, count: u32) {
        self.fail_next = count;
    }

    /// Fail a single transaction, `index` transactions from now
    pub fn fail_transaction_at(&mut self, index: u32) {
        self.fail_at = Some(self.transactions + index);
    }

    /// Transactions attempted so far, failed ones included
    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    pub fn signal_path_resets(&self) -> u32 {
        self.signal_path_resets
    }

    pub fn is_sleeping(&self) -> bool {
        self.register(registers::PWR_MGMT_1) & registers::PWR_MGMT_1_SLEEP != 0
    }

    /// Register writes that reached the device, oldest first
    pub fn writes(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.write_log.oldest_ordered().copied()
    }

    pub fn clear_write_log(&mut self) {
        self.write_log.clear();
    }

    /// Current content of the six offset registers
    pub fn hardware_offsets(&self) -> [i16; 6] {
        let word = |register: u8| {
            i16::from_be_bytes([self.register(register), self.register(register + 1)])
        };
        [
            word(registers::ACCEL_OFFSET_BASE),
            word(registers::ACCEL_OFFSET_BASE + 2),
            word(registers::ACCEL_OFFSET_BASE + 4),
            word(registers::GYRO_OFFSET_BASE),
            word(registers::GYRO_OFFSET_BASE + 2),
            word(registers::GYRO_OFFSET_BASE + 4),
        ]
    }

    fn store_self_test_codes(&mut self) {
        let codes = self.self_test_codes;
        let base = registers::SELF_TEST_X as usize;
        self.registers[base + 3] = 0;
        for i in 0..3 {
            self.registers[base + i] = ((codes[i] >> 2) << 5) | (codes[i + 3] & 0x1F);
            self.registers[base + 3] |= (codes[i] & 0b11) << (4 - 2 * i);
        }
    }

    fn measurement_block(&self) -> [u8; registers::MEASUREMENT_LEN] {
        let mut block = [0u8; registers::MEASUREMENT_LEN];
        if self.is_sleeping() {
            return block;
        }

        let offsets = self.hardware_offsets();
        let accel_config = self.register(registers::ACCEL_CONFIG);
        let gyro_config = self.register(registers::GYRO_CONFIG);
        let accel_lsb = AccelRange::from_register(accel_config).lsb_per_g();
        let gyro_range = GyroRange::from_register(gyro_config);
        let gyro_shift = (gyro_config >> 3) & 0b11;

        for axis in Axis::ALL {
            let i = axis.index();
            let excited = if axis.is_accel() {
                accel_config & (0x80 >> i) != 0
            } else {
                gyro_config & (0x80 >> (i - 3)) != 0
            };

            let mut value = if axis.is_accel() {
                (self.gravity[i] + self.accel_bias[i]) * accel_lsb
                    + offsets[i] as f32 * accel_lsb / 2048.0
            } else {
                let j = i - 3;
                (self.rate[j] + self.gyro_bias[j]) * gyro_range.lsb_per_dps()
                    + ((offsets[i] as i32 * 4) >> gyro_shift) as f32
            };

            if excited {
                let trim = factory_trim(axis, self.self_test_codes[i]).unwrap_or(0.0);
                value += trim * self.self_test_scale[i];
            }

            // measurement block: accel xyz, temperature, gyro xyz
            let slot = if axis.is_accel() { 2 * i } else { 2 * i + 2 };
            block[slot..slot + 2].copy_from_slice(&to_lsb(value).to_be_bytes());
        }

        let temperature = to_lsb((self.temperature - 36.53) * 340.0);
        block[6..8].copy_from_slice(&temperature.to_be_bytes());
        block
    }

    fn read_byte(&self, register: u8, block: &[u8; registers::MEASUREMENT_LEN]) -> u8 {
        let start = registers::ACCEL_XOUT_H;
        match register.checked_sub(start) {
            Some(index) if (index as usize) < registers::MEASUREMENT_LEN => block[index as usize],
            _ => self.register(register),
        }
    }

    fn write_byte(&mut self, register: u8, value: u8) {
        self.write_log.write((register, value));
        if self.frozen.contains(&register) {
            return;
        }

        match register {
            registers::WHO_AM_I => {}
            registers::SIGNAL_PATH_RESET => {
                if value & registers::SIGNAL_PATH_RESET_MASK != 0 {
                    self.signal_path_resets += 1;
                }
                // reset bits clear themselves
                self.set_register(register, value & !registers::SIGNAL_PATH_RESET_MASK);
            }
            _ => self.set_register(register, value),
        }
    }
}

/// Round half away from zero, saturating at the i16 range
fn to_lsb(value: f32) -> i16 {
    let rounded = if value >= 0.0 { value + 0.5 } else { value - 0.5 };
    rounded as i16
}

impl ErrorType for SimulatedMpu6050 {
    type Error = SimulatedBusError;
}

impl I2c for SimulatedMpu6050 {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let index = self.transactions;
        self.transactions += 1;

        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SimulatedBusError::Injected);
        }
        if self.fail_at == Some(index) {
            self.fail_at = None;
            return Err(SimulatedBusError::Injected);
        }
        if address != self.address {
            return Err(SimulatedBusError::Nack);
        }

        let mut block = None;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    let Some((&register, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.pointer = register;
                    for &value in data {
                        self.write_byte(self.pointer, value);
                        self.pointer = self.pointer.wrapping_add(1);
                    }
                }
                Operation::Read(buf) => {
                    let block = *block.get_or_insert_with(|| self.measurement_block());
                    for byte in buf.iter_mut() {
                        *byte = self.read_byte(self.pointer, &block);
                        self.pointer = self.pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Delay that returns immediately and only adds up what was asked for
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay {
    elapsed_ns: u64,
}

impl NoDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }
}
