//! InvenSense MPU-6050 over I2C.
//!
//! Start-up is split in two so the caller can let the die warm up in
//! between: [`Mpu6050::initialize_phase1`] checks the part, runs the
//! self-test, configures it and decides whether the stored calibration is
//! still usable; [`Mpu6050::initialize_phase2`] calibrates if needed and
//! measures the residual correction applied to refined samples.

mod bus;
mod calibration;
mod config;
pub mod registers;
mod store;

use embedded_hal::{delay::DelayNs, i2c::I2c};
use tiltsense_hal::imu::*;

pub use calibration::{CalibrationOutcome, OffsetProbe, OffsetSearch};
pub use config::{AccelRange, CalibrationSettings, GyroRange, Mpu6050Config, OffsetSeed};
pub use self_test::{MAX_DEVIATION_PERCENT, SelfTestReport, decode_codes, factory_trim};
pub use store::{CalibrationRecord, CalibrationStore, PAYLOAD_LEN, Signature};

/// Convert a raw sample to g and rad/s after removing the residual
/// correction
pub fn refine(
    raw: &RawSample,
    correction: &OffsetCorrection,
    accel_range: AccelRange,
    gyro_range: GyroRange,
) -> RefinedSample {
    let values = raw.to_array();
    let corrected = |i: usize| (values[i] as i32 - correction[i]) as f32;

    let accel_scale = 1.0 / accel_range.lsb_per_g();
    let gyro_scale = core::f32::consts::PI / (180.0 * gyro_range.lsb_per_dps());

    RefinedSample {
        accel: nalgebra::Vector3::new(corrected(0), corrected(1), corrected(2)) * accel_scale,
        gyro: nalgebra::Vector3::new(corrected(3), corrected(4), corrected(5)) * gyro_scale,
    }
}

/// MPU-6050 driver
pub struct Mpu6050<I2C, DELAY, SIG, NV> {
    i2c: I2C,
    delay: DELAY,
    signal: SIG,
    store: CalibrationStore<NV>,
    config: Mpu6050Config,

    state: DeviceState,
    // Set only by a successful phase 1; `NotInitialized` alone does not say
    // whether the part was identified and self-tested
    phase1_passed: bool,

    // Ranges currently programmed, which differ from the configured ones
    // during self-test and calibration
    accel_range: AccelRange,
    gyro_range: GyroRange,

    offsets: CalibrationOffsets,
    correction: OffsetCorrection,
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    NV: NonVolatileStorage,
{
    pub fn new(i2c: I2C, delay: DELAY, signal: SIG, storage: NV, config: Mpu6050Config) -> Self {
        Self {
            i2c,
            delay,
            signal,
            store: CalibrationStore::new(storage, config.store_base_address),
            config,
            state: DeviceState::NotInitialized,
            phase1_passed: false,
            accel_range: config.accel_range,
            gyro_range: config.gyro_range,
            offsets: [0; 6],
            correction: [0; 6],
        }
    }
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV> {
    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &Mpu6050Config {
        &self.config
    }

    /// Offsets last programmed by calibration or loaded from storage
    pub fn offsets(&self) -> CalibrationOffsets {
        self.offsets
    }

    pub fn offset_correction(&self) -> OffsetCorrection {
        self.correction
    }

    pub fn accel_range(&self) -> AccelRange {
        self.accel_range
    }

    pub fn gyro_range(&self) -> GyroRange {
        self.gyro_range
    }

    pub fn store(&mut self) -> &mut CalibrationStore<NV> {
        &mut self.store
    }

    pub fn i2c_mut(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    pub fn signal_mut(&mut self) -> &mut SIG {
        &mut self.signal
    }

    pub fn release(self) -> (I2C, DELAY, SIG, CalibrationStore<NV>) {
        (self.i2c, self.delay, self.signal, self.store)
    }

    /// Sticky states are only left through a fresh phase-1 initialization
    fn set_state(&mut self, state: DeviceState) {
        if !self.state.is_sticky() {
            self.state = state;
        }
    }
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
{
    /// Program the full-scale ranges
    pub fn set_full_scale(&mut self, accel: AccelRange, gyro: GyroRange) -> ImuResult<()> {
        self.write_full_scale_registers(accel.register_value(), gyro.register_value())?;
        self.accel_range = accel;
        self.gyro_range = gyro;
        Ok(())
    }

    fn write_full_scale_registers(&mut self, accel: u8, gyro: u8) -> ImuResult<()> {
        self.update_register_bits(
            registers::ACCEL_CONFIG,
            accel,
            registers::FULL_SCALE_MASK,
            true,
        )?;
        self.update_register_bits(registers::GYRO_CONFIG, gyro, registers::FULL_SCALE_MASK, true)
    }

    /// Put the sensor to sleep or wake it up
    pub fn set_low_power_mode(&mut self, sleep: bool) -> ImuResult<()> {
        let value = if sleep { registers::PWR_MGMT_1_SLEEP } else { 0 };
        self.update_register_bits(
            registers::PWR_MGMT_1,
            value,
            registers::PWR_MGMT_1_SLEEP_MASK,
            true,
        )
    }

    /// Apply the working setup: ranges, DLPF, data-ready interrupt and
    /// sample-rate divider
    pub fn configure(&mut self) -> ImuResult<()> {
        self.set_full_scale(self.config.accel_range, self.config.gyro_range)?;
        self.update_register_bits(
            registers::CONFIG,
            self.config.dlpf,
            registers::CONFIG_DLPF_MASK,
            true,
        )?;
        self.update_register_bits(
            registers::INT_ENABLE,
            registers::INT_DATA_RDY,
            registers::INT_ENABLE_MASK,
            true,
        )?;
        self.write_register(registers::SMPLRT_DIV, self.config.sample_rate_divider, true)
    }

    /// Program the hardware offset registers, high byte first
    pub fn set_offsets(&mut self, offsets: &CalibrationOffsets) -> ImuResult<()> {
        for axis in Axis::ALL {
            let i = axis.index();
            let register = if axis.is_accel() {
                registers::ACCEL_OFFSET_BASE + 2 * i as u8
            } else {
                registers::GYRO_OFFSET_BASE + 2 * (i as u8 - 3)
            };

            let [high, low] = offsets[i].to_be_bytes();
            self.write_register(register, high, true)?;
            self.write_register(register + 1, low, true)?;
        }
        Ok(())
    }

    /// Read the hardware offset registers
    pub fn read_offsets(&mut self) -> ImuResult<CalibrationOffsets> {
        let mut accel = [0u8; 6];
        let mut gyro = [0u8; 6];
        self.read_registers(registers::ACCEL_OFFSET_BASE, &mut accel)?;
        self.read_registers(registers::GYRO_OFFSET_BASE, &mut gyro)?;

        let word = |bytes: &[u8; 6], i: usize| i16::from_be_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        Ok([
            word(&accel, 0),
            word(&accel, 1),
            word(&accel, 2),
            word(&gyro, 0),
            word(&gyro, 1),
            word(&gyro, 2),
        ])
    }

    /// Die temperature in °C
    pub fn temperature(&mut self) -> ImuResult<f32> {
        let raw = self.read_word(registers::TEMP_OUT_H)?;
        Ok(raw as f32 / 340.0 + 36.53)
    }

    /// Read the measurement block; the temperature word is skipped
    pub fn raw_sample(&mut self) -> ImuResult<RawSample> {
        let mut buf = [0u8; registers::MEASUREMENT_LEN];
        self.read_registers(registers::ACCEL_XOUT_H, &mut buf)?;

        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
        Ok(RawSample {
            accel: [word(0), word(2), word(4)],
            gyro: [word(8), word(10), word(12)],
        })
    }

    /// Raw sample corrected and scaled at the active ranges
    pub fn refined_sample(&mut self) -> ImuResult<RefinedSample> {
        let raw = self.raw_sample()?;
        Ok(refine(
            &raw,
            &self.correction,
            self.accel_range,
            self.gyro_range,
        ))
    }
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    DELAY: DelayNs,
{
    /// Reset the gyro, accel and temperature signal paths and let them
    /// settle. The reset bits clear themselves, so the write is not verified.
    pub fn reset_signal_path(&mut self) -> ImuResult<()> {
        self.update_register_bits(
            registers::SIGNAL_PATH_RESET,
            0xFF,
            registers::SIGNAL_PATH_RESET_MASK,
            false,
        )?;
        self.delay.delay_ms(registers::SIGNAL_PATH_RESET_MS);
        Ok(())
    }
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    DELAY: DelayNs,
    SIG: SampleReady,
    NV: NonVolatileStorage,
{
    /// Identify, wake, self-test and configure the sensor, then check the
    /// stored calibration.
    ///
    /// Call as early as possible; the sensor should then warm up before
    /// [`Self::initialize_phase2`]. Clears any sticky error state.
    pub fn initialize_phase1(&mut self) -> ImuResult<()> {
        self.state = DeviceState::NotInitialized;
        self.phase1_passed = false;
        self.offsets = [0; 6];
        self.correction = [0; 6];

        let id = self.read_register(registers::WHO_AM_I)?;
        if id & registers::WHO_AM_I_MASK != registers::DEVICE_ID {
            error!("mpu6050: unexpected WHO_AM_I {:#x}", id);
            self.set_state(DeviceState::I2cError);
            return Err(ImuError::UnexpectedDevice { id });
        }

        self.update_register_bits(
            registers::PWR_MGMT_1,
            registers::CLKSEL_PLL_GYRO_Z,
            registers::PWR_MGMT_1_CLKSEL_MASK,
            true,
        )?;
        self.set_low_power_mode(false)?;

        self.run_self_test()?;
        self.configure()?;
        self.check_calibration()?;
        self.phase1_passed = true;

        info!("mpu6050: phase 1 done, state {}", self.state);
        Ok(())
    }

    /// Calibrate if phase 1 found no usable calibration, then measure the
    /// residual correction. Leaves the driver `Correct` on success.
    ///
    /// Fails with `NotReady` unless [`Self::initialize_phase1`] succeeded.
    pub fn initialize_phase2(&mut self) -> ImuResult<()> {
        if !self.phase1_passed {
            return Err(ImuError::NotReady(self.state));
        }

        match self.state {
            DeviceState::NotCalibrated => {
                self.prepare_calibration()?;
                self.perform_calibration()?;
                self.configure()?;
            }
            DeviceState::NotInitialized => {}
            state => return Err(ImuError::NotReady(state)),
        }

        let fast = self.config.fast_calibration_correction;
        if fast {
            self.update_register_bits(
                registers::CONFIG,
                registers::CALIBRATION_DLPF,
                registers::CONFIG_DLPF_MASK,
                true,
            )?;
            self.write_register(
                registers::SMPLRT_DIV,
                registers::CALIBRATION_SAMPLE_RATE_DIVIDER,
                true,
            )?;
        }
        self.reset_signal_path()?;

        self.compute_offset_correction()?;

        if fast {
            self.configure()?;
            self.reset_signal_path()?;
        }

        if self.state != DeviceState::NotInitialized {
            error!("mpu6050: initialization failed in state {}", self.state);
            return Err(ImuError::NotReady(self.state));
        }

        self.state = DeviceState::Correct;
        info!("mpu6050: ready, correction {}", self.correction);
        Ok(())
    }

    /// Load the stored calibration if it was taken close enough to the
    /// current temperature. Returns whether it was applied; otherwise the
    /// driver moves to `NotCalibrated`.
    pub fn check_calibration(&mut self) -> ImuResult<bool> {
        let temperature = self.temperature()?;

        let record = match self.store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!("calibration record unreadable: {}", e);
                None
            }
        };

        if let Some(record) = record {
            if record.is_fresh(temperature, self.config.max_temperature_drift) {
                self.set_offsets(&record.offsets)?;
                self.offsets = record.offsets;
                info!("using stored calibration from {} C", record.temperature);
                return Ok(true);
            }
            warn!(
                "stored calibration at {} C, sensor at {} C",
                record.temperature, temperature
            );
        }

        self.set_state(DeviceState::NotCalibrated);
        Ok(false)
    }
}

impl<I2C, DELAY, SIG, NV> MotionSensor for Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    DELAY: DelayNs,
    SIG: SampleReady,
    NV: NonVolatileStorage,
{
    fn state(&self) -> DeviceState {
        self.state
    }

    fn raw_sample(&mut self) -> ImuResult<RawSample> {
        Mpu6050::raw_sample(self)
    }

    fn refined_sample(&mut self) -> ImuResult<RefinedSample> {
        Mpu6050::refined_sample(self)
    }

    /// Force a new calibration, replacing the stored one
    fn calibrate(&mut self) -> ImuResult<()> {
        if !self.phase1_passed || self.state.is_sticky() {
            return Err(ImuError::NotReady(self.state));
        }
        self.state = DeviceState::NotCalibrated;
        self.initialize_phase2()
    }

    fn reset_signal_path(&mut self) -> ImuResult<()> {
        Mpu6050::reset_signal_path(self)
    }

    fn wait_for_sample(&mut self) -> u32 {
        self.signal.wait_for_sample()
    }

    fn take_sample_overrun(&mut self) -> bool {
        self.signal.take_overrun()
    }
}
