//! Offset search.
//!
//! The hardware offset registers are assumed to act monotonically on the
//! measured value of their axis. A bracket search first finds, per axis, an
//! offset that reads below target and one that reads above; bisection then
//! narrows each bracket until it is at most `stop_threshold` wide. Bracket
//! search and bisection share one iteration budget.

use embedded_hal::{delay::DelayNs, i2c::I2c};
use tiltsense_hal::imu::{
    CalibrationOffsets, DeviceState, ImuError, ImuResult, NonVolatileStorage, OffsetCorrection,
    SampleReady,
};

use super::{
    AccelRange, CalibrationRecord, CalibrationSettings, GyroRange, Mpu6050, OffsetSeed, registers,
};

/// Something that can apply a set of offsets and report how far the
/// averaged measurement lands from its target
pub trait OffsetProbe {
    /// Apply `offsets` and return `average(sample) - target` per axis over
    /// `samples` measurements
    fn average_with(
        &mut self,
        offsets: &CalibrationOffsets,
        samples: u16,
    ) -> ImuResult<OffsetCorrection>;
}

impl<T: OffsetProbe + ?Sized> OffsetProbe for &mut T {
    fn average_with(
        &mut self,
        offsets: &CalibrationOffsets,
        samples: u16,
    ) -> ImuResult<OffsetCorrection> {
        T::average_with(self, offsets, samples)
    }
}

/// Result of a converged search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationOutcome {
    /// Offsets to program into the sensor
    pub offsets: CalibrationOffsets,
    /// Average deviation from target that remains with `offsets`
    pub residual: OffsetCorrection,
    /// Iterations spent out of the shared budget
    pub iterations: u16,
}

/// Bracket-and-bisect offset search
#[derive(Debug, Clone, Copy)]
pub struct OffsetSearch {
    settings: CalibrationSettings,
    verbose: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    offsets: CalibrationOffsets,
    averages: OffsetCorrection,
}

impl OffsetSearch {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self {
            settings,
            verbose: false,
        }
    }

    /// Log every iteration
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Search from `seed`. Bus errors abort the search immediately.
    pub fn run<P: OffsetProbe>(
        &self,
        probe: &mut P,
        seed: CalibrationOffsets,
    ) -> ImuResult<CalibrationOutcome> {
        let s = &self.settings;
        let mut iterations: u16 = 0;

        let mut low = Bound {
            offsets: seed,
            averages: [0; 6],
        };
        let mut high = low;

        // widen until every axis reads negative at `low` and positive at `high`
        loop {
            if iterations >= s.max_iterations {
                warn!("offset search: no bracket after {} iterations", iterations);
                return Err(ImuError::CalibrationExhausted);
            }
            iterations += 1;

            let mut moved = false;

            low.averages = probe.average_with(&low.offsets, s.coarse_samples)?;
            for (offset, average) in low.offsets.iter_mut().zip(low.averages) {
                if average >= 0 {
                    *offset = offset.saturating_sub(s.step);
                    moved = true;
                }
            }

            high.averages = probe.average_with(&high.offsets, s.coarse_samples)?;
            for (offset, average) in high.offsets.iter_mut().zip(high.averages) {
                if average <= 0 {
                    *offset = offset.saturating_add(s.step);
                    moved = true;
                }
            }

            if self.verbose {
                debug!(
                    "bracket #{}: low {} -> {}, high {} -> {}",
                    iterations, low.offsets, low.averages, high.offsets, high.averages
                );
            }

            if !moved {
                break;
            }
        }

        let mut width = widest(&low, &high);
        while width > s.stop_threshold {
            if iterations >= s.max_iterations {
                warn!(
                    "offset search: bracket still {} wide after {} iterations",
                    width, iterations
                );
                return Err(ImuError::CalibrationExhausted);
            }
            iterations += 1;

            let samples = if width <= s.fine_threshold {
                s.fine_samples
            } else {
                s.coarse_samples
            };

            let middle: CalibrationOffsets = core::array::from_fn(|i| {
                ((low.offsets[i] as i32 + high.offsets[i] as i32) / 2) as i16
            });
            let averages = probe.average_with(&middle, samples)?;

            for i in 0..6 {
                if averages[i] <= 0 {
                    low.offsets[i] = middle[i];
                    low.averages[i] = averages[i];
                } else {
                    high.offsets[i] = middle[i];
                    high.averages[i] = averages[i];
                }
            }

            width = widest(&low, &high);
            if self.verbose {
                debug!(
                    "bisect #{}: widest {}, low {} -> {}, high {} -> {}",
                    iterations, width, low.offsets, low.averages, high.offsets, high.averages
                );
            }
        }

        // keep whichever bound reads closer to target
        let mut outcome = CalibrationOutcome {
            offsets: [0; 6],
            residual: [0; 6],
            iterations,
        };
        for i in 0..6 {
            if low.averages[i].unsigned_abs() <= high.averages[i].unsigned_abs() {
                outcome.offsets[i] = low.offsets[i];
                outcome.residual[i] = low.averages[i];
            } else {
                outcome.offsets[i] = high.offsets[i];
                outcome.residual[i] = high.averages[i];
            }
        }

        Ok(outcome)
    }
}

fn widest(low: &Bound, high: &Bound) -> i32 {
    low.offsets
        .iter()
        .zip(high.offsets.iter())
        .map(|(&l, &h)| h as i32 - l as i32)
        .max()
        .unwrap_or(0)
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    SIG: SampleReady,
{
    /// Average `samples` measurements, one per data-ready signal, and
    /// subtract the target of each axis at the active full scale
    pub fn average_deviation(&mut self, samples: u16) -> ImuResult<OffsetCorrection> {
        let mut sum = [0i64; 6];
        for _ in 0..samples {
            self.signal.wait_for_sample();
            let sample = self.raw_sample()?.to_array();
            for (acc, value) in sum.iter_mut().zip(sample) {
                *acc += value as i64;
            }
        }

        let count = samples.max(1) as i64;
        let targets = self.targets();
        Ok(core::array::from_fn(|i| (sum[i] / count) as i32 - targets[i]))
    }

    /// Targets at the active full scale: +1 g on Z, zero elsewhere
    pub fn targets(&self) -> OffsetCorrection {
        [0, 0, self.accel_range.lsb_per_g() as i32, 0, 0, 0]
    }
}

impl<I2C, DELAY, SIG, NV> OffsetProbe for Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    SIG: SampleReady,
{
    fn average_with(
        &mut self,
        offsets: &CalibrationOffsets,
        samples: u16,
    ) -> ImuResult<OffsetCorrection> {
        self.set_offsets(offsets)?;
        self.average_deviation(samples)
    }
}

impl<I2C, DELAY, SIG, NV> Mpu6050<I2C, DELAY, SIG, NV>
where
    I2C: I2c,
    DELAY: DelayNs,
    SIG: SampleReady,
    NV: NonVolatileStorage,
{
    /// Switch to the calibration setup: most sensitive ranges, no DLPF,
    /// 1 kHz output rate
    pub fn prepare_calibration(&mut self) -> ImuResult<()> {
        self.set_full_scale(AccelRange::G2, GyroRange::Dps250)?;
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
        self.reset_signal_path()
    }

    /// Search new offsets, program them and persist them with the current
    /// temperature.
    ///
    /// Expects the calibration setup from [`Self::prepare_calibration`]. A
    /// failed save is logged and reported through the return value; the
    /// offsets stay active.
    pub fn perform_calibration(&mut self) -> ImuResult<(CalibrationOutcome, bool)> {
        let seed = match self.config.calibration.seed {
            OffsetSeed::Zero => [0; 6],
            OffsetSeed::Registers => self.read_offsets()?,
        };

        info!("calibrating offsets");
        let search = OffsetSearch::new(self.config.calibration).verbose(self.config.debug);
        let outcome = match search.run(self, seed) {
            Ok(outcome) => outcome,
            Err(ImuError::CalibrationExhausted) => {
                self.set_state(DeviceState::CalibrationError);
                return Err(ImuError::CalibrationExhausted);
            }
            Err(e) => return Err(e),
        };

        self.set_state(DeviceState::NotInitialized);
        let temperature = self.temperature()?;
        self.set_offsets(&outcome.offsets)?;
        self.offsets = outcome.offsets;
        self.correction = outcome.residual;

        info!(
            "calibrated in {} iterations: offsets {} at {} C",
            outcome.iterations, outcome.offsets, temperature
        );

        let record = CalibrationRecord {
            offsets: outcome.offsets,
            temperature,
        };
        let persisted = match self.store.save(&record) {
            Ok(()) => true,
            Err(e) => {
                error!("saving calibration failed: {}", e);
                false
            }
        };

        Ok((outcome, persisted))
    }

    /// Measure the residual error left by the hardware offsets at the
    /// active setup and keep it for refined samples
    pub fn compute_offset_correction(&mut self) -> ImuResult<OffsetCorrection> {
        if self.state == DeviceState::NotCalibrated {
            return Err(ImuError::NotCalibrated);
        }

        let correction = self.average_deviation(self.config.calibration.correction_samples)?;
        if self.config.debug {
            debug!("offset correction {}", correction);
        }
        self.correction = correction;
        Ok(correction)
    }
}
