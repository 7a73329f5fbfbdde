//! Two-axis simplified Kalman estimator.
//!
//! Roll and pitch are filtered as independent scalar states. The gyro
//! rates, rotated with the current estimate, are integrated to predict; the
//! gravity direction seen by the accelerometer corrects. Yaw is not
//! estimated.

use nalgebra::{ComplexField, RealField, Vector2, Vector3};
use tiltsense_hal::imu::RefinedSample;

/// Gyro integration noise added per squared second of prediction
pub const GYRO_COVARIANCE: f32 = 0.203_263_53;

/// Measurement variance reported when the accelerometer reads all zeros
pub const ZERO_MAGNITUDE_VARIANCE: f32 = 1000.0;

/// Estimated tilt, rad
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TiltAngles {
    pub roll: f32,
    pub pitch: f32,
}

/// Tilt derived from the accelerometer alone
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccelTilt {
    pub angles: TiltAngles,
    /// Shared by both axes, grows with the distance of |a| from 1 g
    pub variance: f32,
}

/// Roll and pitch as seen by the gravity vector.
///
/// An all-zero reading is a sensor fault: it yields level angles with
/// [`ZERO_MAGNITUDE_VARIANCE`] so the correction barely moves the estimate.
pub fn accel_tilt(accel: &Vector3<f32>) -> AccelTilt {
    let magnitude = accel.norm();
    if magnitude == 0.0 {
        return AccelTilt {
            angles: TiltAngles::default(),
            variance: ZERO_MAGNITUDE_VARIANCE,
        };
    }

    let n = accel / magnitude;
    let roll = RealField::atan2(n.y, ComplexField::sqrt(n.x * n.x + n.z * n.z));
    let pitch = -RealField::atan2(n.x, ComplexField::sqrt(n.y * n.y + n.z * n.z));

    let deviation = magnitude - 1.0;
    AccelTilt {
        angles: TiltAngles { roll, pitch },
        variance: magnitude + 1.0 + 10.0 * deviation * deviation,
    }
}

/// Body rates (rad/s) projected onto the roll and pitch axes of `angles`
pub fn rotate_rates(gyro: &Vector3<f32>, angles: &TiltAngles) -> Vector2<f32> {
    let (sin_roll, cos_roll) = ComplexField::sin_cos(angles.roll);
    let (sin_pitch, cos_pitch) = ComplexField::sin_cos(angles.pitch);

    Vector2::new(
        gyro.x * cos_roll + gyro.z * sin_pitch,
        gyro.x * sin_roll * sin_pitch + gyro.y * cos_roll - gyro.z * sin_roll * cos_pitch,
    )
}

/// Scalar filter for one tilt axis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisState {
    /// rad
    pub angle: f32,
    pub variance: f32,
    /// Rotated rate of the previous step, rad/s
    pub previous_rate: f32,
    pub previous_timestamp_ms: u32,
}

impl AxisState {
    pub const fn new(angle: f32, variance: f32, timestamp_ms: u32) -> Self {
        Self {
            angle,
            variance,
            previous_rate: 0.0,
            previous_timestamp_ms: timestamp_ms,
        }
    }

    /// Trapezoidal integration of `rate` since the previous step.
    ///
    /// The millisecond clock may wrap; elapsed time is the wrapping
    /// difference.
    pub fn predict(&mut self, rate: f32, timestamp_ms: u32) {
        let dt = timestamp_ms.wrapping_sub(self.previous_timestamp_ms) as f32 / 1000.0;

        self.angle += dt / 2.0 * (rate + self.previous_rate);
        self.variance += dt * dt * GYRO_COVARIANCE;

        self.previous_rate = rate;
        self.previous_timestamp_ms = timestamp_ms;
    }

    /// Blend in a measured angle. `measurement_variance` must be positive.
    pub fn correct(&mut self, measured: f32, measurement_variance: f32) {
        let gain = self.variance / (self.variance + measurement_variance);
        self.angle += gain * (measured - self.angle);
        self.variance *= 1.0 - gain;
    }
}

/// Roll and pitch filters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterState {
    pub roll: AxisState,
    pub pitch: AxisState,
}

impl FilterState {
    /// Level, zero variance, clock at 0
    pub const fn new() -> Self {
        Self::from_angles(TiltAngles { roll: 0.0, pitch: 0.0 }, 0.0, 0)
    }

    pub const fn from_angles(angles: TiltAngles, variance: f32, timestamp_ms: u32) -> Self {
        Self {
            roll: AxisState::new(angles.roll, variance, timestamp_ms),
            pitch: AxisState::new(angles.pitch, variance, timestamp_ms),
        }
    }

    pub fn angles(&self) -> TiltAngles {
        TiltAngles {
            roll: self.roll.angle,
            pitch: self.pitch.angle,
        }
    }

    /// Continue integrating from `timestamp_ms` without touching the angles
    pub fn restart(&mut self, timestamp_ms: u32) {
        self.roll.previous_timestamp_ms = timestamp_ms;
        self.pitch.previous_timestamp_ms = timestamp_ms;
    }

    /// Gyro-only prediction step
    pub fn predict(&mut self, gyro: &Vector3<f32>, timestamp_ms: u32) -> TiltAngles {
        let rates = rotate_rates(gyro, &self.angles());
        self.roll.predict(rates.x, timestamp_ms);
        self.pitch.predict(rates.y, timestamp_ms);
        self.angles()
    }

    /// Accelerometer correction, each axis weighted by its own variance
    pub fn correct(&mut self, tilt: &AccelTilt) -> TiltAngles {
        self.roll.correct(tilt.angles.roll, tilt.variance);
        self.pitch.correct(tilt.angles.pitch, tilt.variance);
        self.angles()
    }

    /// Full filter step for a sample taken at `timestamp_ms`
    pub fn step(&mut self, sample: &RefinedSample, timestamp_ms: u32) -> TiltAngles {
        self.predict(&sample.gyro, timestamp_ms);
        self.correct(&accel_tilt(&sample.accel))
    }
}
