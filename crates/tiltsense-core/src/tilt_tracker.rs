use tiltsense_hal::imu::{DeviceState, ImuResult, MotionSensor};

use crate::fusion::{FilterState, TiltAngles};

/// Drives the tilt filter from a motion sensor, one step per data-ready
/// signal.
///
/// The filter clock starts at the first fused sample, or at the sample
/// after [`TiltTracker::reset_session`], so the first step never
/// integrates over the sensor's uptime.
pub struct TiltTracker<S> {
    sensor: S,
    filter: FilterState,
    angles: TiltAngles,
    clock_started: bool,
}

impl<S> TiltTracker<S>
where
    S: MotionSensor,
{
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            filter: FilterState::new(),
            angles: TiltAngles::default(),
            clock_started: false,
        }
    }

    /// Fuse the current sample, taken at `timestamp_ms`.
    ///
    /// While the sensor is not `Correct`, or when the read fails, the
    /// previous estimate is returned and the filter is left as is.
    pub fn step(&mut self, timestamp_ms: u32) -> TiltAngles {
        let state = self.sensor.state();
        if state != DeviceState::Correct {
            warn!("tilt: sensor not ready ({}), keeping estimate", state);
            return self.angles;
        }

        let sample = match self.sensor.refined_sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("tilt: sample read failed: {}", e);
                return self.angles;
            }
        };

        if !self.clock_started {
            self.filter.restart(timestamp_ms);
            self.clock_started = true;
        }

        self.angles = self.filter.step(&sample, timestamp_ms);
        trace!("tilt: roll {} pitch {}", self.angles.roll, self.angles.pitch);
        self.angles
    }

    /// Wait for the next sample and fuse it
    pub fn poll(&mut self) -> TiltAngles {
        let timestamp_ms = self.sensor.wait_for_sample();
        if self.sensor.take_sample_overrun() {
            warn!("tilt: sample overrun before {} ms", timestamp_ms);
        }
        self.step(timestamp_ms)
    }

    /// Start a new measurement session: discard the sample pipeline and
    /// integrate from the first sample after the reset
    pub fn reset_session(&mut self) -> ImuResult<()> {
        self.sensor.wait_for_sample();
        self.sensor.reset_signal_path()?;

        let timestamp_ms = self.sensor.wait_for_sample();
        self.sensor.take_sample_overrun();
        self.filter.restart(timestamp_ms);
        self.clock_started = true;
        debug!("tilt: session restarted at {} ms", timestamp_ms);
        Ok(())
    }

    pub fn angles(&self) -> TiltAngles {
        self.angles
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn release(self) -> S {
        self.sensor
    }
}
