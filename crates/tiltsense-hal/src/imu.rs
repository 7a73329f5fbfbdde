use core::fmt;
use nalgebra::Vector3;

/// One of the six measured axes, in register order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    AccelX,
    AccelY,
    AccelZ,
    GyroX,
    GyroY,
    GyroZ,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::AccelX,
        Axis::AccelY,
        Axis::AccelZ,
        Axis::GyroX,
        Axis::GyroY,
        Axis::GyroZ,
    ];

    /// Position of the axis in a six-value sample (Ax, Ay, Az, Gx, Gy, Gz)
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Axis::AccelX),
            1 => Some(Axis::AccelY),
            2 => Some(Axis::AccelZ),
            3 => Some(Axis::GyroX),
            4 => Some(Axis::GyroY),
            5 => Some(Axis::GyroZ),
            _ => None,
        }
    }

    pub const fn is_accel(self) -> bool {
        (self as usize) < 3
    }
}

/// Health of a sensor instance.
///
/// `I2cError` and `SelfTestFailed` are sticky: once entered they are only
/// left when a fresh initialization sequence starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    #[default]
    NotInitialized,
    Correct,
    I2cError,
    SelfTestFailed(Axis),
    NotCalibrated,
    CalibrationError,
}

impl DeviceState {
    const SELF_TEST_FAILED_BASE: u8 = 3;

    /// Numeric state code reported to the application
    pub const fn code(self) -> u8 {
        match self {
            DeviceState::NotInitialized => 0,
            DeviceState::Correct => 1,
            DeviceState::I2cError => 2,
            DeviceState::SelfTestFailed(axis) => Self::SELF_TEST_FAILED_BASE + axis as u8,
            DeviceState::NotCalibrated => 9,
            DeviceState::CalibrationError => 10,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DeviceState::NotInitialized),
            1 => Some(DeviceState::Correct),
            2 => Some(DeviceState::I2cError),
            3..=8 => match Axis::from_index((code - Self::SELF_TEST_FAILED_BASE) as usize) {
                Some(axis) => Some(DeviceState::SelfTestFailed(axis)),
                None => None,
            },
            9 => Some(DeviceState::NotCalibrated),
            10 => Some(DeviceState::CalibrationError),
            _ => None,
        }
    }

    /// States that survive until the next fresh initialization
    pub const fn is_sticky(self) -> bool {
        matches!(self, DeviceState::I2cError | DeviceState::SelfTestFailed(_))
    }

    pub const fn is_correct(self) -> bool {
        matches!(self, DeviceState::Correct)
    }
}

/// Errors reported by the IMU stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImuError {
    /// Bus retries exhausted; the device has to be re-initialized
    Communication,
    /// WHO_AM_I did not identify the expected part
    UnexpectedDevice { id: u8 },
    /// Self-test response out of tolerance on this axis
    SelfTestFailed(Axis),
    /// A calibration pass is required before the device can be trusted
    NotCalibrated,
    /// The offset search ran out of iterations without converging
    CalibrationExhausted,
    /// The non-volatile storage driver reported an error
    Storage,
    /// A non-volatile byte never read back as written
    StorageUnverified { address: u16 },
    /// The operation needs a different device state
    NotReady(DeviceState),
}

impl fmt::Display for ImuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImuError::Communication => f.write_str("bus communication failed"),
            ImuError::UnexpectedDevice { id } => write!(f, "unexpected device id 0x{id:02x}"),
            ImuError::SelfTestFailed(axis) => write!(f, "self-test failed on {axis:?}"),
            ImuError::NotCalibrated => f.write_str("calibration required"),
            ImuError::CalibrationExhausted => f.write_str("calibration did not converge"),
            ImuError::Storage => f.write_str("non-volatile storage error"),
            ImuError::StorageUnverified { address } => {
                write!(f, "non-volatile byte at {address} failed verification")
            }
            ImuError::NotReady(state) => write!(f, "device not ready ({state:?})"),
        }
    }
}

/// Result type for IMU operations
pub type ImuResult<T> = Result<T, ImuError>;

/// Hardware offset register values, accelerometer before gyroscope
pub type CalibrationOffsets = [i16; 6];

/// Residual error left after the hardware offsets, removed in software
pub type OffsetCorrection = [i32; 6];

/// Six raw register readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

impl RawSample {
    pub const fn new(values: [i16; 6]) -> Self {
        Self {
            accel: [values[0], values[1], values[2]],
            gyro: [values[3], values[4], values[5]],
        }
    }

    pub const fn to_array(self) -> [i16; 6] {
        [
            self.accel[0],
            self.accel[1],
            self.accel[2],
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
        ]
    }

    pub const fn axis(&self, axis: Axis) -> i16 {
        self.to_array()[axis.index()]
    }
}

/// Measurement corrected by the calibration residual and scaled to
/// physical units: g for accelerations, rad/s for angular rates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RefinedSample {
    pub accel: Vector3<f32>,
    pub gyro: Vector3<f32>,
}

/// Source of "new sample ready" notifications.
///
/// Implemented by whatever the data-ready interrupt writes into.
pub trait SampleReady {
    /// Block until a fresh sample is flagged, consume the flag and return
    /// the millisecond timestamp captured with it
    fn wait_for_sample(&mut self) -> u32;

    /// Return whether a notification arrived before the previous one was
    /// consumed, clearing the indicator
    fn take_overrun(&mut self) -> bool;
}

impl<T: SampleReady + ?Sized> SampleReady for &mut T {
    fn wait_for_sample(&mut self) -> u32 {
        T::wait_for_sample(self)
    }

    fn take_overrun(&mut self) -> bool {
        T::take_overrun(self)
    }
}

/// Byte-addressed non-volatile memory with EEPROM semantics
pub trait NonVolatileStorage {
    type Error: fmt::Debug;

    fn read(&mut self, address: u16) -> Result<u8, Self::Error>;

    /// Write `value` at `address`; implementations may skip the write when
    /// the cell already holds the value
    fn update(&mut self, address: u16, value: u8) -> Result<(), Self::Error>;
}

impl<T: NonVolatileStorage + ?Sized> NonVolatileStorage for &mut T {
    type Error = T::Error;

    fn read(&mut self, address: u16) -> Result<u8, Self::Error> {
        T::read(self, address)
    }

    fn update(&mut self, address: u16, value: u8) -> Result<(), Self::Error> {
        T::update(self, address, value)
    }
}

/// Operations a calibrated motion sensor exposes to the estimation layer
pub trait MotionSensor {
    /// Current device state
    fn state(&self) -> DeviceState;

    /// Read the six raw measurements
    fn raw_sample(&mut self) -> ImuResult<RawSample>;

    /// Read the six measurements corrected and scaled to g and rad/s
    fn refined_sample(&mut self) -> ImuResult<RefinedSample>;

    /// Run an offset calibration pass and persist its result
    fn calibrate(&mut self) -> ImuResult<()>;

    /// Reset the sensor signal path, discarding samples in flight
    fn reset_signal_path(&mut self) -> ImuResult<()>;

    /// Block until the next data-ready signal and return its timestamp (ms)
    fn wait_for_sample(&mut self) -> u32;

    /// Return and clear the sample overrun indicator
    fn take_sample_overrun(&mut self) -> bool;
}
