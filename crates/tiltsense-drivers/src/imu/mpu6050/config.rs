/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccelRange {
    /// ±2 g
    G2,
    /// ±4 g
    G4,
    /// ±8 g
    #[default]
    G8,
    /// ±16 g
    G16,
}

impl AccelRange {
    /// ACCEL_CONFIG value, self-test bits cleared
    pub const fn register_value(self) -> u8 {
        match self {
            Self::G2 => 0x00,
            Self::G4 => 0x08,
            Self::G8 => 0x10,
            Self::G16 => 0x18,
        }
    }

    /// Sensitivity in LSB per g
    pub const fn lsb_per_g(self) -> f32 {
        match self {
            Self::G2 => 16384.0,
            Self::G4 => 8192.0,
            Self::G8 => 4096.0,
            Self::G16 => 2048.0,
        }
    }

    pub const fn from_register(value: u8) -> Self {
        match (value >> 3) & 0b11 {
            0 => Self::G2,
            1 => Self::G4,
            2 => Self::G8,
            _ => Self::G16,
        }
    }
}

/// Gyroscope full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GyroRange {
    /// ±250 °/s
    Dps250,
    /// ±500 °/s
    Dps500,
    /// ±1000 °/s
    #[default]
    Dps1000,
    /// ±2000 °/s
    Dps2000,
}

impl GyroRange {
    /// GYRO_CONFIG value, self-test bits cleared
    pub const fn register_value(self) -> u8 {
        match self {
            Self::Dps250 => 0x00,
            Self::Dps500 => 0x08,
            Self::Dps1000 => 0x10,
            Self::Dps2000 => 0x18,
        }
    }

    /// Sensitivity in LSB per °/s
    pub const fn lsb_per_dps(self) -> f32 {
        match self {
            Self::Dps250 => 131.0,
            Self::Dps500 => 65.5,
            Self::Dps1000 => 32.8,
            Self::Dps2000 => 16.4,
        }
    }

    pub const fn from_register(value: u8) -> Self {
        match (value >> 3) & 0b11 {
            0 => Self::Dps250,
            1 => Self::Dps500,
            2 => Self::Dps1000,
            _ => Self::Dps2000,
        }
    }
}

/// Where the offset search starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OffsetSeed {
    /// Start every axis at offset 0
    #[default]
    Zero,
    /// Start from whatever the offset registers currently hold
    Registers,
}

/// Tuning of the offset search
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationSettings {
    /// Samples averaged per bracket-search step and early bisection steps
    pub coarse_samples: u16,
    /// Samples averaged once the widest bracket is narrow
    pub fine_samples: u16,
    /// Samples averaged when computing the residual correction
    pub correction_samples: u16,
    /// Iteration budget shared by bracket search and bisection
    pub max_iterations: u16,
    /// Bracket widening per step, in offset LSB
    pub step: i16,
    /// Widest bracket at which averaging switches to `fine_samples`
    pub fine_threshold: i32,
    /// Widest bracket at which the search stops
    pub stop_threshold: i32,
    pub seed: OffsetSeed,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            coarse_samples: 1000,
            fine_samples: 10000,
            correction_samples: 1000,
            max_iterations: 100,
            step: 1000,
            fine_threshold: 5,
            stop_threshold: 1,
            seed: OffsetSeed::Zero,
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mpu6050Config {
    /// 7-bit bus address, 0x68 with AD0 low and 0x69 with AD0 high
    pub address: u8,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    /// Working DLPF_CFG value
    pub dlpf: u8,
    /// Working SMPLRT_DIV value
    pub sample_rate_divider: u8,
    /// Measure the residual correction at 1 kHz instead of the working rate
    pub fast_calibration_correction: bool,
    /// Log calibration and self-test progress
    pub debug: bool,
    pub calibration: CalibrationSettings,
    /// First byte of the calibration record in non-volatile storage
    pub store_base_address: u16,
    /// Largest temperature change (°C) for which a stored calibration is reused
    pub max_temperature_drift: f32,
}

impl Default for Mpu6050Config {
    fn default() -> Self {
        Self {
            address: 0x68,
            accel_range: AccelRange::default(),
            gyro_range: GyroRange::default(),
            dlpf: 0x02,
            sample_rate_divider: 0x1F,
            fast_calibration_correction: true,
            debug: false,
            calibration: CalibrationSettings::default(),
            store_base_address: 15,
            max_temperature_drift: 25.0,
        }
    }
}

impl Mpu6050Config {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_accel_range(mut self, range: AccelRange) -> Self {
        self.accel_range = range;
        self
    }

    pub fn with_gyro_range(mut self, range: GyroRange) -> Self {
        self.gyro_range = range;
        self
    }

    pub fn with_dlpf(mut self, dlpf: u8) -> Self {
        self.dlpf = dlpf;
        self
    }

    pub fn with_sample_rate_divider(mut self, divider: u8) -> Self {
        self.sample_rate_divider = divider;
        self
    }

    pub fn with_fast_calibration_correction(mut self, enabled: bool) -> Self {
        self.fast_calibration_correction = enabled;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationSettings) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_store_base_address(mut self, address: u16) -> Self {
        self.store_base_address = address;
        self
    }

    pub fn with_max_temperature_drift(mut self, drift: f32) -> Self {
        self.max_temperature_drift = drift;
        self
    }
}
