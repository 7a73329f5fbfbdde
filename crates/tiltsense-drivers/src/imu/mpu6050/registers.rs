// Identification
pub const WHO_AM_I: u8 = 0x75;
pub const WHO_AM_I_MASK: u8 = 0x7E;
pub const DEVICE_ID: u8 = 0x68;

// Factory self-test results, 4 bytes
pub const SELF_TEST_X: u8 = 0x0D;
pub const SELF_TEST_LEN: usize = 4;

// Offset registers, high byte first
pub const ACCEL_OFFSET_BASE: u8 = 0x06;
pub const GYRO_OFFSET_BASE: u8 = 0x13;

// Configuration
pub const SMPLRT_DIV: u8 = 0x19;
pub const CONFIG: u8 = 0x1A;
pub const CONFIG_DLPF_MASK: u8 = 0x3F;
pub const GYRO_CONFIG: u8 = 0x1B;
pub const ACCEL_CONFIG: u8 = 0x1C;
pub const FULL_SCALE_MASK: u8 = 0xF8;
pub const INT_ENABLE: u8 = 0x38;
pub const INT_ENABLE_MASK: u8 = 0x19;
pub const INT_DATA_RDY: u8 = 0x01;

// Self-test enable: all three axes plus the self-test range
pub const ACCEL_SELF_TEST: u8 = 0xF0;
pub const GYRO_SELF_TEST: u8 = 0xE0;

// Measurements
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const MEASUREMENT_LEN: usize = 14;
pub const TEMP_OUT_H: u8 = 0x41;

// Resets and power
pub const SIGNAL_PATH_RESET: u8 = 0x68;
pub const SIGNAL_PATH_RESET_MASK: u8 = 0x07;
pub const PWR_MGMT_1: u8 = 0x6B;
pub const PWR_MGMT_1_SLEEP_MASK: u8 = 0xE8;
pub const PWR_MGMT_1_SLEEP: u8 = 0x40;
pub const PWR_MGMT_1_CLKSEL_MASK: u8 = 0x07;
pub const CLKSEL_PLL_GYRO_Z: u8 = 0x03;

// Bus retry bounds
pub const READ_ATTEMPTS: usize = 5;
pub const WRITE_ATTEMPTS: usize = 6;

// Timings
pub const SELF_TEST_SETTLE_MS: u32 = 250;
pub const SIGNAL_PATH_RESET_MS: u32 = 10;

// Calibration-time setup: 1 kHz output rate
pub const CALIBRATION_DLPF: u8 = 0x00;
pub const CALIBRATION_SAMPLE_RATE_DIVIDER: u8 = 0x07;
