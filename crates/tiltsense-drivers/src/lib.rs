#![cfg_attr(not(test), no_std)]

// must come first so the other modules see the logging macros
mod fmt;

pub mod dummy;
pub mod imu;

pub use imu::mpu6050::{AccelRange, GyroRange, Mpu6050, Mpu6050Config};
