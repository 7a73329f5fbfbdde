#![cfg_attr(not(test), no_std)]
pub mod dummy;
pub mod imu;
pub mod signal;

pub use imu::*;
pub use signal::SampleSignal;
