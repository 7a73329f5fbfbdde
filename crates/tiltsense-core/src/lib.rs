#![cfg_attr(not(test), no_std)]

// must come first so the other modules see the logging macros
mod fmt;

pub mod fusion;
pub mod tilt_tracker;

pub use fusion::{FilterState, TiltAngles};
pub use tilt_tracker::TiltTracker;
