//! Data-ready flag shared between the sensor interrupt and the driver.
//!
//! The interrupt handler calls [`SampleSignal::notify`] with the capture
//! time; the driver consumes it through the [`SampleReady`] trait. The flag
//! is level-like: a second notification before consumption overwrites the
//! timestamp and raises the overrun indicator instead of queueing.

use core::cell::Cell;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};

use crate::imu::SampleReady;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    pending: bool,
    overrun: bool,
    timestamp_ms: u32,
}

/// Interrupt-safe sample-ready cell, usable from a `static`
pub struct SampleSignal {
    slot: Mutex<CriticalSectionRawMutex, Cell<Slot>>,
}

impl SampleSignal {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot {
                pending: false,
                overrun: false,
                timestamp_ms: 0,
            })),
        }
    }

    /// Mark a new sample as ready. Called from interrupt context.
    pub fn notify(&self, timestamp_ms: u32) {
        self.slot.lock(|cell| {
            let mut slot = cell.get();
            if slot.pending {
                slot.overrun = true;
            }
            slot.pending = true;
            slot.timestamp_ms = timestamp_ms;
            cell.set(slot);
        });
    }

    /// Consume the flag if set
    pub fn try_take(&self) -> Option<u32> {
        self.slot.lock(|cell| {
            let mut slot = cell.get();
            if !slot.pending {
                return None;
            }
            slot.pending = false;
            cell.set(slot);
            Some(slot.timestamp_ms)
        })
    }

    /// Drop any pending notification without reading it
    pub fn clear(&self) {
        self.slot.lock(|cell| {
            let mut slot = cell.get();
            slot.pending = false;
            cell.set(slot);
        });
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock(|cell| cell.get().pending)
    }

    /// Return and clear the overrun indicator
    pub fn take_overrun(&self) -> bool {
        self.slot.lock(|cell| {
            let mut slot = cell.get();
            let overrun = slot.overrun;
            slot.overrun = false;
            cell.set(slot);
            overrun
        })
    }
}

impl Default for SampleSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleReady for &SampleSignal {
    fn wait_for_sample(&mut self) -> u32 {
        loop {
            if let Some(timestamp) = self.try_take() {
                return timestamp;
            }
            core::hint::spin_loop();
        }
    }

    fn take_overrun(&mut self) -> bool {
        SampleSignal::take_overrun(self)
    }
}
