//! In-memory stand-ins for the collaborators, for host builds and tests.

use crate::imu::{NonVolatileStorage, SampleReady};

/// Errors produced by [`RamStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RamStorageError {
    OutOfRange,
    PowerLost,
}

/// EEPROM-like byte array, erased to `0xFF`.
///
/// Supports two fault modes: writes that are silently dropped (a cell that
/// does not take the value) and a write budget after which every write
/// fails, standing in for a power cut in the middle of a save.
#[derive(Debug, Clone)]
pub struct RamStorage<const N: usize> {
    cells: [u8; N],
    writes: usize,
    dropped_writes: usize,
    write_budget: Option<usize>,
}

impl<const N: usize> RamStorage<N> {
    pub const fn new() -> Self {
        Self {
            cells: [0xFF; N],
            writes: 0,
            dropped_writes: 0,
            write_budget: None,
        }
    }

    /// Ignore the next `count` writes without reporting an error
    pub fn drop_next_writes(&mut self, count: usize) {
        self.dropped_writes = count;
    }

    /// Accept `count` more writes, then fail every write with `PowerLost`
    pub fn cut_power_after(&mut self, count: usize) {
        self.write_budget = Some(count);
    }

    /// Number of writes that reached the cells
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn cells(&self) -> &[u8; N] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [u8; N] {
        &mut self.cells
    }
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NonVolatileStorage for RamStorage<N> {
    type Error = RamStorageError;

    fn read(&mut self, address: u16) -> Result<u8, Self::Error> {
        self.cells
            .get(address as usize)
            .copied()
            .ok_or(RamStorageError::OutOfRange)
    }

    fn update(&mut self, address: u16, value: u8) -> Result<(), Self::Error> {
        if address as usize >= N {
            return Err(RamStorageError::OutOfRange);
        }

        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return Err(RamStorageError::PowerLost);
            }
            *budget -= 1;
        }

        if self.dropped_writes > 0 {
            self.dropped_writes -= 1;
            return Ok(());
        }

        self.cells[address as usize] = value;
        self.writes += 1;
        Ok(())
    }
}

/// Sample source that is always ready, advancing a millisecond clock by a
/// fixed period per sample
#[derive(Debug, Clone, Copy)]
pub struct FreeRunningSignal {
    now_ms: u32,
    period_ms: u32,
    consumed: u32,
    overrun: bool,
}

impl FreeRunningSignal {
    pub const fn new(start_ms: u32, period_ms: u32) -> Self {
        Self {
            now_ms: start_ms,
            period_ms,
            consumed: 0,
            overrun: false,
        }
    }

    /// Timestamp of the most recently delivered sample
    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    /// Number of samples delivered so far
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Pretend the consumer fell behind by one sample
    pub fn raise_overrun(&mut self) {
        self.overrun = true;
    }
}

impl SampleReady for FreeRunningSignal {
    fn wait_for_sample(&mut self) -> u32 {
        self.now_ms = self.now_ms.wrapping_add(self.period_ms);
        self.consumed += 1;
        self.now_ms
    }

    fn take_overrun(&mut self) -> bool {
        core::mem::take(&mut self.overrun)
    }
}
