//! Calibration record in byte-addressed non-volatile memory.
//!
//! Layout from the base address: one signature byte, six little-endian
//! `i16` offsets (accelerometer first) and the calibration temperature as a
//! little-endian `f32`. The signature is set to [`SIGNATURE_WRITING`] before
//! the payload is touched and to [`SIGNATURE_COMPLETE`] after, so a save cut
//! short by a power loss never loads.

use core::ops::RangeInclusive;

use tiltsense_hal::imu::{CalibrationOffsets, ImuError, ImuResult, NonVolatileStorage};

pub const SIGNATURE_WRITING: u8 = 0xD0;
pub const SIGNATURE_COMPLETE: u8 = 0xDD;

/// Payload bytes after the signature
pub const PAYLOAD_LEN: usize = 16;

/// Attempts per byte before a write is reported as unverified
const WRITE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signature {
    Empty,
    Writing,
    Complete,
}

impl Signature {
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            SIGNATURE_WRITING => Self::Writing,
            SIGNATURE_COMPLETE => Self::Complete,
            _ => Self::Empty,
        }
    }
}

/// Offsets found by a calibration run and the die temperature at the time
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    pub offsets: CalibrationOffsets,
    /// °C
    pub temperature: f32,
}

impl CalibrationRecord {
    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut bytes = [0u8; PAYLOAD_LEN];
        for (chunk, offset) in bytes.chunks_exact_mut(2).zip(self.offsets) {
            chunk.copy_from_slice(&offset.to_le_bytes());
        }
        bytes[12..].copy_from_slice(&self.temperature.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; PAYLOAD_LEN]) -> Self {
        let mut offsets = [0i16; 6];
        for (offset, chunk) in offsets.iter_mut().zip(bytes.chunks_exact(2)) {
            *offset = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        let temperature = f32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Self {
            offsets,
            temperature,
        }
    }

    /// Whether the record may be reused at `temperature`
    pub fn is_fresh(&self, temperature: f32, max_drift: f32) -> bool {
        let drift = temperature - self.temperature;
        drift < max_drift && -drift < max_drift
    }
}

/// Reads and writes the calibration record
pub struct CalibrationStore<NV> {
    storage: NV,
    base: u16,
}

impl<NV> CalibrationStore<NV>
where
    NV: NonVolatileStorage,
{
    pub fn new(storage: NV, base: u16) -> Self {
        Self { storage, base }
    }

    pub fn signature(&mut self) -> ImuResult<Signature> {
        Ok(Signature::from_byte(self.read(self.base)?))
    }

    /// Stored record, if a complete one exists
    pub fn load(&mut self) -> ImuResult<Option<CalibrationRecord>> {
        let payload = self.payload_addresses()?;
        if self.signature()? != Signature::Complete {
            return Ok(None);
        }

        let mut bytes = [0u8; PAYLOAD_LEN];
        for (address, byte) in payload.zip(bytes.iter_mut()) {
            *byte = self.read(address)?;
        }
        Ok(Some(CalibrationRecord::from_bytes(&bytes)))
    }

    pub fn save(&mut self, record: &CalibrationRecord) -> ImuResult<()> {
        let payload = self.payload_addresses()?;
        self.write_verified(self.base, SIGNATURE_WRITING)?;
        for (address, byte) in payload.zip(record.to_bytes()) {
            self.write_verified(address, byte)?;
        }
        self.write_verified(self.base, SIGNATURE_COMPLETE)
    }

    /// Invalidate the stored record
    pub fn erase(&mut self) -> ImuResult<()> {
        self.write_verified(self.base, 0xFF)
    }

    pub fn storage(&self) -> &NV {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut NV {
        &mut self.storage
    }

    pub fn release(self) -> NV {
        self.storage
    }

    /// Payload cells after the signature; the record must fit below
    /// `u16::MAX`
    fn payload_addresses(&self) -> ImuResult<RangeInclusive<u16>> {
        match self.base.checked_add(PAYLOAD_LEN as u16) {
            Some(end) => Ok(self.base + 1..=end),
            None => {
                error!("nv record at {} runs past the address space", self.base);
                Err(ImuError::Storage)
            }
        }
    }

    fn read(&mut self, address: u16) -> ImuResult<u8> {
        self.storage.read(address).map_err(|_| {
            error!("nv read at {} failed", address);
            ImuError::Storage
        })
    }

    fn write_verified(&mut self, address: u16, value: u8) -> ImuResult<()> {
        for _ in 0..WRITE_ATTEMPTS {
            if self.storage.update(address, value).is_err() {
                error!("nv write at {} failed", address);
                return Err(ImuError::Storage);
            }
            if self.read(address)? == value {
                return Ok(());
            }
        }

        error!("nv byte at {} never verified", address);
        Err(ImuError::StorageUnverified { address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiltsense_hal::dummy::{RamStorage, RamStorageError};

    const RECORD: CalibrationRecord = CalibrationRecord {
        offsets: [-1520, 873, 1288, 41, -17, 9],
        temperature: 31.25,
    };

    #[test]
    fn record_bytes_are_little_endian() {
        let bytes = RECORD.to_bytes();
        assert_eq!(&bytes[..2], &(-1520i16).to_le_bytes());
        assert_eq!(&bytes[10..12], &9i16.to_le_bytes());
        assert_eq!(&bytes[12..], &31.25f32.to_le_bytes());
        assert_eq!(CalibrationRecord::from_bytes(&bytes), RECORD);
    }

    #[test]
    fn load_before_save_is_empty() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        assert_eq!(store.signature(), Ok(Signature::Empty));
        assert_eq!(store.load(), Ok(None));
    }

    #[test]
    fn saved_record_loads_back() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        store.save(&RECORD).unwrap();

        assert_eq!(store.storage().cells()[15], SIGNATURE_COMPLETE);
        assert_eq!(store.load(), Ok(Some(RECORD)));
        // nothing written outside the record
        assert!(store.storage().cells()[..15].iter().all(|&b| b == 0xFF));
        assert!(store.storage().cells()[32..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn power_loss_mid_save_leaves_no_record() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        // signature plus half the payload make it
        store.storage_mut().cut_power_after(9);

        assert_eq!(store.save(&RECORD), Err(ImuError::Storage));
        assert_eq!(store.signature(), Ok(Signature::Writing));
        assert_eq!(store.load(), Ok(None));
    }

    #[test]
    fn power_loss_before_completion_hides_old_record() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        store.save(&RECORD).unwrap();

        let newer = CalibrationRecord {
            temperature: 40.0,
            ..RECORD
        };
        // everything but the final signature
        store.storage_mut().cut_power_after(1 + PAYLOAD_LEN);
        assert_eq!(store.save(&newer), Err(ImuError::Storage));
        assert_eq!(store.load(), Ok(None));
    }

    #[test]
    fn dropped_writes_are_retried() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        store.storage_mut().drop_next_writes(3);
        store.save(&RECORD).unwrap();
        assert_eq!(store.load(), Ok(Some(RECORD)));
    }

    #[test]
    fn stuck_byte_is_reported() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        store.storage_mut().drop_next_writes(WRITE_ATTEMPTS);
        assert_eq!(
            store.save(&RECORD),
            Err(ImuError::StorageUnverified { address: 15 })
        );
    }

    #[test]
    fn out_of_range_storage_errors() {
        let mut store = CalibrationStore::new(RamStorage::<8>::new(), 4);
        assert_eq!(store.save(&RECORD), Err(ImuError::Storage));
        assert_eq!(
            store.storage_mut().read(100),
            Err(RamStorageError::OutOfRange)
        );
    }

    /// Accepts every address and counts writes
    #[derive(Default)]
    struct OpenStorage {
        writes: usize,
    }

    impl NonVolatileStorage for OpenStorage {
        type Error = ();

        fn read(&mut self, _address: u16) -> Result<u8, ()> {
            Ok(SIGNATURE_COMPLETE)
        }

        fn update(&mut self, _address: u16, _value: u8) -> Result<(), ()> {
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn record_past_address_space_is_refused() {
        let mut store = CalibrationStore::new(OpenStorage::default(), u16::MAX - 4);
        assert_eq!(store.load(), Err(ImuError::Storage));
        assert_eq!(store.save(&RECORD), Err(ImuError::Storage));
        assert_eq!(store.storage().writes, 0);

        // the last base that still fits
        let last_base = u16::MAX - PAYLOAD_LEN as u16;
        let mut store = CalibrationStore::new(OpenStorage::default(), last_base);
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn freshness_is_symmetric() {
        assert!(RECORD.is_fresh(31.25, 25.0));
        assert!(RECORD.is_fresh(56.0, 25.0));
        assert!(!RECORD.is_fresh(56.25, 25.0));
        assert!(RECORD.is_fresh(6.5, 25.0));
        assert!(!RECORD.is_fresh(6.25, 25.0));
    }

    #[test]
    fn erase_invalidates() {
        let mut store = CalibrationStore::new(RamStorage::<64>::new(), 15);
        store.save(&RECORD).unwrap();
        store.erase().unwrap();
        assert_eq!(store.load(), Ok(None));
    }
}
