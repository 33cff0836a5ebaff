//! A storage device backed by a byte vector in memory.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::{BlockDevice, BlockDeviceRef, DiskError, SECTOR_SIZE};

/// An in-memory [`BlockDevice`] with 512-byte sectors.
///
/// Useful for driving the storage stack in tests, and as a scratch medium on
/// boards with spare RAM. The medium can be "removed" with
/// [`RamDisk::set_present`] to exercise hot-unplug paths.
pub struct RamDisk {
    bytes: Vec<u8>,
    present: bool,
    initialized: bool,
}

impl RamDisk {
    /// Creates a zero-filled disk with the given number of sectors.
    pub fn new(sector_count: usize) -> RamDisk {
        RamDisk {
            bytes: alloc::vec![0; sector_count * SECTOR_SIZE],
            present: true,
            initialized: false,
        }
    }

    /// Creates a disk from an existing image, padding the final partial
    /// sector (if any) with zeroes.
    pub fn from_bytes(mut bytes: Vec<u8>) -> RamDisk {
        let remainder = bytes.len() % SECTOR_SIZE;
        if remainder != 0 {
            bytes.resize(bytes.len() + SECTOR_SIZE - remainder, 0);
        }
        RamDisk {
            bytes,
            present: true,
            initialized: false,
        }
    }

    /// Wraps this disk in the shared handle type used by the upper layers.
    pub fn into_ref(self) -> BlockDeviceRef {
        Arc::new(Mutex::new(self))
    }

    /// Simulates inserting or removing the backing medium.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
        if !present {
            self.initialized = false;
        }
    }

    /// Validates a transfer and returns the sector count it covers.
    fn check_transfer(&self, buffer_len: usize, lba: usize) -> Result<usize, DiskError> {
        if !self.present || !self.initialized {
            return Err(DiskError::NotReady);
        }
        if buffer_len == 0 || buffer_len % SECTOR_SIZE != 0 {
            return Err(DiskError::InvalidInput);
        }
        let count = buffer_len / SECTOR_SIZE;
        if lba + count > self.size_in_sectors() {
            return Err(DiskError::OutOfBounds);
        }
        Ok(count)
    }
}

impl BlockDevice for RamDisk {
    fn size_in_sectors(&self) -> usize {
        self.bytes.len() / SECTOR_SIZE
    }

    fn is_present(&self) -> bool {
        self.present
    }

    fn initialize(&mut self) -> Result<(), DiskError> {
        if !self.present {
            return Err(DiskError::NotReady);
        }
        self.initialized = true;
        Ok(())
    }

    fn read_sectors(&mut self, buffer: &mut [u8], lba: usize) -> Result<usize, DiskError> {
        let count = self.check_transfer(buffer.len(), lba)?;
        let start = lba * SECTOR_SIZE;
        buffer.copy_from_slice(&self.bytes[start..start + buffer.len()]);
        Ok(count)
    }

    fn write_sectors(&mut self, buffer: &[u8], lba: usize) -> Result<usize, DiskError> {
        let count = self.check_transfer(buffer.len(), lba)?;
        let start = lba * SECTOR_SIZE;
        self.bytes[start..start + buffer.len()].copy_from_slice(buffer);
        Ok(count)
    }
}
