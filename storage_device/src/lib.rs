//! Traits and types for sector-addressed storage devices.
//!
//! The important items are summarized below:
//! * [`BlockDevice`]: a trait that represents a synchronous storage device
//!   which transfers whole 512-byte sectors at a time, e.g., an SD card
//!   behind a mass-storage controller.
//! * [`BlockDeviceRef`]: the shared handle type used throughout the storage
//!   stack, an `Arc` around a spinlock-protected `BlockDevice` trait object.
//! * [`DiskError`]: the error type returned by device transfers.
//! * [`RamDisk`]: a `Vec`-backed device used by tests and demos.
//!
//! Transfers are "stateless": every read and write names the starting sector
//! explicitly, and no offset is tracked between operations. A transfer either
//! completes fully or fails without touching the destination; partial
//! transfers are not part of the device model.

#![no_std]

extern crate alloc;
extern crate spin;

pub mod ramdisk;

pub use ramdisk::RamDisk;

use alloc::sync::Arc;
use spin::Mutex;

/// The size in bytes of a single sector.
///
/// The whole stack is built around 512-byte sectors; devices with a different
/// native block size must present a 512-byte view of themselves.
pub const SECTOR_SIZE: usize = 512;

/// Errors that can be returned from block device transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The buffer length was not a non-zero multiple of the sector size.
    InvalidInput,
    /// The transfer touched sectors beyond the end of the device.
    OutOfBounds,
    /// The device has no medium present or has not been initialized.
    NotReady,
    /// The transfer failed at the hardware level.
    Io,
}

impl From<DiskError> for &'static str {
    fn from(error: DiskError) -> Self {
        match error {
            DiskError::InvalidInput => "DiskError: invalid input",
            DiskError::OutOfBounds  => "DiskError: out of bounds",
            DiskError::NotReady     => "DiskError: device not ready",
            DiskError::Io           => "DiskError: I/O failure",
        }
    }
}

/// A trait that represents a synchronous, sector-addressed storage device.
///
/// A `BlockDevice` is not aware of any current offset into the medium;
/// each transfer requires a starting sector number (LBA).
pub trait BlockDevice: Send {
    /// Returns the size in bytes of a single sector,
    /// the minimum granularity of transfers.
    fn sector_size_in_bytes(&self) -> usize {
        SECTOR_SIZE
    }

    /// Returns the total number of sectors on this device.
    fn size_in_sectors(&self) -> usize;

    /// Returns `true` if the backing medium is currently present,
    /// e.g., the card is inserted.
    fn is_present(&self) -> bool;

    /// Prepares the device for transfers.
    ///
    /// Called once per mount, before the first read. Implementations should
    /// make this idempotent because a host may re-mount a device without
    /// re-creating it.
    fn initialize(&mut self) -> Result<(), DiskError>;

    /// Reads whole sectors from this device into the given `buffer`.
    ///
    /// The number of sectors transferred is dictated by the length of the
    /// given `buffer`, which must be a multiple of the sector size.
    /// `lba` is the sector number at which the read starts.
    ///
    /// Returns the number of sectors read.
    fn read_sectors(&mut self, buffer: &mut [u8], lba: usize) -> Result<usize, DiskError>;

    /// Writes whole sectors from the given `buffer` to this device.
    ///
    /// The number of sectors transferred is dictated by the length of the
    /// given `buffer`, which must be a multiple of the sector size.
    /// `lba` is the sector number at which the write starts.
    ///
    /// Returns the number of sectors written.
    fn write_sectors(&mut self, buffer: &[u8], lba: usize) -> Result<usize, DiskError>;
}

impl<D> BlockDevice for alloc::boxed::Box<D> where D: BlockDevice + ?Sized {
    fn sector_size_in_bytes(&self) -> usize { (**self).sector_size_in_bytes() }
    fn size_in_sectors(&self) -> usize { (**self).size_in_sectors() }
    fn is_present(&self) -> bool { (**self).is_present() }
    fn initialize(&mut self) -> Result<(), DiskError> { (**self).initialize() }
    fn read_sectors(&mut self, buffer: &mut [u8], lba: usize) -> Result<usize, DiskError> {
        (**self).read_sectors(buffer, lba)
    }
    fn write_sectors(&mut self, buffer: &[u8], lba: usize) -> Result<usize, DiskError> {
        (**self).write_sectors(buffer, lba)
    }
}

impl<D> BlockDevice for &mut D where D: BlockDevice + ?Sized {
    fn sector_size_in_bytes(&self) -> usize { (**self).sector_size_in_bytes() }
    fn size_in_sectors(&self) -> usize { (**self).size_in_sectors() }
    fn is_present(&self) -> bool { (**self).is_present() }
    fn initialize(&mut self) -> Result<(), DiskError> { (**self).initialize() }
    fn read_sectors(&mut self, buffer: &mut [u8], lba: usize) -> Result<usize, DiskError> {
        (**self).read_sectors(buffer, lba)
    }
    fn write_sectors(&mut self, buffer: &[u8], lba: usize) -> Result<usize, DiskError> {
        (**self).write_sectors(buffer, lba)
    }
}

/// A shared reference to a storage device.
///
/// The spinlock grants exclusive access for the duration of one transfer;
/// callers must not hold it across unrelated work.
pub type BlockDeviceRef = Arc<Mutex<dyn BlockDevice>>;
