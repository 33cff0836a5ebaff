//! A single-sector caching layer for block based storage devices.
//!
//! For most storage devices, calls to the backing medium are quite expensive.
//! This layer keeps the most recently touched sector in memory so that the
//! dense small accesses of a filesystem (directory records, FAT entries,
//! byte-wise file reads) hit the medium only when they cross a sector
//! boundary.
//!
//! The cache holds exactly one sector. Requesting a different sector first
//! writes the buffer back if it was modified, then reads the new sector in;
//! a caller therefore always observes its own writes, and a modified sector
//! reaches the medium no later than the next sector change or explicit
//! [`flush`](SectorCache::flush).
//!
//! Note that the cache only holds a reference to the underlying device.
//! If anything else writes to the device directly, the cache will return
//! stale and potentially inconsistent results. A mounted filesystem is
//! expected to own its device exclusively and route every access through
//! its cache.

#![no_std]

#[macro_use] extern crate log;
extern crate storage_device;
#[cfg(test)] extern crate alloc;

use storage_device::{BlockDeviceRef, DiskError, SECTOR_SIZE};

/// The states of the cached sector, following the MSI cache coherence naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    /// Dirty: the buffer has been modified more recently than the medium and
    /// must be written back before it can be replaced.
    Modified,
    /// Clean: the buffer and the medium hold the same bytes for the cached
    /// sector, so the buffer can be replaced without a write-back.
    Shared,
    /// The buffer holds no sector at all. Only the case before the first
    /// load after mounting.
    Invalid,
}

/// A write-through cache holding a single sector of a storage device.
pub struct SectorCache {
    /// The underlying device from which sectors are read and written.
    device: BlockDeviceRef,
    /// The sector number currently held in `buffer`.
    /// Meaningless while `state` is `Invalid`.
    lba: usize,
    state: CacheState,
    buffer: [u8; SECTOR_SIZE],
}

impl SectorCache {
    /// Creates an empty cache in front of the given device.
    pub fn new(device: BlockDeviceRef) -> SectorCache {
        SectorCache {
            device,
            lba: 0,
            state: CacheState::Invalid,
            buffer: [0; SECTOR_SIZE],
        }
    }

    /// Returns the device this cache sits in front of.
    pub fn device(&self) -> &BlockDeviceRef {
        &self.device
    }

    /// The sector currently held, if any.
    pub fn cached_lba(&self) -> Option<usize> {
        match self.state {
            CacheState::Invalid => None,
            _ => Some(self.lba),
        }
    }

    /// Whether the buffer holds modifications not yet on the medium.
    pub fn is_dirty(&self) -> bool {
        self.state == CacheState::Modified
    }

    /// Makes `lba` the cached sector.
    ///
    /// A hit is free. On a miss, a modified buffer is written back first and
    /// the requested sector is then read from the device.
    ///
    /// On failure the cache is left consistent: a failed write-back keeps the
    /// buffer `Modified` so a later call retries it, and a failed read keeps
    /// whatever sector was (cleanly) held before.
    pub fn load(&mut self, lba: usize) -> Result<(), DiskError> {
        if self.state != CacheState::Invalid && self.lba == lba {
            return Ok(());
        }
        self.flush()?;
        self.device.lock().read_sectors(&mut self.buffer, lba)?;
        self.lba = lba;
        self.state = CacheState::Shared;
        Ok(())
    }

    /// Writes the buffer back to the medium if it is `Modified`; otherwise a
    /// no-op. A failed write leaves the buffer `Modified` for a retry.
    pub fn flush(&mut self) -> Result<(), DiskError> {
        if self.state == CacheState::Modified {
            trace!("SectorCache: writing back sector {}", self.lba);
            self.device.lock().write_sectors(&self.buffer, self.lba)?;
            self.state = CacheState::Shared;
        }
        Ok(())
    }

    /// Loads `lba` and returns the sector bytes for reading.
    pub fn sector(&mut self, lba: usize) -> Result<&[u8; SECTOR_SIZE], DiskError> {
        self.load(lba)?;
        Ok(&self.buffer)
    }

    /// Loads `lba` and returns the sector bytes for modification.
    ///
    /// The sector is marked `Modified` up front; the new bytes reach the
    /// medium on the next sector change or `flush`.
    pub fn sector_mut(&mut self, lba: usize) -> Result<&mut [u8; SECTOR_SIZE], DiskError> {
        self.load(lba)?;
        self.state = CacheState::Modified;
        Ok(&mut self.buffer)
    }
}
