//! Support for the FAT32 filesystem over block-oriented mass-storage devices.
//!
//! The driver mounts every FAT32 partition found in a disk's MBR as a
//! [`Volume`] with its own drive letter (`'C'`, `'D'`, ...), and exposes a
//! small path-based API on top: directory listing, file read/seek/write,
//! renaming, and volume labels. Paths name the volume by letter, e.g.
//! `"C:/logs/boot.txt"`.
//!
//! Every mounted volume routes all of its disk traffic through a single
//! write-through sector cache, so the driver is usable on allocation-shy
//! embedded targets; the only per-volume state is the [`Volume`] itself.
//!
//! Below is an example of mounting an SD card and reading a file off it.
//!
//! ```rust,ignore
//! let device: BlockDeviceRef = board::sd_card();
//! fat32::mount_disk(device.clone())?;
//!
//! let registry = fat32::VOLUMES.lock();
//! let mut dir = Dir::open(&registry, "C:/logs/")?;
//! loop {
//!     match dir.read() {
//!         Ok(info) => debug!("{} ({} bytes)", info.name_str(), info.size),
//!         Err(Error::EndOfFile) => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//!
//! let mut file = File::open(&registry, "C:/logs/boot.txt")?;
//! let mut buffer = [0u8; 128];
//! let read = file.read(&mut buffer)?;
//! ```
//!
//! The driver is single-threaded per volume: the per-volume spinlock
//! serializes API calls, and no call suspends except inside the block
//! device itself.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate bitflags;
extern crate byteorder;
extern crate zerocopy;
extern crate spin;
extern crate storage_device;
extern crate block_cache;

mod dir;
mod file;
mod mount;
mod path;
mod registry;
mod table;
mod volume;

#[cfg(test)]
mod tests;

pub use dir::{Dir, FileAttributes, Info};
pub use file::File;
pub use registry::VolumeRegistry;
pub use volume::{Volume, VolumeRef};
pub use storage_device::{BlockDevice, BlockDeviceRef};

use spin::Mutex;

/// Internal error types.
/// Note that `EndOfFile` and `NotFound` are used for some control situations
/// that do not necessarily represent errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A transfer failed in the block device layer.
    BlockError,
    /// The operation is recognized but not implemented.
    Unsupported,
    /// A directory entry with the requested name does not exist.
    NotFound,
    /// No mounted volume carries the requested drive letter.
    NoVolume,
    /// The path is malformed or one of its components does not exist.
    PathError,
    /// The end of a directory or file was reached.
    EndOfFile,
    /// A seek went beyond the end of the file.
    InvalidOffset,
    /// An argument failed validation before touching the disk.
    IllegalArgument,
    /// No free cluster is available on the volume.
    DiskFull,
    /// The on-disk structures contradict themselves.
    InconsistentDisk,
    /// The driver reached a state that should be impossible.
    InternalError,
}

impl From<storage_device::DiskError> for Error {
    fn from(_error: storage_device::DiskError) -> Error {
        Error::BlockError
    }
}

lazy_static! {
    /// The process-wide default volume registry.
    ///
    /// Hosts that want several independent registries (or want to avoid the
    /// global) can own [`VolumeRegistry`] values directly; the free functions
    /// below and this static are a convenience for the common single-registry
    /// setup.
    pub static ref VOLUMES: Mutex<VolumeRegistry> = Mutex::new(VolumeRegistry::new());
}

/// Mounts every FAT32 partition of `device` into the default registry.
///
/// Returns the number of volumes that were added. A disk with a valid MBR but
/// no FAT32 partition mounts successfully with zero volumes.
pub fn mount_disk(device: BlockDeviceRef) -> Result<usize, Error> {
    VOLUMES.lock().mount(device)
}

/// Removes every volume of `device` from the default registry, flushing any
/// cached sector first. The freed drive letters may be reused by later mounts.
pub fn eject_disk(device: &BlockDeviceRef) -> Result<(), Error> {
    VOLUMES.lock().eject(device)
}

/// Looks up a volume in the default registry by drive letter.
pub fn volume_get(letter: char) -> Option<VolumeRef> {
    VOLUMES.lock().volume(letter)
}

/// Returns the first mounted volume of the default registry, if any.
pub fn volume_get_first() -> Option<VolumeRef> {
    VOLUMES.lock().volumes().first().cloned()
}
