//! The registry of mounted volumes and the drive-letter pool.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use storage_device::BlockDeviceRef;

use crate::mount;
use crate::volume::VolumeRef;
use crate::Error;

/// Letters are handed out from `'C'` upward, one bit per letter.
const FIRST_LETTER: u8 = b'C';

/// An ordered collection of mounted volumes.
///
/// Mounting a disk probes its MBR and adds one volume per FAT32 partition;
/// each volume gets the lowest free drive letter. Ejecting a disk removes
/// (and flushes) all of its volumes and returns their letters to the pool.
pub struct VolumeRegistry {
    volumes: Vec<VolumeRef>,
    letter_mask: u32,
}

impl VolumeRegistry {
    pub const fn new() -> VolumeRegistry {
        VolumeRegistry {
            volumes: Vec::new(),
            letter_mask: 0,
        }
    }

    /// Mounts every FAT32 partition of `device`.
    ///
    /// Returns the number of volumes added. Partitions holding other
    /// filesystems are skipped silently, so a foreign-but-partitioned disk
    /// mounts successfully with zero volumes; a disk without an MBR boot
    /// signature does not mount at all.
    pub fn mount(&mut self, device: BlockDeviceRef) -> Result<usize, Error> {
        let partitions = mount::read_partitions(&device)?;
        let mut mounted = 0;
        for partition in partitions.iter().filter(|p| p.lba != 0) {
            let mut volume = match mount::mount_partition(&device, partition)? {
                Some(volume) => volume,
                None => continue,
            };
            volume.letter = self.assign_letter().ok_or(Error::Unsupported)?;
            if volume.read_label().is_err() {
                debug!("no volume label in the root directory of {}:", volume.letter);
            }
            debug!(
                "mounted {}: fat_lba={} data_lba={} root_lba={} ({} sectors/cluster)",
                volume.letter, volume.fat_lba, volume.data_lba, volume.root_lba, volume.cluster_size
            );
            self.volumes.push(Arc::new(Mutex::new(volume)));
            mounted += 1;
        }
        Ok(mounted)
    }

    /// Removes every volume living on `device`, flushing cached sectors
    /// first. The freed letters may be reused by later mounts.
    ///
    /// Cursors still holding a removed volume keep working against the
    /// device; eject only severs the registry's references.
    pub fn eject(&mut self, device: &BlockDeviceRef) -> Result<(), Error> {
        let mut index = 0;
        while index < self.volumes.len() {
            let matches = Arc::ptr_eq(self.volumes[index].lock().device(), device);
            if matches {
                self.volumes[index].lock().cache.flush()?;
                let volume = self.volumes.remove(index);
                let letter = volume.lock().letter;
                self.release_letter(letter);
                debug!("ejected volume {}:", letter);
            } else {
                index += 1;
            }
        }
        Ok(())
    }

    /// Looks up a mounted volume by drive letter.
    pub fn volume(&self, letter: char) -> Option<VolumeRef> {
        self.volumes
            .iter()
            .find(|volume| volume.lock().letter == letter)
            .cloned()
    }

    /// All mounted volumes, in mount order.
    pub fn volumes(&self) -> &[VolumeRef] {
        &self.volumes
    }

    fn assign_letter(&mut self) -> Option<char> {
        for bit in 0..32u32 {
            if self.letter_mask & (1 << bit) == 0 {
                self.letter_mask |= 1 << bit;
                return Some((FIRST_LETTER + bit as u8) as char);
            }
        }
        None
    }

    fn release_letter(&mut self, letter: char) {
        let bit = (letter as u8).wrapping_sub(FIRST_LETTER) as u32;
        if bit < 32 {
            self.letter_mask &= !(1 << bit);
        }
    }
}
