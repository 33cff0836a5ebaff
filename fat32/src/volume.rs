//! The mounted-volume type: geometry, the per-volume sector cache, and the
//! volume label.

use alloc::sync::Arc;
use spin::Mutex;

use block_cache::SectorCache;
use storage_device::BlockDeviceRef;

use crate::dir::{DirPos, FileAttributes, ATTR_OFFSET};
use crate::Error;

/// A shared handle to a mounted volume.
///
/// Cursors hold one of these, so a volume stays usable (and its cache alive)
/// until the last cursor is dropped, even after an eject removed it from the
/// registry.
pub type VolumeRef = Arc<Mutex<Volume>>;

/// One mounted FAT32 partition.
pub struct Volume {
    /// The assigned drive letter, unique within a registry.
    pub(crate) letter: char,
    /// The device this volume lives on; used to find the volume again at
    /// eject time.
    pub(crate) device: BlockDeviceRef,
    /// The write-through cache every sector access goes through.
    pub(crate) cache: SectorCache,
    /// Bytes per sector as reported by the BPB; always 512.
    pub(crate) sector_size: u16,
    /// Sectors per cluster.
    pub(crate) cluster_size: u8,
    /// Total sectors of the partition.
    pub(crate) total_size: u32,
    /// Sectors per FAT.
    pub(crate) fat_size: u32,
    /// LBA of the FSInfo sector.
    pub(crate) info_lba: u32,
    /// LBA of the first FAT.
    pub(crate) fat_lba: u32,
    /// LBA of the first data sector (cluster 2).
    pub(crate) data_lba: u32,
    /// LBA of the root directory's first sector.
    pub(crate) root_lba: u32,
    /// The 8.3-style volume label, space padded.
    pub(crate) label: [u8; 11],
}

impl Volume {
    pub fn letter(&self) -> char {
        self.letter
    }

    /// The space-padded volume label read from the root directory.
    pub fn label(&self) -> &[u8; 11] {
        &self.label
    }

    pub fn sector_size(&self) -> u16 {
        self.sector_size
    }

    pub fn cluster_size(&self) -> u8 {
        self.cluster_size
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn fat_lba(&self) -> u32 {
        self.fat_lba
    }

    pub fn data_lba(&self) -> u32 {
        self.data_lba
    }

    pub fn root_lba(&self) -> u32 {
        self.root_lba
    }

    /// The device this volume is mounted from.
    pub fn device(&self) -> &BlockDeviceRef {
        &self.device
    }

    /// First sector of `cluster`.
    ///
    /// Clusters 0 and 1 are reserved and never name a real sector; their
    /// mapping wraps like the unsigned arithmetic it is.
    pub(crate) fn clust_to_sect(&self, cluster: u32) -> u32 {
        cluster
            .wrapping_sub(2)
            .wrapping_mul(self.cluster_size as u32)
            .wrapping_add(self.data_lba)
    }

    /// Cluster containing `sector`; inverse of [`clust_to_sect`](Self::clust_to_sect).
    pub(crate) fn sect_to_clust(&self, sector: u32) -> u32 {
        sector
            .wrapping_sub(self.data_lba)
            .wrapping_div(self.cluster_size as u32)
            .wrapping_add(2)
    }

    /// Re-reads the volume label record from the root directory.
    ///
    /// Microsoft formatters store the label as a `VOLUME_ID` record in the
    /// root rather than (only) in the BPB, so that is where we look.
    pub(crate) fn read_label(&mut self) -> Result<(), Error> {
        let (sector, offset) = match self.find_label_record()? {
            Some(position) => position,
            None => return Err(Error::NotFound),
        };
        let buffer = self.cache.sector(sector as usize)?;
        let mut label = [0u8; 11];
        label.copy_from_slice(&buffer[offset..offset + 11]);
        self.label = label;
        Ok(())
    }

    /// Rewrites the volume label record in the root directory.
    /// `name` may be up to 11 bytes; the record is space padded.
    pub fn set_label(&mut self, name: &[u8]) -> Result<(), Error> {
        if name.len() > 11 {
            return Err(Error::IllegalArgument);
        }
        let (sector, offset) = match self.find_label_record()? {
            Some(position) => position,
            None => return Err(Error::NotFound),
        };
        let buffer = self.cache.sector_mut(sector as usize)?;
        for i in 0..11 {
            buffer[offset + i] = if i < name.len() { name[i] } else { b' ' };
        }
        let mut label = [0u8; 11];
        label.copy_from_slice(&buffer[offset..offset + 11]);
        self.label = label;
        self.cache.flush()?;
        Ok(())
    }

    /// Formatting a volume is not implemented.
    pub fn format(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Walks the root directory for a record with the `VOLUME_ID` attribute
    /// that is not a long-name slot.
    fn find_label_record(&mut self) -> Result<Option<(u32, usize)>, Error> {
        let mut pos = DirPos::at_root(self);
        loop {
            let buffer = self.cache.sector(pos.sector as usize)?;
            let offset = pos.rw_offset as usize;
            if buffer[offset] == 0x00 {
                return Ok(None);
            }
            let attribute = buffer[offset + ATTR_OFFSET];
            let lfn = FileAttributes::LFN.bits();
            if attribute & FileAttributes::VOLUME_ID.bits() != 0 && attribute & lfn != lfn {
                return Ok(Some((pos.sector, offset)));
            }
            if !pos.advance(self)? {
                return Ok(None);
            }
        }
    }
}
