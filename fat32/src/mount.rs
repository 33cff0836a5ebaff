//! The mount pipeline: MBR partition scan, BPB validation, and volume
//! construction.

use byteorder::{ByteOrder, LittleEndian};

use block_cache::SectorCache;
use storage_device::{BlockDeviceRef, SECTOR_SIZE};

use crate::volume::Volume;
use crate::Error;

/// Byte layout of the MBR: four 16-byte partition records and the boot
/// signature.
const MBR_PARTITION_TABLE: usize = 446;
const MBR_PARTITION_SIZE: usize = 16;
const BOOT_SIGNATURE_OFFSET: usize = 510;
const BOOT_SIGNATURE: u16 = 0xAA55;

/// FAT32 requires at least this many data clusters; smaller counts are
/// FAT12/16 and are not supported.
const MIN_FAT32_CLUSTERS: u32 = 65525;

/// One record of the MBR partition table.
pub(crate) struct Partition {
    pub lba: u32,
    pub size: u32,
    pub kind: u8,
    pub status: u8,
}

/// The BPB fields this driver consumes, decoded from a partition's first
/// sector at their documented offsets.
struct BiosParameterBlock {
    sector_size: u16,
    cluster_size: u8,
    reserved_sectors: u16,
    fat_count: u8,
    root_entries: u16,
    total_sectors_16: u16,
    fat_size_16: u16,
    total_sectors_32: u32,
    fat_size_32: u32,
    root_cluster: u32,
    fsinfo_sector: u16,
}

impl BiosParameterBlock {
    fn parse(sector: &[u8; SECTOR_SIZE]) -> BiosParameterBlock {
        BiosParameterBlock {
            sector_size: LittleEndian::read_u16(&sector[11..13]),
            cluster_size: sector[13],
            reserved_sectors: LittleEndian::read_u16(&sector[14..16]),
            fat_count: sector[16],
            root_entries: LittleEndian::read_u16(&sector[17..19]),
            total_sectors_16: LittleEndian::read_u16(&sector[19..21]),
            fat_size_16: LittleEndian::read_u16(&sector[22..24]),
            total_sectors_32: LittleEndian::read_u32(&sector[32..36]),
            fat_size_32: LittleEndian::read_u32(&sector[36..40]),
            root_cluster: LittleEndian::read_u32(&sector[44..48]),
            fsinfo_sector: LittleEndian::read_u16(&sector[48..50]),
        }
    }

    /// Validates the sector as a FAT32 BPB.
    ///
    /// The "FAT" tag may sit at the FAT32 filesystem-type offset or, with
    /// older formatters, at the FAT12/16 one; the actual FAT flavor is then
    /// decided by the data-cluster count alone, per the Microsoft rule.
    fn is_fat32(&self, sector: &[u8; SECTOR_SIZE]) -> bool {
        if LittleEndian::read_u16(&sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2])
            != BOOT_SIGNATURE
        {
            return false;
        }
        if &sector[82..85] != b"FAT" && &sector[54..57] != b"FAT" {
            return false;
        }
        // The cache geometry is fixed at 512-byte sectors.
        if self.sector_size as usize != SECTOR_SIZE || self.cluster_size == 0 {
            return false;
        }

        let sector_size = self.sector_size as u32;
        let root_sectors = (self.root_entries as u32 * 32 + sector_size - 1) / sector_size;
        let fat_size = if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        };
        let total_sectors = if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        };
        let overhead = self.reserved_sectors as u32 + self.fat_count as u32 * fat_size + root_sectors;
        let data_sectors = total_sectors.saturating_sub(overhead);
        data_sectors / self.cluster_size as u32 >= MIN_FAT32_CLUSTERS
    }
}

/// Reads the MBR of `device` and returns its four partition records.
///
/// Fails if the medium is absent, the device will not initialize, or the
/// boot signature is missing.
pub(crate) fn read_partitions(device: &BlockDeviceRef) -> Result<[Partition; 4], Error> {
    let mut sector = [0u8; SECTOR_SIZE];
    {
        let mut locked = device.lock();
        if !locked.is_present() {
            return Err(Error::BlockError);
        }
        locked.initialize()?;
        locked.read_sectors(&mut sector, 0)?;
    }
    if LittleEndian::read_u16(&sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2])
        != BOOT_SIGNATURE
    {
        return Err(Error::InconsistentDisk);
    }

    Ok(core::array::from_fn(|i| {
        let record = &sector[MBR_PARTITION_TABLE + i * MBR_PARTITION_SIZE..][..MBR_PARTITION_SIZE];
        let partition = Partition {
            status: record[0],
            kind: record[4],
            lba: LittleEndian::read_u32(&record[8..12]),
            size: LittleEndian::read_u32(&record[12..16]),
        };
        if partition.lba != 0 {
            trace!(
                "MBR partition {}: lba={} size={} type={:#04x} status={:#04x}",
                i, partition.lba, partition.size, partition.kind, partition.status
            );
        }
        partition
    }))
}

/// Probes one partition and builds a [`Volume`] for it if it carries FAT32.
pub(crate) fn mount_partition(
    device: &BlockDeviceRef,
    partition: &Partition,
) -> Result<Option<Volume>, Error> {
    let mut sector = [0u8; SECTOR_SIZE];
    device
        .lock()
        .read_sectors(&mut sector, partition.lba as usize)?;

    let bpb = BiosParameterBlock::parse(&sector);
    if !bpb.is_fat32(&sector) {
        trace!("partition at LBA {} holds no FAT32 filesystem", partition.lba);
        return Ok(None);
    }

    let fat_lba = partition.lba + bpb.reserved_sectors as u32;
    let mut volume = Volume {
        letter: '?',
        device: device.clone(),
        cache: SectorCache::new(device.clone()),
        sector_size: bpb.sector_size,
        cluster_size: bpb.cluster_size,
        total_size: bpb.total_sectors_32,
        fat_size: bpb.fat_size_32,
        info_lba: partition.lba + bpb.fsinfo_sector as u32,
        fat_lba,
        data_lba: fat_lba + bpb.fat_count as u32 * bpb.fat_size_32,
        root_lba: 0,
        label: [b' '; 11],
    };
    // The root LBA derives from the root cluster number, which needs
    // data_lba to already be in place above.
    volume.root_lba = volume.clust_to_sect(bpb.root_cluster);
    Ok(Some(volume))
}
