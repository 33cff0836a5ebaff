//! End-to-end scenarios driving the public API over in-memory disk images.

use alloc::vec;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use storage_device::{BlockDeviceRef, RamDisk, SECTOR_SIZE};

use crate::dir::sfn_checksum;
use crate::{table, Dir, Error, File, VolumeRegistry};

/// Geometry shared by every test image: one partition at LBA 2048 with
/// 32 reserved sectors, two FATs of 1024 sectors, and 8-sector clusters.
const PART_LBA: u32 = 2048;
const RESERVED_SECTORS: u32 = 32;
const FAT_SECTORS: u32 = 1024;
const SECTORS_PER_CLUSTER: u32 = 8;
const FAT_LBA: u32 = PART_LBA + RESERVED_SECTORS;
const DATA_LBA: u32 = FAT_LBA + 2 * FAT_SECTORS;
const ROOT_CLUSTER: u32 = 2;
const EOC: u32 = 0x0FFF_FFFF;

/// Enough sectors to cover the clusters the fixtures touch; the BPB claims a
/// much larger partition so the data-cluster count clears the FAT32 minimum.
const IMAGE_SECTORS: usize = 4600;
const CLAIMED_SECTORS: u32 = 600_000;

fn cluster_lba(cluster: u32) -> u32 {
    DATA_LBA + (cluster - 2) * SECTORS_PER_CLUSTER
}

/// Builds FAT32 disk images byte by byte.
struct DiskImage {
    bytes: Vec<u8>,
}

impl DiskImage {
    fn new() -> DiskImage {
        let mut image = DiskImage {
            bytes: vec![0; IMAGE_SECTORS * SECTOR_SIZE],
        };

        // MBR: a single FAT32-LBA partition plus the boot signature.
        image.bytes[446] = 0x00;
        image.bytes[446 + 4] = 0x0C;
        image.write_u32(446 + 8, PART_LBA);
        image.write_u32(446 + 12, CLAIMED_SECTORS);
        image.write_u16(510, 0xAA55);

        // BPB of the partition.
        let bpb = PART_LBA as usize * SECTOR_SIZE;
        image.write_u16(bpb + 11, 512);
        image.bytes[bpb + 13] = SECTORS_PER_CLUSTER as u8;
        image.write_u16(bpb + 14, RESERVED_SECTORS as u16);
        image.bytes[bpb + 16] = 2;
        image.write_u32(bpb + 32, CLAIMED_SECTORS);
        image.write_u32(bpb + 36, FAT_SECTORS);
        image.write_u32(bpb + 44, ROOT_CLUSTER);
        image.write_u16(bpb + 48, 1);
        image.bytes[bpb + 82..bpb + 90].copy_from_slice(b"FAT32   ");
        image.write_u16(bpb + 510, 0xAA55);

        // FSInfo: plenty of free clusters, hint past the fixture range.
        image.set_fsinfo(70_000, 40);

        // FAT: media and reserved entries, then the root chain.
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, EOC);
        image.set_fat(ROOT_CLUSTER, EOC);
        image
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.bytes[offset..offset + 2], value);
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.bytes[offset..offset + 4], value);
    }

    fn set_fat(&mut self, cluster: u32, value: u32) {
        let offset = FAT_LBA as usize * SECTOR_SIZE + cluster as usize * 4;
        self.write_u32(offset, value);
    }

    fn set_fsinfo(&mut self, free_count: u32, next_free: u32) {
        let info = (PART_LBA as usize + 1) * SECTOR_SIZE;
        self.write_u32(info + 488, free_count);
        self.write_u32(info + 492, next_free);
    }

    fn record_offset(cluster: u32, index: usize) -> usize {
        cluster_lba(cluster) as usize * SECTOR_SIZE + index * 32
    }

    /// Writes a short-name record at record `index` of `cluster`.
    fn put_sfn(
        &mut self,
        cluster: u32,
        index: usize,
        name: &[u8; 11],
        attributes: u8,
        first_cluster: u32,
        size: u32,
    ) {
        let offset = Self::record_offset(cluster, index);
        self.bytes[offset..offset + 11].copy_from_slice(name);
        self.bytes[offset + 11] = attributes;
        self.write_u16(offset + 20, (first_cluster >> 16) as u16);
        self.write_u16(offset + 26, first_cluster as u16);
        self.write_u32(offset + 28, size);
    }

    /// Writes the long-name slots for `long_name` starting at record `index`
    /// (last slot first, as on disk) and returns the index where the closing
    /// short-name record belongs.
    fn put_lfn_chain(
        &mut self,
        cluster: u32,
        index: usize,
        long_name: &str,
        sfn: &[u8; 11],
    ) -> usize {
        const UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
        let name = long_name.as_bytes();
        let checksum = sfn_checksum(sfn);
        let count = (name.len() + 12) / 13;
        let mut at = index;
        for slot in (1..=count).rev() {
            let offset = Self::record_offset(cluster, at);
            self.bytes[offset] = slot as u8 | if slot == count { 0x40 } else { 0 };
            self.bytes[offset + 11] = 0x0F;
            self.bytes[offset + 13] = checksum;
            for (i, &unit_offset) in UNIT_OFFSETS.iter().enumerate() {
                let position = 13 * (slot - 1) + i;
                let unit: u16 = if position < name.len() {
                    name[position] as u16
                } else if position == name.len() {
                    0x0000
                } else {
                    0xFFFF
                };
                self.write_u16(offset + unit_offset, unit);
            }
            at += 1;
        }
        at
    }

    /// Places a long-named file: long-name slots, the short record, the FAT
    /// chain, and the file bytes spread across the chain's clusters.
    fn put_file(
        &mut self,
        dir_cluster: u32,
        index: usize,
        long_name: &str,
        sfn: &[u8; 11],
        chain: &[u32],
        data: &[u8],
    ) {
        let at = self.put_lfn_chain(dir_cluster, index, long_name, sfn);
        let first = chain.first().copied().unwrap_or(0);
        self.put_sfn(dir_cluster, at, sfn, 0x20, first, data.len() as u32);
        self.fill_chain(chain, data);
    }

    fn fill_chain(&mut self, chain: &[u32], data: &[u8]) {
        for pair in chain.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&tail) = chain.last() {
            self.set_fat(tail, EOC);
        }
        let cluster_bytes = SECTORS_PER_CLUSTER as usize * SECTOR_SIZE;
        for (i, chunk) in data.chunks(cluster_bytes).enumerate() {
            let offset = cluster_lba(chain[i]) as usize * SECTOR_SIZE;
            self.bytes[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
    }

    fn into_device(self) -> BlockDeviceRef {
        RamDisk::from_bytes(self.bytes).into_ref()
    }
}

fn pattern(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 251) as u8).collect()
}

fn mounted(device: BlockDeviceRef) -> VolumeRegistry {
    let mut registry = VolumeRegistry::new();
    assert_eq!(registry.mount(device), Ok(1));
    registry
}

#[test]
fn mount_computes_the_volume_geometry() {
    let mut image = DiskImage::new();
    image.put_sfn(ROOT_CLUSTER, 0, b"DRIVERDATA ", 0x08, 0, 0);
    let registry = mounted(image.into_device());

    let volume = registry.volume('C').expect("no volume mounted as C:");
    let volume = volume.lock();
    assert_eq!(volume.letter(), 'C');
    assert_eq!(volume.fat_lba(), 2080);
    assert_eq!(volume.data_lba(), 4128);
    assert_eq!(volume.root_lba(), 4128);
    assert_eq!(volume.sector_size(), 512);
    assert_eq!(volume.cluster_size(), 8);
    assert_eq!(volume.label(), b"DRIVERDATA ");
}

#[test]
fn cluster_sector_mapping_round_trips() {
    let registry = mounted(DiskImage::new().into_device());
    let volume = registry.volume('C').unwrap();
    let volume = volume.lock();
    for cluster in 2..60 {
        for sector_offset in 0..SECTORS_PER_CLUSTER {
            let sector = volume.clust_to_sect(cluster) + sector_offset;
            assert_eq!(volume.sect_to_clust(sector), cluster);
        }
    }
}

#[test]
fn disks_without_fat32_mount_no_volumes() {
    // No MBR signature at all.
    let blank = RamDisk::new(64).into_ref();
    let mut registry = VolumeRegistry::new();
    assert_eq!(registry.mount(blank), Err(Error::InconsistentDisk));

    // A valid MBR whose partition holds no recognizable filesystem.
    let mut image = DiskImage::new();
    image.write_u16(PART_LBA as usize * SECTOR_SIZE + 510, 0);
    let mut registry = VolumeRegistry::new();
    assert_eq!(registry.mount(image.into_device()), Ok(0));
    assert!(registry.volume('C').is_none());
}

#[test]
fn resolves_nested_directory_paths() {
    let mut image = DiskImage::new();
    image.put_sfn(ROOT_CLUSTER, 0, b"ALPHA      ", 0x10, 3, 0);
    image.set_fat(3, EOC);
    image.put_sfn(3, 0, b"BETA       ", 0x10, 4, 0);
    image.set_fat(4, EOC);
    let registry = mounted(image.into_device());

    let dir = Dir::open(&registry, "C:/alpha/beta/").unwrap();
    assert_eq!(dir.cluster(), 4);

    assert_eq!(
        Dir::open(&registry, "C:/alpha/gamma/").err(),
        Some(Error::PathError)
    );
    assert_eq!(Dir::open(&registry, "D:/alpha/").err(), Some(Error::NoVolume));
    assert_eq!(Dir::open(&registry, "C").err(), Some(Error::PathError));
}

#[test]
fn reassembles_long_names_across_slots() {
    let mut image = DiskImage::new();
    let sfn = b"HELLO_~1TXT";
    image.put_file(ROOT_CLUSTER, 0, "hello_world.txt", sfn, &[5], b"hello world");
    let registry = mounted(image.into_device());

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    let info = dir.read().unwrap();
    assert_eq!(info.name_length, 15);
    assert_eq!(info.name(), b"hello_world.txt");
    assert_eq!(info.name_str(), "hello_world.txt");
    assert_eq!(info.size, 11);
    assert!(!info.is_directory());
    assert_eq!(dir.read().err(), Some(Error::EndOfFile));
}

#[test]
fn short_only_entries_surface_their_raw_name() {
    let mut image = DiskImage::new();
    image.put_sfn(ROOT_CLUSTER, 0, b"KERNEL  ELF", 0x20, 0, 0);
    let registry = mounted(image.into_device());

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    let info = dir.read().unwrap();
    assert_eq!(info.name_length, 11);
    assert_eq!(info.name(), b"KERNEL  ELF");
}

#[test]
fn seek_and_read_across_the_cluster_chain() {
    let mut image = DiskImage::new();
    let data = pattern(12_288);
    image.put_file(ROOT_CLUSTER, 0, "bigfile.bin", b"BIGFILE BIN", &[3, 6, 10], &data);
    let registry = mounted(image.into_device());

    let mut file = File::open(&registry, "C:/bigfile.bin").unwrap();
    assert_eq!(file.size(), 12_288);

    file.seek(6000).unwrap();
    let mut four = [0u8; 4];
    assert_eq!(file.read(&mut four), Ok(4));
    assert_eq!(four[..], data[6000..6004]);
    assert_eq!(file.cluster(), 6);
    assert_eq!(file.offset(), 6004);

    // A tail read after a seek returns exactly the remainder.
    file.seek(12_000).unwrap();
    let mut tail = vec![0u8; 1000];
    assert_eq!(file.read(&mut tail), Ok(288));
    assert_eq!(tail[..288], data[12_000..]);

    // Seeking to the very end is allowed and reads nothing, even though the
    // file ends exactly on a cluster boundary.
    file.seek(12_288).unwrap();
    let mut one = [0u8; 1];
    assert_eq!(file.read(&mut one), Ok(0));
    assert_eq!(file.seek(12_289).err(), Some(Error::InvalidOffset));

    // The whole file from the start.
    file.seek(0).unwrap();
    let mut whole = vec![0u8; 12_288];
    assert_eq!(file.read(&mut whole), Ok(12_288));
    assert_eq!(whole, data);
}

#[test]
fn reads_stop_short_at_end_of_file() {
    let mut image = DiskImage::new();
    let data = pattern(100);
    image.put_file(ROOT_CLUSTER, 0, "short.txt", b"SHORT   TXT", &[3], &data);
    let registry = mounted(image.into_device());

    let mut file = File::open(&registry, "C:/short.txt").unwrap();
    let mut buffer = [0u8; 200];
    assert_eq!(file.read(&mut buffer), Ok(100));
    assert_eq!(buffer[..100], data[..]);
    assert_eq!(file.offset(), 100);
    assert_eq!(file.read(&mut buffer), Ok(0));
}

#[test]
fn allocation_follows_the_fsinfo_hint() {
    let mut image = DiskImage::new();
    image.set_fsinfo(50, 10);
    for cluster in 11..17 {
        image.set_fat(cluster, EOC);
    }
    // Clusters 10 and 17 stay free.
    let registry = mounted(image.into_device());

    let volume = registry.volume('C').unwrap();
    let mut volume = volume.lock();
    assert_eq!(table::allocate_cluster(&mut volume), Ok(10));
    assert_eq!(
        table::get(&mut volume, 10).map(table::cluster_from_raw),
        Ok(0x0FFF_FFFF)
    );

    let info_lba = (PART_LBA + 1) as usize;
    let info = volume.cache.sector(info_lba).unwrap();
    assert_eq!(LittleEndian::read_u32(&info[492..496]), 17);
    assert_eq!(LittleEndian::read_u32(&info[488..492]), 49);
}

#[test]
fn eject_releases_the_drive_letter() {
    let device = DiskImage::new().into_device();
    let mut registry = VolumeRegistry::new();
    registry.mount(device.clone()).unwrap();
    assert!(registry.volume('C').is_some());

    registry.eject(&device).unwrap();
    assert!(registry.volume('C').is_none());
    assert!(registry.volumes().is_empty());

    // Remounting the same medium reuses the freed letter.
    registry.mount(device).unwrap();
    assert_eq!(registry.volume('C').unwrap().lock().letter(), 'C');
}

#[test]
fn directory_iteration_crosses_clusters() {
    let mut image = DiskImage::new();
    image.put_sfn(ROOT_CLUSTER, 0, b"BIG        ", 0x10, 3, 0);
    image.set_fat(3, 4);
    image.set_fat(4, EOC);
    // A cluster holds 128 records; 140 entries force a chain hop.
    for i in 0..140usize {
        let (cluster, index) = if i < 128 { (3, i) } else { (4, i - 128) };
        let mut name = *b"FILE       ";
        name[4] = b'0' + (i / 100) as u8;
        name[5] = b'0' + (i / 10 % 10) as u8;
        name[6] = b'0' + (i % 10) as u8;
        image.put_sfn(cluster, index, &name, 0x20, 0, 0);
    }
    let registry = mounted(image.into_device());

    let mut dir = Dir::open(&registry, "C:/big/").unwrap();
    let mut seen = 0;
    loop {
        match dir.read() {
            Ok(_) => seen += 1,
            Err(Error::EndOfFile) => break,
            Err(error) => panic!("directory read failed: {:?}", error),
        }
    }
    assert_eq!(seen, 140);
}

#[test]
fn rename_rewrites_records_in_place() {
    let mut image = DiskImage::new();
    image.put_file(ROOT_CLUSTER, 0, "somefile.txt", b"SOMEFI~1TXT", &[3], b"hello");
    let registry = mounted(image.into_device());

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    // Both names occupy one long-name slot plus the short record.
    dir.rename("somefile.txt", "newname.json").unwrap();
    dir.close().unwrap();

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    let info = dir.read().unwrap();
    assert_eq!(info.name(), b"newname.json");
    assert_eq!(info.size, 5);
    assert_eq!(dir.read().err(), Some(Error::EndOfFile));

    // The payload still points at the old data.
    let mut file = File::open(&registry, "C:/newname.json").unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(file.read(&mut buffer), Ok(5));
    assert_eq!(&buffer[..5], b"hello");

    assert_eq!(
        File::open(&registry, "C:/somefile.txt").err(),
        Some(Error::PathError)
    );
}

#[test]
fn rename_claims_a_longer_record_run() {
    let mut image = DiskImage::new();
    image.put_file(ROOT_CLUSTER, 0, "somefile.txt", b"SOMEFI~1TXT", &[3], b"hello");
    let registry = mounted(image.into_device());

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    // 31 characters: three long-name slots plus the short record, which no
    // longer fits the two records the entry occupies.
    dir.rename("somefile.txt", "a_considerably_longer_name.data").unwrap();
    dir.close().unwrap();

    let mut dir = Dir::open(&registry, "C:/").unwrap();
    let info = dir.read().unwrap();
    assert_eq!(info.name(), b"a_considerably_longer_name.data");
    assert_eq!(info.size, 5);
    assert_eq!(dir.read().err(), Some(Error::EndOfFile));

    let mut file = File::open(&registry, "C:/a_considerably_longer_name.data").unwrap();
    let mut buffer = [0u8; 16];
    assert_eq!(file.read(&mut buffer), Ok(5));
    assert_eq!(&buffer[..5], b"hello");
}

#[test]
fn writes_extend_the_file_and_persist_on_close() {
    let mut image = DiskImage::new();
    image.put_file(ROOT_CLUSTER, 0, "grow.txt", b"GROW    TXT", &[3], &pattern(20));
    let registry = mounted(image.into_device());

    let mut file = File::open(&registry, "C:/grow.txt").unwrap();
    file.seek(20).unwrap();
    let written = pattern(5000);
    assert_eq!(file.write(&written), Ok(5000));
    assert_eq!(file.size(), 5020);
    file.close().unwrap();

    let mut file = File::open(&registry, "C:/grow.txt").unwrap();
    assert_eq!(file.size(), 5020);
    file.seek(4000).unwrap();
    let mut readback = vec![0u8; 1020];
    assert_eq!(file.read(&mut readback), Ok(1020));
    assert_eq!(readback[..], written[3980..5000]);

    // The chain grew by one linked cluster from the FSInfo hint.
    let volume = registry.volume('C').unwrap();
    let mut volume = volume.lock();
    assert_eq!(table::next(&mut volume, 3), Ok(Some(40)));
    assert_eq!(table::get(&mut volume, 40).map(table::is_eoc), Ok(true));
}

#[test]
fn writing_an_empty_file_allocates_its_first_cluster() {
    let mut image = DiskImage::new();
    image.put_file(ROOT_CLUSTER, 0, "new.log", b"NEW     LOG", &[], b"");
    let registry = mounted(image.into_device());

    let mut file = File::open(&registry, "C:/new.log").unwrap();
    assert_eq!(file.size(), 0);
    assert_eq!(file.write(b"first line\n"), Ok(11));
    file.close().unwrap();

    let mut file = File::open(&registry, "C:/new.log").unwrap();
    assert_eq!(file.size(), 11);
    assert_eq!(file.cluster(), 40);
    let mut buffer = [0u8; 32];
    assert_eq!(file.read(&mut buffer), Ok(11));
    assert_eq!(&buffer[..11], b"first line\n");
}

#[test]
fn volume_label_can_be_rewritten() {
    let mut image = DiskImage::new();
    image.put_sfn(ROOT_CLUSTER, 0, b"OLDLABEL   ", 0x08, 0, 0);
    let device = image.into_device();
    let registry = mounted(device.clone());

    {
        let volume = registry.volume('C').unwrap();
        let mut volume = volume.lock();
        assert_eq!(volume.label(), b"OLDLABEL   ");
        volume.set_label(b"NEWLABEL").unwrap();
        assert_eq!(volume.label(), b"NEWLABEL   ");
        assert_eq!(volume.set_label(b"TWELVE_BYTES").err(), Some(Error::IllegalArgument));
    }

    // The label survives a remount from the same medium.
    let second = mounted(device);
    assert_eq!(second.volume('C').unwrap().lock().label(), b"NEWLABEL   ");
}

#[test]
fn unsupported_operations_say_so() {
    let registry = mounted(DiskImage::new().into_device());
    assert_eq!(Dir::make(&registry, "C:/newdir/").err(), Some(Error::Unsupported));
    let volume = registry.volume('C').unwrap();
    assert_eq!(volume.lock().format().err(), Some(Error::Unsupported));
}

#[test]
fn default_registry_round_trip() {
    let device = DiskImage::new().into_device();
    crate::mount_disk(device.clone()).unwrap();
    assert!(crate::volume_get('C').is_some());
    assert!(crate::volume_get_first().is_some());
    crate::eject_disk(&device).unwrap();
    assert!(crate::volume_get('C').is_none());
}
