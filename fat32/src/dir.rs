//! The directory engine: raw 32-byte records, long-file-name assembly,
//! iteration, search, and renaming.
//!
//! A directory is a cluster chain of 32-byte records. A record's first byte
//! tells its state (`0x00` end of directory, `0xE5` deleted, `0x05` a name
//! starting with a literal `0xE5`, anything else in use), and a record whose
//! attribute byte carries all four of `READ_ONLY | HIDDEN | SYSTEM |
//! VOLUME_ID` is one slot of a long file name rather than a real entry.
//! Long-name slots precede their short-name record in reverse order and are
//! tied to it by a checksum over the 11 short-name bytes.

use alloc::vec::Vec;

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::path;
use crate::registry::VolumeRegistry;
use crate::table;
use crate::volume::{Volume, VolumeRef};
use crate::Error;

/// Directory records are 32 bytes.
pub(crate) const ENTRY_SIZE: u32 = 32;
/// Byte offset of the attribute field inside a record.
pub(crate) const ATTR_OFFSET: usize = 11;

/// First-byte markers.
const ENTRY_END: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;
/// Lead byte standing in for a literal `0xE5` in a short name.
const ENTRY_E5_SUBSTITUTE: u8 = 0x05;

/// Long-name sequence byte: bit 6 flags the last slot of a chain, the low
/// five bits are the 1-based slot index.
const LFN_LAST_SLOT: u8 = 0x40;
const LFN_INDEX_MASK: u8 = 0x1F;
/// UCS-2 code units per long-name slot.
const LFN_SLOT_CHARS: usize = 13;
/// Longest representable long name.
const NAME_MAX: usize = 255;

bitflags! {
    /// The attribute byte of a directory record.
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        /// The four low bits together mark a long-file-name slot.
        const LFN = Self::READ_ONLY.bits | Self::HIDDEN.bits
                  | Self::SYSTEM.bits | Self::VOLUME_ID.bits;
    }
}

fn is_lfn(attribute: u8) -> bool {
    let lfn = FileAttributes::LFN.bits();
    attribute & lfn == lfn
}

/// A raw 32-byte directory record holding a short name, as it exists on disk.
#[derive(Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub(crate) struct RawDirEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub nt_reserved: u8,
    pub creation_time_tenths: u8,
    pub creation_time: U16<LittleEndian>,
    pub creation_date: U16<LittleEndian>,
    pub access_date: U16<LittleEndian>,
    pub cluster_high: U16<LittleEndian>,
    pub write_time: U16<LittleEndian>,
    pub write_date: U16<LittleEndian>,
    pub cluster_low: U16<LittleEndian>,
    pub size: U32<LittleEndian>,
}

impl RawDirEntry {
    /// The entry's first cluster, assembled from its two halves.
    pub fn cluster(&self) -> u32 {
        (self.cluster_high.get() as u32) << 16 | self.cluster_low.get() as u32
    }

    pub fn set_cluster(&mut self, cluster: u32) {
        self.cluster_high = U16::new((cluster >> 16) as u16);
        self.cluster_low = U16::new(cluster as u16);
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = U32::new(size);
    }

    pub fn read_at(vol: &mut Volume, sector: u32, offset: usize) -> Result<RawDirEntry, Error> {
        let buffer = vol.cache.sector(sector as usize)?;
        RawDirEntry::read_from(&buffer[offset..offset + ENTRY_SIZE as usize])
            .ok_or(Error::InternalError)
    }

    pub fn write_at(&self, vol: &mut Volume, sector: u32, offset: usize) -> Result<(), Error> {
        let buffer = vol.cache.sector_mut(sector as usize)?;
        buffer[offset..offset + ENTRY_SIZE as usize].copy_from_slice(self.as_bytes());
        Ok(())
    }
}

/// A raw 32-byte record reinterpreted as one long-file-name slot.
#[derive(Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub(crate) struct RawLfnEntry {
    pub sequence: u8,
    name1: [U16<LittleEndian>; 5],
    pub attributes: u8,
    kind: u8,
    pub checksum: u8,
    name2: [U16<LittleEndian>; 6],
    first_cluster: U16<LittleEndian>,
    name3: [U16<LittleEndian>; 2],
}

impl RawLfnEntry {
    fn new(sequence: u8, units: [u16; LFN_SLOT_CHARS], checksum: u8) -> RawLfnEntry {
        let mut entry = RawLfnEntry {
            sequence,
            name1: [U16::new(0); 5],
            attributes: FileAttributes::LFN.bits(),
            kind: 0,
            checksum,
            name2: [U16::new(0); 6],
            first_cluster: U16::new(0),
            name3: [U16::new(0); 2],
        };
        for i in 0..5 {
            entry.name1[i] = U16::new(units[i]);
        }
        for i in 0..6 {
            entry.name2[i] = U16::new(units[5 + i]);
        }
        for i in 0..2 {
            entry.name3[i] = U16::new(units[11 + i]);
        }
        entry
    }

    /// 1-based index of this slot within its chain.
    fn slot_index(&self) -> usize {
        (self.sequence & LFN_INDEX_MASK) as usize
    }

    /// The 13 UCS-2 code units, in name order.
    fn units(&self) -> [u16; LFN_SLOT_CHARS] {
        let mut units = [0u16; LFN_SLOT_CHARS];
        let parts = self
            .name1
            .iter()
            .chain(self.name2.iter())
            .chain(self.name3.iter());
        for (unit, part) in units.iter_mut().zip(parts) {
            *unit = part.get();
        }
        units
    }

    pub fn read_at(vol: &mut Volume, sector: u32, offset: usize) -> Result<RawLfnEntry, Error> {
        let buffer = vol.cache.sector(sector as usize)?;
        RawLfnEntry::read_from(&buffer[offset..offset + ENTRY_SIZE as usize])
            .ok_or(Error::InternalError)
    }

    pub fn write_at(&self, vol: &mut Volume, sector: u32, offset: usize) -> Result<(), Error> {
        let buffer = vol.cache.sector_mut(sector as usize)?;
        buffer[offset..offset + ENTRY_SIZE as usize].copy_from_slice(self.as_bytes());
        Ok(())
    }
}

/// Short-name checksum stored in every long-name slot tied to it:
/// rotate right one bit, add the next name byte, eleven times.
pub(crate) fn sfn_checksum(name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &byte in name {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
    }
    sum
}

/// How many directory records a name of `length` bytes occupies: one for a
/// short-only name, otherwise one per 13-character slot plus the short record.
pub(crate) fn entries_required(length: usize) -> usize {
    if length <= 8 {
        1
    } else {
        (length + LFN_SLOT_CHARS - 1) / LFN_SLOT_CHARS + 1
    }
}

/// A position inside a directory's cluster chain, pointing at one record.
#[derive(Clone, Copy)]
pub(crate) struct DirPos {
    /// First sector of the directory; where searches rewind to.
    pub start_sect: u32,
    pub sector: u32,
    pub cluster: u32,
    pub rw_offset: u32,
    /// Set once the walk has stepped off the end of the chain.
    pub exhausted: bool,
}

impl DirPos {
    pub fn at_root(vol: &Volume) -> DirPos {
        DirPos::at_sector(vol, vol.root_lba)
    }

    pub fn at_sector(vol: &Volume, sector: u32) -> DirPos {
        DirPos {
            start_sect: sector,
            sector,
            cluster: vol.sect_to_clust(sector),
            rw_offset: 0,
            exhausted: false,
        }
    }

    pub fn rewind(&mut self, vol: &Volume) {
        self.sector = self.start_sect;
        self.cluster = vol.sect_to_clust(self.start_sect);
        self.rw_offset = 0;
        self.exhausted = false;
    }

    /// Steps to the next record, following the FAT chain across cluster
    /// boundaries. Returns `false` (and flags the cursor exhausted) when the
    /// chain ends.
    pub fn advance(&mut self, vol: &mut Volume) -> Result<bool, Error> {
        self.rw_offset += ENTRY_SIZE;
        if self.rw_offset >= vol.sector_size as u32 {
            self.rw_offset -= vol.sector_size as u32;
            self.sector += 1;
            if self.sector >= vol.clust_to_sect(self.cluster) + vol.cluster_size as u32 {
                match table::next(vol, self.cluster)? {
                    Some(next) => {
                        self.cluster = next;
                        self.sector = vol.clust_to_sect(next);
                    }
                    None => {
                        self.exhausted = true;
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Repoints the cursor at the first record of `cluster`; used after
    /// extending a directory whose chain ran out mid-walk.
    pub fn enter_cluster(&mut self, vol: &Volume, cluster: u32) {
        self.cluster = cluster;
        self.sector = vol.clust_to_sect(cluster);
        self.rw_offset = 0;
        self.exhausted = false;
    }
}

/// One directory entry as returned by [`Dir::read`].
#[derive(Clone)]
pub struct Info {
    /// The entry's name: the assembled long name when long-name slots
    /// precede the record, otherwise the raw space-padded 8.3 short name.
    pub name: [u8; 255],
    pub name_length: u8,
    pub attributes: FileAttributes,
    pub size: u32,
    /// Packed FAT date/time words, as stored on disk.
    pub creation_time_tenths: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
}

impl Info {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_length as usize]
    }

    /// The name as UTF-8. Names outside ASCII come back empty.
    pub fn name_str(&self) -> &str {
        core::str::from_utf8(self.name()).unwrap_or("")
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

impl Default for Info {
    fn default() -> Info {
        Info {
            name: [0; 255],
            name_length: 0,
            attributes: FileAttributes::empty(),
            size: 0,
            creation_time_tenths: 0,
            creation_time: 0,
            creation_date: 0,
            access_date: 0,
            write_time: 0,
            write_date: 0,
        }
    }
}

/// Accumulates long-name slots until the closing short-name record arrives.
struct LfnAssembly {
    name: [u8; NAME_MAX],
    length: u8,
    checksum: u8,
    seen: bool,
}

impl LfnAssembly {
    fn new() -> LfnAssembly {
        LfnAssembly {
            name: [0; NAME_MAX],
            length: 0,
            checksum: 0,
            seen: false,
        }
    }

    /// Folds one slot into the name buffer. Slots arrive in reverse order;
    /// the sequence index places each slot's 13 characters.
    fn absorb(&mut self, slot: &RawLfnEntry) {
        let index = slot.slot_index();
        if index == 0 {
            return;
        }
        let name_offset = LFN_SLOT_CHARS * (index - 1);
        let units = slot.units();
        for (i, &unit) in units.iter().enumerate() {
            let byte = (unit & 0x00FF) as u8;
            if byte == 0x00 || byte == 0xFF {
                continue;
            }
            if name_offset + i < NAME_MAX {
                self.name[name_offset + i] = byte;
                self.length = self.length.saturating_add(1);
            }
        }
        self.checksum = slot.checksum;
        self.seen = true;
    }
}

/// Reads the first byte and the attribute byte of the record at `pos`.
fn peek(vol: &mut Volume, pos: &DirPos) -> Result<(u8, u8), Error> {
    let buffer = vol.cache.sector(pos.sector as usize)?;
    let offset = pos.rw_offset as usize;
    Ok((buffer[offset], buffer[offset + ATTR_OFFSET]))
}

/// Reads the next entry at `pos`, assembling long-name slots along the way,
/// and leaves the cursor past the entry's short-name record.
pub(crate) fn read_entry(vol: &mut Volume, pos: &mut DirPos) -> Result<Info, Error> {
    let mut lfn = LfnAssembly::new();
    loop {
        if pos.exhausted {
            return Err(Error::EndOfFile);
        }
        let (first, attribute) = peek(vol, pos)?;
        if first == ENTRY_END {
            return Err(Error::EndOfFile);
        }
        if first != ENTRY_DELETED && first != ENTRY_E5_SUBSTITUTE {
            if is_lfn(attribute) {
                let slot = RawLfnEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                lfn.absorb(&slot);
            } else {
                let raw = RawDirEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                let mut info = Info::default();
                if lfn.seen {
                    if lfn.checksum != sfn_checksum(&raw.name) {
                        warn!("long-name chain checksum does not match its short-name record");
                        return Err(Error::InconsistentDisk);
                    }
                    info.name = lfn.name;
                    info.name_length = lfn.length;
                } else {
                    info.name[..11].copy_from_slice(&raw.name);
                    info.name_length = 11;
                }
                info.attributes = FileAttributes::from_bits_truncate(raw.attributes);
                info.size = raw.size.get();
                info.creation_time_tenths = raw.creation_time_tenths;
                info.creation_time = raw.creation_time.get();
                info.creation_date = raw.creation_date.get();
                info.access_date = raw.access_date.get();
                info.write_time = raw.write_time.get();
                info.write_date = raw.write_date.get();
                // The chain may end right behind this record; the cursor then
                // stays exhausted and the next read reports end-of-directory.
                pos.advance(vol)?;
                return Ok(info);
            }
        }
        if !pos.advance(vol)? {
            return Err(Error::EndOfFile);
        }
    }
}

/// Where a search found its match.
pub(crate) struct SearchHit {
    /// Location of the matched short-name record.
    pub sfn_sector: u32,
    pub sfn_offset: u32,
    /// Size field of the matched record.
    pub size: u32,
}

/// Searches the directory at `pos` for `name` and, on a match, repoints the
/// cursor into the matched entry: its first cluster becomes the cursor's new
/// chain start. The search always begins at the directory's first record.
pub(crate) fn search(vol: &mut Volume, pos: &mut DirPos, name: &[u8]) -> Result<SearchHit, Error> {
    if pos.sector != pos.start_sect || pos.rw_offset != 0 || pos.exhausted {
        pos.rewind(vol);
    }

    let mut lfn_checksum = 0u8;
    let mut lfn_seen = false;
    let mut lfn_match = true;

    loop {
        let (first, attribute) = peek(vol, pos)?;
        if first == ENTRY_END {
            return Err(Error::NotFound);
        }
        if first != ENTRY_DELETED && first != ENTRY_E5_SUBSTITUTE {
            if is_lfn(attribute) {
                let slot = RawLfnEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                if !lfn_slot_matches(&slot, name) {
                    lfn_match = false;
                }
                lfn_checksum = slot.checksum;
                lfn_seen = true;
            } else {
                let raw = RawDirEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                let matched = if lfn_seen && lfn_match {
                    lfn_checksum == sfn_checksum(&raw.name)
                } else {
                    sfn_compare(&raw.name, name)
                };
                if matched {
                    let hit = SearchHit {
                        sfn_sector: pos.sector,
                        sfn_offset: pos.rw_offset,
                        size: raw.size.get(),
                    };
                    let cluster = raw.cluster();
                    pos.cluster = cluster;
                    pos.sector = vol.clust_to_sect(cluster);
                    pos.start_sect = pos.sector;
                    pos.rw_offset = 0;
                    pos.exhausted = false;
                    return Ok(hit);
                }
                lfn_seen = false;
                lfn_match = true;
                lfn_checksum = 0;
            }
        }
        if !pos.advance(vol)? {
            return Err(Error::NotFound);
        }
    }
}

/// Compares one long-name slot against its 13-byte window of `name`.
/// The first terminator or padding unit ends the comparison.
fn lfn_slot_matches(slot: &RawLfnEntry, name: &[u8]) -> bool {
    let index = slot.slot_index();
    if index == 0 {
        return false;
    }
    let name_offset = LFN_SLOT_CHARS * (index - 1);
    let units = slot.units();
    for (i, &unit) in units.iter().enumerate() {
        let byte = (unit & 0x00FF) as u8;
        if byte == 0x00 || byte == 0xFF {
            break;
        }
        match name.get(name_offset + i) {
            Some(&expected) if expected == byte => {}
            _ => return false,
        }
    }
    true
}

/// Case-insensitive comparison of `name` against the first eight bytes of a
/// short name. Dots and extensions are deliberately not interpreted; files
/// are matched through their long-name slots instead.
fn sfn_compare(sfn: &[u8; 11], name: &[u8]) -> bool {
    if name.is_empty() {
        return false;
    }
    let length = core::cmp::min(name.len(), 8);
    for i in 0..length {
        if name[i].to_ascii_uppercase() != sfn[i] {
            return false;
        }
    }
    true
}

/// The on-disk geometry of one named entry: where its record chain starts,
/// where its short-name record sits, and how many records it occupies.
struct EntryChain {
    first: DirPos,
    sfn_sector: u32,
    sfn_offset: u32,
    present: usize,
    raw: RawDirEntry,
}

/// Locates `name` in the directory starting at `start` without descending
/// into the match.
fn find_entry_chain(vol: &mut Volume, start: &DirPos, name: &[u8]) -> Result<EntryChain, Error> {
    let mut pos = *start;
    pos.rewind(vol);

    let mut lfn_checksum = 0u8;
    let mut lfn_seen = false;
    let mut lfn_match = true;
    let mut chain_first = pos;
    let mut chain_slots = 0usize;

    loop {
        let (first, attribute) = peek(vol, &pos)?;
        if first == ENTRY_END {
            return Err(Error::NotFound);
        }
        if first != ENTRY_DELETED && first != ENTRY_E5_SUBSTITUTE {
            if is_lfn(attribute) {
                let slot = RawLfnEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                if !lfn_seen {
                    // The first slot on disk is the last of the chain and
                    // carries the slot count in its sequence index.
                    chain_first = pos;
                    chain_slots = slot.slot_index();
                }
                if !lfn_slot_matches(&slot, name) {
                    lfn_match = false;
                }
                lfn_checksum = slot.checksum;
                lfn_seen = true;
            } else {
                let raw = RawDirEntry::read_at(vol, pos.sector, pos.rw_offset as usize)?;
                let matched = if lfn_seen && lfn_match {
                    lfn_checksum == sfn_checksum(&raw.name)
                } else {
                    sfn_compare(&raw.name, name)
                };
                if matched {
                    let (first_pos, present) = if lfn_seen {
                        (chain_first, chain_slots + 1)
                    } else {
                        (pos, 1)
                    };
                    return Ok(EntryChain {
                        first: first_pos,
                        sfn_sector: pos.sector,
                        sfn_offset: pos.rw_offset,
                        present,
                        raw,
                    });
                }
                lfn_seen = false;
                lfn_match = true;
                lfn_checksum = 0;
            }
        }
        if !pos.advance(vol)? {
            return Err(Error::NotFound);
        }
    }
}

/// Renames the entry called `name` to `new_name`.
///
/// When the new record chain fits the records the entry already occupies, it
/// is rewritten in place (surplus leading records are marked deleted). When
/// it does not, a contiguous run of unused records is claimed elsewhere in
/// the directory, extending the directory by one zeroed cluster if its chain
/// runs out, and the old records are then retired.
///
/// Returns the position of the renamed entry's first record.
pub(crate) fn rename_entry(
    vol: &mut Volume,
    dir_start: &DirPos,
    name: &[u8],
    new_name: &[u8],
) -> Result<DirPos, Error> {
    if new_name.is_empty()
        || new_name.len() > NAME_MAX
        || new_name.iter().any(|&b| b == b'/' || b == b'\\' || b == b':')
    {
        return Err(Error::IllegalArgument);
    }

    let chain = find_entry_chain(vol, dir_start, name)?;
    let required = entries_required(new_name.len());

    let sfn = derive_sfn(new_name);
    let checksum = sfn_checksum(&sfn);
    let mut raw = chain.raw.clone();
    raw.name = sfn;
    let slots = if required > 1 {
        build_lfn_slots(new_name, checksum)
    } else {
        Vec::new()
    };

    debug!(
        "rename: {} record(s) present, {} required",
        chain.present, required
    );

    if required <= chain.present {
        let mut pos = chain.first;
        for _ in 0..chain.present - required {
            mark_deleted(vol, &pos)?;
            step_within_chain(vol, &mut pos)?;
        }
        let start = pos;
        write_chain(vol, &mut pos, &slots, &raw)?;
        vol.cache.flush()?;
        Ok(start)
    } else {
        let mut run = claim_free_run(vol, dir_start, required)?;
        let start = run;
        write_chain(vol, &mut run, &slots, &raw)?;
        let mut pos = chain.first;
        for record in 0..chain.present {
            mark_deleted(vol, &pos)?;
            if record + 1 < chain.present {
                step_within_chain(vol, &mut pos)?;
            }
        }
        vol.cache.flush()?;
        Ok(start)
    }
}

/// Finds (or creates, by extending the directory) a contiguous run of
/// `required` unused records; deleted records and end-marker records both
/// count as unused. Returns the position of the run's first record.
fn claim_free_run(vol: &mut Volume, dir_start: &DirPos, required: usize) -> Result<DirPos, Error> {
    let mut pos = *dir_start;
    pos.rewind(vol);

    let mut run_start: Option<DirPos> = None;
    let mut run_length = 0usize;
    loop {
        let (first, _) = peek(vol, &pos)?;
        if first == ENTRY_END || first == ENTRY_DELETED {
            if run_start.is_none() {
                run_start = Some(pos);
                run_length = 0;
            }
            run_length += 1;
            if run_length == required {
                return run_start.ok_or(Error::InternalError);
            }
        } else {
            run_start = None;
            run_length = 0;
        }
        if !pos.advance(vol)? {
            let new_cluster = table::extend_chain(vol, pos.cluster)?;
            zero_cluster(vol, new_cluster)?;
            pos.enter_cluster(vol, new_cluster);
        }
    }
}

/// Writes the long-name slots and the closing short-name record starting at
/// `pos`, leaving `pos` at the short-name record.
fn write_chain(
    vol: &mut Volume,
    pos: &mut DirPos,
    slots: &[RawLfnEntry],
    sfn: &RawDirEntry,
) -> Result<(), Error> {
    for slot in slots {
        slot.write_at(vol, pos.sector, pos.rw_offset as usize)?;
        step_within_chain(vol, pos)?;
    }
    sfn.write_at(vol, pos.sector, pos.rw_offset as usize)
}

/// Advances one record within a run that is known to continue.
fn step_within_chain(vol: &mut Volume, pos: &mut DirPos) -> Result<(), Error> {
    if pos.advance(vol)? {
        Ok(())
    } else {
        Err(Error::InconsistentDisk)
    }
}

fn mark_deleted(vol: &mut Volume, pos: &DirPos) -> Result<(), Error> {
    let buffer = vol.cache.sector_mut(pos.sector as usize)?;
    buffer[pos.rw_offset as usize] = ENTRY_DELETED;
    Ok(())
}

/// Fills every record of `cluster` with the end-of-directory marker.
fn zero_cluster(vol: &mut Volume, cluster: u32) -> Result<(), Error> {
    let first_sector = vol.clust_to_sect(cluster);
    for s in 0..vol.cluster_size as u32 {
        let buffer = vol.cache.sector_mut((first_sector + s) as usize)?;
        buffer.fill(0);
    }
    Ok(())
}

/// Derives a space-padded uppercase 8.3 short name from `name`.
/// No `~n` alias uniquification is attempted.
fn derive_sfn(name: &[u8]) -> [u8; 11] {
    let mut sfn = [b' '; 11];
    let (base, extension) = match name.iter().rposition(|&b| b == b'.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot + 1..]),
        _ => (name, &name[0..0]),
    };
    for (i, &byte) in base.iter().take(8).enumerate() {
        sfn[i] = byte.to_ascii_uppercase();
    }
    for (i, &byte) in extension.iter().take(3).enumerate() {
        sfn[8 + i] = byte.to_ascii_uppercase();
    }
    sfn
}

/// Builds the on-disk long-name slots for `name`, in disk order
/// (the last slot of the chain comes first and carries the chain flag).
fn build_lfn_slots(name: &[u8], checksum: u8) -> Vec<RawLfnEntry> {
    let count = (name.len() + LFN_SLOT_CHARS - 1) / LFN_SLOT_CHARS;
    let mut slots = Vec::with_capacity(count);
    for index in (1..=count).rev() {
        let start = LFN_SLOT_CHARS * (index - 1);
        let mut units = [0u16; LFN_SLOT_CHARS];
        for (i, unit) in units.iter_mut().enumerate() {
            let at = start + i;
            *unit = if at < name.len() {
                name[at] as u16
            } else if at == name.len() {
                0x0000
            } else {
                0xFFFF
            };
        }
        let mut sequence = index as u8;
        if index == count {
            sequence |= LFN_LAST_SLOT;
        }
        slots.push(RawLfnEntry::new(sequence, units, checksum));
    }
    slots
}

/// A cursor over one directory of a mounted volume.
pub struct Dir {
    vol: VolumeRef,
    pos: DirPos,
    size: u32,
}

impl Dir {
    /// Opens the directory at `path`, e.g. `"C:/logs/"` or `"C:/"`.
    pub fn open(registry: &VolumeRegistry, path: &str) -> Result<Dir, Error> {
        let resolved = path::follow_path(registry, path)?;
        Ok(Dir {
            vol: resolved.vol,
            pos: resolved.pos,
            size: resolved.size,
        })
    }

    /// The first cluster of this directory.
    pub fn cluster(&self) -> u32 {
        self.pos.cluster
    }

    /// The size recorded for this directory's own record; zero for the root.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the next entry, or `Err(EndOfFile)` past the last one.
    pub fn read(&mut self) -> Result<Info, Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();
        read_entry(&mut vol, &mut self.pos)
    }

    /// Rewinds the cursor to the directory's first entry.
    pub fn rewind(&mut self) {
        let vol = self.vol.clone();
        let vol = vol.lock();
        self.pos.rewind(&vol);
    }

    /// Renames the entry called `name` to `new_name` and leaves the cursor at
    /// the renamed entry's first record.
    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();
        let renamed = rename_entry(&mut vol, &self.pos, name.as_bytes(), new_name.as_bytes())?;
        self.pos = renamed;
        Ok(())
    }

    /// Creating directories is not implemented.
    pub fn make(_registry: &VolumeRegistry, _path: &str) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Flushes the volume cache and consumes the cursor.
    pub fn close(self) -> Result<(), Error> {
        let mut vol = self.vol.lock();
        vol.cache.flush()?;
        Ok(())
    }
}
