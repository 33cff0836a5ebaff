//! File cursors: open, read, seek, write, close.

use crate::dir::{self, RawDirEntry};
use crate::path;
use crate::registry::VolumeRegistry;
use crate::table;
use crate::volume::{Volume, VolumeRef};
use crate::Error;

/// An open file on a mounted volume.
///
/// The cursor tracks both a byte offset from the start of the file and the
/// (cluster, sector, in-sector offset) triple it corresponds to, so
/// sequential reads and writes never re-walk the cluster chain.
pub struct File {
    vol: VolumeRef,
    /// First sector of the file; `seek` restarts the chain walk here.
    start_sect: u32,
    sector: u32,
    cluster: u32,
    rw_offset: u32,
    glob_offset: u32,
    size: u32,
    /// Location of the file's directory record, for write-back on close.
    entry_sector: u32,
    entry_offset: u32,
    entry_dirty: bool,
}

impl File {
    /// Opens the file at `path`, e.g. `"C:/logs/boot.txt"`.
    pub fn open(registry: &VolumeRegistry, path: &str) -> Result<File, Error> {
        let resolved = path::follow_path(registry, path)?;
        let fragment = path::final_fragment(path)?;
        let vol_ref = resolved.vol;
        let mut pos = resolved.pos;

        let mut vol = vol_ref.lock();
        let hit = dir::search(&mut vol, &mut pos, fragment).map_err(|error| match error {
            Error::NotFound => Error::PathError,
            other => other,
        })?;
        drop(vol);

        Ok(File {
            vol: vol_ref,
            start_sect: pos.sector,
            sector: pos.sector,
            cluster: pos.cluster,
            rw_offset: 0,
            glob_offset: 0,
            size: hit.size,
            entry_sector: hit.sfn_sector,
            entry_offset: hit.sfn_offset,
            entry_dirty: false,
        })
    }

    /// The file size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The cursor's byte offset from the start of the file.
    pub fn offset(&self) -> u32 {
        self.glob_offset
    }

    /// The cluster the cursor currently sits in.
    pub fn cluster(&self) -> u32 {
        self.cluster
    }

    /// Reads up to `buffer.len()` bytes at the cursor and returns the number
    /// of bytes delivered, which falls short only at end of file.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();

        let mut done = 0;
        while done < buffer.len() && self.glob_offset < self.size {
            self.resolve_position(&mut vol, false)?;
            let sector_size = vol.sector_size as u32;
            let chunk = (buffer.len() - done)
                .min((sector_size - self.rw_offset) as usize)
                .min((self.size - self.glob_offset) as usize);
            let cached = vol.cache.sector(self.sector as usize)?;
            let offset = self.rw_offset as usize;
            buffer[done..done + chunk].copy_from_slice(&cached[offset..offset + chunk]);
            self.rw_offset += chunk as u32;
            self.glob_offset += chunk as u32;
            done += chunk;
        }
        Ok(done)
    }

    /// Writes `buffer` at the cursor, allocating and linking fresh clusters
    /// as the file grows past the end of its chain. The updated size reaches
    /// the directory record on [`close`](Self::close).
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();

        if self.cluster < 2 {
            // A size-zero file carries no cluster until its first write.
            let first = table::allocate_cluster(&mut vol)?;
            self.cluster = first;
            self.start_sect = vol.clust_to_sect(first);
            self.sector = self.start_sect;
            self.rw_offset = 0;
            self.entry_dirty = true;
        }

        let mut done = 0;
        while done < buffer.len() {
            self.resolve_position(&mut vol, true)?;
            let sector_size = vol.sector_size as u32;
            let chunk = (buffer.len() - done).min((sector_size - self.rw_offset) as usize);
            let cached = vol.cache.sector_mut(self.sector as usize)?;
            let offset = self.rw_offset as usize;
            cached[offset..offset + chunk].copy_from_slice(&buffer[done..done + chunk]);
            self.rw_offset += chunk as u32;
            self.glob_offset += chunk as u32;
            done += chunk;
            if self.glob_offset > self.size {
                self.size = self.glob_offset;
                self.entry_dirty = true;
            }
        }
        Ok(done)
    }

    /// Moves the cursor to `offset` bytes from the start of the file.
    ///
    /// The cluster chain is re-walked from the first cluster. Offsets beyond
    /// the file size fail with `InvalidOffset`; seeking to exactly the size
    /// is allowed and positions the cursor for appending.
    pub fn seek(&mut self, offset: u32) -> Result<(), Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();

        if offset > self.size {
            return Err(Error::InvalidOffset);
        }
        let sector_size = vol.sector_size as u32;
        let cluster_size = vol.cluster_size as u32;
        let cluster_bytes = sector_size * cluster_size;

        // Seeking to the exact end of the last cluster must not walk off the
        // chain; aim at the final byte instead and keep the extra step in the
        // in-sector offset.
        let boundary_end = offset != 0 && offset == self.size && offset % cluster_bytes == 0;
        let target = if boundary_end { offset - 1 } else { offset };

        self.cluster = vol.sect_to_clust(self.start_sect);
        let mut sector_offset = target / sector_size;
        let mut cluster_offset = sector_offset / cluster_size;
        sector_offset %= cluster_size;

        while cluster_offset > 0 {
            match table::next(&mut vol, self.cluster)? {
                Some(next) => self.cluster = next,
                None => return Err(Error::EndOfFile),
            }
            cluster_offset -= 1;
        }

        self.sector = vol.clust_to_sect(self.cluster) + sector_offset;
        self.rw_offset = if boundary_end {
            sector_size
        } else {
            offset % sector_size
        };
        self.glob_offset = offset;
        Ok(())
    }

    /// Writes the size (and first cluster) back into the directory record if
    /// they changed, then flushes the cache. Consumes the cursor.
    pub fn close(self) -> Result<(), Error> {
        let vol = self.vol.clone();
        let mut vol = vol.lock();
        if self.entry_dirty {
            let mut raw = RawDirEntry::read_at(&mut vol, self.entry_sector, self.entry_offset as usize)?;
            raw.set_size(self.size);
            raw.set_cluster(vol.sect_to_clust(self.start_sect));
            raw.write_at(&mut vol, self.entry_sector, self.entry_offset as usize)?;
        }
        vol.cache.flush()?;
        Ok(())
    }

    /// Resolves a cursor that has run past its sector, hopping to the next
    /// sector or chain link. With `grow` set, an end-of-chain is extended
    /// with a fresh cluster instead of reported.
    fn resolve_position(&mut self, vol: &mut Volume, grow: bool) -> Result<(), Error> {
        if self.rw_offset >= vol.sector_size as u32 {
            self.rw_offset -= vol.sector_size as u32;
            self.sector += 1;
            if self.sector >= vol.clust_to_sect(self.cluster) + vol.cluster_size as u32 {
                let next = match table::next(vol, self.cluster)? {
                    Some(next) => next,
                    None if grow => table::extend_chain(vol, self.cluster)?,
                    None => return Err(Error::EndOfFile),
                };
                self.cluster = next;
                self.sector = vol.clust_to_sect(next);
            }
        }
        Ok(())
    }
}
