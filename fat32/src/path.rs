//! Drive-letter path resolution: `"L:/seg1/seg2/name.ext"`.

use crate::dir::{self, DirPos};
use crate::registry::VolumeRegistry;
use crate::volume::VolumeRef;
use crate::Error;

/// The outcome of walking a path: the owning volume and a cursor at the
/// resolved directory. `size` is the record size of the last resolved
/// component (zero for the root and for subdirectories).
pub(crate) struct ResolvedPath {
    pub vol: VolumeRef,
    pub pos: DirPos,
    pub size: u32,
}

/// Walks `path` from its drive letter down the directory tree.
///
/// Resolution stops early, successfully, at the first fragment containing a
/// `'.'`: such a fragment names a file, and the returned cursor points at its
/// containing directory for the caller to search. A trailing `'/'` is
/// permitted and ignored.
pub(crate) fn follow_path(registry: &VolumeRegistry, path: &str) -> Result<ResolvedPath, Error> {
    let bytes = path.as_bytes();
    if bytes.len() < 3 {
        return Err(Error::PathError);
    }
    let vol_ref = registry.volume(bytes[0] as char).ok_or(Error::NoVolume)?;
    if bytes[1] != b':' || bytes[2] != b'/' {
        return Err(Error::PathError);
    }

    let mut vol = vol_ref.lock();
    let mut pos = DirPos::at_root(&vol);
    let mut size = 0;

    let mut rest = &bytes[3..];
    loop {
        // Drop separators between fragments.
        while let Some((&b'/', tail)) = rest.split_first() {
            rest = tail;
        }
        if rest.is_empty() {
            break;
        }

        // Scan one fragment; a '.' means the rest of the path names a file
        // and the walk ends at the directory resolved so far.
        let mut length = 0;
        let mut names_file = false;
        for &byte in rest {
            if byte == b'/' {
                break;
            }
            if byte == b'.' {
                names_file = true;
                break;
            }
            length += 1;
        }
        if names_file {
            break;
        }

        let fragment = &rest[..length];
        trace!(
            "resolving path fragment {:?}",
            core::str::from_utf8(fragment).unwrap_or("<non-utf8>")
        );
        dir::search(&mut vol, &mut pos, fragment).map_err(|error| match error {
            Error::NotFound => Error::PathError,
            other => other,
        }).map(|hit| size = hit.size)?;
        rest = &rest[length..];
    }

    drop(vol);
    Ok(ResolvedPath {
        vol: vol_ref,
        pos,
        size,
    })
}

/// Extracts the last path component for [`File::open`](crate::File::open),
/// scanning backward past at most one trailing separator.
pub(crate) fn final_fragment(path: &str) -> Result<&[u8], Error> {
    let bytes = path.as_bytes();
    let mut end = bytes.len();
    if end == 0 {
        return Err(Error::PathError);
    }
    if bytes[end - 1] == b'/' {
        end -= 1;
    }
    let start = bytes[..end]
        .iter()
        .rposition(|&b| b == b'/')
        .map(|slash| slash + 1)
        .ok_or(Error::PathError)?;
    if start >= end {
        return Err(Error::PathError);
    }
    Ok(&bytes[start..end])
}
