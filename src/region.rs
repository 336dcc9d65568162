//! The Region Mapper: owns the mmap of the shared region and exposes the
//! per-process user base pointer everything else in this crate is
//! addressed relative to.
//!
//! Two backings are supported. A real DAX character device (e.g.
//! `/dev/dax2.0`) is mapped with `MAP_SHARED_VALIDATE | MAP_SYNC` via raw
//! `libc` calls, since that flag combination has no `memmap2` equivalent.
//! Anything else — a regular file, possibly one that doesn't exist yet —
//! falls back to `memmap2::MmapMut`. This lets the whole crate run, and
//! its tests pass, on a machine with no CXL/DAX hardware at all.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::coord::{COMM_SIZE, TABLE_SIZE};
use crate::error::ShmError;

/// Total size of the region this crate maps: the coordination sub-region
/// plus the full bucket-storage arena.
pub const fn region_size() -> u64 {
    COMM_SIZE + TABLE_SIZE
}

enum Backing {
    File(MmapMut),
    Dax { ptr: *mut libc::c_void, len: usize },
}

// SAFETY: the pointer in `Dax` is only ever dereferenced through the
// atomics this crate stores at fixed offsets within it, the same
// contract `MmapMut` upholds for the `File` variant.
unsafe impl Send for Backing {}
unsafe impl Sync for Backing {}

impl Drop for Backing {
    fn drop(&mut self) {
        if let Backing::Dax { ptr, len } = self {
            unsafe {
                libc::munmap(*ptr, *len);
            }
        }
    }
}

/// An attached shared-memory region. Dropping it unmaps the backing;
/// whether the underlying storage (file or DAX device) persists across
/// the drop depends on the backing, not on this struct.
pub struct ShmRegion {
    backing: Backing,
    path: PathBuf,
}

impl ShmRegion {
    /// Map `path`, creating/truncating a regular-file backing to
    /// [`region_size`] if `path` is not a character device. If
    /// `force_init` is set, the mapped bytes are zeroed after mapping.
    pub fn create_or_open(path: &Path, force_init: bool) -> Result<Self, ShmError> {
        let backing = if is_char_device(path) {
            Self::map_dax(path)?
        } else {
            Self::map_file(path)?
        };

        let mut region = ShmRegion {
            backing,
            path: path.to_path_buf(),
        };

        if force_init {
            let base = region.user_base();
            unsafe { std::ptr::write_bytes(base, 0, region_size() as usize) };
        }

        Ok(region)
    }

    fn map_dax(path: &Path) -> Result<Backing, ShmError> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ShmError::RegionMap {
                path: path.to_path_buf(),
                source,
            })?;

        let len = region_size() as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED_VALIDATE | libc::MAP_SYNC,
                file.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::RegionMap {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }

        log::info!("mapped DAX device {} ({} bytes, MAP_SYNC)", path.display(), len);
        Ok(Backing::Dax { ptr, len })
    }

    fn map_file(path: &Path) -> Result<Backing, ShmError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| ShmError::RegionMap {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| ShmError::RegionMap {
                path: path.to_path_buf(),
                source,
            })?;

        file.set_len(region_size()).map_err(|source| ShmError::RegionMap {
            path: path.to_path_buf(),
            source,
        })?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| ShmError::RegionMap {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!(
            "mapped file-backed region {} ({} bytes, no DAX device found)",
            path.display(),
            region_size()
        );
        Ok(Backing::File(mmap))
    }

    /// The per-process base pointer everything else in this crate
    /// computes offsets from. Stable for the lifetime of `self`.
    pub fn user_base(&self) -> *mut u8 {
        match &self.backing {
            Backing::File(m) => m.as_ptr() as *mut u8,
            Backing::Dax { ptr, .. } => *ptr as *mut u8,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_char_device(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_char_device())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_region_round_trips_bytes() {
        let dir = std::env::temp_dir().join(format!("clht_shm_region_test_{}", std::process::id()));
        let path = dir.join("region.data");

        let region = ShmRegion::create_or_open(&path, true).unwrap();
        let base = region.user_base();
        unsafe {
            base.write(0xAB);
            assert_eq!(base.read(), 0xAB);
        }

        drop(region);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn force_init_zeroes_region() {
        let dir = std::env::temp_dir().join(format!("clht_shm_region_test2_{}", std::process::id()));
        let path = dir.join("region.data");

        {
            let region = ShmRegion::create_or_open(&path, true).unwrap();
            unsafe { region.user_base().write(0xFF) };
        }

        let region = ShmRegion::create_or_open(&path, true).unwrap();
        unsafe { assert_eq!(region.user_base().read(), 0) };

        drop(region);
        let _ = fs::remove_dir_all(&dir);
    }
}
