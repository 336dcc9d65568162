//! `#[repr(C)]` structures that live in the shared table arena.
//!
//! All structs use fixed-size atomic fields and explicit padding so the
//! layout is identical across compilations and processes, and so a
//! concurrent reader walking a chain never observes a torn field.

use std::sync::atomic::{AtomicU32, AtomicU64};

/// Sentinel key value marking an empty slot. The application must never
/// insert this key.
pub const EMPTY_KEY: u64 = 0;

/// Number of `(key, val)` slots per bucket. Chosen so that
/// `lock + _pad + key[E] + val[E] + next` fills exactly one cache line.
pub const ENTRIES_PER_BUCKET: usize = 3;

/// One bucket: a cache-line-sized record holding a spinlock, a small
/// fixed array of key/value slots, and a link to an optional extension
/// bucket. Lives at a fixed offset inside the primary bucket array or
/// the bump arena (for extension buckets).
#[repr(C)]
pub struct Bucket {
    /// Test-and-set spinlock guarding this bucket and the whole chain
    /// rooted at it. `0` = free, `1` = held.
    pub lock: AtomicU32,
    _pad: u32,
    pub key: [AtomicU64; ENTRIES_PER_BUCKET],
    pub val: [AtomicU64; ENTRIES_PER_BUCKET],
    /// Offset (`shm_off`) of the next bucket in this chain, or
    /// [`crate::offset::SHM_NULL`].
    pub next: AtomicU64,
}

impl Bucket {
    pub const SIZE: usize = std::mem::size_of::<Bucket>();

    /// Zero a freshly-allocated bucket in place: empty keys, free lock,
    /// no extension.
    ///
    /// # Safety
    /// `ptr` must point to at least `Bucket::SIZE` writable bytes.
    pub unsafe fn init_zeroed(ptr: *mut u8) {
        let bucket = &*(ptr as *const Bucket);
        bucket.lock.store(0, std::sync::atomic::Ordering::Relaxed);
        for j in 0..ENTRIES_PER_BUCKET {
            bucket.key[j].store(EMPTY_KEY, std::sync::atomic::Ordering::Relaxed);
            bucket.val[j].store(0, std::sync::atomic::Ordering::Relaxed);
        }
        bucket
            .next
            .store(crate::offset::SHM_NULL, std::sync::atomic::Ordering::Relaxed);
    }
}

// 4 + 4 + 3*8 + 3*8 + 8 = 64: exactly one cache line on every
// architecture this crate targets.
pub const BUCKET_SIZE: usize = 64;
const _: () = assert!(std::mem::size_of::<Bucket>() == BUCKET_SIZE);

/// Hashtable header: locates the primary bucket array and records its
/// size. Immutable after [`crate::hashtable::create`] publishes it.
#[repr(C)]
pub struct HashTableHeader {
    /// Offset of the primary bucket array (`num_buckets` buckets).
    pub table: u64,
    pub num_buckets: u64,
}

pub const HASHTABLE_HEADER_SIZE: usize = std::mem::size_of::<HashTableHeader>();

/// The single top-level handle locating the current hashtable header
/// inside the shared region. One handle per region.
#[repr(C)]
pub struct Handle {
    pub ht: u64,
}

pub const HANDLE_SIZE: usize = std::mem::size_of::<Handle>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_one_cache_line() {
        assert_eq!(Bucket::SIZE, 64);
    }
}
