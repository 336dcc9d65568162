//! CLHT-LB-NO-RESIZE: the bucketed, chained, lock-per-bucket hash table.
//!
//! All operations address shared bytes through `base` + offsets (never
//! raw pointers baked into the table itself), per [`crate::offset`].

use std::sync::atomic::Ordering;

use crate::bump::TableAllocator;
use crate::error::ShmError;
use crate::layout::{Bucket, HashTableHeader, EMPTY_KEY, ENTRIES_PER_BUCKET, HASHTABLE_HEADER_SIZE};
use crate::lock::BucketLock;
use crate::offset::{to_off, to_ptr, SHM_NULL};

/// Create a new hashtable with `num_buckets` primary buckets (required to
/// be a nonzero power of two), returning the offset of its header.
///
/// The header and primary bucket array are both served from the bump
/// allocator: a separate small-object allocator path would be observably
/// identical from here down, so only one is implemented.
pub fn create(base: *mut u8, allocator: &TableAllocator, num_buckets: u64) -> Result<u64, ShmError> {
    if num_buckets == 0 || !num_buckets.is_power_of_two() {
        return Err(ShmError::InvalidBucketCount(num_buckets));
    }

    let table_off = allocator.alloc(num_buckets * Bucket::SIZE as u64);
    unsafe {
        for i in 0..num_buckets {
            let ptr = to_ptr(base, table_off + i * Bucket::SIZE as u64);
            Bucket::init_zeroed(ptr);
        }
    }

    let header_off = allocator.alloc(HASHTABLE_HEADER_SIZE as u64);
    unsafe {
        let header_ptr = to_ptr(base, header_off) as *mut HashTableHeader;
        (*header_ptr).table = table_off;
        (*header_ptr).num_buckets = num_buckets;
    }

    Ok(header_off)
}

/// `bin(key) = key & (num_buckets - 1)`. Depends on `num_buckets` being a
/// power of two; a Jenkins 64-bit mix is not used on this path.
#[inline]
pub fn bin(num_buckets: u64, key: u64) -> u64 {
    key & (num_buckets - 1)
}

/// # Safety
/// `base` must be the current process's mapped user base, and
/// `ht_header_off` must be a valid offset of a [`HashTableHeader`]
/// previously returned by [`create`].
unsafe fn header<'a>(base: *mut u8, ht_header_off: u64) -> &'a HashTableHeader {
    &*(to_ptr(base, ht_header_off) as *const HashTableHeader)
}

/// # Safety
/// Same as [`header`]; `bin_idx` must be `< num_buckets`.
unsafe fn head_bucket<'a>(base: *mut u8, h: &HashTableHeader, bin_idx: u64) -> &'a Bucket {
    let ptr = to_ptr(base, h.table).add(bin_idx as usize * Bucket::SIZE);
    &*(ptr as *const Bucket)
}

/// # Safety
/// `off` must be a valid, non-null bucket offset within the current
/// process's mapped region.
unsafe fn bucket_at<'a>(base: *mut u8, off: u64) -> &'a Bucket {
    &*(to_ptr(base, off) as *const Bucket)
}

/// Lock-free read. Returns `0` both when `key` is absent and
/// when a concurrent writer raced the read mid-binding — callers needing
/// to distinguish the two must retry or exclude `0` from their value
/// domain.
///
/// # Safety
/// Same as [`header`].
pub unsafe fn get(base: *mut u8, ht_header_off: u64, key: u64) -> u64 {
    let h = header(base, ht_header_off);
    let bin_idx = bin(h.num_buckets, key);
    let mut bucket = head_bucket(base, h, bin_idx);

    loop {
        for j in 0..ENTRIES_PER_BUCKET {
            let val_s = bucket.val[j].load(Ordering::Relaxed);
            let k = bucket.key[j].load(Ordering::Acquire);
            if k == key {
                let val_s2 = bucket.val[j].load(Ordering::Relaxed);
                return if val_s2 == val_s { val_s } else { 0 };
            }
        }

        let next_off = bucket.next.load(Ordering::Acquire);
        if next_off == SHM_NULL {
            return 0;
        }
        bucket = bucket_at(base, next_off);
    }
}

/// Insert `(key, val)`. Returns `true` if inserted, `false` if
/// `key` already exists (no update of an existing binding).
///
/// # Safety
/// Same as [`header`]; `allocator` must carve offsets from the same
/// region `base` points into.
pub unsafe fn put(base: *mut u8, allocator: &TableAllocator, ht_header_off: u64, key: u64, val: u64) -> bool {
    let h = header(base, ht_header_off);
    let bin_idx = bin(h.num_buckets, key);
    let head = head_bucket(base, h, bin_idx);

    let lock = BucketLock::new(&head.lock);
    lock.acquire();

    let mut bucket = head;
    let mut empty_slot: Option<(&Bucket, usize)> = None;

    loop {
        for j in 0..ENTRIES_PER_BUCKET {
            let k = bucket.key[j].load(Ordering::Relaxed);
            if k == key {
                lock.release();
                return false;
            } else if empty_slot.is_none() && k == EMPTY_KEY {
                empty_slot = Some((bucket, j));
            }
        }

        let next_off = bucket.next.load(Ordering::Relaxed);
        if next_off == SHM_NULL {
            break;
        }
        bucket = bucket_at(base, next_off);
    }

    match empty_slot {
        Some((b, j)) => {
            // Value before key, with the key store release-ordered: a
            // concurrent reader that observes the new key via an acquire
            // load is guaranteed to see this val write too.
            b.val[j].store(val, Ordering::Relaxed);
            b.key[j].store(key, Ordering::Release);
        }
        None => {
            let new_off = allocator.alloc(Bucket::SIZE as u64);
            Bucket::init_zeroed(to_ptr(base, new_off));
            let new_bucket = bucket_at(base, new_off);
            new_bucket.val[0].store(val, Ordering::Relaxed);
            new_bucket.key[0].store(key, Ordering::Release);
            // Publish the extension only after its first entry is fully
            // written; a concurrent `get` must never see `next != NULL`
            // pointing at a half-initialized bucket.
            bucket.next.store(new_off, Ordering::Release);
        }
    }

    lock.release();
    true
}

/// Remove `key`. Returns the removed value, or `0` if absent.
/// Leaves a tombstone (`key[j] = 0`) that later `put`s in the same chain
/// may reuse; no chain compaction.
///
/// # Safety
/// Same as [`header`].
pub unsafe fn remove(base: *mut u8, ht_header_off: u64, key: u64) -> u64 {
    let h = header(base, ht_header_off);
    let bin_idx = bin(h.num_buckets, key);
    let head = head_bucket(base, h, bin_idx);

    let lock = BucketLock::new(&head.lock);
    lock.acquire();

    let mut bucket = head;
    loop {
        for j in 0..ENTRIES_PER_BUCKET {
            if bucket.key[j].load(Ordering::Relaxed) == key {
                let val = bucket.val[j].load(Ordering::Relaxed);
                bucket.key[j].store(EMPTY_KEY, Ordering::Release);
                lock.release();
                return val;
            }
        }

        let next_off = bucket.next.load(Ordering::Relaxed);
        if next_off == SHM_NULL {
            break;
        }
        bucket = bucket_at(base, next_off);
    }

    lock.release();
    0
}

/// Best-effort live-key count. May observe an inconsistent snapshot under
/// concurrent writers; debugging only, not part of the correctness
/// contract.
///
/// # Safety
/// Same as [`header`].
pub unsafe fn size(base: *mut u8, ht_header_off: u64) -> usize {
    let h = header(base, ht_header_off);
    let mut total = 0usize;

    for bin_idx in 0..h.num_buckets {
        let mut bucket = head_bucket(base, h, bin_idx);
        loop {
            for j in 0..ENTRIES_PER_BUCKET {
                if bucket.key[j].load(Ordering::Relaxed) != EMPTY_KEY {
                    total += 1;
                }
            }
            let next_off = bucket.next.load(Ordering::Relaxed);
            if next_off == SHM_NULL {
                break;
            }
            bucket = bucket_at(base, next_off);
        }
    }

    total
}

/// Dump every chain to the `debug` log target. Debugging only.
///
/// # Safety
/// Same as [`header`].
pub unsafe fn print(base: *mut u8, ht_header_off: u64) {
    let h = header(base, ht_header_off);
    log::debug!("hashtable: {} buckets", h.num_buckets);

    for bin_idx in 0..h.num_buckets {
        let mut line = format!("[{bin_idx:05}] ");
        let mut bucket = head_bucket(base, h, bin_idx);
        loop {
            for j in 0..ENTRIES_PER_BUCKET {
                let k = bucket.key[j].load(Ordering::Relaxed);
                if k != EMPTY_KEY {
                    line.push_str(&format!("({k})-> "));
                }
            }
            let next_off = bucket.next.load(Ordering::Relaxed);
            if next_off == SHM_NULL {
                break;
            }
            line.push_str("** -> ");
            bucket = bucket_at(base, next_off);
        }
        log::debug!("{line}");
    }
}

/// Single-threaded insert used only by [`bucket_cpy`] (and, in a future
/// resize path, nothing else in this no-resize core calls it). No
/// locking: the caller must guarantee exclusive access to `dst`.
///
/// # Safety
/// Same as [`header`].
#[allow(dead_code)]
unsafe fn put_seq(base: *mut u8, allocator: &TableAllocator, dst: &HashTableHeader, key: u64, val: u64) -> bool {
    let bin_idx = bin(dst.num_buckets, key);
    let mut bucket = head_bucket(base, dst, bin_idx);
    let mut empty_slot: Option<(&Bucket, usize)> = None;

    loop {
        for j in 0..ENTRIES_PER_BUCKET {
            let k = bucket.key[j].load(Ordering::Relaxed);
            if k == key {
                return false;
            } else if empty_slot.is_none() && k == EMPTY_KEY {
                empty_slot = Some((bucket, j));
            }
        }

        let next_off = bucket.next.load(Ordering::Relaxed);
        if next_off == SHM_NULL {
            break;
        }
        bucket = bucket_at(base, next_off);
    }

    match empty_slot {
        Some((b, j)) => {
            b.val[j].store(val, Ordering::Relaxed);
            b.key[j].store(key, Ordering::Relaxed);
        }
        None => {
            let new_off = allocator.alloc(Bucket::SIZE as u64);
            Bucket::init_zeroed(to_ptr(base, new_off));
            let new_bucket = bucket_at(base, new_off);
            new_bucket.key[0].store(key, Ordering::Relaxed);
            new_bucket.val[0].store(val, Ordering::Relaxed);
            bucket.next.store(new_off, Ordering::Relaxed);
        }
    }
    true
}

/// Copy every live entry from the chain rooted at `src_head_off` into
/// `dst` via [`put_seq`]. Present for completeness; only ever
/// exercised by a resize path this no-resize core does not implement.
///
/// # Safety
/// Same as [`header`]; `dst` must not be concurrently accessed by anyone
/// else while this runs.
#[allow(dead_code)]
pub unsafe fn bucket_cpy(base: *mut u8, allocator: &TableAllocator, src_head_off: u64, dst: &HashTableHeader) {
    let mut bucket = bucket_at(base, src_head_off);
    loop {
        for j in 0..ENTRIES_PER_BUCKET {
            let key = bucket.key[j].load(Ordering::Relaxed);
            if key != EMPTY_KEY {
                let val = bucket.val[j].load(Ordering::Relaxed);
                put_seq(base, allocator, dst, key, val);
            }
        }
        let next_off = bucket.next.load(Ordering::Relaxed);
        if next_off == SHM_NULL {
            break;
        }
        bucket = bucket_at(base, next_off);
    }
}

#[allow(dead_code)]
fn assert_offset_roundtrip(base: *mut u8, ptr: *mut u8) -> u64 {
    unsafe { to_off(base, ptr) }
}
