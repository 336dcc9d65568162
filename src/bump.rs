//! Monotonic, CAS-advanced bump allocator carving bucket-array and
//! extension-bucket storage out of the table arena.
//!
//! Lock-free, wait-free per thread absent contention, obstruction-free
//! under contention. Nothing allocated through here is ever freed; `free`
//! is deliberately absent (the original's `clht_table_free` is a no-op).

use std::sync::atomic::Ordering;

use crate::coord::{CoordPage, TABLE_SIZE};

/// Allocates offsets within the table arena by advancing
/// [`CoordPage::table_end`]. `arena_base_off` is the offset of the start
/// of the table arena from the region's user base (i.e. past the
/// allocator arena and the coordination page).
pub struct TableAllocator<'a> {
    coord: &'a CoordPage,
    arena_base_off: u64,
}

impl<'a> TableAllocator<'a> {
    pub fn new(coord: &'a CoordPage, arena_base_off: u64) -> Self {
        TableAllocator {
            coord,
            arena_base_off,
        }
    }

    /// Carve `size` bytes out of the table arena, returning the offset
    /// (from the region's user base) of the new allocation.
    ///
    /// Aborts the process with a diagnostic on exhaustion: there is no
    /// recovery path, because offsets already handed out elsewhere in the
    /// shared region assume monotonic growth.
    pub fn alloc(&self, size: u64) -> u64 {
        loop {
            let old = self.coord.table_end.load(Ordering::Relaxed);
            let new = old + size;
            if new > TABLE_SIZE {
                log::error!("table arena exhausted: requested {size} bytes, {old}/{TABLE_SIZE} already used");
                panic!("OUT OF MEMORY FOR HASHTABLE");
            }
            if self
                .coord
                .table_end
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return self.arena_base_off + old;
            }
        }
    }

    /// No-op: extension buckets and bucket arrays are never reclaimed
    /// during normal operation.
    pub fn free(&self, _off: u64, _size: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CoordPage;

    fn fresh_page(backing: &mut [u8]) -> &CoordPage {
        unsafe {
            CoordPage::reset(backing.as_mut_ptr());
            CoordPage::at(backing.as_mut_ptr())
        }
    }

    #[test]
    fn watermark_is_monotone_and_non_overlapping() {
        let mut backing = [0u8; crate::coord::COORD_PAGE_SIZE];
        let page = fresh_page(&mut backing);
        let alloc = TableAllocator::new(page, 1000);

        let a = alloc.alloc(64);
        let b = alloc.alloc(128);
        let c = alloc.alloc(64);

        assert_eq!(a, 1000);
        assert_eq!(b, 1064);
        assert_eq!(c, 1192);
    }

    #[test]
    fn concurrent_allocs_never_overlap() {
        let mut backing = [0u8; crate::coord::COORD_PAGE_SIZE];
        let page = fresh_page(&mut backing);
        let alloc = TableAllocator::new(page, 0);

        let mut offsets: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| alloc.alloc(64)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        offsets.sort_unstable();
        for (i, off) in offsets.iter().enumerate() {
            assert_eq!(*off, (i as u64) * 64);
        }
    }

    #[test]
    #[should_panic(expected = "OUT OF MEMORY")]
    fn exhaustion_panics() {
        let mut backing = [0u8; crate::coord::COORD_PAGE_SIZE];
        let page = fresh_page(&mut backing);
        page.table_end.store(TABLE_SIZE - 32, Ordering::Relaxed);
        let alloc = TableAllocator::new(page, 0);
        alloc.alloc(64);
    }
}
