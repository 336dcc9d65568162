//! The coordination page: a fixed-offset struct used by attaching
//! processes to elect a single initializer and publish the hashtable
//! handle's offset.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::offset::SHM_NULL;

/// Required mapping alignment for DAX devices (2 MiB), and the size used
/// for the coordination page sub-region.
pub const DAX_ALIGNMENT: u64 = 1 << 21;
pub const COMM_SIZE: u64 = DAX_ALIGNMENT;

/// Size of the bump arena carved out for bucket storage (64 GiB), matching
/// the original CXL-CLHT `SHM_TABLE_SIZE`.
pub const TABLE_SIZE: u64 = 1 << 36;

/// Round `addr` up to the next multiple of [`DAX_ALIGNMENT`].
pub const fn align_up(addr: u64) -> u64 {
    ((addr >> 21) + 1) << 21
}

/// Initializer election states for [`CoordPage::initialized`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninit = 0,
    Initializing = 1,
    Ready = 2,
}

/// Fixed struct at a known offset (the start of the coordination
/// sub-region) used to bootstrap the table across cooperating processes.
///
/// Packed deliberately so the same byte layout is seen by every process
/// regardless of how it was compiled.
#[repr(C)]
pub struct CoordPage {
    /// Offset of the [`crate::layout::Handle`], published once
    /// initialization completes.
    pub clht: AtomicU64,
    /// `{0: uninit, 1: initializing, 2: ready}`.
    pub initialized: AtomicU8,
    _pad: [u8; 7],
    /// Bump-arena watermark: bytes already carved out of the table arena.
    /// Monotonically non-decreasing.
    pub table_end: AtomicU64,
}

pub const COORD_PAGE_SIZE: usize = std::mem::size_of::<CoordPage>();
const _: () = assert!(COORD_PAGE_SIZE == 24);

impl CoordPage {
    /// Zero out the page so the next attach reinitializes from scratch.
    ///
    /// # Safety
    /// `ptr` must point to at least `COORD_PAGE_SIZE` writable bytes.
    pub unsafe fn reset(ptr: *mut u8) {
        let page = &*(ptr as *const CoordPage);
        page.clht.store(SHM_NULL, Ordering::Relaxed);
        page.initialized.store(InitState::Uninit as u8, Ordering::Relaxed);
        page.table_end.store(0, Ordering::Relaxed);
    }

    /// # Safety
    /// `ptr` must point to a `CoordPage` living inside a region that
    /// outlives the returned reference.
    pub unsafe fn at<'a>(ptr: *mut u8) -> &'a CoordPage {
        &*(ptr as *const CoordPage)
    }

    /// Run the initializer election. Returns `true` if this
    /// call is the one that must perform one-time construction (i.e. it
    /// won the `0 -> 1` CAS), `false` if another process already did or is
    /// doing so.
    pub fn elect_initializer(&self, node: i64) -> bool {
        match self
            .initialized
            .compare_exchange(
                InitState::Uninit as u8,
                InitState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
            Ok(_) => {
                log::info!("[{node}] initializing CLHT");
                true
            }
            Err(observed) if observed == InitState::Initializing as u8 => {
                log::warn!("[{node}] waiting for another process to finish initializing CLHT");
                while self.initialized.load(Ordering::Acquire) != InitState::Ready as u8 {
                    std::hint::spin_loop();
                }
                false
            }
            Err(_) => {
                log::info!("[{node}] obtaining existing CLHT");
                false
            }
        }
    }

    /// Publish the handle offset and flip the state machine to `Ready`.
    /// Only the process that won [`Self::elect_initializer`] may call this.
    pub fn publish_ready(&self, handle_off: u64) {
        self.clht.store(handle_off, Ordering::Release);
        self.initialized
            .store(InitState::Ready as u8, Ordering::Release);
    }

    pub fn handle_offset(&self) -> u64 {
        self.clht.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_page_fits_comm_region() {
        assert!((COORD_PAGE_SIZE as u64) <= COMM_SIZE);
    }

    #[test]
    fn single_initializer_among_racers() {
        let mut backing = [0u8; COORD_PAGE_SIZE];
        unsafe { CoordPage::reset(backing.as_mut_ptr()) };
        let page = unsafe { CoordPage::at(backing.as_mut_ptr()) };

        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| scope.spawn(move || page.elect_initializer(i)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        assert_eq!(winners.iter().filter(|&&w| w).count(), 1);
    }
}
