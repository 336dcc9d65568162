//! Translation between `shm_off` (byte offsets from the user base of the
//! mapped region) and process-local pointers.
//!
//! Offsets, never pointers, are what gets stored in shared memory: two
//! processes mapping the same region may see it at different virtual
//! addresses, so any pointer baked into a bucket's `next` field would be
//! meaningless to a different process. `SHM_NULL` (offset `0`) is the
//! null sentinel in both directions.

/// The null offset. Offset `0` is never a valid allocation because the
/// coordination page itself lives at offset `0` of the user base in the
/// allocator arena's addressing scheme used by [`crate::bump`].
pub const SHM_NULL: u64 = 0;

/// Resolve a shared-memory offset to a process-local pointer.
///
/// # Safety
/// `base` must be the user base pointer published by [`crate::region`] for
/// the current process, and `off` must have been produced by a prior call
/// to [`to_off`] against that same base (or be [`SHM_NULL`]).
#[inline]
pub unsafe fn to_ptr(base: *mut u8, off: u64) -> *mut u8 {
    if off == SHM_NULL {
        std::ptr::null_mut()
    } else {
        base.add(off as usize)
    }
}

/// Resolve a process-local pointer back to its shared-memory offset.
///
/// # Safety
/// `ptr` must be null or must point inside the region mapped at `base`.
#[inline]
pub unsafe fn to_off(base: *mut u8, ptr: *mut u8) -> u64 {
    if ptr.is_null() {
        SHM_NULL
    } else {
        (ptr as usize - base as usize) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_roundtrips() {
        let mut region = [0u8; 64];
        let base = region.as_mut_ptr();
        unsafe {
            assert!(to_ptr(base, SHM_NULL).is_null());
            assert_eq!(to_off(base, std::ptr::null_mut()), SHM_NULL);
        }
    }

    #[test]
    fn nonnull_roundtrips() {
        let mut region = [0u8; 64];
        let base = region.as_mut_ptr();
        unsafe {
            let ptr = to_ptr(base, 40);
            assert_eq!(ptr, base.add(40));
            assert_eq!(to_off(base, ptr), 40);
        }
    }
}
