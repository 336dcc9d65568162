//! The per-bucket spinlock.
//!
//! Unlike the general-purpose cross-process rwlock the small-object
//! allocator might use for its own metadata, this lock must live inside
//! the bucket's own cache line so acquiring it
//! doesn't cost an extra line miss on the hot path. A test-and-set loop
//! over the bucket's `lock` word is sufficient; any fairness scheme would
//! add state this design has no room for.

use std::sync::atomic::{AtomicU32, Ordering};

const FREE: u32 = 0;
const HELD: u32 = 1;

/// A handle to a bucket's embedded lock word. Acquire is an acquire
/// fence, release is a release store.
pub struct BucketLock<'a> {
    word: &'a AtomicU32,
}

impl<'a> BucketLock<'a> {
    #[inline]
    pub fn new(word: &'a AtomicU32) -> Self {
        BucketLock { word }
    }

    /// Spin until the lock is acquired.
    pub fn acquire(&self) {
        loop {
            if self
                .word
                .compare_exchange_weak(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.word.load(Ordering::Relaxed) == HELD {
                std::hint::spin_loop();
            }
        }
    }

    pub fn release(&self) {
        self.word.store(FREE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_exclusion_under_contention() {
        let word = AtomicU32::new(FREE);
        let counter = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        let lock = BucketLock::new(&word);
                        lock.acquire();
                        let before = counter.load(Ordering::Relaxed);
                        counter.store(before + 1, Ordering::Relaxed);
                        lock.release();
                    }
                });
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }
}
