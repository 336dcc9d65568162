//! The thread registration hook.
//!
//! Reclamation of extension buckets is out of scope for this no-resize
//! core, so registration binds no
//! actual epoch state today — it exists so call sites have a single place
//! to attach one later, and so debug builds can catch an unregistered
//! thread touching the table before that thread's first hash lookup goes
//! wrong in a more confusing way.

use std::cell::Cell;

thread_local! {
    static THREAD_ID: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Register the calling thread with `thread_id` (caller-assigned, dense,
/// unique within the process). Must be called exactly once per thread
/// before any other operation in this crate.
pub fn thread_init(thread_id: u64) {
    THREAD_ID.with(|cell| cell.set(Some(thread_id)));
}

/// Whether the calling thread has registered.
pub fn is_registered() -> bool {
    THREAD_ID.with(|cell| cell.get().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_thread_reports_as_such() {
        std::thread::spawn(|| assert!(!is_registered())).join().unwrap();
    }

    #[test]
    fn registration_is_thread_local() {
        thread_init(7);
        assert!(is_registered());
        std::thread::spawn(|| assert!(!is_registered())).join().unwrap();
    }
}
