//! Errors returned by the recoverable entry points of this crate.
//!
//! Arena exhaustion is deliberately **not** a variant here: there is no
//! recovery path once offsets have been handed out into shared memory,
//! so the bump allocator aborts the process instead of returning a
//! `Result`.

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("num_buckets must be a nonzero power of two, got {0}")]
    InvalidBucketCount(u64),

    #[error("failed to map shared region at {path}: {source}")]
    RegionMap {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("this process has already attached a region")]
    AlreadyAttached,
}
