//! Attach-time configuration.

use std::path::PathBuf;

const DEFAULT_DEVICE_PATH: &str = "/dev/dax2.0";
const CXL_PATH_VAR: &str = "CXL_PATH";

/// Parameters an attaching process supplies to [`crate::attach`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the backing DAX device, or a regular file to fall back to
    /// when none is present. Resolved from `CXL_PATH` if not set
    /// explicitly.
    pub device_path: PathBuf,
    /// An identifier for log lines; has no effect on correctness.
    pub node_id: i64,
    /// Zero the region before attaching. The first process to attach in
    /// a fresh deployment must set this; later processes normally don't.
    pub force_init: bool,
    /// Primary bucket count for a freshly-created table. Ignored if
    /// another process already created the table. Must be a nonzero
    /// power of two.
    pub num_buckets: u64,
}

impl Config {
    /// Resolve `device_path` from `CXL_PATH`, defaulting to
    /// `/dev/dax2.0`, the rest from the given attach parameters.
    pub fn from_env(node_id: i64, force_init: bool, num_buckets: u64) -> Self {
        let device_path = std::env::var_os(CXL_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_PATH));

        Config {
            device_path,
            node_id,
            force_init,
            num_buckets,
        }
    }
}
