//! CLHT-LB-NO-RESIZE over a cross-process shared-memory region.
//!
//! A bucketed, chained hash table with one spinlock per bucket, backed by
//! a region mapped identically (at possibly different virtual addresses)
//! by every attaching process. See [`Clht::attach`] for the bootstrap
//! protocol and [`hashtable`] for the table operations themselves.

pub mod bump;
pub mod config;
pub mod coord;
pub mod error;
pub mod hashtable;
pub mod layout;
pub mod lock;
pub mod offset;
pub mod region;
pub mod thread_registration;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bump::TableAllocator;
use coord::CoordPage;
use error::ShmError;
use layout::Handle;
use offset::to_ptr;
use region::ShmRegion;

pub use config::Config;
pub use thread_registration::thread_init;

/// Device paths this process currently holds an attachment to. Guards
/// against a process attaching the same region twice without an
/// intervening `detach`.
static ATTACHED_PATHS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn mark_attached(path: &Path) -> Result<(), ShmError> {
    let mut attached = ATTACHED_PATHS.lock().unwrap();
    if attached.iter().any(|p| p == path) {
        return Err(ShmError::AlreadyAttached);
    }
    attached.push(path.to_path_buf());
    Ok(())
}

fn mark_detached(path: &Path) {
    ATTACHED_PATHS.lock().unwrap().retain(|p| p != path);
}

/// A process's attachment to the shared table. Cheap to hold, expensive
/// to create more than one of per process (each owns its own mmap).
pub struct Clht {
    region: ShmRegion,
    handle_off: u64,
    node_id: i64,
}

impl Clht {
    /// Map the region named by `config.device_path`, electing this
    /// process as initializer if no one has built the table yet, and
    /// return a handle to the (possibly pre-existing) table.
    ///
    /// Only the elected initializer's `num_buckets` has any effect; a
    /// process that finds the table already built attaches to whatever
    /// size it was created with. `num_buckets` is still validated for
    /// every caller, not just the one that ends up initializing: this
    /// must happen before the initializer election runs, since once a
    /// process wins that CAS it has committed the coordination page to
    /// `Initializing`, and every other attacher spins until it sees
    /// `Ready` — a failure after winning would strand that page forever.
    pub fn attach(config: &Config) -> Result<Self, ShmError> {
        if config.num_buckets == 0 || !config.num_buckets.is_power_of_two() {
            return Err(ShmError::InvalidBucketCount(config.num_buckets));
        }

        mark_attached(&config.device_path)?;

        let region = match ShmRegion::create_or_open(&config.device_path, config.force_init) {
            Ok(region) => region,
            Err(err) => {
                mark_detached(&config.device_path);
                return Err(err);
            }
        };
        let base = region.user_base();

        if config.force_init {
            unsafe { CoordPage::reset(base) };
        }

        let coord = unsafe { CoordPage::at(base) };
        let allocator = TableAllocator::new(coord, coord::COMM_SIZE);

        if coord.elect_initializer(config.node_id) {
            let ht_off = match hashtable::create(base, &allocator, config.num_buckets) {
                Ok(off) => off,
                Err(err) => {
                    mark_detached(&config.device_path);
                    return Err(err);
                }
            };
            let handle_off = allocator.alloc(layout::HANDLE_SIZE as u64);
            unsafe {
                let handle_ptr = to_ptr(base, handle_off) as *mut Handle;
                (*handle_ptr).ht = ht_off;
            }
            coord.publish_ready(handle_off);
        }

        let handle_off = coord.handle_offset();
        log::info!(
            "[{}] attached to {}, handle at offset {handle_off}",
            config.node_id,
            config.device_path.display()
        );

        Ok(Clht {
            region,
            handle_off,
            node_id: config.node_id,
        })
    }

    /// Tear down this process's attachment. If `force_destroy` is set,
    /// the coordination page is reset so the next `attach` call against
    /// this device reinitializes the table from scratch — the original
    /// `clht_shm_term`'s `force_destroy` flag resets the comm region the
    /// same way and leaves the bulk of the table arena untouched, since
    /// the next `create` overwrites it as it reallocates from a
    /// zeroed watermark.
    pub fn detach(self, force_destroy: bool) {
        if force_destroy {
            let base = self.region.user_base();
            unsafe { CoordPage::reset(base) };
            log::info!(
                "[{}] force-destroyed region at {}",
                self.node_id,
                self.region.path().display()
            );
        } else {
            log::info!("[{}] detached from {}", self.node_id, self.region.path().display());
        }
        mark_detached(self.region.path());
    }

    fn ht_header_off(&self) -> u64 {
        let base = self.region.user_base();
        unsafe {
            let handle = &*(to_ptr(base, self.handle_off) as *const Handle);
            handle.ht
        }
    }

    fn check_registered(&self) {
        debug_assert!(
            thread_registration::is_registered(),
            "thread used CLHT before calling thread_init"
        );
    }

    /// Register the calling thread. Must be called once per thread
    /// before any of `get`/`put`/`remove`/`size`.
    pub fn thread_init(&self, thread_id: u64) {
        thread_registration::thread_init(thread_id);
    }

    pub fn get(&self, key: u64) -> u64 {
        self.check_registered();
        let base = self.region.user_base();
        unsafe { hashtable::get(base, self.ht_header_off(), key) }
    }

    pub fn put(&self, key: u64, val: u64) -> bool {
        self.check_registered();
        let base = self.region.user_base();
        let coord = unsafe { CoordPage::at(base) };
        let allocator = TableAllocator::new(coord, coord::COMM_SIZE);
        unsafe { hashtable::put(base, &allocator, self.ht_header_off(), key, val) }
    }

    pub fn remove(&self, key: u64) -> u64 {
        self.check_registered();
        let base = self.region.user_base();
        unsafe { hashtable::remove(base, self.ht_header_off(), key) }
    }

    /// Best-effort live-key count; see [`hashtable::size`].
    pub fn size(&self) -> usize {
        let base = self.region.user_base();
        unsafe { hashtable::size(base, self.ht_header_off()) }
    }

    /// Dump the table to the `debug` log target.
    pub fn print(&self) {
        let base = self.region.user_base();
        unsafe { hashtable::print(base, self.ht_header_off()) }
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }
}

// The region is mapped at a fixed address for the process's lifetime and
// every operation addresses it through atomics; sharing a `Clht` across
// threads is the whole point.
unsafe impl Send for Clht {}
unsafe impl Sync for Clht {}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("clht_shm_lib_test_{tag}_{}.data", std::process::id()))
    }

    #[test]
    fn s4_multiple_attachers_see_the_same_table() {
        let path = scratch_path("s4");
        let _ = std::fs::remove_file(&path);

        let bootstrap = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 0,
            force_init: true,
            num_buckets: 1024,
        })
        .unwrap();
        bootstrap.thread_init(0);
        bootstrap.put(42, 4242);

        let attachers: Vec<Clht> = (1..=4)
            .map(|node_id| {
                Clht::attach(&Config {
                    device_path: path.clone(),
                    node_id,
                    force_init: false,
                    num_buckets: 1024,
                })
                .unwrap()
            })
            .collect();

        for (i, clht) in attachers.iter().enumerate() {
            clht.thread_init(i as u64 + 1);
            assert_eq!(clht.get(42), 4242, "attacher {i} should see the bootstrapper's put");
            assert_eq!(clht.ht_header_off(), bootstrap.ht_header_off());
        }

        std::thread::scope(|scope| {
            for (i, clht) in attachers.iter().enumerate() {
                scope.spawn(move || {
                    clht.thread_init(100 + i as u64);
                    let key = 1000 + i as u64;
                    assert!(clht.put(key, key * 2));
                    assert_eq!(clht.get(key), key * 2);
                });
            }
        });

        assert_eq!(bootstrap.get(1000), 2000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn no_phantoms_across_put_remove_mix() {
        let path = scratch_path("phantom");
        let _ = std::fs::remove_file(&path);

        let clht = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 0,
            force_init: true,
            num_buckets: 256,
        })
        .unwrap();
        clht.thread_init(0);

        for k in 1..500u64 {
            assert!(clht.put(k, k * 7));
        }
        for k in 1..500u64 {
            if k % 3 == 0 {
                assert_eq!(clht.remove(k), k * 7);
            }
        }
        for k in 1..500u64 {
            let v = clht.get(k);
            if k % 3 == 0 {
                assert_eq!(v, 0);
            } else {
                assert_eq!(v, k * 7);
            }
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn double_attach_without_detach_is_rejected() {
        let path = scratch_path("double_attach");
        let _ = std::fs::remove_file(&path);

        let config = Config {
            device_path: path.clone(),
            node_id: 0,
            force_init: true,
            num_buckets: 64,
        };
        let first = Clht::attach(&config).unwrap();
        assert!(matches!(Clht::attach(&config), Err(ShmError::AlreadyAttached)));

        first.detach(false);
        let second = Clht::attach(&config).unwrap();
        second.detach(false);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn force_destroy_detach_resets_table_for_next_attach() {
        let path = scratch_path("force_destroy");
        let _ = std::fs::remove_file(&path);

        let clht = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 0,
            force_init: true,
            num_buckets: 64,
        })
        .unwrap();
        clht.thread_init(0);
        clht.put(9, 99);
        assert_eq!(clht.get(9), 99);
        clht.detach(true);

        let reattached = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 1,
            force_init: false,
            num_buckets: 64,
        })
        .unwrap();
        reattached.thread_init(0);
        assert_eq!(reattached.get(9), 0, "force_destroy must reset the table, not just unmap");

        reattached.detach(false);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_bucket_count_never_strands_the_coordination_page() {
        let path = scratch_path("invalid_bucket_count");
        let _ = std::fs::remove_file(&path);

        let bad = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 0,
            force_init: true,
            num_buckets: 3,
        });
        assert!(matches!(bad, Err(ShmError::InvalidBucketCount(3))));

        let good = Clht::attach(&Config {
            device_path: path.clone(),
            node_id: 1,
            force_init: false,
            num_buckets: 64,
        })
        .unwrap();
        good.thread_init(0);
        good.put(1, 1);
        assert_eq!(good.get(1), 1);

        good.detach(false);
        let _ = std::fs::remove_file(&path);
    }
}
