//! Load-then-run benchmark driver, the idiomatic-Rust shape of
//! `bmarks/simple.cpp`: load `num_keys` distinct keys across `num_threads`
//! threads, then either stop (`-s`) or run a put/get/remove mix for
//! `-d` seconds and report throughput.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use clap::Parser;

use clht_shm::{thread_init, Clht, Config};

#[derive(Parser)]
#[command(about = "CLHT-LB-NO-RESIZE load/run benchmark")]
struct Args {
    /// Node id, informational/log only.
    #[arg(short = 'i')]
    node_id: i64,

    /// Primary bucket count. Only matters for whichever process ends up
    /// electing itself initializer.
    #[arg(short = 'b')]
    num_buckets: u64,

    /// Number of distinct keys to load.
    #[arg(short = 'k')]
    num_keys: u64,

    /// Worker thread count.
    #[arg(short = 't')]
    num_threads: u64,

    /// Run the put/get/remove mix for this many seconds after loading.
    /// Mutually exclusive with `-s`.
    #[arg(short = 'd')]
    duration_seconds: Option<u64>,

    /// Load only, then exit; skip the timed run phase.
    #[arg(short = 's')]
    setup_only: bool,

    /// Zero the region before attaching. Exactly one process in a fresh
    /// deployment should pass this.
    #[arg(long)]
    force_init: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.num_keys == 0 || args.num_buckets == 0 || args.num_threads == 0 {
        eprintln!("usage: clht-bench -i NODE_ID -b NUM_BUCKETS -k NUM_KEYS -t NUM_THREADS [-d SECONDS | -s] [--force-init]");
        std::process::exit(1);
    }

    let config = Config::from_env(args.node_id, args.force_init, args.num_buckets);
    let clht = match Clht::attach(&config) {
        Ok(clht) => Arc::new(clht),
        Err(err) => {
            eprintln!("attach failed: {err}");
            std::process::exit(1);
        }
    };

    println!(
        "[{}] k:{} b:{} t:{}",
        args.node_id, args.num_keys, args.num_buckets, args.num_threads
    );

    let keys: Vec<u64> = (0..args.num_keys)
        .map(|i| i + (args.node_id as u64 + 1) * args.num_keys + 1)
        .collect();
    let keys = Arc::new(keys);

    let load_elapsed = run_phase(&clht, &keys, args.num_threads, |clht, tid, range| {
        for &key in range {
            clht.put(key, key);
            let _ = tid;
        }
    });
    report_throughput("load", args.num_keys, load_elapsed);

    if args.setup_only {
        return;
    }

    let duration = Duration::from_secs(args.duration_seconds.unwrap_or(5));
    let ops = Arc::new(AtomicU64::new(0));
    let deadline = Instant::now() + duration;

    let elapsed = {
        let barrier = Arc::new(Barrier::new(args.num_threads as usize));
        let start = Instant::now();
        std::thread::scope(|scope| {
            for tid in 0..args.num_threads {
                let clht = Arc::clone(&clht);
                let keys = Arc::clone(&keys);
                let barrier = Arc::clone(&barrier);
                let ops = Arc::clone(&ops);
                scope.spawn(move || {
                    thread_init(tid);
                    barrier.wait();
                    let mut local = 0u64;
                    let mut i = 0usize;
                    while Instant::now() < deadline {
                        let key = keys[i % keys.len()];
                        match local % 100 {
                            0..=29 => {
                                clht.put(key, key);
                            }
                            30..=98 => {
                                clht.get(key);
                            }
                            _ => {
                                clht.remove(key);
                            }
                        }
                        local += 1;
                        i += 1;
                    }
                    ops.fetch_add(local, Ordering::Relaxed);
                });
            }
        });
        start.elapsed()
    };

    report_throughput("run", ops.load(Ordering::Relaxed), elapsed);
    println!("size: {}", clht.size());
}

fn run_phase(
    clht: &Arc<Clht>,
    keys: &Arc<Vec<u64>>,
    num_threads: u64,
    work: impl Fn(&Clht, u64, &[u64]) + Send + Sync + Copy,
) -> Duration {
    let barrier = Arc::new(Barrier::new(num_threads as usize));
    let chunk = keys.len() as u64 / num_threads;
    let start = Instant::now();

    std::thread::scope(|scope| {
        for tid in 0..num_threads {
            let clht = Arc::clone(clht);
            let keys = Arc::clone(keys);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                thread_init(tid);
                let from = (chunk * tid) as usize;
                let to = from + chunk as usize;
                barrier.wait();
                work(&clht, tid, &keys[from..to]);
            });
        }
    });

    start.elapsed()
}

fn report_throughput(phase: &str, ops: u64, elapsed: Duration) {
    let us = elapsed.as_micros().max(1) as f64;
    println!("Throughput: {phase}, {:.6} ,ops/us", ops as f64 / us);
}
