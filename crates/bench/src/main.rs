//! Multi-threaded transaction mix benchmark, run as the `yase-bench` binary:
//! loads a table and a matching index, then drives point-read, read-update,
//! and scan-update transactions concurrently for a fixed wall clock
//! duration and reports per-thread commit/abort counts as CSV.

use buffer::BufferPool;
use clap::Parser;
use common::{DeadlockPolicy, Rid};
use lockmgr::{LockManager, LockMode};
use rand::Rng;
use skiplist::SkipList;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use storage::Table;
use tracing_subscriber::EnvFilter;
use txn::Transaction;
use wal::LogManager;

const RECORD_SIZE: u16 = 8;

#[derive(Parser, Debug)]
#[command(name = "yase-bench", about = "Concurrent transaction mix benchmark for the storage engine")]
struct Args {
    #[arg(long, default_value_t = 8)]
    threads: u32,

    #[arg(long, default_value_t = 10)]
    seconds: u64,

    #[arg(long, default_value_t = 10_000)]
    table_size: u64,

    #[arg(long, default_value_t = 50)]
    bpool_pages: usize,

    #[arg(long, default_value_t = 1024)]
    logbuf_kb: usize,

    #[arg(long, default_value = "yase_bench.log")]
    logfile: String,

    #[arg(long, default_value = "yase_bench.tbl")]
    tablefile: String,

    #[arg(long, default_value_t = 40)]
    point_read_pct: u32,

    #[arg(long, default_value_t = 40)]
    read_update_pct: u32,

    #[arg(long, default_value_t = 20)]
    scan_update_pct: u32,
}

fn key_of(n: u64) -> [u8; 8] {
    n.to_le_bytes()
}

fn value_of(rec: &[u8]) -> u64 {
    u64::from_le_bytes(rec.try_into().expect("8-byte record"))
}

/// Ten single-record reads under `Sh`, each on an independently sampled key.
fn tx_point_read(table: &Table, index: &SkipList, table_size: u64, rng: &mut impl Rng) -> bool {
    let tx = Transaction::new();
    for _ in 0..10 {
        let key = rng.gen_range(1..=table_size);
        let Some(rid) = index.search(&key_of(key)) else {
            tx.abort();
            return false;
        };
        if !tx.lock(rid, LockMode::Sh) {
            tx.abort();
            return false;
        }
        if table.read(rid).is_none() {
            tx.abort();
            return false;
        }
    }
    tx.commit()
}

/// Ten read-increment-write cycles under `Xl`, each on an independently
/// sampled key.
fn tx_read_update(table: &Table, index: &SkipList, table_size: u64, rng: &mut impl Rng) -> bool {
    let tx = Transaction::new();
    for _ in 0..10 {
        let key = rng.gen_range(1..=table_size);
        let Some(rid) = index.search(&key_of(key)) else {
            tx.abort();
            return false;
        };
        if !tx.lock(rid, LockMode::Xl) {
            tx.abort();
            return false;
        }
        let Some(rec) = table.read(rid) else {
            tx.abort();
            return false;
        };
        let next = value_of(&rec).wrapping_add(1);
        if !table.update(rid, &next.to_le_bytes()) {
            tx.abort();
            return false;
        }
    }
    tx.commit()
}

/// One inclusive forward scan from a random start key (sampled from the
/// configured `table_size`), length 1-20. If the scan came up short of the
/// requested length every returned record is updated; otherwise five of
/// them are picked at random.
fn tx_scan_update(table: &Table, index: &SkipList, table_size: u64, rng: &mut impl Rng) -> bool {
    let tx = Transaction::new();
    let start = rng.gen_range(1..=table_size);
    let requested = rng.gen_range(1..=20usize);
    let found = index.forward_scan(Some(&key_of(start)), requested, true);

    let targets: Vec<(Vec<u8>, Rid)> = if found.len() < requested {
        found
    } else {
        let mut picked = Vec::with_capacity(5);
        let mut remaining = found;
        for _ in 0..5.min(remaining.len()) {
            let i = rng.gen_range(0..remaining.len());
            picked.push(remaining.swap_remove(i));
        }
        picked
    };

    for (_, rid) in &targets {
        if !tx.lock(*rid, LockMode::Xl) {
            tx.abort();
            return false;
        }
    }
    for (_, rid) in &targets {
        let Some(rec) = table.read(*rid) else {
            tx.abort();
            return false;
        };
        let next = value_of(&rec).wrapping_add(1);
        if !table.update(*rid, &next.to_le_bytes()) {
            tx.abort();
            return false;
        }
    }
    tx.commit()
}

struct WorkerCounters {
    commits: AtomicU64,
    aborts: AtomicU64,
}

#[allow(clippy::too_many_arguments)]
fn worker_run(
    table: Arc<Table>,
    index: Arc<SkipList>,
    table_size: u64,
    point_read_pct: u32,
    read_update_pct: u32,
    thread_start_barrier: Arc<AtomicU32>,
    bench_start_barrier: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
) {
    thread_start_barrier.fetch_add(1, Ordering::SeqCst);
    while !bench_start_barrier.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }

    let mut rng = rand::thread_rng();
    while !shutdown.load(Ordering::SeqCst) {
        let dice = rng.gen_range(0..100u32);
        let committed = if dice < point_read_pct {
            tx_point_read(&table, &index, table_size, &mut rng)
        } else if dice < point_read_pct + read_update_pct {
            tx_read_update(&table, &index, table_size, &mut rng)
        } else {
            tx_scan_update(&table, &index, table_size, &mut rng)
        };
        if committed {
            counters.commits.fetch_add(1, Ordering::SeqCst);
        } else {
            counters.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.point_read_pct + args.read_update_pct + args.scan_update_pct != 100 {
        eprintln!("point_read_pct + read_update_pct + scan_update_pct must sum to 100");
        std::process::exit(1);
    }

    tracing::info!(
        threads = args.threads,
        seconds = args.seconds,
        table_size = args.table_size,
        bpool_pages = args.bpool_pages,
        logbuf_kb = args.logbuf_kb,
        "starting benchmark"
    );

    BufferPool::initialize(args.bpool_pages);
    LockManager::initialize(DeadlockPolicy::WaitDie);
    LogManager::initialize(&args.logfile, args.logbuf_kb);

    let table = Arc::new(
        Table::open(&args.tablefile, RECORD_SIZE, BufferPool::get())
            .expect("failed to open benchmark table"),
    );
    let index = Arc::new(SkipList::new(RECORD_SIZE as usize));

    tracing::info!("loading {} records", args.table_size);
    for n in 1..=args.table_size {
        let rid = table.insert(&key_of(n));
        index.insert(&key_of(n), rid);
    }

    let counters: Vec<Arc<WorkerCounters>> = (0..args.threads)
        .map(|_| {
            Arc::new(WorkerCounters {
                commits: AtomicU64::new(0),
                aborts: AtomicU64::new(0),
            })
        })
        .collect();

    let thread_start_barrier = Arc::new(AtomicU32::new(0));
    let bench_start_barrier = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..args.threads)
        .map(|i| {
            let table = table.clone();
            let index = index.clone();
            let thread_start_barrier = thread_start_barrier.clone();
            let bench_start_barrier = bench_start_barrier.clone();
            let shutdown = shutdown.clone();
            let counters = counters[i as usize].clone();
            let point_read_pct = args.point_read_pct;
            let read_update_pct = args.read_update_pct;
            let table_size = args.table_size;
            thread::spawn(move || {
                worker_run(
                    table,
                    index,
                    table_size,
                    point_read_pct,
                    read_update_pct,
                    thread_start_barrier,
                    bench_start_barrier,
                    shutdown,
                    counters,
                )
            })
        })
        .collect();

    while thread_start_barrier.load(Ordering::SeqCst) < args.threads {
        std::hint::spin_loop();
    }
    bench_start_barrier.store(true, Ordering::SeqCst);

    thread::sleep(Duration::from_secs(args.seconds));
    shutdown.store(true, Ordering::SeqCst);

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    println!("thread_id,commits,aborts");
    for (i, c) in counters.iter().enumerate() {
        println!(
            "{},{},{}",
            i,
            c.commits.load(Ordering::SeqCst),
            c.aborts.load(Ordering::SeqCst)
        );
    }

    LogManager::uninitialize();
    BufferPool::uninitialize();
}
