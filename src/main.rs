use pagelock::concurrency::{LockManager, Permission, TransactionId, TransactionManager};
use pagelock::storage::{BufferPool, HeapFile, PageId};
use pagelock::{Config, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use threadpool::ThreadPool;
use tracing::{error, info};

const TABLE_ID: u32 = 1;
const NUM_PAGES: u32 = 4;
const NUM_WORKERS: usize = 8;
const TRANSACTIONS_PER_WORKER: usize = 25;
const MAX_ATTEMPTS: usize = 20;

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run() {
        error!(%err, "demo failed");
        std::process::exit(1);
    }
}

// Every transaction moves one unit from one random page counter to another.
// With serializable execution the sum over all pages never changes.
fn run() -> Result<()> {
    let config = Config::default().with_env_overrides()?;
    let path = std::env::temp_dir().join(format!("pagelock-demo-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let heap_file = Arc::new(HeapFile::open(TABLE_ID, &path)?);
    for _ in 0..NUM_PAGES {
        heap_file.allocate_page()?;
    }

    let lock_manager = Arc::new(LockManager::with_config(&config)?);
    let buffer_pool = Arc::new(BufferPool::new(lock_manager, config.buffer_pool_pages));
    buffer_pool.register(heap_file.clone());
    let tm = Arc::new(TransactionManager::new(buffer_pool));

    const INITIAL: u64 = 1000;
    tm.execute(|tid, pool| {
        for page_no in 0..NUM_PAGES {
            let page = pool.get_page(tid, PageId::new(TABLE_ID, page_no), Permission::ReadWrite)?;
            page.write().write_u64(tid, 0, INITIAL);
        }
        Ok(())
    })?;

    let failed = Arc::new(AtomicUsize::new(0));
    let workers = ThreadPool::new(NUM_WORKERS);
    for worker in 0..NUM_WORKERS {
        let tm = tm.clone();
        let failed = failed.clone();
        workers.execute(move || {
            for _ in 0..TRANSACTIONS_PER_WORKER {
                if let Err(err) = tm.execute_with_retry(MAX_ATTEMPTS, transfer) {
                    error!(worker, %err, "transfer gave up");
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    }
    workers.join();

    let total = tm.execute(|tid, pool| {
        let mut total = 0;
        for page_no in 0..NUM_PAGES {
            let page = pool.get_page(tid, PageId::new(TABLE_ID, page_no), Permission::ReadOnly)?;
            let value = page.read().read_u64(0);
            info!(page_no, value, "final balance");
            total += value;
        }
        Ok(total)
    })?;

    info!(
        total,
        expected = INITIAL * NUM_PAGES as u64,
        failed = failed.load(Ordering::SeqCst),
        "done"
    );
    println!(
        "total {total} (expected {}), {} transfers gave up",
        INITIAL * NUM_PAGES as u64,
        failed.load(Ordering::SeqCst)
    );

    let _ = std::fs::remove_file(&path);
    Ok(())
}

fn transfer(tid: TransactionId, pool: &BufferPool) -> Result<()> {
    let (from, to) = {
        let mut rng = rand::thread_rng();
        let from = rng.gen_range(0..NUM_PAGES);
        let to = (from + rng.gen_range(1..NUM_PAGES)) % NUM_PAGES;
        (PageId::new(TABLE_ID, from), PageId::new(TABLE_ID, to))
    };

    // Read first, then write: the second request upgrades the shared lock.
    let source = pool.get_page(tid, from, Permission::ReadOnly)?;
    let balance = source.read().read_u64(0);
    if balance == 0 {
        return Ok(());
    }
    pool.get_page(tid, from, Permission::ReadWrite)?;
    source.write().write_u64(tid, 0, balance - 1);

    let target = pool.get_page(tid, to, Permission::ReadWrite)?;
    let value = target.read().read_u64(0);
    target.write().write_u64(tid, 0, value + 1);
    Ok(())
}
