use super::transaction::TransactionId;
use crate::error::{Error, Result};
use crate::storage::BufferPool;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands out transaction ids and makes sure every transaction is finished
/// exactly once, which is what releases its locks.
pub struct TransactionManager {
    buffer_pool: Arc<BufferPool>,
    active: RwLock<HashSet<TransactionId>>,
}

impl TransactionManager {
    pub fn new(buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            buffer_pool,
            active: RwLock::new(HashSet::new()),
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn begin(&self) -> TransactionId {
        let tid = TransactionId::new();
        self.active.write().insert(tid);
        debug!(%tid, "begin");
        tid
    }

    pub fn is_active(&self, tid: TransactionId) -> bool {
        self.active.read().contains(&tid)
    }

    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.finish(tid, true)
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.finish(tid, false)
    }

    fn finish(&self, tid: TransactionId, commit: bool) -> Result<()> {
        // Removing the id first means a second commit/abort for the same
        // transaction fails here instead of releasing locks twice.
        if !self.active.write().remove(&tid) {
            return Err(Error::TransactionNotActive(tid));
        }

        debug!(%tid, commit, "finishing transaction");
        self.buffer_pool.transaction_complete(tid, commit)
    }

    /// Run `f` inside a fresh transaction. Commits when `f` returns `Ok`,
    /// aborts otherwise, and hands back what `f` returned.
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TransactionId, &BufferPool) -> Result<T>,
    {
        let tid = self.begin();
        match f(tid, &self.buffer_pool) {
            Ok(value) => {
                self.commit(tid)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = self.abort(tid) {
                    warn!(%tid, %abort_err, "failed to abort transaction");
                }
                Err(err)
            }
        }
    }

    /// Like `execute`, but starts over in a new transaction whenever the
    /// previous attempt was aborted by a lock timeout, up to `max_attempts`
    /// attempts in total.
    pub fn execute_with_retry<F, T>(&self, max_attempts: usize, mut f: F) -> Result<T>
    where
        F: FnMut(TransactionId, &BufferPool) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match self.execute(&mut f) {
                Err(err) if err.is_aborted() && attempt < max_attempts => {
                    debug!(attempt, "transaction aborted, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::concurrency::{LockManager, Permission};
    use crate::config::Config;
    use crate::storage::{HeapFile, PageId, PageProvider};
    use std::thread;

    struct Setup {
        tm: Arc<TransactionManager>,
        heap_file: Arc<HeapFile>,
        file: String,
    }

    impl Drop for Setup {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.file);
        }
    }

    fn setup(min_ms: u64, max_ms: u64) -> Setup {
        let file = format!("test-{:?}.db", std::thread::current().id());
        let _ = std::fs::remove_file(&file);

        let heap_file = Arc::new(HeapFile::open(1, &file).unwrap());
        for _ in 0..2 {
            heap_file.allocate_page().unwrap();
        }

        let config = Config::default().with_lock_timeout(min_ms, max_ms);
        let lock_manager = Arc::new(LockManager::with_config(&config).unwrap());
        let pool = Arc::new(BufferPool::new(lock_manager, 8));
        pool.register(heap_file.clone());

        Setup {
            tm: Arc::new(TransactionManager::new(pool)),
            heap_file,
            file,
        }
    }

    fn pid(n: u32) -> PageId {
        PageId::new(1, n)
    }

    #[test]
    fn transaction_operations() {
        let s = setup(50, 100);
        let tid = s.tm.begin();
        assert!(s.tm.is_active(tid));

        s.tm.buffer_pool()
            .get_page(tid, pid(0), Permission::ReadOnly)
            .unwrap();
        s.tm.commit(tid).unwrap();
        assert!(!s.tm.is_active(tid));
        assert!(!s.tm.buffer_pool().holds_lock(tid, pid(0)));

        // Finishing twice is refused.
        assert_eq!(s.tm.commit(tid), Err(Error::TransactionNotActive(tid)));
        assert_eq!(s.tm.abort(tid), Err(Error::TransactionNotActive(tid)));
    }

    #[test]
    fn execute_commits_on_ok() {
        let s = setup(50, 100);
        let tid = s
            .tm
            .execute(|tid, pool| {
                let page = pool.get_page(tid, pid(1), Permission::ReadWrite)?;
                page.write().write_u64(tid, 0, 11);
                Ok(tid)
            })
            .unwrap();

        assert!(!s.tm.is_active(tid));
        assert!(s.tm.buffer_pool().lock_manager().held_pages(tid).is_empty());
        assert_eq!(s.heap_file.read_page(pid(1)).unwrap().read_u64(0), 11);
    }

    #[test]
    fn execute_aborts_on_err() {
        let s = setup(50, 100);
        let holder = s.tm.begin();
        s.tm.buffer_pool()
            .get_page(holder, pid(0), Permission::ReadWrite)
            .unwrap();

        let mut seen = None;
        let result = s.tm.execute(|tid, pool| {
            seen = Some(tid);
            let page = pool.get_page(tid, pid(1), Permission::ReadWrite)?;
            page.write().write_u64(tid, 0, 99);
            drop(page);
            // Blocks on the page `holder` has, then times out.
            pool.get_page(tid, pid(0), Permission::ReadOnly)?;
            Ok(())
        });

        let tid = seen.unwrap();
        assert_eq!(result, Err(Error::TransactionAborted(tid)));
        assert!(!s.tm.is_active(tid));
        assert!(s.tm.buffer_pool().lock_manager().held_pages(tid).is_empty());

        // The write to page 1 was rolled back and never reached disk.
        let page = s
            .tm
            .buffer_pool()
            .get_page(holder, pid(1), Permission::ReadOnly)
            .unwrap();
        assert_eq!(page.read().read_u64(0), 0);
        drop(page);
        assert_eq!(s.heap_file.read_page(pid(1)).unwrap().read_u64(0), 0);
        s.tm.commit(holder).unwrap();
    }

    #[test]
    fn retry_after_abort() {
        let s = setup(20, 40);
        let holder = s.tm.begin();
        s.tm.buffer_pool()
            .get_page(holder, pid(0), Permission::ReadWrite)
            .unwrap();

        let tm = s.tm.clone();
        let handle = thread::spawn(move || {
            tm.execute_with_retry(100, |tid, pool| {
                let page = pool.get_page(tid, pid(0), Permission::ReadWrite)?;
                let value = page.read().read_u64(0);
                page.write().write_u64(tid, 0, value + 1);
                Ok(value + 1)
            })
        });

        thread::sleep(std::time::Duration::from_millis(100));
        s.tm.commit(holder).unwrap();

        assert_eq!(handle.join().unwrap(), Ok(1));
        assert_eq!(s.heap_file.read_page(pid(0)).unwrap().read_u64(0), 1);
    }

    #[test]
    fn retry_gives_up() {
        let s = setup(5, 10);
        let holder = s.tm.begin();
        s.tm.buffer_pool()
            .get_page(holder, pid(0), Permission::ReadWrite)
            .unwrap();

        let mut attempts = 0;
        let result = s.tm.execute_with_retry(3, |tid, pool| {
            attempts += 1;
            pool.get_page(tid, pid(0), Permission::ReadOnly)?;
            Ok(())
        });

        assert!(result.unwrap_err().is_aborted());
        assert_eq!(attempts, 3);
        s.tm.abort(holder).unwrap();
    }
}
