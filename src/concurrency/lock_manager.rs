use super::lock_table::{Grant, LockMode, LockTable};
use super::transaction::{Permission, TransactionId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::PageId;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Page level strict two phase lock manager.
///
/// Both lock indexes live behind a single mutex, and a single condition
/// variable is broadcast on every release. A blocked request re-evaluates
/// from scratch after each wake, and gives up once its randomized timeout
/// runs out, which is how deadlocks get broken.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Range<Duration>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        let config = Config::default();
        Self::build(&config)
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &Config) -> Self {
        Self {
            table: Mutex::new(LockTable::with_capacity(
                config.lock_table_capacity,
                config.transaction_table_capacity,
            )),
            released: Condvar::new(),
            timeout: config.lock_timeout_range(),
        }
    }

    /// Block until `tid` holds `pid` in a mode covering `permission`.
    ///
    /// Fails with `Error::TransactionAborted` if the lock could not be granted
    /// within this call's timeout. A failed call leaves no trace in the lock
    /// table; the caller must still abort the whole transaction.
    pub fn acquire_lock(
        &self,
        pid: PageId,
        tid: TransactionId,
        permission: Permission,
    ) -> Result<()> {
        let mode = LockMode::from(permission);
        let timeout = self.draw_timeout();
        let start = Instant::now();
        let deadline = start + timeout;

        let mut table = self.table.lock();
        loop {
            let grant = table.try_grant(pid, tid, mode);
            trace!(%tid, %pid, ?mode, ?grant, "evaluated lock request");

            match grant {
                Grant::Acquired | Grant::Shared => {
                    debug!(%tid, %pid, ?mode, "lock granted");
                    return Ok(());
                }
                Grant::Upgraded => {
                    debug!(%tid, %pid, "lock upgraded to exclusive");
                    return Ok(());
                }
                Grant::AlreadyHeld => return Ok(()),
                Grant::Blocked => {}
            }

            // Wakes are broadcast for every release on every page, so being
            // woken says nothing about this page. Loop and re-check.
            if self.released.wait_until(&mut table, deadline).timed_out() {
                warn!(
                    %tid,
                    %pid,
                    ?mode,
                    waited_ms = start.elapsed().as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "lock wait timed out, aborting transaction"
                );
                return Err(Error::TransactionAborted(tid));
            }
        }
    }

    /// Release `tid`'s lock on `pid`. A no-op when the lock is not held.
    pub fn release_lock(&self, tid: TransactionId, pid: PageId) {
        let mut table = self.table.lock();
        if table.release(tid, pid) {
            debug!(%tid, %pid, "lock released");
            self.released.notify_all();
        }
    }

    /// Release every lock held by `tid`. Called once, when the transaction
    /// commits or aborts.
    pub fn release_locks_on_transaction(&self, tid: TransactionId) {
        let mut table = self.table.lock();
        let released = table.release_all(tid);
        if !released.is_empty() {
            debug!(%tid, pages = released.len(), "released all locks of transaction");
            self.released.notify_all();
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.table.lock().holds(tid, pid)
    }

    /// Snapshot of the pages currently locked by `tid`, in no particular order.
    pub fn held_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.table.lock().held_pages(tid)
    }

    pub fn lock_mode(&self, pid: PageId) -> Option<LockMode> {
        self.table.lock().page_lock(pid).map(|lock| lock.mode())
    }

    /// Snapshot of the transactions currently holding `pid`.
    pub fn holders(&self, pid: PageId) -> Vec<TransactionId> {
        self.table
            .lock()
            .page_lock(pid)
            .map(|lock| lock.holders().iter().copied().collect())
            .unwrap_or_default()
    }

    // thread_rng is thread local, so racing callers never share a generator.
    fn draw_timeout(&self) -> Duration {
        rand::thread_rng().gen_range(self.timeout.clone())
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        self.table.lock().check_invariants()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        let table = self.table.lock();
        table.num_pages() == 0 && table.num_transactions() == 0
    }
}
