use super::heap_file::PageProvider;
use super::page::{Page, PageId};
use crate::concurrency::{LockManager, Permission, TransactionId};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caches pages in memory and is the only path through which transactions
/// reach them. Every request takes the page lock first.
///
/// Dirty pages are never evicted before their transaction commits
/// (no steal) and are written out at commit (force), so an abort only has
/// to roll the cached copies back.
pub struct BufferPool {
    lock_manager: Arc<LockManager>,
    providers: RwLock<HashMap<u32, Arc<dyn PageProvider>>>,
    // Mapping page id to the cached page
    pages: Mutex<HashMap<PageId, Arc<RwLock<Page>>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(lock_manager: Arc<LockManager>, capacity: usize) -> Self {
        Self {
            lock_manager,
            providers: RwLock::new(HashMap::new()),
            pages: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn register(&self, provider: Arc<dyn PageProvider>) {
        self.providers.write().insert(provider.table_id(), provider);
    }

    /// Fetch `pid` for `tid` with the given permission.
    ///
    /// Blocks while the page lock is unavailable. `Error::TransactionAborted`
    /// is passed through untouched; the caller has to abort the transaction.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        permission: Permission,
    ) -> Result<Arc<RwLock<Page>>> {
        self.lock_manager.acquire_lock(pid, tid, permission)?;

        let mut pages = self.pages.lock();
        if let Some(page) = pages.get(&pid) {
            return Ok(Arc::clone(page));
        }

        if pages.len() >= self.capacity {
            Self::evict_page(&mut pages)?;
        }

        let page = self.provider(pid.table_id)?.read_page(pid)?;
        debug!(%tid, %pid, "loaded page into buffer pool");

        let page = Arc::new(RwLock::new(page));
        pages.insert(pid, Arc::clone(&page));
        Ok(page)
    }

    /// Give up `tid`'s lock on `pid` before the transaction ends. This
    /// breaks strict two phase locking and is only safe for pages the
    /// transaction has not modified.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release_lock(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Finish `tid`: write its dirty pages on commit, roll them back on abort,
    /// then release every lock it holds.
    ///
    /// If a write fails during commit, the remaining dirty pages of `tid` are
    /// rolled back before the locks go, so no other transaction ever sees
    /// unwritten changes. Pages written before the failure stay on disk, and
    /// the error is returned.
    ///
    /// The caller must not hold any page guard of `tid` when calling this.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = self.complete_pages(tid, commit);
        self.lock_manager.release_locks_on_transaction(tid);
        result
    }

    fn complete_pages(&self, tid: TransactionId, commit: bool) -> Result<()> {
        // tid can only have dirtied pages it holds a lock on.
        let mut held = self.lock_manager.held_pages(tid);
        held.sort();

        let mut result = Ok(());
        for (pid, page) in self.cached(&held) {
            if page.read().dirtied_by() != Some(tid) {
                continue;
            }

            // Dirty pages are exclusively locked by tid.
            let mut page = page.write();
            if commit && result.is_ok() {
                match self.write_back(pid, &page) {
                    Ok(()) => {
                        page.mark_clean();
                        debug!(%tid, %pid, "flushed page on commit");
                        continue;
                    }
                    Err(err) => {
                        warn!(%tid, %pid, %err, "commit failed to write page");
                        result = Err(err);
                    }
                }
            }
            page.rollback();
            debug!(%tid, %pid, "rolled back page");
        }
        result
    }

    /// Write every dirty page to its provider, whoever dirtied it.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pids: Vec<PageId> = self.pages.lock().keys().copied().collect();
        for (pid, page) in self.cached(&pids) {
            let mut page = page.write();
            if page.is_dirty() {
                self.write_back(pid, &page)?;
                page.mark_clean();
            }
        }
        Ok(())
    }

    // Page guards are never taken while the map is locked: a transaction
    // holding a guard may itself be waiting for the map in get_page.
    fn cached(&self, pids: &[PageId]) -> Vec<(PageId, Arc<RwLock<Page>>)> {
        let pages = self.pages.lock();
        pids.iter()
            .filter_map(|pid| pages.get(pid).map(|page| (*pid, Arc::clone(page))))
            .collect()
    }

    fn write_back(&self, pid: PageId, page: &Page) -> Result<()> {
        self.provider(pid.table_id)?.write_page(page)
    }

    pub fn num_cached(&self) -> usize {
        self.pages.lock().len()
    }

    fn provider(&self, table_id: u32) -> Result<Arc<dyn PageProvider>> {
        self.providers
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(Error::UnknownTable(table_id))
    }

    // Only pages that are clean and not referenced outside the pool can go.
    // Evicting a page someone still holds would orphan their writes.
    fn evict_page(pages: &mut HashMap<PageId, Arc<RwLock<Page>>>) -> Result<()> {
        let victim = pages
            .iter()
            .find(|(_, page)| Arc::strong_count(page) == 1 && !page.read().is_dirty())
            .map(|(pid, _)| *pid);

        match victim {
            Some(pid) => {
                pages.remove(&pid);
                debug!(%pid, "evicted page");
                Ok(())
            }
            None => Err(Error::BufferPoolFull),
        }
    }
}
