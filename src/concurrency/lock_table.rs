use super::transaction::{Permission, TransactionId};
use crate::storage::PageId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl From<Permission> for LockMode {
    fn from(permission: Permission) -> Self {
        match permission {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Lock state of a single page.
///
/// `Exclusive` always has exactly one holder, `Shared` has at least one.
#[derive(Debug)]
pub struct PageLock {
    mode: LockMode,
    holders: HashSet<TransactionId>,
}

impl PageLock {
    fn new(mode: LockMode, tid: TransactionId) -> Self {
        let mut holders = HashSet::with_capacity(1);
        holders.insert(tid);
        Self { mode, holders }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn holders(&self) -> &HashSet<TransactionId> {
        &self.holders
    }

    pub fn is_sole_holder(&self, tid: TransactionId) -> bool {
        self.holders.len() == 1 && self.holders.contains(&tid)
    }

    fn try_upgrade(&mut self, tid: TransactionId) -> bool {
        if self.mode == LockMode::Shared && self.is_sole_holder(tid) {
            self.mode = LockMode::Exclusive;
            return true;
        }
        false
    }

    /// Join a shared lock. Returns false if `tid` was already a holder.
    fn add_holder(&mut self, tid: TransactionId) -> bool {
        debug_assert_eq!(self.mode, LockMode::Shared);
        self.holders.insert(tid)
    }
}

/// What a single evaluation of a lock request decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// No record existed, a fresh one was created.
    Acquired,
    /// Joined the holders of a shared record.
    Shared,
    /// Sole shared holder promoted in place to exclusive.
    Upgraded,
    /// Already held in a mode that covers the request.
    AlreadyHeld,
    /// Conflicts with another holder, the caller has to wait.
    Blocked,
}

/// Both lock indexes: page -> lock record, and transaction -> held pages.
///
/// Every method keeps them in agreement: `(tid, pid)` is in `transactions`
/// iff `tid` is a holder of `pages[pid]`.
#[derive(Debug, Default)]
pub struct LockTable {
    pages: HashMap<PageId, PageLock>,
    transactions: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTable {
    pub fn with_capacity(pages: usize, transactions: usize) -> Self {
        Self {
            pages: HashMap::with_capacity(pages),
            transactions: HashMap::with_capacity(transactions),
        }
    }

    /// Evaluate one lock request against the current state and apply it when
    /// it can be granted. A `Blocked` outcome leaves the table untouched.
    pub fn try_grant(&mut self, pid: PageId, tid: TransactionId, mode: LockMode) -> Grant {
        let grant = match self.pages.get_mut(&pid) {
            None => {
                self.pages.insert(pid, PageLock::new(mode, tid));
                Grant::Acquired
            }
            Some(lock) => match (lock.mode, mode) {
                (LockMode::Shared, LockMode::Shared) => {
                    if lock.add_holder(tid) {
                        Grant::Shared
                    } else {
                        Grant::AlreadyHeld
                    }
                }
                (LockMode::Shared, LockMode::Exclusive) => {
                    if lock.try_upgrade(tid) {
                        Grant::Upgraded
                    } else {
                        Grant::Blocked
                    }
                }
                (LockMode::Exclusive, _) => {
                    if lock.is_sole_holder(tid) {
                        Grant::AlreadyHeld
                    } else {
                        Grant::Blocked
                    }
                }
            },
        };

        if matches!(grant, Grant::Acquired | Grant::Shared) {
            self.transactions.entry(tid).or_default().insert(pid);
        }

        grant
    }

    /// Drop `tid` from the holders of `pid`. Returns true when the table
    /// changed.
    pub fn release(&mut self, tid: TransactionId, pid: PageId) -> bool {
        let mut changed = false;

        if let Some(held) = self.transactions.get_mut(&tid) {
            changed |= held.remove(&pid);
            if held.is_empty() {
                self.transactions.remove(&tid);
            }
        }

        if let Some(lock) = self.pages.get_mut(&pid) {
            changed |= lock.holders.remove(&tid);
            if lock.holders.is_empty() {
                self.pages.remove(&pid);
            }
        }

        changed
    }

    /// Drop every lock `tid` holds. Returns the released pages.
    pub fn release_all(&mut self, tid: TransactionId) -> Vec<PageId> {
        let held = match self.transactions.remove(&tid) {
            Some(held) => held,
            None => return vec![],
        };

        for pid in &held {
            if let Some(lock) = self.pages.get_mut(pid) {
                lock.holders.remove(&tid);
                if lock.holders.is_empty() {
                    self.pages.remove(pid);
                }
            }
        }

        held.into_iter().collect()
    }

    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.transactions
            .get(&tid)
            .map_or(false, |held| held.contains(&pid))
    }

    pub fn held_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.transactions
            .get(&tid)
            .map(|held| held.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn page_lock(&self, pid: PageId) -> Option<&PageLock> {
        self.pages.get(&pid)
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Check the structural invariants of both indexes. Used by tests.
    #[cfg(test)]
    pub fn check_invariants(&self) -> Result<(), String> {
        for (pid, lock) in &self.pages {
            if lock.holders.is_empty() {
                return Err(format!("page {pid} has an empty holder set"));
            }
            if lock.mode == LockMode::Exclusive && lock.holders.len() != 1 {
                return Err(format!(
                    "page {pid} is exclusive with {} holders",
                    lock.holders.len()
                ));
            }
            for tid in &lock.holders {
                if !self.holds(*tid, *pid) {
                    return Err(format!("{tid} holds {pid} but has no entry for it"));
                }
            }
        }

        for (tid, held) in &self.transactions {
            if held.is_empty() {
                return Err(format!("{tid} has an empty held set"));
            }
            for pid in held {
                let is_holder = self
                    .pages
                    .get(pid)
                    .map_or(false, |lock| lock.holders.contains(tid));
                if !is_holder {
                    return Err(format!("{tid} lists {pid} but is not a holder"));
                }
            }
        }

        Ok(())
    }
}
