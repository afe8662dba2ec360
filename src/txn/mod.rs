//! Transaction plumbing of `spec.md §4.6`/`§5`: a scheduler decides whether an access
//! proceeds, waits, or aborts; a write-ahead log observes every page mutation; the
//! `TransactionManager` wraps a `BufferCache` so callers never talk to the cache
//! directly once a transaction is open, and can always revert a page to its
//! pre-transaction bytes on abort.
//!
//! `spec.md §5` describes blocked transactions resuming through "a completion channel"
//! once a dispatcher wakes them. This crate has no executor or fiber runtime to hang a
//! channel off, so a blocked caller instead parks its own OS thread on a
//! `Condvar`, shared by every live transaction, guarded by the one `Mutex<HashSet<TxnId>>`
//! of resolved transaction ids. `commit`/`abort` insert the finishing transaction's id
//! and broadcast; every parked thread wakes, re-checks whether *its* blocker is now in
//! the set, and if not goes back to sleep. This is coarser than waking only the specific
//! waiters the scheduler names, but race-free: inserting into the set and checking it
//! happen under the same mutex the condvar itself uses, so a release can never land in
//! the gap between a waiter's check and its park. The scheduler's own returned waiter
//! list is still captured and logged, honoring its literal contract even though it isn't
//! used to target the wakeup.
//!
//! Resolved ids accumulate for the manager's lifetime; nothing currently ages them out.

pub mod scheduler;
pub mod wal;

use crate::cache::{BufferCache, PinnedPage};
use crate::common::{PageId, TxnId};
use crate::config::EngineConfig;
use crate::error::TxnError;
use crate::page::SlottedPage;
use scheduler::{make_scheduler, ReadDecision, Scheduler, WriteDecision};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use wal::WriteAheadLog;

/// Cache-intercepting wrapper: every page access under a transaction goes through
/// `read`/`write`, which consult the scheduler before touching the cache. Construct with
/// the `live_writers` set returned by `storage::revertable::RevertableStorage::new`, so
/// that writes dirtying a cache frame are also reflected in what the storage layer will
/// refuse to flush.
pub struct TransactionManager {
    cache: Arc<BufferCache>,
    header_size: u32,
    scheduler: Mutex<Box<dyn Scheduler>>,
    wal: Arc<dyn WriteAheadLog>,
    next_txn: AtomicU32,
    modified: Mutex<HashMap<TxnId, Vec<PageId>>>,
    undo: Mutex<HashMap<(TxnId, PageId), Vec<u8>>>,
    page_owners: Mutex<HashMap<PageId, HashSet<TxnId>>>,
    live_writers: Arc<Mutex<HashSet<PageId>>>,
    resolved: Mutex<HashSet<TxnId>>,
    park_cv: Condvar,
}

impl TransactionManager {
    pub fn new(
        cache: Arc<BufferCache>,
        live_writers: Arc<Mutex<HashSet<PageId>>>,
        config: &EngineConfig,
        wal: Arc<dyn WriteAheadLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            header_size: config.header_size,
            scheduler: Mutex::new(make_scheduler(config.scheduler_kind)),
            wal,
            next_txn: AtomicU32::new(0),
            modified: Mutex::new(HashMap::new()),
            undo: Mutex::new(HashMap::new()),
            page_owners: Mutex::new(HashMap::new()),
            live_writers,
            resolved: Mutex::new(HashSet::new()),
            park_cv: Condvar::new(),
        })
    }

    /// Begin a new transaction and return a handle to it.
    pub fn start(self: &Arc<Self>) -> TxnHandle {
        let txn = self.next_txn.fetch_add(1, Ordering::SeqCst);
        self.scheduler.lock().unwrap().start(txn);
        self.wal.transaction_started(txn);
        log::info!("transaction {} started", txn);
        TxnHandle {
            manager: Arc::clone(self),
            txn,
        }
    }

    /// Run `body` inside a fresh transaction: commit on `Ok`, abort on `Err`. Realizes
    /// the "transaction body is a function executed on a worker; commit/abort are
    /// explicit calls, cancellation is modeled as abort" contract of `spec.md §4.6`/`§6`.
    pub fn run_transaction<F, R>(self: &Arc<Self>, body: F) -> Result<R, TxnError>
    where
        F: FnOnce(&TxnHandle) -> Result<R, TxnError>,
    {
        let handle = self.start();
        match body(&handle) {
            Ok(value) => {
                self.commit(handle.txn)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.abort(handle.txn);
                Err(e)
            }
        }
    }

    fn park_on(&self, txn: TxnId, blocker: TxnId) {
        log::warn!("transaction {} waiting on transaction {}", txn, blocker);
        let guard = self.resolved.lock().unwrap();
        let mut guard = guard;
        while !guard.contains(&blocker) {
            guard = self.park_cv.wait(guard).unwrap();
        }
    }

    fn release(&self, txn: TxnId) {
        let mut guard = self.resolved.lock().unwrap();
        guard.insert(txn);
        self.park_cv.notify_all();
    }

    pub fn get(&self, txn: TxnId, page_id: PageId) -> Result<PinnedPage, TxnError> {
        loop {
            let decision = self.scheduler.lock().unwrap().read(txn, page_id);
            match decision {
                ReadDecision::Ok(target) => return Ok(self.cache.get_and_pin(target)?),
                ReadDecision::Abort(reason) => {
                    let _ = self.abort(txn);
                    return Err(TxnError::Aborted(txn, reason));
                }
                ReadDecision::Wait(blocker) => self.park_on(txn, blocker),
            }
        }
    }

    pub fn write<R>(&self, txn: TxnId, page_id: PageId, f: impl FnOnce(&mut SlottedPage) -> R) -> Result<R, TxnError> {
        let target = loop {
            let decision = self.scheduler.lock().unwrap().write(txn, page_id);
            match decision {
                WriteDecision::Ok(target) => break target,
                WriteDecision::Abort(reason) => {
                    let _ = self.abort(txn);
                    return Err(TxnError::Aborted(txn, reason));
                }
                WriteDecision::Wait(blocker) => self.park_on(txn, blocker),
            }
        };

        let pinned = self.cache.get_and_pin(target)?;
        self.record_first_write(txn, target, &pinned);
        let result = pinned.with_page_mut(self.header_size, f);
        self.wal.after_page_write(txn, target);
        Ok(result)
    }

    /// Capture the pre-write snapshot and fire `before_page_write` the first time `txn`
    /// touches `page_id`; later writes to the same page by the same transaction are
    /// no-ops here since the snapshot must stay the *original* bytes.
    fn record_first_write(&self, txn: TxnId, page_id: PageId, pinned: &PinnedPage) {
        let mut undo = self.undo.lock().unwrap();
        if undo.contains_key(&(txn, page_id)) {
            return;
        }
        let before = pinned.with_page(self.header_size, |p| p.as_bytes().to_vec());
        self.wal.before_page_write(txn, page_id, &before);
        undo.insert((txn, page_id), before);
        drop(undo);

        self.modified.lock().unwrap().entry(txn).or_default().push(page_id);
        self.page_owners.lock().unwrap().entry(page_id).or_default().insert(txn);
        self.live_writers.lock().unwrap().insert(page_id);
    }

    fn clear_writer_marks(&self, txn: TxnId, pages: &[PageId]) {
        let mut owners = self.page_owners.lock().unwrap();
        let mut live = self.live_writers.lock().unwrap();
        for &page in pages {
            if let Some(set) = owners.get_mut(&page) {
                set.remove(&txn);
                if set.is_empty() {
                    owners.remove(&page);
                    live.remove(&page);
                }
            }
        }
    }

    pub fn commit(&self, txn: TxnId) -> Result<(), TxnError> {
        let pages = self.modified.lock().unwrap().remove(&txn).unwrap_or_default();
        for page in &pages {
            self.undo.lock().unwrap().remove(&(txn, *page));
        }
        self.clear_writer_marks(txn, &pages);
        let waiters = self.scheduler.lock().unwrap().commit(txn);
        self.wal.transaction_committed(txn, &pages);
        log::info!("transaction {} committed, {} waiters may resume", txn, waiters.len());
        self.release(txn);
        Ok(())
    }

    pub fn abort(&self, txn: TxnId) -> Result<(), TxnError> {
        let pages = self.modified.lock().unwrap().remove(&txn).unwrap_or_default();
        for &page in &pages {
            if let Some(original) = self.undo.lock().unwrap().remove(&(txn, page)) {
                let pinned = self.cache.get_and_pin(page)?;
                pinned.with_page_mut(self.header_size, |p| {
                    *p = SlottedPage::from_bytes(original.clone(), self.header_size);
                });
            }
        }
        self.clear_writer_marks(txn, &pages);
        let waiters = self.scheduler.lock().unwrap().abort(txn);
        self.wal.transaction_aborted(txn, &pages);
        log::info!("transaction {} aborted, {} waiters may resume", txn, waiters.len());
        self.release(txn);
        Ok(())
    }
}

/// A live transaction's view onto the cache. Every read/write is routed through the
/// owning `TransactionManager`'s scheduler.
pub struct TxnHandle {
    manager: Arc<TransactionManager>,
    txn: TxnId,
}

impl TxnHandle {
    pub fn id(&self) -> TxnId {
        self.txn
    }

    pub fn get(&self, page_id: PageId) -> Result<PinnedPage, TxnError> {
        self.manager.get(self.txn, page_id)
    }

    pub fn with_page_mut<R>(&self, page_id: PageId, f: impl FnOnce(&mut SlottedPage) -> R) -> Result<R, TxnError> {
        self.manager.write(self.txn, page_id, f)
    }

    pub fn commit(self) -> Result<(), TxnError> {
        self.manager.commit(self.txn)
    }

    pub fn abort(self) -> Result<(), TxnError> {
        self.manager.abort(self.txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerKind;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::revertable::RevertableStorage;
    use crate::storage::Storage;
    use wal::InMemoryWal;

    fn manager(scheduler_kind: SchedulerKind) -> Arc<TransactionManager> {
        let mut cfg = EngineConfig::with_capacity(4);
        cfg.page_size = 64;
        cfg.header_size = 4;
        cfg.scheduler_kind = scheduler_kind;
        let raw: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let (storage, live_writers) = RevertableStorage::new(raw);
        let cache = BufferCache::new(storage, &cfg);
        TransactionManager::new(cache, live_writers, &cfg, Arc::new(InMemoryWal::new()))
    }

    #[test]
    fn committed_write_is_visible_afterward() {
        let mgr = manager(SchedulerKind::TwoPhaseLocking);
        let handle = mgr.start();
        handle.with_page_mut(0, |p| p.put_record(&[1, 2, 3], None)).unwrap();
        handle.commit().unwrap();

        let handle2 = mgr.start();
        let pinned = handle2.get(0).unwrap();
        let bytes = pinned.with_page(4, |p| p.get_record(0));
        assert_eq!(bytes, crate::page::GetStatus::Ok(vec![1, 2, 3]));
        drop(pinned);
        handle2.commit().unwrap();
    }

    #[test]
    fn aborted_write_reverts_to_pre_transaction_bytes() {
        let mgr = manager(SchedulerKind::TwoPhaseLocking);

        let setup = mgr.start();
        setup.with_page_mut(0, |p| p.put_record(&[9, 9, 9], None)).unwrap();
        setup.commit().unwrap();

        let t1 = mgr.start();
        t1.with_page_mut(0, |p| p.put_record(&[1, 1, 1], Some(0))).unwrap();
        t1.abort().unwrap();

        let t2 = mgr.start();
        let pinned = t2.get(0).unwrap();
        let bytes = pinned.with_page(4, |p| p.get_record(0));
        assert_eq!(bytes, crate::page::GetStatus::Ok(vec![9, 9, 9]));
        drop(pinned);
        t2.commit().unwrap();
    }

    #[test]
    fn revertable_storage_never_sees_a_flush_of_a_live_transactions_write() {
        let mut cfg = EngineConfig::with_capacity(1);
        cfg.page_size = 64;
        cfg.header_size = 4;
        cfg.scheduler_kind = SchedulerKind::TwoPhaseLocking;
        let raw: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let (storage, live_writers) = RevertableStorage::new(Arc::clone(&raw));
        let cache = BufferCache::new(Arc::clone(&storage), &cfg);
        let mgr = TransactionManager::new(cache.clone(), live_writers, &cfg, Arc::new(InMemoryWal::new()));

        let t1 = mgr.start();
        t1.with_page_mut(0, |p| p.put_record(&[7, 7, 7], None)).unwrap();
        // Force an eviction-time flush while the write is still uncommitted; capacity 1
        // means admitting page 1 evicts page 0.
        let _p1 = cache.get_and_pin(1).unwrap();
        drop(_p1);

        let raw_bytes = raw.read(0).unwrap();
        let page = crate::page::SlottedPage::from_bytes(raw_bytes.bytes().to_vec(), 4);
        assert_eq!(page.directory_size(), 0);

        t1.commit().unwrap();
    }
}
