//! Concurrency-control strategies of `spec.md §4.6`/`§5`: two-phase locking, basic
//! timestamp ordering, and a simplified multi-version scheme. All three answer the same
//! question on every page access — "may this transaction proceed, should it wait on
//! another, or must it abort" — which `TransactionManager` asks before touching the
//! cache. Mirrors the trait-plus-factory shape of `cache::policy`.

use crate::common::{PageId, TxnId};
use crate::config::SchedulerKind;
use std::collections::{HashMap, HashSet};

/// The answer to "may `txn` read `page`".
pub enum ReadDecision {
    Ok(PageId),
    Abort(String),
    Wait(TxnId),
}

/// The answer to "may `txn` write `page`". The spec's MVCC "version_write_callback" is
/// simplified here to a plain `Ok(PageId)`: this crate keeps one physical copy per page
/// rather than a chain of versions, so there is nothing for the callback to select among.
pub enum WriteDecision {
    Ok(PageId),
    Abort(String),
    Wait(TxnId),
}

/// A pluggable concurrency-control strategy. `commit`/`abort` release whatever state the
/// strategy holds for `txn` and return the transactions that had been logged as waiting
/// on it — `TransactionManager` uses this only for logging; actual wakeup is a broadcast
/// keyed on transaction id (see `txn::mod`'s module doc comment).
pub trait Scheduler: Send {
    fn start(&mut self, txn: TxnId);
    fn read(&mut self, txn: TxnId, page: PageId) -> ReadDecision;
    fn write(&mut self, txn: TxnId, page: PageId) -> WriteDecision;
    fn commit(&mut self, txn: TxnId) -> Vec<TxnId>;
    fn abort(&mut self, txn: TxnId) -> Vec<TxnId>;
}

pub fn make_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::TwoPhaseLocking => Box::new(TwoPhaseLocking::new()),
        SchedulerKind::TimestampOrdering => Box::new(TimestampOrdering::new()),
        SchedulerKind::Mvcc => Box::new(Mvcc::new()),
    }
}

struct PageLock {
    readers: HashSet<TxnId>,
    writer: Option<TxnId>,
}

/// Strict two-phase locking: shared read locks, one exclusive write lock per page, no
/// lock upgrades beyond "the sole reader becomes the writer". A lock request that
/// conflicts with another live holder waits on that holder rather than aborting.
pub struct TwoPhaseLocking {
    locks: HashMap<PageId, PageLock>,
    held_by: HashMap<TxnId, HashSet<PageId>>,
    waiting: HashMap<TxnId, HashSet<TxnId>>,
}

impl TwoPhaseLocking {
    pub fn new() -> Self {
        Self {
            locks: HashMap::new(),
            held_by: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    fn note_wait(&mut self, waiter: TxnId, blocker: TxnId) {
        self.waiting.entry(blocker).or_default().insert(waiter);
    }

    fn release(&mut self, txn: TxnId) -> Vec<TxnId> {
        for page in self.held_by.remove(&txn).unwrap_or_default() {
            if let Some(lock) = self.locks.get_mut(&page) {
                lock.readers.remove(&txn);
                if lock.writer == Some(txn) {
                    lock.writer = None;
                }
                if lock.writer.is_none() && lock.readers.is_empty() {
                    self.locks.remove(&page);
                }
            }
        }
        self.waiting.remove(&txn).map(|s| s.into_iter().collect()).unwrap_or_default()
    }
}

impl Scheduler for TwoPhaseLocking {
    fn start(&mut self, txn: TxnId) {
        self.held_by.entry(txn).or_default();
    }

    fn read(&mut self, txn: TxnId, page: PageId) -> ReadDecision {
        let lock = self.locks.entry(page).or_insert_with(|| PageLock {
            readers: HashSet::new(),
            writer: None,
        });
        match lock.writer {
            Some(w) if w != txn => {
                self.waiting.entry(w).or_default().insert(txn);
                ReadDecision::Wait(w)
            }
            _ => {
                lock.readers.insert(txn);
                self.held_by.entry(txn).or_default().insert(page);
                ReadDecision::Ok(page)
            }
        }
    }

    fn write(&mut self, txn: TxnId, page: PageId) -> WriteDecision {
        let lock = self.locks.entry(page).or_insert_with(|| PageLock {
            readers: HashSet::new(),
            writer: None,
        });
        if let Some(w) = lock.writer {
            if w == txn {
                self.held_by.entry(txn).or_default().insert(page);
                return WriteDecision::Ok(page);
            }
            self.waiting.entry(w).or_default().insert(txn);
            return WriteDecision::Wait(w);
        }
        if let Some(&other) = lock.readers.iter().find(|&&r| r != txn) {
            self.waiting.entry(other).or_default().insert(txn);
            return WriteDecision::Wait(other);
        }
        lock.writer = Some(txn);
        lock.readers.remove(&txn);
        self.held_by.entry(txn).or_default().insert(page);
        WriteDecision::Ok(page)
    }

    fn commit(&mut self, txn: TxnId) -> Vec<TxnId> {
        self.release(txn)
    }

    fn abort(&mut self, txn: TxnId) -> Vec<TxnId> {
        self.release(txn)
    }
}

/// Basic timestamp ordering, transaction id doubling as timestamp. A read/write that
/// arrives "too late" relative to a page's recorded high-water mark aborts outright
/// instead of waiting — this strategy never blocks.
pub struct TimestampOrdering {
    read_ts: HashMap<PageId, TxnId>,
    write_ts: HashMap<PageId, TxnId>,
}

impl TimestampOrdering {
    pub fn new() -> Self {
        Self {
            read_ts: HashMap::new(),
            write_ts: HashMap::new(),
        }
    }
}

impl Scheduler for TimestampOrdering {
    fn start(&mut self, _txn: TxnId) {}

    fn read(&mut self, txn: TxnId, page: PageId) -> ReadDecision {
        if let Some(&wts) = self.write_ts.get(&page) {
            if txn < wts {
                return ReadDecision::Abort(format!(
                    "transaction {} read page {} after a younger transaction {} already wrote it",
                    txn, page, wts
                ));
            }
        }
        let entry = self.read_ts.entry(page).or_insert(txn);
        if txn > *entry {
            *entry = txn;
        }
        ReadDecision::Ok(page)
    }

    fn write(&mut self, txn: TxnId, page: PageId) -> WriteDecision {
        if let Some(&rts) = self.read_ts.get(&page) {
            if txn < rts {
                return WriteDecision::Abort(format!(
                    "transaction {} wrote page {} after a younger transaction {} already read it",
                    txn, page, rts
                ));
            }
        }
        if let Some(&wts) = self.write_ts.get(&page) {
            if txn < wts {
                return WriteDecision::Abort(format!(
                    "transaction {} wrote page {} after a younger transaction {} already wrote it",
                    txn, page, wts
                ));
            }
        }
        let entry = self.write_ts.entry(page).or_insert(txn);
        if txn > *entry {
            *entry = txn;
        }
        WriteDecision::Ok(page)
    }

    fn commit(&mut self, _txn: TxnId) -> Vec<TxnId> {
        Vec::new()
    }

    fn abort(&mut self, _txn: TxnId) -> Vec<TxnId> {
        Vec::new()
    }
}

/// A simplified multi-version scheme: reads always see the last committed view and
/// never block or abort; writes conflict only against another live transaction's
/// in-flight write to the same page, in which case the later writer waits rather than
/// aborting.
pub struct Mvcc {
    pending_writer: HashMap<PageId, TxnId>,
    held_writes: HashMap<TxnId, HashSet<PageId>>,
    waiting: HashMap<TxnId, HashSet<TxnId>>,
}

impl Mvcc {
    pub fn new() -> Self {
        Self {
            pending_writer: HashMap::new(),
            held_writes: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    fn release(&mut self, txn: TxnId) -> Vec<TxnId> {
        for page in self.held_writes.remove(&txn).unwrap_or_default() {
            if self.pending_writer.get(&page) == Some(&txn) {
                self.pending_writer.remove(&page);
            }
        }
        self.waiting.remove(&txn).map(|s| s.into_iter().collect()).unwrap_or_default()
    }
}

impl Scheduler for Mvcc {
    fn start(&mut self, txn: TxnId) {
        self.held_writes.entry(txn).or_default();
    }

    fn read(&mut self, _txn: TxnId, page: PageId) -> ReadDecision {
        ReadDecision::Ok(page)
    }

    fn write(&mut self, txn: TxnId, page: PageId) -> WriteDecision {
        if let Some(&w) = self.pending_writer.get(&page) {
            if w != txn {
                self.waiting.entry(w).or_default().insert(txn);
                return WriteDecision::Wait(w);
            }
            self.held_writes.entry(txn).or_default().insert(page);
            return WriteDecision::Ok(page);
        }
        self.pending_writer.insert(page, txn);
        self.held_writes.entry(txn).or_default().insert(page);
        WriteDecision::Ok(page)
    }

    fn commit(&mut self, txn: TxnId) -> Vec<TxnId> {
        self.release(txn)
    }

    fn abort(&mut self, txn: TxnId) -> Vec<TxnId> {
        self.release(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_phase_locking_blocks_a_conflicting_writer_until_release() {
        let mut s = TwoPhaseLocking::new();
        s.start(1);
        s.start(2);
        assert!(matches!(s.write(1, 10), WriteDecision::Ok(10)));
        assert!(matches!(s.write(2, 10), WriteDecision::Wait(1)));
        let waiters = s.commit(1);
        assert_eq!(waiters, vec![2]);
        assert!(matches!(s.write(2, 10), WriteDecision::Ok(10)));
    }

    #[test]
    fn two_phase_locking_allows_concurrent_readers() {
        let mut s = TwoPhaseLocking::new();
        s.start(1);
        s.start(2);
        assert!(matches!(s.read(1, 10), ReadDecision::Ok(10)));
        assert!(matches!(s.read(2, 10), ReadDecision::Ok(10)));
        assert!(matches!(s.write(1, 10), WriteDecision::Wait(2)));
    }

    #[test]
    fn timestamp_ordering_aborts_a_late_writer() {
        let mut s = TimestampOrdering::new();
        s.start(5);
        s.start(10);
        assert!(matches!(s.read(10, 1), ReadDecision::Ok(1)));
        assert!(matches!(s.write(5, 1), WriteDecision::Abort(_)));
    }

    #[test]
    fn timestamp_ordering_allows_an_in_order_writer() {
        let mut s = TimestampOrdering::new();
        assert!(matches!(s.read(5, 1), ReadDecision::Ok(1)));
        assert!(matches!(s.write(10, 1), WriteDecision::Ok(1)));
    }

    #[test]
    fn mvcc_never_blocks_reads_but_serializes_writers() {
        let mut s = Mvcc::new();
        s.start(1);
        s.start(2);
        assert!(matches!(s.read(2, 10), ReadDecision::Ok(10)));
        assert!(matches!(s.write(1, 10), WriteDecision::Ok(10)));
        assert!(matches!(s.write(2, 10), WriteDecision::Wait(1)));
        let waiters = s.abort(1);
        assert_eq!(waiters, vec![2]);
        assert!(matches!(s.write(2, 10), WriteDecision::Ok(10)));
    }
}
