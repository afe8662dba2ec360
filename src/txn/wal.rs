//! The write-ahead logging hooks of `spec.md §4.6`. The log's format is left to the
//! implementation; `InMemoryWal` is the default, an append-only `Vec<WalRecord>` behind a
//! `Mutex`. It is a concrete struct implementing `WriteAheadLog` so a durable
//! implementation (file-backed, fsync'd) could be substituted without the transaction
//! manager noticing.

use crate::common::{PageId, TxnId};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum WalRecord {
    Started(TxnId),
    BeforeWrite { txn: TxnId, page: PageId, before: Vec<u8> },
    AfterWrite { txn: TxnId, page: PageId },
    Aborted { txn: TxnId, modified: Vec<PageId> },
    Committed { txn: TxnId, modified: Vec<PageId> },
}

/// The log hooks a `TransactionManager` fires around a transaction's lifecycle.
/// Implementations must be safe to share behind an `Arc` and call concurrently.
pub trait WriteAheadLog: Send + Sync {
    fn transaction_started(&self, txn: TxnId);

    /// Called once per page, just before its first write under `txn`, carrying the
    /// pre-image so a durable log could replay undo on crash recovery.
    fn before_page_write(&self, txn: TxnId, page: PageId, before: &[u8]);

    fn after_page_write(&self, txn: TxnId, page: PageId);

    fn transaction_aborted(&self, txn: TxnId, modified: &[PageId]);

    fn transaction_committed(&self, txn: TxnId, modified: &[PageId]);
}

#[derive(Default)]
pub struct InMemoryWal {
    records: Mutex<Vec<WalRecord>>,
}

impl InMemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl WriteAheadLog for InMemoryWal {
    fn transaction_started(&self, txn: TxnId) {
        self.records.lock().unwrap().push(WalRecord::Started(txn));
    }

    fn before_page_write(&self, txn: TxnId, page: PageId, before: &[u8]) {
        self.records.lock().unwrap().push(WalRecord::BeforeWrite {
            txn,
            page,
            before: before.to_vec(),
        });
    }

    fn after_page_write(&self, txn: TxnId, page: PageId) {
        self.records.lock().unwrap().push(WalRecord::AfterWrite { txn, page });
    }

    fn transaction_aborted(&self, txn: TxnId, modified: &[PageId]) {
        self.records.lock().unwrap().push(WalRecord::Aborted {
            txn,
            modified: modified.to_vec(),
        });
    }

    fn transaction_committed(&self, txn: TxnId, modified: &[PageId]) {
        self.records.lock().unwrap().push(WalRecord::Committed {
            txn,
            modified: modified.to_vec(),
        });
    }
}
