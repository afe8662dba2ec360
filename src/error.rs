//! Crate-wide error types, one enum per subsystem plus a top-level `EngineError` that
//! every subsystem boundary converts into with `?`. Mirrors the propagation policy of
//! `spec.md §7`: the slotted page reports full/out-of-range conditions as status codes
//! (see `crate::page::PutStatus` / `GetStatus`), never as errors; everything past that
//! boundary is a `Result`.

use crate::common::{Oid, PageId, TxnId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("page id {0} is negative or otherwise invalid for a persisted reference")]
    InvalidPageId(i64),
    #[error("segment I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("a bulk writer was dropped without being closed")]
    BulkWriterNotClosed,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("every resident page is pinned; cannot evict to admit page {0}")]
    AllPinned(PageId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("table {0:?} not found")]
    TableNotFound(String),
    #[error("table {0:?} already exists")]
    DuplicateTableName(String),
    #[error("catalog page directory for OID {0} overflowed")]
    DirectoryOverflow(Oid),
    #[error("OID {0} has no table page directory")]
    UnknownOid(Oid),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index table {0:?} does not exist")]
    MissingIndex(String),
}

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("sort input has {runs} runs, which exceeds the fan-in bound of {bound}")]
    FanInExceeded { runs: usize, bound: usize },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction {0} was aborted: {1}")]
    Aborted(TxnId, String),
    #[error("transaction {0} is not live")]
    NotLive(TxnId),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Operator(#[from] OperatorError),
    #[error(transparent)]
    Txn(#[from] TxnError),
}
