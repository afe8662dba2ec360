//! Paged storage: a byte-addressable pool of fixed-size pages with a cost-accounted,
//! rotating-disk-flavored access model. Two interchangeable variants are provided: an
//! in-memory emulator (`memory::MemoryStorage`) and a segment-file-backed variant
//! (`file::FileStorage`). Both implement the `Storage` trait below so the buffer cache
//! and the operators never need to know which backend they are driving.
//!
//! Grounded on the disk-manager split in `examples/shoyo-jindb/src/disk/manager.rs` and
//! `examples/shoyo-jindb/src/storage/disk_manager.rs`, generalized into a trait so a
//! second backend can be swapped in per `spec.md §4.1`.

pub mod file;
pub mod memory;
pub mod revertable;

use crate::common::PageId;
use crate::error::StorageError;
use std::sync::atomic::{AtomicU64, Ordering};

/// An independent, owned copy of one page's bytes plus its id.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    bytes: Vec<u8>,
}

impl Page {
    pub fn new(id: PageId, page_size: u32) -> Self {
        Self {
            id,
            bytes: vec![0u8; page_size as usize],
        }
    }

    pub fn from_bytes(id: PageId, bytes: Vec<u8>) -> Self {
        Self { id, bytes }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn set_id(&mut self, id: PageId) {
        self.id = id;
    }
}

/// A bit-for-bit accounting of storage work performed so far, expressed in the abstract
/// time-units of `spec.md §4.1`. Random accesses cost `random_access_cost`; bulk
/// operations cost that plus `sequential_access_cost` per page touched. The running
/// total is monotonically increasing and is read by tests/benchmarks as the primary
/// efficiency oracle (`spec.md §8`).
#[derive(Debug, Default)]
pub struct CostAccumulator {
    total_micros: AtomicU64,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self {
            total_micros: AtomicU64::new(0),
        }
    }

    pub fn add(&self, cost: f64) {
        debug_assert!(cost >= 0.0);
        self.total_micros
            .fetch_add((cost * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    pub fn total(&self) -> f64 {
        self.total_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    pub fn reset(&self) {
        self.total_micros.store(0, Ordering::SeqCst);
    }
}

/// The durable paged-storage contract. Implementations must be safe to share behind an
/// `Arc` and call concurrently; the cost accumulator and any internal page table are
/// expected to synchronize themselves.
pub trait Storage: Send + Sync {
    /// Size in bytes of every page this storage serves.
    fn page_size(&self) -> u32;

    /// Read one page, returning an independent copy. A page that has never been written
    /// is implicitly a zero page (first-access semantics from `spec.md §4.1`).
    fn read(&self, page_id: PageId) -> Result<Page, StorageError>;

    /// Feed `n` consecutive pages starting at `start` to `consumer`, strictly in id
    /// order. `start == -1` means "the next available id after the current maximum".
    fn bulk_read(
        &self,
        start: i64,
        n: u32,
        consumer: &mut dyn FnMut(Page),
    ) -> Result<(), StorageError>;

    /// Store a copy of `page`, charging one random-access cost. Fails if `page.id()`
    /// would be interpreted as negative (callers never construct such a page; this
    /// exists for defense at the boundary).
    fn write(&self, page: &Page) -> Result<(), StorageError>;

    /// Store a copy of `page` without charging any access cost. Used internally by
    /// `BulkWriter`, which charges the whole batch's cost exactly once on `close`.
    fn write_no_cost(&self, page: &Page) -> Result<(), StorageError>;

    /// Open a scoped bulk writer that assigns sequential ids starting at `start` (or the
    /// next free id if `start == -1`). The writer must be `close`d on every exit path;
    /// closing records the sequential-scan cost exactly once.
    fn bulk_write(&self, start: i64) -> Result<BulkWriter<'_>, StorageError>;

    /// The next id that would be assigned by an allocating write.
    fn next_page_id(&self) -> PageId;

    fn cost(&self) -> &CostAccumulator;

    /// Cost of one random access, in abstract time-units.
    fn random_access_cost(&self) -> f64;

    /// Additional cost per page of a bulk/sequential access, in abstract time-units.
    fn sequential_access_cost(&self) -> f64;
}

/// A single-use scoped resource returned by `Storage::bulk_write`. Every page appended
/// through `write_next` is buffered until `close` (or `Drop`, as a safety net) flushes
/// them and charges the sequential-scan cost once, matching the "treat as single-use
/// scoped resource" guidance in `spec.md §9`.
pub struct BulkWriter<'a> {
    storage: &'a dyn Storage,
    next_id: PageId,
    first_id: PageId,
    pages: Vec<Page>,
    closed: bool,
}

impl<'a> BulkWriter<'a> {
    pub(crate) fn new(storage: &'a dyn Storage, first_id: PageId) -> Self {
        Self {
            storage,
            next_id: first_id,
            first_id,
            pages: Vec::new(),
            closed: false,
        }
    }

    /// The id that will be assigned to the next page written through this writer.
    pub fn next_id(&self) -> PageId {
        self.next_id
    }

    /// The id assigned to the first page written through this writer.
    pub fn first_id(&self) -> PageId {
        self.first_id
    }

    /// Append a page's worth of bytes at the next sequential id and return that id.
    pub fn write_next(&mut self, bytes: Vec<u8>) -> PageId {
        let id = self.next_id;
        self.pages.push(Page::from_bytes(id, bytes));
        self.next_id += 1;
        id
    }

    /// Flush every buffered page to storage and charge the bulk-access cost once. Must
    /// be called on every exit path; `Drop` calls it as a fallback so an early return
    /// never silently loses pages or cost accounting.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for page in &self.pages {
            self.storage.write_no_cost(page)?;
        }
        let cost = self.storage.random_access_cost()
            + self.storage.sequential_access_cost() * self.pages.len() as f64;
        self.storage.cost().add(cost);
        Ok(())
    }
}

impl<'a> Drop for BulkWriter<'a> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close_inner();
        }
    }
}
