//! A `Storage` decorator used by the transaction manager: writes to any page still held
//! open by a live transaction are silently dropped instead of reaching the inner
//! storage, per `spec.md §4.6`'s "a revertable storage wrapper drops cache flushes for
//! pages still modified by a live transaction, to prevent uncommitted bytes reaching
//! disk." Every other method passes straight through to `inner`.

use super::{BulkWriter, CostAccumulator, Page, Storage};
use crate::common::PageId;
use crate::error::StorageError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub struct RevertableStorage {
    inner: Arc<dyn Storage>,
    live_writers: Arc<Mutex<HashSet<PageId>>>,
}

impl RevertableStorage {
    /// Wrap `inner`. Returns the wrapper plus the shared `live_writers` set; the caller
    /// hands that same set to the `TransactionManager` that will mark/clear pages in it
    /// as transactions touch and resolve them.
    pub fn new(inner: Arc<dyn Storage>) -> (Arc<Self>, Arc<Mutex<HashSet<PageId>>>) {
        let live_writers = Arc::new(Mutex::new(HashSet::new()));
        (
            Arc::new(Self {
                inner,
                live_writers: Arc::clone(&live_writers),
            }),
            live_writers,
        )
    }

    fn is_live(&self, page_id: PageId) -> bool {
        self.live_writers.lock().unwrap().contains(&page_id)
    }
}

impl Storage for RevertableStorage {
    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn read(&self, page_id: PageId) -> Result<Page, StorageError> {
        self.inner.read(page_id)
    }

    fn bulk_read(&self, start: i64, n: u32, consumer: &mut dyn FnMut(Page)) -> Result<(), StorageError> {
        self.inner.bulk_read(start, n, consumer)
    }

    fn write(&self, page: &Page) -> Result<(), StorageError> {
        if self.is_live(page.id()) {
            log::debug!("dropping flush of page {}, still modified by a live transaction", page.id());
            return Ok(());
        }
        self.inner.write(page)
    }

    fn write_no_cost(&self, page: &Page) -> Result<(), StorageError> {
        if self.is_live(page.id()) {
            return Ok(());
        }
        self.inner.write_no_cost(page)
    }

    fn bulk_write(&self, start: i64) -> Result<BulkWriter<'_>, StorageError> {
        self.inner.bulk_write(start)
    }

    fn next_page_id(&self) -> PageId {
        self.inner.next_page_id()
    }

    fn cost(&self) -> &CostAccumulator {
        self.inner.cost()
    }

    fn random_access_cost(&self) -> f64 {
        self.inner.random_access_cost()
    }

    fn sequential_access_cost(&self) -> f64 {
        self.inner.sequential_access_cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn write_is_dropped_while_page_is_marked_live() {
        let inner: Arc<dyn Storage> = Arc::new(MemoryStorage::new(64));
        let (wrapped, live_writers) = RevertableStorage::new(Arc::clone(&inner));

        live_writers.lock().unwrap().insert(5);
        wrapped.write(&Page::from_bytes(5, vec![9u8; 64])).unwrap();
        let read_back = inner.read(5).unwrap();
        assert_eq!(read_back.bytes(), vec![0u8; 64].as_slice());

        live_writers.lock().unwrap().remove(&5);
        wrapped.write(&Page::from_bytes(5, vec![9u8; 64])).unwrap();
        let read_back = inner.read(5).unwrap();
        assert_eq!(read_back.bytes(), vec![9u8; 64].as_slice());
    }
}
