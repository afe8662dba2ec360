//! An in-memory paged storage emulator: a page table keyed by id, no persistence, with
//! the reference cost model of `spec.md §4.1`. Grounded on the role played by
//! `examples/shoyo-jindb/src/disk/manager.rs`, generalized behind the `Storage` trait.

use super::{BulkWriter, CostAccumulator, Page, Storage};
use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

pub struct MemoryStorage {
    page_size: u32,
    random_access_cost: f64,
    sequential_access_cost: f64,
    pages: RwLock<HashMap<u32, Vec<u8>>>,
    next_id: AtomicU32,
    cost: CostAccumulator,
}

impl MemoryStorage {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            random_access_cost: crate::common::RANDOM_ACCESS_COST,
            sequential_access_cost: crate::common::SEQUENTIAL_ACCESS_COST,
            pages: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            cost: CostAccumulator::new(),
        }
    }

    pub fn with_costs(page_size: u32, random_cost: f64, sequential_cost: f64) -> Self {
        Self {
            random_access_cost: random_cost,
            sequential_access_cost: sequential_cost,
            ..Self::new(page_size)
        }
    }

    fn bump_next_id(&self, id: u32) {
        let mut cur = self.next_id.load(Ordering::SeqCst);
        while id >= cur {
            match self
                .next_id
                .compare_exchange(cur, id + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }
}

impl Storage for MemoryStorage {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read(&self, page_id: u32) -> Result<Page, StorageError> {
        self.cost.add(self.random_access_cost);
        let pages = self.pages.read().unwrap();
        let bytes = match pages.get(&page_id) {
            Some(bytes) => bytes.clone(),
            None => vec![0u8; self.page_size as usize],
        };
        drop(pages);
        self.bump_next_id(page_id);
        Ok(Page::from_bytes(page_id, bytes))
    }

    fn bulk_read(
        &self,
        start: i64,
        n: u32,
        consumer: &mut dyn FnMut(Page),
    ) -> Result<(), StorageError> {
        let start_id = if start < 0 {
            self.next_page_id()
        } else {
            start as u32
        };
        self.cost
            .add(self.random_access_cost + self.sequential_access_cost * n as f64);
        let pages = self.pages.read().unwrap();
        for i in 0..n {
            let id = start_id + i;
            let bytes = pages
                .get(&id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; self.page_size as usize]);
            consumer(Page::from_bytes(id, bytes));
        }
        Ok(())
    }

    fn write(&self, page: &Page) -> Result<(), StorageError> {
        self.cost.add(self.random_access_cost);
        self.write_no_cost(page)
    }

    fn write_no_cost(&self, page: &Page) -> Result<(), StorageError> {
        let mut pages = self.pages.write().unwrap();
        pages.insert(page.id(), page.bytes().to_vec());
        drop(pages);
        self.bump_next_id(page.id());
        Ok(())
    }

    fn bulk_write(&self, start: i64) -> Result<BulkWriter<'_>, StorageError> {
        let first_id = if start < 0 {
            self.next_page_id()
        } else {
            start as u32
        };
        Ok(BulkWriter::new(self, first_id))
    }

    fn next_page_id(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    fn cost(&self) -> &CostAccumulator {
        &self.cost
    }

    fn random_access_cost(&self) -> f64 {
        self.random_access_cost
    }

    fn sequential_access_cost(&self) -> f64 {
        self.sequential_access_cost
    }
}
