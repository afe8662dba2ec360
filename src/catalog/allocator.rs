//! The zero page: a dedicated counters page handing out fresh catalog-page ids and
//! fresh data-page ids, per `spec.md §4.4`/§6 ("data-page ids come from a separate
//! monotonic counter, persisted on page 0 along with the catalog-page counter").
//!
//! OID 0 and OID 1 already reserve page ids 0 and 1 as the head catalog pages of the
//! name and attribute system tables (`spec.md §3`: "Table OID ... reserved OIDs 0 ...
//! and 1"; single-page and linked-catalog directories both use the OID as the head
//! page id). Literally placing the allocator counters on page 0 would collide with the
//! name table's own head page, so this implementation places them on the last id of
//! the reserved root/catalog region instead — a resolved ambiguity, recorded in
//! DESIGN.md rather than guessed at silently.

use crate::cache::BufferCache;
use crate::common::PageId;
use crate::error::CacheError;
use std::sync::Arc;
use std::sync::Mutex;

const ZERO_PAGE_HEADER_SIZE: u32 = 12;
const NEXT_CATALOG_OFFSET: u32 = 4;
const NEXT_DATA_OFFSET: u32 = 8;

/// Hands out fresh catalog-page ids (drawn from the reserved root region) and fresh
/// data-page ids (drawn from the space above it). Guarded by its own mutex so
/// concurrent callers serialize on the counters without needing the whole catalog
/// locked.
pub struct PageAllocator {
    zero_page_id: PageId,
    data_start: PageId,
    lock: Mutex<()>,
}

impl PageAllocator {
    pub fn new(reserved_id_range: u32) -> Self {
        Self {
            zero_page_id: reserved_id_range - 1,
            data_start: reserved_id_range,
            lock: Mutex::new(()),
        }
    }

    /// Initialize the counters on first use. Idempotent: a zero page that already
    /// carries nonzero counters (both catalog and data counters start above 0 by
    /// construction) is left untouched. Returns whether this call performed the
    /// initialization (`false` means the counters were already set up by an earlier
    /// call or an earlier run against the same storage) — callers use this to decide
    /// whether the rest of the catalog's one-time setup still needs to run.
    pub fn bootstrap(&self, cache: &Arc<BufferCache>) -> Result<bool, CacheError> {
        let _guard = self.lock.lock().unwrap();
        let page = cache.get_and_pin(self.zero_page_id)?;
        let needs_init = page.with_page(ZERO_PAGE_HEADER_SIZE, |p| {
            p.get_header_u32(NEXT_CATALOG_OFFSET) == 0 && p.get_header_u32(NEXT_DATA_OFFSET) == 0
        });
        if needs_init {
            page.with_page_mut(ZERO_PAGE_HEADER_SIZE, |p| {
                // Catalog-page ids 0 and 1 are already taken by the name/attribute
                // system tables' head pages; the next free one is 2.
                p.set_header_u32(NEXT_CATALOG_OFFSET, 2);
                p.set_header_u32(NEXT_DATA_OFFSET, self.data_start);
            });
        }
        Ok(needs_init)
    }

    /// Allocate and return one fresh catalog-page id.
    pub fn next_catalog_page_id(&self, cache: &Arc<BufferCache>) -> Result<PageId, CacheError> {
        let _guard = self.lock.lock().unwrap();
        let page = cache.get_and_pin(self.zero_page_id)?;
        let id = page.with_page_mut(ZERO_PAGE_HEADER_SIZE, |p| {
            let id = p.get_header_u32(NEXT_CATALOG_OFFSET);
            p.set_header_u32(NEXT_CATALOG_OFFSET, id + 1);
            id
        });
        Ok(id)
    }

    /// Allocate `n` sequential fresh data-page ids and return the first.
    pub fn next_data_page_ids(&self, cache: &Arc<BufferCache>, n: u32) -> Result<PageId, CacheError> {
        let _guard = self.lock.lock().unwrap();
        let page = cache.get_and_pin(self.zero_page_id)?;
        let first = page.with_page_mut(ZERO_PAGE_HEADER_SIZE, |p| {
            let first = p.get_header_u32(NEXT_DATA_OFFSET);
            p.set_header_u32(NEXT_DATA_OFFSET, first + n);
            first
        });
        Ok(first)
    }
}
