//! `TablePageDirectory`: maps a table OID to the ordered set of its data-page ids and
//! allocates more on request, per `spec.md §4.4`. Two interchangeable implementations
//! are provided, grounded on the page-directory role played by
//! `examples/shoyo-jindb/src/relation/heap.rs` (there, a relation's page ids are kept
//! as an in-memory `Vec`; here the directory is itself persisted as catalog pages, as
//! `spec.md` requires).

use super::allocator::PageAllocator;
use crate::cache::BufferCache;
use crate::common::io::{read_u32, write_u32};
use crate::common::{Oid, PageId};
use crate::error::CatalogError;
use crate::page::{GetStatus, PutStatus, SlottedPage};
use std::sync::Arc;

/// Sentinel stored in a linked catalog page's `nextPageId` header field meaning "this
/// is the last catalog page in the chain."
const NO_NEXT_PAGE: u32 = u32::MAX;
const CATALOG_HEADER_SIZE: u32 = 12;
const LAST_PAGE_OFFSET: u32 = 4;
const NEXT_PAGE_OFFSET: u32 = 8;

fn encode_page_id(id: PageId) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    write_u32(&mut buf, 0, id).unwrap();
    buf
}

fn decode_page_id(bytes: &[u8]) -> PageId {
    read_u32(bytes, 0).unwrap()
}

/// Shared contract between the single-page and linked-catalog implementations.
pub trait TablePageDirectory: Send + Sync {
    /// Initialize a fresh, empty directory for `oid`. The head catalog page's id
    /// equals `oid`.
    fn create(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<(), CatalogError>;

    /// Every data-page id currently in `oid`'s directory, in insertion order.
    fn page_ids(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<Vec<PageId>, CatalogError>;

    fn page_count(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<u32, CatalogError> {
        Ok(self.page_ids(cache, oid)?.len() as u32)
    }

    /// Allocate `n` fresh data pages from `allocator` and append their ids to `oid`'s
    /// directory. Returns the first allocated id.
    fn add_page(
        &self,
        cache: &Arc<BufferCache>,
        allocator: &PageAllocator,
        oid: Oid,
        n: u32,
    ) -> Result<PageId, CatalogError>;
}

/// The simple page directory: the entire directory lives on one page whose id equals
/// the OID; once that page is full, further `add_page` calls fail. Per `spec.md §9`'s
/// open question, this mirrors a plausible bug in the source (using the OID itself as
/// the directory page id leaves no room for growth beyond one page) and is kept only
/// as an illustrative fallback — `LinkedCatalogDirectory` is the implementation this
/// engine actually builds tables against.
pub struct SinglePageDirectory;

impl TablePageDirectory for SinglePageDirectory {
    fn create(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<(), CatalogError> {
        let page = cache.get_and_pin(oid)?;
        page.with_page_mut(4, |p| p.clear());
        Ok(())
    }

    fn page_ids(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<Vec<PageId>, CatalogError> {
        let page = cache.get_and_pin(oid)?;
        let ids = page.with_page(4, |p| {
            p.all_records()
                .into_iter()
                .filter_map(|(_, status)| match status {
                    GetStatus::Ok(bytes) => Some(decode_page_id(&bytes)),
                    _ => None,
                })
                .collect()
        });
        Ok(ids)
    }

    fn add_page(
        &self,
        cache: &Arc<BufferCache>,
        allocator: &PageAllocator,
        oid: Oid,
        n: u32,
    ) -> Result<PageId, CatalogError> {
        let first = allocator.next_data_page_ids(cache, n)?;
        let page = cache.get_and_pin(oid)?;
        for i in 0..n {
            let status = page.with_page_mut(4, |p| p.put_record(&encode_page_id(first + i), None));
            if let PutStatus::OutOfSpace = status {
                return Err(CatalogError::DirectoryOverflow(oid));
            }
        }
        Ok(first)
    }
}

/// The production page directory: a chain of catalog pages, each with a 12-byte header
/// `{directorySize, lastPageId, nextPageId}`. The head page (id == OID) tracks the
/// current tail via `lastPageId`; a full tail page is chained to a freshly allocated
/// catalog page, with both the head's `lastPageId` and the old tail's `nextPageId`
/// updated to keep the chain consistent.
pub struct LinkedCatalogDirectory;

impl TablePageDirectory for LinkedCatalogDirectory {
    fn create(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<(), CatalogError> {
        let page = cache.get_and_pin(oid)?;
        page.with_page_mut(CATALOG_HEADER_SIZE, |p| {
            p.clear();
            p.set_header_u32(LAST_PAGE_OFFSET, oid);
            p.set_header_u32(NEXT_PAGE_OFFSET, NO_NEXT_PAGE);
        });
        Ok(())
    }

    fn page_ids(&self, cache: &Arc<BufferCache>, oid: Oid) -> Result<Vec<PageId>, CatalogError> {
        let mut ids = Vec::new();
        let mut current = oid;
        loop {
            let page = cache.get_and_pin(current)?;
            let (entries, next) = page.with_page(CATALOG_HEADER_SIZE, |p| {
                let entries: Vec<PageId> = p
                    .all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => Some(decode_page_id(&bytes)),
                        _ => None,
                    })
                    .collect();
                (entries, p.get_header_u32(NEXT_PAGE_OFFSET))
            });
            ids.extend(entries);
            if next == NO_NEXT_PAGE {
                break;
            }
            current = next;
        }
        Ok(ids)
    }

    fn add_page(
        &self,
        cache: &Arc<BufferCache>,
        allocator: &PageAllocator,
        oid: Oid,
        n: u32,
    ) -> Result<PageId, CatalogError> {
        let first = allocator.next_data_page_ids(cache, n)?;

        let head = cache.get_and_pin(oid)?;
        let mut tail_id = head.with_page(CATALOG_HEADER_SIZE, |p| p.get_header_u32(LAST_PAGE_OFFSET));
        drop(head);

        for i in 0..n {
            let entry = encode_page_id(first + i);
            loop {
                let tail = cache.get_and_pin(tail_id)?;
                let status = tail.with_page_mut(CATALOG_HEADER_SIZE, |p| p.put_record(&entry, None));
                match status {
                    PutStatus::Ok(_) => break,
                    PutStatus::OutOfSpace => {
                        drop(tail);
                        let new_tail = allocator.next_catalog_page_id(cache)?;
                        let new_page = cache.get_and_pin(new_tail)?;
                        new_page.with_page_mut(CATALOG_HEADER_SIZE, |p| {
                            p.clear();
                            p.set_header_u32(LAST_PAGE_OFFSET, oid);
                            p.set_header_u32(NEXT_PAGE_OFFSET, NO_NEXT_PAGE);
                        });
                        drop(new_page);

                        let old_tail = cache.get_and_pin(tail_id)?;
                        old_tail.with_page_mut(CATALOG_HEADER_SIZE, |p| {
                            p.set_header_u32(NEXT_PAGE_OFFSET, new_tail);
                        });
                        drop(old_tail);

                        let head = cache.get_and_pin(oid)?;
                        head.with_page_mut(CATALOG_HEADER_SIZE, |p| {
                            p.set_header_u32(LAST_PAGE_OFFSET, new_tail);
                        });

                        tail_id = new_tail;
                    }
                    PutStatus::OutOfRange => unreachable!("append never passes an explicit slot id"),
                }
            }
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::allocator::PageAllocator;
    use crate::config::EngineConfig;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn setup(page_size: u32) -> (Arc<BufferCache>, PageAllocator) {
        let cfg = EngineConfig {
            page_size,
            ..EngineConfig::with_capacity(16)
        };
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let cache = BufferCache::new(storage, &cfg);
        let allocator = PageAllocator::new(cfg.reserved_id_range);
        allocator.bootstrap(&cache).unwrap();
        (cache, allocator)
    }

    #[test]
    fn single_page_directory_round_trips_and_reports_overflow() {
        let (cache, allocator) = setup(32);
        let dir = SinglePageDirectory;
        dir.create(&cache, 5).unwrap();
        let first = dir.add_page(&cache, &allocator, 5, 1).unwrap();
        assert_eq!(dir.page_ids(&cache, 5).unwrap(), vec![first]);

        // A 32-byte page with a 4-byte header has room for only a handful of 4-byte
        // entries before OutOfSpace.
        for _ in 0..10 {
            let _ = dir.add_page(&cache, &allocator, 5, 1);
        }
        let err = dir.add_page(&cache, &allocator, 5, 100);
        assert!(matches!(err, Err(CatalogError::DirectoryOverflow(5))));
    }

    #[test]
    fn linked_catalog_directory_chains_across_pages() {
        let (cache, allocator) = setup(32);
        let dir = LinkedCatalogDirectory;
        dir.create(&cache, 5).unwrap();
        for _ in 0..20 {
            dir.add_page(&cache, &allocator, 5, 1).unwrap();
        }
        let ids = dir.page_ids(&cache, 5).unwrap();
        assert_eq!(ids.len(), 20);
        // Every id is unique and came from the data region.
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 20);
    }

    #[test]
    fn linked_catalog_directory_single_page_when_small() {
        let (cache, allocator) = setup(4096);
        let dir = LinkedCatalogDirectory;
        dir.create(&cache, 7).unwrap();
        let ids: Vec<PageId> = (0..5)
            .map(|_| dir.add_page(&cache, &allocator, 7, 1).unwrap())
            .collect();
        assert_eq!(dir.page_ids(&cache, 7).unwrap(), ids);
    }
}
