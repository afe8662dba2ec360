//! Bottom-up B-tree index build and lookup, per `spec.md §4.5`. Built atop the `sort`
//! operator (the aux-table sort step) and the same page-chaining idiom
//! `catalog::directory::LinkedCatalogDirectory` uses for catalog pages: a per-level
//! table whose pages are filled greedily, the smallest key of each new page promoted to
//! the level above, until a level fits on one page — the root.

use super::{sort, KeyFn};
use crate::catalog::TableAccess;
use crate::common::PageId;
use crate::config::EngineConfig;
use crate::error::{CatalogError, IndexError, OperatorError};
use crate::page::{GetStatus, PutStatus};
use std::sync::Arc;

/// Sentinel `nextLeaf` value meaning "this is the last leaf page".
const NO_NEXT_PAGE: u32 = u32::MAX;
/// Leaf pages carry an extra 4-byte `nextLeaf` header field beyond the ordinary
/// 4-byte `directorySize` header.
const LEAF_HEADER_SIZE: u32 = 8;
const NEXT_LEAF_OFFSET: u32 = 4;

/// A built index: one table per level (`levels[0]` is the leaf level, `levels.last()`
/// is the single-page root) plus the overflow table holding non-unique-key runs.
pub struct BTreeIndex {
    levels: Vec<String>,
    overflow_table: String,
    root_page_id: PageId,
    depth: usize,
}

struct Promotion {
    key: Vec<u8>,
    page_id: PageId,
}

fn encode_keyed(key: &[u8], trailer: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + key.len() + trailer.len());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(trailer);
    buf
}

fn decode_keyed(bytes: &[u8]) -> (&[u8], &[u8]) {
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    (&bytes[4..4 + len], &bytes[4 + len..])
}

/// Append `bytes` to `table` and report the page it landed on, unlike
/// `super::append_record`, which only the overflow-run writer needs (a leaf entry
/// points back at the overflow run's head page).
fn append_returning_page(access: &TableAccess, table: &str, bytes: &[u8]) -> Result<PageId, OperatorError> {
    for page_id in access.page_ids(table)? {
        let page = access.cache().get_and_pin(page_id)?;
        let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
        if let PutStatus::Ok(_) = status {
            return Ok(page_id);
        }
    }
    let page_id = access.add_page(table, 1)?;
    let page = access.cache().get_and_pin(page_id)?;
    page.with_page_mut(4, |p| p.clear());
    let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
    match status {
        PutStatus::Ok(_) => Ok(page_id),
        _ => Err(OperatorError::Catalog(CatalogError::DirectoryOverflow(0))),
    }
}

/// Write one overflow run: a header `(run_id, length)` followed by `(-1, page_id)`
/// continuations, one per entry in `group`. Returns the page the header landed on.
fn write_overflow_run(access: &TableAccess, overflow_table: &str, run_id: u32, group: &[(Vec<u8>, PageId)]) -> Result<PageId, OperatorError> {
    let mut header = run_id.to_le_bytes().to_vec();
    header.extend_from_slice(&(group.len() as u32).to_le_bytes());
    let head_page = append_returning_page(access, overflow_table, &header)?;
    for (_, data_page) in group {
        let mut cont = (-1i32).to_le_bytes().to_vec();
        cont.extend_from_slice(&data_page.to_le_bytes());
        append_returning_page(access, overflow_table, &cont)?;
    }
    Ok(head_page)
}

fn decode_overflow_record(bytes: &[u8]) -> (i32, u32) {
    (
        i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
    )
}

/// Fill `table`'s pages greedily with `entries` (already sorted by key), chaining leaf
/// pages via their `nextLeaf` header field when `is_leaf`. Returns one promotion per
/// page allocated: that page's id paired with its smallest (first-inserted) key.
fn build_level(access: &TableAccess, table: &str, header_size: u32, entries: &[(Vec<u8>, Vec<u8>)], is_leaf: bool) -> Result<Vec<Promotion>, OperatorError> {
    access.create_table(table)?;
    let cache = access.cache();
    let mut promotions = Vec::new();

    if entries.is_empty() {
        let page_id = access.add_page(table, 1)?;
        let page = cache.get_and_pin(page_id)?;
        page.with_page_mut(header_size, |p| {
            p.clear();
            if is_leaf {
                p.set_header_u32(NEXT_LEAF_OFFSET, NO_NEXT_PAGE);
            }
        });
        promotions.push(Promotion { key: Vec::new(), page_id });
        return Ok(promotions);
    }

    let mut page_id: Option<PageId> = None;
    let mut prev_page_id: Option<PageId> = None;

    for (key, trailer) in entries {
        let record = encode_keyed(key, trailer);
        loop {
            if page_id.is_none() {
                let new_id = access.add_page(table, 1)?;
                {
                    let page = cache.get_and_pin(new_id)?;
                    page.with_page_mut(header_size, |p| {
                        p.clear();
                        if is_leaf {
                            p.set_header_u32(NEXT_LEAF_OFFSET, NO_NEXT_PAGE);
                        }
                    });
                }
                if is_leaf {
                    if let Some(prev) = prev_page_id {
                        let prev_page = cache.get_and_pin(prev)?;
                        prev_page.with_page_mut(header_size, |p| p.set_header_u32(NEXT_LEAF_OFFSET, new_id));
                    }
                }
                promotions.push(Promotion { key: key.clone(), page_id: new_id });
                prev_page_id = Some(new_id);
                page_id = Some(new_id);
            }

            let page = cache.get_and_pin(page_id.unwrap())?;
            let status = page.with_page_mut(header_size, |p| p.put_record(&record, None));
            match status {
                PutStatus::Ok(_) => break,
                PutStatus::OutOfSpace => page_id = None,
                PutStatus::OutOfRange => unreachable!("build_level never passes an explicit slot id"),
            }
        }
    }
    Ok(promotions)
}

/// Build a B-tree index over `data_table`'s records.
///
/// 1. Scan the data table, emitting `(key, data_page_id)` pairs into an auxiliary table.
/// 2. Sort the auxiliary table by key.
/// 3. Stream the sorted pairs into dense leaf pages bottom-up, promoting each new page's
///    smallest key upward, until a level fits on one page (the root).
/// 4. Non-unique keys are grouped; a group with more than one entry gets an overflow run
///    instead of a direct page reference.
pub fn build(access: &Arc<TableAccess>, config: &EngineConfig, data_table: &str, key_of: &KeyFn<'_>) -> Result<BTreeIndex, OperatorError> {
    log::info!("building b-tree index over {}", data_table);
    let aux_table = access.fresh_name("btree_aux");
    access.create_table(&aux_table)?;
    for page in access.scan_pages(data_table)? {
        let page = page?;
        let page_id = page.page_id();
        let records: Vec<Vec<u8>> = page.with_page(4, |p| {
            p.all_records()
                .into_iter()
                .filter_map(|(_, status)| match status {
                    GetStatus::Ok(bytes) => Some(bytes),
                    _ => None,
                })
                .collect()
        });
        for record in records {
            let key = key_of(&record);
            let entry = encode_keyed(&key, &page_id.to_le_bytes());
            super::append_record(access, &aux_table, &entry)?;
        }
    }

    let aux_key_of = |bytes: &[u8]| decode_keyed(bytes).0.to_vec();
    let sorted_aux = sort::sort(access, config, &aux_table, &aux_key_of)?;
    access.delete_table(&aux_table)?;

    let pairs: Vec<(Vec<u8>, PageId)> = access
        .scan_records(&sorted_aux, |bytes| {
            let (key, trailer) = decode_keyed(bytes);
            (key.to_vec(), u32::from_le_bytes(trailer[0..4].try_into().unwrap()))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    access.delete_table(&sorted_aux)?;

    let overflow_table = access.fresh_name("btree_overflow");
    access.create_table(&overflow_table)?;

    let mut leaf_entries = Vec::with_capacity(pairs.len());
    let mut run_counter = 1u32;
    let mut i = 0;
    while i < pairs.len() {
        let key = pairs[i].0.clone();
        let mut j = i + 1;
        while j < pairs.len() && pairs[j].0 == key {
            j += 1;
        }
        let group = &pairs[i..j];
        let trailer = if group.len() == 1 {
            let mut t = (group[0].1 as i32).to_le_bytes().to_vec();
            t.extend_from_slice(&0u32.to_le_bytes());
            t
        } else {
            let run_id = run_counter;
            run_counter += 1;
            let head_page = write_overflow_run(access, &overflow_table, run_id, group)?;
            let mut t = (-(head_page as i32)).to_le_bytes().to_vec();
            t.extend_from_slice(&run_id.to_le_bytes());
            t
        };
        leaf_entries.push((key, trailer));
        i = j;
    }

    let mut levels = Vec::new();
    let leaf_table = access.fresh_name("btree_level0");
    let mut promotions = build_level(access, &leaf_table, LEAF_HEADER_SIZE, &leaf_entries, true)?;
    levels.push(leaf_table);

    let mut depth = 1;
    while promotions.len() > 1 {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = promotions
            .iter()
            .map(|p| (p.key.clone(), p.page_id.to_le_bytes().to_vec()))
            .collect();
        let level_table = access.fresh_name(&format!("btree_level{}", depth));
        promotions = build_level(access, &level_table, 4, &entries, false)?;
        levels.push(level_table);
        depth += 1;
    }

    log::debug!("b-tree over {} built with depth {}", data_table, depth);
    Ok(BTreeIndex {
        levels,
        overflow_table,
        root_page_id: promotions[0].page_id,
        depth,
    })
}

impl BTreeIndex {
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn overflow_table(&self) -> &str {
        &self.overflow_table
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Reconstruct a handle onto an index `build` already persisted, without repeating
    /// the build: `levels[last]` holds the single-page root, so its sole page id is the
    /// root page. Raises `IndexError::MissingIndex` if any named table is gone.
    pub fn open(access: &TableAccess, levels: Vec<String>, overflow_table: String) -> Result<Self, OperatorError> {
        let root_table = levels
            .last()
            .ok_or_else(|| IndexError::MissingIndex("(no levels given)".to_string()))?;
        for table in levels.iter().chain(std::iter::once(&overflow_table)) {
            if !access.table_exists(table) {
                return Err(IndexError::MissingIndex(table.clone()).into());
            }
        }
        let root_page_id = *access
            .page_ids(root_table)?
            .first()
            .ok_or_else(|| IndexError::MissingIndex(root_table.clone()))?;
        let depth = levels.len();
        Ok(Self {
            levels,
            overflow_table,
            root_page_id,
            depth,
        })
    }

    /// Every data-page id whose records may hold `target`: descends from the root
    /// choosing the greatest separator key ≤ target at each internal node, collects
    /// every leaf entry matching `target` (walking the next-leaf chain while the run of
    /// matches continues onto the next page), and resolves overflow runs for
    /// non-unique keys.
    pub fn lookup(&self, access: &TableAccess, target: &[u8]) -> Result<Vec<PageId>, OperatorError> {
        let cache = access.cache();
        let mut page_id = self.root_page_id;

        for _ in 1..self.depth {
            let page = cache.get_and_pin(page_id)?;
            let entries: Vec<(Vec<u8>, PageId)> = page.with_page(4, |p| {
                p.all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => {
                            let (key, trailer) = decode_keyed(&bytes);
                            Some((key.to_vec(), u32::from_le_bytes(trailer[0..4].try_into().unwrap())))
                        }
                        _ => None,
                    })
                    .collect()
            });
            page_id = entries
                .iter()
                .rev()
                .find(|(key, _)| key.as_slice() <= target)
                .map(|(_, child)| *child)
                .unwrap_or(entries[0].1);
        }

        let mut results = Vec::new();
        let mut leaf_id = page_id;
        loop {
            let leaf = cache.get_and_pin(leaf_id)?;
            let (entries, next) = leaf.with_page(LEAF_HEADER_SIZE, |p| {
                let entries: Vec<(Vec<u8>, i32, u32)> = p
                    .all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => {
                            let (key, trailer) = decode_keyed(&bytes);
                            let page_ref = i32::from_le_bytes(trailer[0..4].try_into().unwrap());
                            let run_id = u32::from_le_bytes(trailer[4..8].try_into().unwrap());
                            Some((key.to_vec(), page_ref, run_id))
                        }
                        _ => None,
                    })
                    .collect();
                (entries, p.get_header_u32(NEXT_LEAF_OFFSET))
            });

            for (key, page_ref, run_id) in &entries {
                if key.as_slice() == target {
                    if *run_id == 0 {
                        results.push(*page_ref as u32);
                    } else {
                        let overflow_head = (-*page_ref) as u32;
                        results.extend(self.resolve_overflow(access, overflow_head, *run_id)?);
                    }
                }
            }

            let spills = entries.last().map(|(key, _, _)| key.as_slice() == target).unwrap_or(false);
            if spills && next != NO_NEXT_PAGE {
                leaf_id = next;
            } else {
                break;
            }
        }
        Ok(results)
    }

    fn resolve_overflow(&self, access: &TableAccess, head_page_id: PageId, run_id: u32) -> Result<Vec<PageId>, OperatorError> {
        let page_ids = access.page_ids(&self.overflow_table)?;
        let mut page_idx = page_ids
            .iter()
            .position(|&id| id == head_page_id)
            .expect("overflow head page must belong to the overflow table");

        let mut recs = Self::decode_overflow_page(access, page_ids[page_idx])?;
        let mut slot = recs
            .iter()
            .position(|(tag, _)| *tag == run_id as i32)
            .expect("overflow header record must exist on its indicated page");
        let length = recs[slot].1;
        slot += 1;

        let mut results = Vec::with_capacity(length as usize);
        while results.len() < length as usize {
            if slot >= recs.len() {
                page_idx += 1;
                recs = Self::decode_overflow_page(access, page_ids[page_idx])?;
                slot = 0;
                continue;
            }
            let (tag, data_page) = recs[slot];
            debug_assert_eq!(tag, -1);
            results.push(data_page);
            slot += 1;
        }
        Ok(results)
    }

    fn decode_overflow_page(access: &TableAccess, page_id: PageId) -> Result<Vec<(i32, u32)>, OperatorError> {
        let page = access.cache().get_and_pin(page_id)?;
        Ok(page.with_page(4, |p| {
            p.all_records()
                .into_iter()
                .filter_map(|(_, status)| match status {
                    GetStatus::Ok(bytes) => Some(decode_overflow_record(&bytes)),
                    _ => None,
                })
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferCache;
    use crate::catalog::DirectoryKind;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn access(capacity: u32) -> Arc<TableAccess> {
        let cfg = EngineConfig::with_capacity(capacity);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let cache = BufferCache::new(storage, &cfg);
        TableAccess::open(cache, &cfg, DirectoryKind::Linked).unwrap()
    }

    fn rec(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    fn key_of(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn unique_keys_resolve_to_their_own_data_page() {
        let access = access(8);
        let cfg = EngineConfig::with_capacity(8);
        access.create_table("nums").unwrap();
        for _ in 0..40u32 {
            access.add_page("nums", 1).unwrap();
        }
        // Re-open page ids in insertion order and place one record per page so each
        // key maps unambiguously to a distinct data page.
        let page_ids = access.page_ids("nums").unwrap();
        for (i, &page_id) in page_ids.iter().enumerate() {
            let page = access.cache().get_and_pin(page_id).unwrap();
            page.with_page_mut(4, |p| p.put_record(&rec(i as u32), None));
        }

        let index = build(&access, &cfg, "nums", &key_of).unwrap();
        for i in 0..page_ids.len() {
            let hits = index.lookup(&access, &rec(i as u32)).unwrap();
            assert_eq!(hits, vec![page_ids[i]]);
        }
        let miss = index.lookup(&access, &rec(9999)).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn non_unique_keys_resolve_through_an_overflow_run() {
        let access = access(8);
        let cfg = EngineConfig::with_capacity(8);
        access.create_table("dup").unwrap();
        // fizzbuzz-flavored: key = n % 5, several data pages share each key.
        let mut data_pages = Vec::new();
        for n in 0..30u32 {
            let page_id = access.add_page("dup", 1).unwrap();
            let page = access.cache().get_and_pin(page_id).unwrap();
            page.with_page_mut(4, |p| p.put_record(&rec(n % 5), None));
            data_pages.push(page_id);
        }

        let index = build(&access, &cfg, "dup", &key_of).unwrap();
        for k in 0..5u32 {
            let hits = index.lookup(&access, &rec(k)).unwrap();
            let expected: Vec<PageId> = (0..30u32).filter(|n| n % 5 == k).map(|n| data_pages[n as usize]).collect();
            let mut hits_sorted = hits.clone();
            hits_sorted.sort_unstable();
            let mut expected_sorted = expected.clone();
            expected_sorted.sort_unstable();
            assert_eq!(hits_sorted, expected_sorted);
        }
    }

    #[test]
    fn open_after_build_returns_identical_lookups() {
        let access = access(8);
        let cfg = EngineConfig::with_capacity(8);
        access.create_table("dup").unwrap();
        for n in 0..30u32 {
            let page_id = access.add_page("dup", 1).unwrap();
            let page = access.cache().get_and_pin(page_id).unwrap();
            page.with_page_mut(4, |p| p.put_record(&rec(n % 5), None));
        }

        let built = build(&access, &cfg, "dup", &key_of).unwrap();
        let levels = built.levels().to_vec();
        let overflow_table = built.overflow_table().to_string();
        let root_page_id = built.root_page_id();
        let depth = built.depth();

        let targets: Vec<Vec<u8>> = (0..7u32).map(rec).collect();
        let built_hits: Vec<Vec<PageId>> = targets.iter().map(|t| built.lookup(&access, t).unwrap()).collect();
        drop(built);

        let reopened = BTreeIndex::open(&access, levels.clone(), overflow_table.clone()).unwrap();
        assert_eq!(reopened.levels(), levels.as_slice());
        assert_eq!(reopened.overflow_table(), overflow_table);
        assert_eq!(reopened.root_page_id(), root_page_id);
        assert_eq!(reopened.depth(), depth);

        let reopened_hits: Vec<Vec<PageId>> = targets.iter().map(|t| reopened.lookup(&access, t).unwrap()).collect();
        assert_eq!(built_hits, reopened_hits);
    }

    #[test]
    fn open_reports_missing_index_for_an_unknown_level_table() {
        let access = access(4);
        let err = BTreeIndex::open(&access, vec!["no_such_level".to_string()], "no_such_overflow".to_string());
        assert!(matches!(err, Err(OperatorError::Index(IndexError::MissingIndex(_)))));
    }
}
