//! External multiway merge sort, per `spec.md §4.5`. Partitions the input into
//! in-memory-sorted runs of `⌊cacheCapacity/2⌋` pages each, writes each run to its own
//! table, then merges all runs through one `BufferedCursor` apiece, repeatedly emitting
//! whichever cursor's top key is smallest.

use super::cursor::BufferedCursor;
use super::KeyFn;
use crate::catalog::TableAccess;
use crate::config::EngineConfig;
use crate::error::OperatorError;
use crate::page::{GetStatus, PutStatus};
use std::sync::Arc;

/// Sort every live record of `input_table` by `key_of`, returning the name of a freshly
/// created table holding the sorted output. The caller owns the returned table (and is
/// responsible for eventually deleting it); the input table is left untouched.
pub fn sort(
    access: &Arc<TableAccess>,
    config: &EngineConfig,
    input_table: &str,
    key_of: &KeyFn<'_>,
) -> Result<String, OperatorError> {
    let page_ids = access.page_ids(input_table)?;
    let bound = config.max_sortable_pages();
    if page_ids.len() > bound {
        let half = (config.cache_capacity / 2).max(1) as usize;
        let runs = (page_ids.len() + half - 1) / half;
        return Err(OperatorError::FanInExceeded { runs, bound: half });
    }

    let half = (config.cache_capacity / 2).max(1) as usize;
    let cache = access.cache();
    log::info!("sorting {} over {} page(s), run size {}", input_table, page_ids.len(), half);

    let mut run_tables = Vec::new();
    for chunk in page_ids.chunks(half) {
        let mut records = Vec::new();
        for &page_id in chunk {
            let page = cache.get_and_pin(page_id)?;
            let live: Vec<Vec<u8>> = page.with_page(4, |p| {
                p.all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => Some(bytes),
                        _ => None,
                    })
                    .collect()
            });
            records.extend(live);
        }
        records.sort_by(|a, b| key_of(a).cmp(&key_of(b)));

        let run_name = access.fresh_name("sort_run");
        write_sorted_run(access, &run_name, &records)?;
        run_tables.push(run_name);
    }

    let output_name = access.fresh_name("sort_out");
    access.create_table(&output_name)?;
    log::debug!("merging {} run(s) into {}", run_tables.len(), output_name);

    let mut cursors: Vec<BufferedCursor> = run_tables
        .iter()
        .map(|name| {
            let ids = access.page_ids(name)?;
            Ok(BufferedCursor::new(Arc::clone(cache), ids, config.merge_window)?)
        })
        .collect::<Result<_, OperatorError>>()?;

    loop {
        let mut min_idx = None;
        for (i, cursor) in cursors.iter().enumerate() {
            if let Some(key) = cursor.peek().map(|r| key_of(r)) {
                let better = match min_idx {
                    None => true,
                    Some((_, ref best_key)) => &key < best_key,
                };
                if better {
                    min_idx = Some((i, key));
                }
            }
        }
        let Some((i, _)) = min_idx else { break };
        if let Some(record) = cursors[i].pull()? {
            super::append_record(access, &output_name, &record)?;
        }
    }

    for name in &run_tables {
        access.delete_table(name)?;
    }

    Ok(output_name)
}

/// Write an already-sorted, in-memory record set to a fresh table, packing pages
/// greedily instead of probing page by page for room.
fn write_sorted_run(access: &TableAccess, name: &str, records: &[Vec<u8>]) -> Result<(), OperatorError> {
    access.create_table(name)?;
    let cache = access.cache();

    let mut page_id = access.add_page(name, 1)?;
    {
        let page = cache.get_and_pin(page_id)?;
        page.with_page_mut(4, |p| p.clear());
    }

    for record in records {
        let page = cache.get_and_pin(page_id)?;
        let status = page.with_page_mut(4, |p| p.put_record(record, None));
        if let PutStatus::OutOfSpace = status {
            drop(page);
            page_id = access.add_page(name, 1)?;
            let page = cache.get_and_pin(page_id)?;
            page.with_page_mut(4, |p| p.clear());
            page.with_page_mut(4, |p| p.put_record(record, None));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DirectoryKind;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    fn access(capacity: u32) -> Arc<TableAccess> {
        let cfg = EngineConfig::with_capacity(capacity);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let cache = crate::cache::BufferCache::new(storage, &cfg);
        TableAccess::open(cache, &cfg, DirectoryKind::Linked).unwrap()
    }

    fn rec(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    fn key_of_u32(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn sorts_records_spread_across_many_pages() {
        let access = access(8);
        let cfg = EngineConfig::with_capacity(8);
        access.create_table("nums").unwrap();
        let mut values: Vec<u32> = (0..300).rev().collect();
        // Scramble further so runs don't come out pre-sorted by luck of layout.
        values.swap(0, 150);

        for v in &values {
            super::super::append_record(&access, "nums", &rec(*v)).unwrap();
        }

        let sorted_table = sort(&access, &cfg, "nums", &key_of_u32).unwrap();
        let out: Vec<u32> = access
            .scan_records(&sorted_table, |b| u32::from_be_bytes(b.try_into().unwrap()))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let mut expected = values.clone();
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn refuses_input_beyond_fan_in_bound() {
        let access = access(4); // half = 2, bound = 4 pages
        let cfg = EngineConfig::with_capacity(4);
        access.create_table("big").unwrap();
        access.add_page("big", 10).unwrap();

        let err = sort(&access, &cfg, "big", &key_of_u32);
        assert!(matches!(err, Err(OperatorError::FanInExceeded { bound: 2, .. })));
    }
}
