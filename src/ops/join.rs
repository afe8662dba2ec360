//! The three join strategies of `spec.md §4.5`, sharing one `JoinOperand`/`JoinOutput`
//! shape: block nested-loops, hash (falling back to nested-loops for a small outer),
//! and sort-merge.

use super::cursor::BufferedCursor;
use super::{hash, sort, KeyFn};
use crate::catalog::TableAccess;
use crate::config::EngineConfig;
use crate::error::OperatorError;
use crate::page::GetStatus;
use std::sync::Arc;

/// One side of a join: the table to read and the key extractor to apply to its records.
pub struct JoinOperand<'a> {
    pub table: &'a str,
    pub key_of: &'a KeyFn<'a>,
}

impl<'a> JoinOperand<'a> {
    pub fn new(table: &'a str, key_of: &'a KeyFn<'a>) -> Self {
        Self { table, key_of }
    }
}

/// A join's materialized output plus the intermediate tables it built along the way.
/// `close` must be called once the caller is done reading the pairs, per `spec.md
/// §4.5`'s "every join closes its intermediate tables ... in its close method".
pub struct JoinOutput {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    intermediate_tables: Vec<String>,
}

impl JoinOutput {
    pub fn pairs(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.pairs
    }

    pub fn into_pairs(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.pairs
    }

    pub fn close(self, access: &TableAccess) -> Result<(), OperatorError> {
        for table in &self.intermediate_tables {
            access.delete_table(table)?;
        }
        Ok(())
    }
}

/// Block nested-loops: the outer side is read in chunks of `cacheCapacity − 1` pages;
/// each chunk is matched against one full scan of the inner side.
pub fn nested_loop_join(access: &TableAccess, config: &EngineConfig, outer: &JoinOperand<'_>, inner: &JoinOperand<'_>) -> Result<JoinOutput, OperatorError> {
    log::info!("nested-loop join {} x {}", outer.table, inner.table);
    Ok(JoinOutput {
        pairs: nested_loop_pairs(access, config, outer, inner)?,
        intermediate_tables: Vec::new(),
    })
}

fn nested_loop_pairs(access: &TableAccess, config: &EngineConfig, outer: &JoinOperand<'_>, inner: &JoinOperand<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, OperatorError> {
    let chunk_size = (config.cache_capacity.saturating_sub(1)).max(1) as usize;
    let outer_pages = access.page_ids(outer.table)?;
    let cache = access.cache();

    let mut pairs = Vec::new();
    for chunk in outer_pages.chunks(chunk_size) {
        let mut outer_records = Vec::new();
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
            outer_records.extend(live);
        }

        for inner_record in access.scan_records(inner.table, |bytes| bytes.to_vec())? {
            let inner_record = inner_record?;
            let inner_key = (inner.key_of)(&inner_record);
            for outer_record in &outer_records {
                if (outer.key_of)(outer_record) == inner_key {
                    pairs.push((outer_record.clone(), inner_record.clone()));
                }
            }
        }
    }
    Ok(pairs)
}

/// Hash join: if the outer side already fits in `⌊0.8·capacity⌋` pages, a hash table
/// buys nothing, so this falls back to `nested_loop_join` outright. Otherwise both
/// sides are partitioned into the same number of buckets and matching bucket pairs are
/// nested-loop-joined.
pub fn hash_join(access: &TableAccess, config: &EngineConfig, left: &JoinOperand<'_>, right: &JoinOperand<'_>) -> Result<JoinOutput, OperatorError> {
    let outer_pages = access.page_count(left.table)? as usize;
    let small_outer_bound = ((config.cache_capacity as f64) * 0.8) as usize;
    if outer_pages <= small_outer_bound {
        log::debug!("hash join falling back to nested-loop, {} <= {}", outer_pages, small_outer_bound);
        return nested_loop_join(access, config, left, right);
    }

    log::info!("hash join {} x {}", left.table, right.table);
    let bucket_count = config.cache_capacity.max(1);
    let left_build = hash::build(access, left.table, bucket_count, left.key_of)?;
    let right_build = hash::build(access, right.table, bucket_count, right.key_of)?;

    let mut pairs = Vec::new();
    for b in 0..bucket_count as usize {
        let bucket_left = JoinOperand::new(&left_build.buckets()[b], left.key_of);
        let bucket_right = JoinOperand::new(&right_build.buckets()[b], right.key_of);
        pairs.extend(nested_loop_pairs(access, config, &bucket_left, &bucket_right)?);
    }

    let mut intermediate_tables = left_build.buckets().to_vec();
    intermediate_tables.extend(right_build.buckets().iter().cloned());

    Ok(JoinOutput { pairs, intermediate_tables })
}

/// Sort-merge join: both sides are sorted by key, then walked with two
/// `BufferedCursor`s. On a key match, the whole run of right-side records sharing that
/// key is buffered once and replayed against every left-side record sharing it — the
/// "secondary iterator on the right, positioned at its current slot" of `spec.md §4.5`,
/// realized as a buffered tie group rather than a second pinned cursor, since every tie
/// group is read exactly once either way.
pub fn sort_merge_join(access: &Arc<TableAccess>, config: &EngineConfig, left: &JoinOperand<'_>, right: &JoinOperand<'_>) -> Result<JoinOutput, OperatorError> {
    log::info!("sort-merge join {} x {}", left.table, right.table);
    let sorted_left = sort::sort(access, config, left.table, left.key_of)?;
    let sorted_right = sort::sort(access, config, right.table, right.key_of)?;

    let cache = access.cache();
    let mut l = BufferedCursor::new(Arc::clone(cache), access.page_ids(&sorted_left)?, config.merge_window)?;
    let mut r = BufferedCursor::new(Arc::clone(cache), access.page_ids(&sorted_right)?, config.merge_window)?;

    let mut pairs = Vec::new();
    loop {
        let (lkey, rkey) = match (l.peek(), r.peek()) {
            (Some(lr), Some(rr)) => ((left.key_of)(lr), (right.key_of)(rr)),
            _ => break,
        };
        if lkey < rkey {
            l.pull()?;
        } else if lkey > rkey {
            r.pull()?;
        } else {
            let mut ties = vec![r.pull()?.expect("pull after a matching peek")];
            while let Some(next) = r.peek() {
                if (right.key_of)(next) == rkey {
                    ties.push(r.pull()?.expect("pull after a matching peek"));
                } else {
                    break;
                }
            }
            loop {
                match l.peek() {
                    Some(lr) if (left.key_of)(lr) == lkey => {
                        let lr = l.pull()?.expect("pull after a matching peek");
                        for t in &ties {
                            pairs.push((lr.clone(), t.clone()));
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    Ok(JoinOutput {
        pairs,
        intermediate_tables: vec![sorted_left, sorted_right],
    })
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

    fn rec(k: u32, tag: u8) -> Vec<u8> {
        let mut b = k.to_le_bytes().to_vec();
        b.push(tag);
        b
    }

    fn key_of(bytes: &[u8]) -> Vec<u8> {
        bytes[0..4].to_vec()
    }

    fn populate(access: &TableAccess, table: &str, keys: &[u32], tag: u8) {
        access.create_table(table).unwrap();
        for &k in keys {
            super::super::append_record(access, table, &rec(k, tag)).unwrap();
        }
    }

    #[test]
    fn nested_loop_join_matches_equal_keys() {
        let access = access(4);
        let cfg = EngineConfig::with_capacity(4);
        populate(&access, "left", &[1, 2, 3, 2], 0);
        populate(&access, "right", &[2, 3, 3, 9], 1);

        let left = JoinOperand::new("left", &key_of);
        let right = JoinOperand::new("right", &key_of);
        let out = nested_loop_join(&access, &cfg, &left, &right).unwrap();
        // (2,2) x2 lefts * 1 right, (3,3) 1 left * 2 rights => 2 + 2 = 4 pairs.
        assert_eq!(out.pairs().len(), 4);
        out.close(&access).unwrap();
    }

    #[test]
    fn hash_join_with_large_outer_matches_nested_loop_result() {
        let access = access(4);
        let cfg = EngineConfig::with_capacity(4);
        let left_keys: Vec<u32> = (0..40).collect();
        let right_keys: Vec<u32> = (20..60).collect();
        populate(&access, "left", &left_keys, 0);
        populate(&access, "right", &right_keys, 1);

        let left = JoinOperand::new("left", &key_of);
        let right = JoinOperand::new("right", &key_of);
        let out = hash_join(&access, &cfg, &left, &right).unwrap();
        assert_eq!(out.pairs().len(), 20); // keys 20..40 overlap
        out.close(&access).unwrap();
    }

    #[test]
    fn sort_merge_join_handles_duplicate_keys_on_both_sides() {
        let access = access(6);
        let cfg = EngineConfig::with_capacity(6);
        populate(&access, "left", &[5, 5, 1, 3], 0);
        populate(&access, "right", &[3, 5, 5, 5], 1);

        let left = JoinOperand::new("left", &key_of);
        let right = JoinOperand::new("right", &key_of);
        let out = sort_merge_join(&access, &cfg, &left, &right).unwrap();
        // key 5: 2 lefts * 3 rights = 6; key 3: 1*1 = 1. Total 7.
        assert_eq!(out.pairs().len(), 7);
        out.close(&access).unwrap();
    }
}
