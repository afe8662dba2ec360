//! Hash partitioning, per `spec.md §4.5`: bucket every record of a table by
//! `|hash(key)| mod bucketCount` into its own temporary table, then support a
//! single-bucket `find`.

use super::KeyFn;
use crate::catalog::TableAccess;
use crate::error::OperatorError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// The bucketed partitioning of one table's records. Owns its bucket tables until
/// `close` is called.
pub struct HashBuild {
    bucket_count: u32,
    buckets: Vec<String>,
}

/// `|hash(key)| mod bucket_count`. Hashing a `u64` digest as signed and taking its
/// absolute value (rather than just reducing the unsigned digest) mirrors the
/// `|hash| mod B` bucketing spec.md calls for verbatim, rather than silently collapsing
/// it to an unsigned reduction.
fn bucket_of(key: &[u8], bucket_count: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let signed = hasher.finish() as i64;
    (signed.unsigned_abs() % bucket_count as u64) as u32
}

/// Partition every live record of `input_table` into `bucket_count` temporary tables.
pub fn build(access: &TableAccess, input_table: &str, bucket_count: u32, key_of: &KeyFn<'_>) -> Result<HashBuild, OperatorError> {
    assert!(bucket_count > 0, "bucket_count must be positive");
    log::info!("hash-partitioning {} into {} bucket(s)", input_table, bucket_count);
    let mut buckets = Vec::with_capacity(bucket_count as usize);
    for b in 0..bucket_count {
        let name = access.fresh_name(&format!("hash_bucket_{}", b));
        access.create_table(&name)?;
        buckets.push(name);
    }

    for record in access.scan_records(input_table, |bytes| bytes.to_vec())? {
        let record = record?;
        let bucket = bucket_of(&key_of(&record), bucket_count);
        super::append_record(access, &buckets[bucket as usize], &record)?;
    }

    Ok(HashBuild { bucket_count, buckets })
}

impl HashBuild {
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }

    /// Every record in `target`'s bucket whose key equals `target`, scanning only that
    /// one bucket table.
    pub fn find(&self, access: &TableAccess, key_of: &KeyFn<'_>, target: &[u8]) -> Result<Vec<Vec<u8>>, OperatorError> {
        let bucket = bucket_of(target, self.bucket_count);
        let table = &self.buckets[bucket as usize];
        let mut matches = Vec::new();
        for record in access.scan_records(table, |bytes| bytes.to_vec())? {
            let record = record?;
            if key_of(&record) == target {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    /// Drop every bucket table. Callers that reuse a `HashBuild` as an intermediate
    /// structure for a join are expected to call this once they've read every bucket.
    pub fn close(self, access: &TableAccess) -> Result<(), OperatorError> {
        for name in &self.buckets {
            access.delete_table(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferCache;
    use crate::catalog::DirectoryKind;
    use crate::config::EngineConfig;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use std::sync::Arc;

    fn access() -> Arc<TableAccess> {
        let cfg = EngineConfig::with_capacity(16);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
        let cache = BufferCache::new(storage, &cfg);
        TableAccess::open(cache, &cfg, DirectoryKind::Linked).unwrap()
    }

    fn rec(k: u32, v: u32) -> Vec<u8> {
        let mut b = k.to_le_bytes().to_vec();
        b.extend_from_slice(&v.to_le_bytes());
        b
    }

    fn key_of(bytes: &[u8]) -> Vec<u8> {
        bytes[0..4].to_vec()
    }

    #[test]
    fn every_input_record_lands_in_exactly_one_bucket_and_is_findable() {
        let access = access();
        access.create_table("t").unwrap();
        for k in 0..50u32 {
            super::super::append_record(&access, "t", &rec(k, k * 10)).unwrap();
        }

        let build = build(&access, "t", 7, &key_of).unwrap();
        assert_eq!(build.buckets().len(), 7);

        let mut total = 0;
        for name in build.buckets() {
            total += access
                .scan_records(name, |b| b.to_vec())
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
                .len();
        }
        assert_eq!(total, 50);

        for k in 0..50u32 {
            let target = k.to_le_bytes().to_vec();
            let found = build.find(&access, &key_of, &target).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0], rec(k, k * 10));
        }

        build.close(&access).unwrap();
    }
}
