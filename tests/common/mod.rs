// Shared fixtures for the end-to-end scenarios of `spec.md §8`, driven entirely through
// `pagebase`'s public API (no crate-internal helpers are reachable from here).

use pagebase::catalog::DirectoryKind;
use pagebase::config::{CachePolicyKind, EngineConfig};
use pagebase::storage::memory::MemoryStorage;
use pagebase::storage::revertable::RevertableStorage;
use pagebase::storage::Storage;
use pagebase::txn::wal::InMemoryWal;
use pagebase::{BufferCache, TableAccess, TransactionManager};
use std::sync::Arc;

pub fn config(capacity: u32, policy: CachePolicyKind) -> EngineConfig {
    let mut cfg = EngineConfig::with_capacity(capacity);
    cfg.cache_policy = policy;
    cfg
}

pub fn access(cfg: &EngineConfig) -> Arc<TableAccess> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
    let cache = BufferCache::new(storage, cfg);
    TableAccess::open(cache, cfg, DirectoryKind::Linked).unwrap()
}

/// Builds a `TableAccess` and a `TransactionManager` over the *same* cache, wired through
/// a `RevertableStorage` so the manager can guarantee a live transaction's dirty bytes
/// never reach the backing store ahead of commit. Used by scenarios that need both table
/// creation (via `TableAccess`) and transactional page access (via the manager).
pub fn access_with_txn_manager(cfg: &EngineConfig) -> (Arc<TableAccess>, Arc<TransactionManager>) {
    let raw: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.page_size));
    let (storage, live_writers) = RevertableStorage::new(raw);
    let cache = BufferCache::new(storage, cfg);
    let access = TableAccess::open(Arc::clone(&cache), cfg, DirectoryKind::Linked).unwrap();
    let manager = TransactionManager::new(cache, live_writers, cfg, Arc::new(InMemoryWal::new()));
    (access, manager)
}

/// Append `bytes` as a new record of `table`, reusing the first page with room.
/// Mirrors the crate's own internal `ops::append_record`, reimplemented here since that
/// helper is `pub(crate)` and unreachable from an integration test.
pub fn append(access: &TableAccess, table: &str, bytes: &[u8]) {
    for page_id in access.page_ids(table).unwrap() {
        let page = access.cache().get_and_pin(page_id).unwrap();
        let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
        if let pagebase::page::PutStatus::Ok(_) = status {
            return;
        }
    }
    let page_id = access.add_page(table, 1).unwrap();
    let page = access.cache().get_and_pin(page_id).unwrap();
    page.with_page_mut(4, |p| p.clear());
    let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
    assert!(matches!(status, pagebase::page::PutStatus::Ok(_)), "record did not fit on a fresh page");
}
