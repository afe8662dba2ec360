//! `TableOidMapping`: the name→OID mapping that lives on the name system table
//! (OID 0), per `spec.md §4.4`/§6. Each record is `(oid: u32, name: string, deleted:
//! bool)`; lookups are memoized, OID assignment is `max(oid) + 1` ignoring the deleted
//! flag so ids stay permanently unique even after a table is dropped.

use crate::cache::BufferCache;
use crate::catalog::allocator::PageAllocator;
use crate::catalog::directory::TablePageDirectory;
use crate::common::io::{read_bool, read_u32, string_encoded_len, write_bool, write_u32};
use crate::common::{Oid, NAME_TABLE_OID};
use crate::error::CatalogError;
use crate::page::{GetStatus, PutStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

struct NameRecord {
    oid: Oid,
    name: String,
    deleted: bool,
}

fn encode(record: &NameRecord) -> Vec<u8> {
    let bool_offset = 4 + string_encoded_len(&record.name);
    let mut buf = vec![0u8; (bool_offset + 1) as usize];
    write_u32(&mut buf, 0, record.oid).unwrap();
    crate::common::io::write_string(&mut buf, 4, &record.name).unwrap();
    write_bool(&mut buf, bool_offset, record.deleted).unwrap();
    buf
}

fn decode(bytes: &[u8]) -> NameRecord {
    let oid = read_u32(bytes, 0).unwrap();
    let name = crate::common::io::read_string(bytes, 4).unwrap();
    let bool_offset = 4 + string_encoded_len(&name);
    let deleted = read_bool(bytes, bool_offset).unwrap();
    NameRecord { oid, name, deleted }
}

/// Location of a stored name record, used when flipping its deleted flag.
struct RecordLocation {
    page_id: u32,
    slot_id: u32,
}

pub struct TableOidMapping {
    memo: RwLock<HashMap<String, Oid>>,
    next_oid: AtomicU32,
}

impl TableOidMapping {
    /// Build a mapping from scratch; the name table (OID 0) must already have been
    /// `create`d via the chosen `TablePageDirectory`.
    pub fn new() -> Self {
        // OIDs 0 and 1 are reserved for the name and attribute system tables.
        Self {
            memo: RwLock::new(HashMap::new()),
            next_oid: AtomicU32::new(2),
        }
    }

    /// Rebuild the memo and the next-OID counter by scanning every persisted name
    /// record. Used on first bootstrap of a fresh name table, and to reopen an
    /// existing file-backed one.
    pub fn reload(
        &self,
        cache: &Arc<BufferCache>,
        directory: &dyn TablePageDirectory,
    ) -> Result<(), CatalogError> {
        let mut max_oid: u32 = 1;
        let mut memo = self.memo.write().unwrap();
        memo.clear();
        for page_id in directory.page_ids(cache, NAME_TABLE_OID)? {
            let page = cache.get_and_pin(page_id)?;
            let records = page.with_page(4, |p| {
                p.all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => Some(decode(&bytes)),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            });
            for record in records {
                max_oid = max_oid.max(record.oid);
                if !record.deleted {
                    memo.insert(record.name.clone(), record.oid);
                } else {
                    memo.remove(&record.name);
                }
            }
        }
        self.next_oid.store(max_oid + 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Oid> {
        self.memo.read().unwrap().get(name).copied()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Assign a fresh OID to `name`, append its record to the name table, and memoize
    /// it. Fails if `name` already names a live table.
    pub fn create(
        &self,
        cache: &Arc<BufferCache>,
        directory: &dyn TablePageDirectory,
        allocator: &PageAllocator,
        name: &str,
    ) -> Result<Oid, CatalogError> {
        if self.table_exists(name) {
            return Err(CatalogError::DuplicateTableName(name.to_string()));
        }
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let record = NameRecord {
            oid,
            name: name.to_string(),
            deleted: false,
        };
        self.append(cache, directory, allocator, &record)?;
        self.memo.write().unwrap().insert(name.to_string(), oid);
        Ok(oid)
    }

    /// Flip the deleted flag on `name`'s record and drop it from the memo.
    pub fn delete(
        &self,
        cache: &Arc<BufferCache>,
        directory: &dyn TablePageDirectory,
        name: &str,
    ) -> Result<(), CatalogError> {
        let location = self
            .find_location(cache, directory, name)?
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))?;
        let page = cache.get_and_pin(location.page_id)?;
        page.with_page_mut(4, |p| {
            let bytes = match p.get_record(location.slot_id) {
                GetStatus::Ok(bytes) => bytes,
                _ => return,
            };
            let mut record = decode(&bytes);
            record.deleted = true;
            p.put_record(&encode(&record), Some(location.slot_id));
        });
        self.memo.write().unwrap().remove(name);
        Ok(())
    }

    fn find_location(
        &self,
        cache: &Arc<BufferCache>,
        directory: &dyn TablePageDirectory,
        name: &str,
    ) -> Result<Option<RecordLocation>, CatalogError> {
        for page_id in directory.page_ids(cache, NAME_TABLE_OID)? {
            let page = cache.get_and_pin(page_id)?;
            let found = page.with_page(4, |p| {
                p.all_records().into_iter().find_map(|(slot, status)| {
                    if let GetStatus::Ok(bytes) = status {
                        let record = decode(&bytes);
                        if !record.deleted && record.name == name {
                            return Some(slot);
                        }
                    }
                    None
                })
            });
            if let Some(slot_id) = found {
                return Ok(Some(RecordLocation { page_id, slot_id }));
            }
        }
        Ok(None)
    }

    fn append(
        &self,
        cache: &Arc<BufferCache>,
        directory: &dyn TablePageDirectory,
        allocator: &PageAllocator,
        record: &NameRecord,
    ) -> Result<(), CatalogError> {
        let bytes = encode(record);
        for page_id in directory.page_ids(cache, NAME_TABLE_OID)? {
            let page = cache.get_and_pin(page_id)?;
            let status = page.with_page_mut(4, |p| p.put_record(&bytes, None));
            if let PutStatus::Ok(_) = status {
                return Ok(());
            }
        }
        // No existing page had room; allocate a fresh data page under the name table's
        // own directory and append there.
        let page_id = directory.add_page(cache, allocator, NAME_TABLE_OID, 1)?;
        let page = cache.get_and_pin(page_id)?;
        page.with_page_mut(4, |p| p.clear());
        let status = page.with_page_mut(4, |p| p.put_record(&bytes, None));
        match status {
            PutStatus::Ok(_) => Ok(()),
            _ => Err(CatalogError::DirectoryOverflow(NAME_TABLE_OID)),
        }
    }
}
