//! Physical operators: external sort, hash partitioning, the three join strategies, and
//! B-tree index build/lookup, per `spec.md §4.5`. None of the teacher's own `plan/` or
//! `index/` modules carry a working implementation of these algorithms (both
//! `plan/hash_join.rs` and `index/btree_index.rs` are `todo!()` stubs over a
//! `BTreeMap`), so these are grounded primarily on `spec.md §4.5`'s own algorithm
//! descriptions, built atop `TableAccess`/`BufferCache` the way
//! `examples/shoyo-jindb/src/relation/heap.rs` drives pages through a buffer manager:
//! pin, read or mutate, drop.
//!
//! Every operator here treats a record's sort/join/index key as an opaque,
//! byte-comparable `Vec<u8>` produced by a caller-supplied extractor closure. Callers
//! encoding fixed-width integers as keys are responsible for a byte-order-preserving
//! encoding (e.g. big-endian for unsigned values) if numeric ordering is required;
//! lexicographic byte order is all any operator here assumes.

mod cursor;

pub mod btree;
pub mod hash;
pub mod join;
pub mod sort;

use crate::catalog::TableAccess;
use crate::error::CatalogError;
use crate::page::PutStatus;

/// Produces a byte-comparable key from a record's raw bytes.
pub type KeyFn<'a> = dyn Fn(&[u8]) -> Vec<u8> + 'a;

/// Append `bytes` as a new record to `table`, reusing the first existing page with room
/// before allocating a fresh one. Shared by the hash and B-tree builders; the external
/// sort writes its (already-sized) runs directly instead, since it knows the whole
/// record set up front and can pack pages without probing for space page by page.
pub(crate) fn append_record(access: &TableAccess, table: &str, bytes: &[u8]) -> Result<(), CatalogError> {
    for page_id in access.page_ids(table)? {
        let page = access.cache().get_and_pin(page_id)?;
        let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
        if let PutStatus::Ok(_) = status {
            return Ok(());
        }
    }
    let page_id = access.add_page(table, 1)?;
    let page = access.cache().get_and_pin(page_id)?;
    page.with_page_mut(4, |p| p.clear());
    let status = page.with_page_mut(4, |p| p.put_record(bytes, None));
    match status {
        PutStatus::Ok(_) => Ok(()),
        _ => Err(CatalogError::DirectoryOverflow(
            access.oid_of(table).unwrap_or(0),
        )),
    }
}
