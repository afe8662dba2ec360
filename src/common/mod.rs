//! Shared type aliases, constants, and byte-array codecs used across every layer of the
//! engine, from the page format up through the operators.

pub mod io;

/// A page identifier. Always non-negative once persisted; `-1` (represented at the API
/// boundary, never stored) means "allocate the next id" for bulk-write entry points.
pub type PageId = u32;

/// A 0-based slot index into a page's record directory.
pub type SlotId = u32;

/// A table object identifier. OID 0 and 1 are reserved for the name and attribute system
/// tables respectively.
pub type Oid = u32;

/// A monotonically increasing transaction descriptor.
pub type TxnId = u32;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default header size for an ordinary data page: 4 bytes holding `directorySize`.
pub const DEFAULT_HEADER_SIZE: u32 = 4;

/// Header size for a linked catalog page: `(directorySize, lastPageId, nextPageId)`.
pub const CATALOG_HEADER_SIZE: u32 = 12;

/// Header size for the zero page: `(directorySize, freeCatalogPageId, freeDataPageId)`.
pub const ZERO_PAGE_HEADER_SIZE: u32 = 12;

/// Number of ids reserved at the bottom of the id space for root/catalog pages.
pub const RESERVED_ID_RANGE: u32 = 4096;

/// Reserved OID of the name→OID system table.
pub const NAME_TABLE_OID: Oid = 0;

/// Reserved OID of the attribute system table.
pub const ATTRIBUTE_TABLE_OID: Oid = 1;

/// Default segment size for the file-backed storage variant: 16 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Reference cost of one random page access, in abstract time-units.
pub const RANDOM_ACCESS_COST: f64 = 5.0;

/// Reference cost of one page within a bulk/sequential access, in abstract time-units.
pub const SEQUENTIAL_ACCESS_COST: f64 = 1.3;

/// Sentinel used by bulk-write APIs to mean "assign the next available id".
pub const NEXT_AVAILABLE: i64 = -1;
