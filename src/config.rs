//! Engine-wide configuration and the tagged-variant factories used for every pluggable
//! extension point (cache policy, scheduler). Per the design notes in `spec.md §9`, no
//! extension point is chosen through an ambient mutable singleton: callers construct an
//! `EngineConfig` and pass it explicitly to the components that need it.

use crate::common::{
    CATALOG_HEADER_SIZE, DEFAULT_HEADER_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_SEGMENT_SIZE,
    RANDOM_ACCESS_COST, RESERVED_ID_RANGE, SEQUENTIAL_ACCESS_COST,
};

/// Which buffer cache eviction policy to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicyKind {
    Fifo,
    Clock,
    Aging,
    /// No residency: every access passes straight through to storage.
    None,
}

/// Which concurrency-control scheduler to construct for the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    TwoPhaseLocking,
    TimestampOrdering,
    Mvcc,
}

/// Every tunable named in `spec.md`, with its documented default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub page_size: u32,
    pub header_size: u32,
    pub catalog_header_size: u32,
    pub reserved_id_range: u32,
    pub segment_size: u64,
    pub random_access_cost: f64,
    pub sequential_access_cost: f64,
    pub cache_capacity: u32,
    pub cache_policy: CachePolicyKind,
    /// Number of pages each merge iterator keeps pinned at once during external sort.
    pub merge_window: usize,
    /// Every k-th cache access triggers a global aging shift; `None` derives
    /// `ceil(capacity/40)` clamped to a minimum of 1.
    pub aging_shift_interval: Option<u32>,
    pub scheduler_kind: SchedulerKind,
}

impl EngineConfig {
    /// A config matching the defaults called out throughout `spec.md`, with the given
    /// cache capacity (there is no sensible universal default for this one).
    pub fn with_capacity(cache_capacity: u32) -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
            catalog_header_size: CATALOG_HEADER_SIZE,
            reserved_id_range: RESERVED_ID_RANGE,
            segment_size: DEFAULT_SEGMENT_SIZE,
            random_access_cost: RANDOM_ACCESS_COST,
            sequential_access_cost: SEQUENTIAL_ACCESS_COST,
            cache_capacity,
            cache_policy: CachePolicyKind::Clock,
            merge_window: 10,
            aging_shift_interval: None,
            scheduler_kind: SchedulerKind::TwoPhaseLocking,
        }
    }

    /// The effective aging shift interval: the configured value, or
    /// `max(1, ceil(capacity/40))` if unset.
    pub fn effective_aging_shift_interval(&self) -> u32 {
        self.aging_shift_interval
            .unwrap_or_else(|| ((self.cache_capacity + 39) / 40).max(1))
    }

    /// Maximum sort-input page count before the external sort refuses the input, per
    /// `spec.md §4.5`: `(capacity/2)^2`.
    pub fn max_sortable_pages(&self) -> usize {
        let half = (self.cache_capacity / 2) as usize;
        half * half
    }
}
