//! Bounded-RAM page residency with pin/unpin discipline, grounded on the role of
//! `examples/shoyo-jindb/src/buffer/manager.rs` and generalized to the pluggable
//! eviction policies of `spec.md §4.3`. Per `spec.md §5` the cache is single-threaded
//! with respect to its own bookkeeping: every method takes the single coarse
//! `Mutex<CacheState>` for its whole critical section, matching "the cache mutates the
//! residency set under a mutex over the slot array."
//!
//! Frames hold raw bytes rather than a pre-parsed `SlottedPage`: different tables use
//! different header widths (plain data pages default to 4 bytes, catalog pages carry a
//! 12-byte `{directorySize, lastPageId, nextPageId}` header), so the interpretation
//! width is supplied by the caller at each `with_page`/`with_page_mut`, not fixed at
//! cache construction.

pub mod policy;

use crate::common::PageId;
use crate::config::{CachePolicyKind, EngineConfig};
use crate::error::CacheError;
use crate::page::SlottedPage;
use crate::storage::{Page, Storage};
use policy::{make_policy, EvictionPolicy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Frame {
    page_id: Option<PageId>,
    bytes: Vec<u8>,
    dirty: bool,
    pin_count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CacheState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    free: Vec<usize>,
    policy: Box<dyn EvictionPolicy>,
    hits: u64,
    misses: u64,
    loads: HashMap<PageId, u32>,
}

/// A bounded buffer cache with a pluggable eviction policy, or — when constructed with
/// `CachePolicyKind::None` — a pass-through that keeps no residency at all.
pub struct BufferCache {
    storage: Arc<dyn Storage>,
    capacity: usize,
    none_mode: bool,
    state: Mutex<CacheState>,
}

impl BufferCache {
    pub fn new(storage: Arc<dyn Storage>, config: &EngineConfig) -> Arc<Self> {
        let none_mode = config.cache_policy == CachePolicyKind::None;
        let capacity = if none_mode {
            0
        } else {
            config.cache_capacity as usize
        };
        let page_size = storage.page_size() as usize;
        let frames = (0..capacity)
            .map(|_| Frame {
                page_id: None,
                bytes: vec![0u8; page_size],
                dirty: false,
                pin_count: 0,
            })
            .collect();
        let policy = make_policy(
            config.cache_policy,
            capacity,
            config.effective_aging_shift_interval(),
        );
        log::info!(
            "buffer cache starting with capacity {} pages, policy {:?}",
            capacity, config.cache_policy
        );
        Arc::new(Self {
            storage,
            capacity,
            none_mode,
            state: Mutex::new(CacheState {
                frames,
                page_table: HashMap::new(),
                free: (0..capacity).rev().collect(),
                policy,
                hits: 0,
                misses: 0,
                loads: HashMap::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(self: &Arc<Self>) -> CacheStats {
        let state = self.state.lock().unwrap();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Clear hit/miss/load counters without touching residency.
    pub fn reset_stats(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        state.hits = 0;
        state.misses = 0;
        state.loads.clear();
    }

    pub fn load_count(self: &Arc<Self>, page_id: PageId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .loads
            .get(&page_id)
            .copied()
            .unwrap_or(0)
    }

    /// Hand out a handle to `page_id` without incrementing its pin count. If the page
    /// is resident this is a genuine cache hit; if not it is admitted like any other
    /// miss. The handle is not protected from a later eviction triggered by some other
    /// call into the cache — callers that need stability across such calls must use
    /// `get_and_pin`.
    pub fn get(self: &Arc<Self>, page_id: PageId) -> Result<CachedPage, CacheError> {
        if self.none_mode {
            let page = self.storage.read(page_id)?;
            return Ok(CachedPage {
                backing: HandleBacking::Direct {
                    storage: Arc::clone(&self.storage),
                    frame: Arc::new(Mutex::new(Frame {
                        page_id: Some(page_id),
                        bytes: page.bytes().to_vec(),
                        dirty: false,
                        pin_count: 0,
                    })),
                },
            });
        }
        let frame_idx = self.locate_or_admit(page_id, true)?;
        Ok(CachedPage {
            backing: HandleBacking::Resident {
                cache: Arc::clone(self),
                frame_idx,
            },
        })
    }

    /// Hand out a handle to `page_id` with its pin count incremented. The caller must
    /// release the handle exactly once (dropping it, or calling `unpin` explicitly);
    /// `PinnedPage`'s `Drop` does this automatically so every exit path, including
    /// error paths, unpins.
    pub fn get_and_pin(self: &Arc<Self>, page_id: PageId) -> Result<PinnedPage, CacheError> {
        if self.none_mode {
            let page = self.storage.read(page_id)?;
            let frame = Arc::new(Mutex::new(Frame {
                page_id: Some(page_id),
                bytes: page.bytes().to_vec(),
                dirty: false,
                pin_count: 1,
            }));
            return Ok(PinnedPage {
                backing: HandleBacking::Direct {
                    storage: Arc::clone(&self.storage),
                    frame,
                },
            });
        }
        let frame_idx = self.locate_or_admit(page_id, false)?;
        {
            let mut state = self.state.lock().unwrap();
            state.frames[frame_idx].pin_count += 1;
            state.policy.on_pin(frame_idx);
        }
        Ok(PinnedPage {
            backing: HandleBacking::Resident {
                cache: Arc::clone(self),
                frame_idx,
            },
        })
    }

    /// Bulk-prefetch `n` pages starting at `start` into the cache without pinning them
    /// and without touching hit/miss counters, per `spec.md §4.3`.
    pub fn load(self: &Arc<Self>, start: i64, n: u32) -> Result<(), CacheError> {
        if self.none_mode {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(n as usize);
        self.storage.bulk_read(start, n, &mut |p| ids.push(p.id()))?;
        for id in ids {
            let already_resident = self.state.lock().unwrap().page_table.contains_key(&id);
            if !already_resident {
                self.locate_or_admit_quiet(id)?;
            }
        }
        Ok(())
    }

    /// Write every dirty resident page through to storage.
    pub fn flush(self: &Arc<Self>) -> Result<(), CacheError> {
        if self.none_mode {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        for frame in state.frames.iter_mut() {
            if frame.dirty {
                if let Some(id) = frame.page_id {
                    self.storage
                        .write(&Page::from_bytes(id, frame.bytes.clone()))?;
                    frame.dirty = false;
                }
            }
        }
        Ok(())
    }

    fn locate_or_admit(&self, page_id: PageId, count_stats: bool) -> Result<usize, CacheError> {
        let mut state = self.state.lock().unwrap();
        if let Some(&frame_idx) = state.page_table.get(&page_id) {
            if count_stats {
                state.hits += 1;
            }
            state.policy.on_access(frame_idx);
            return Ok(frame_idx);
        }
        if count_stats {
            state.misses += 1;
        }
        *state.loads.entry(page_id).or_insert(0) += 1;
        self.admit_locked(&mut state, page_id)
    }

    fn locate_or_admit_quiet(&self, page_id: PageId) -> Result<usize, CacheError> {
        let mut state = self.state.lock().unwrap();
        if state.page_table.contains_key(&page_id) {
            return Ok(state.page_table[&page_id]);
        }
        self.admit_locked(&mut state, page_id)
    }

    fn admit_locked(&self, state: &mut CacheState, page_id: PageId) -> Result<usize, CacheError> {
        let frame_idx = if let Some(f) = state.free.pop() {
            f
        } else {
            let occupied: Vec<bool> = state.frames.iter().map(|f| f.page_id.is_some()).collect();
            let pinned: Vec<bool> = state.frames.iter().map(|f| f.pin_count > 0).collect();
            match state.policy.select_victim(&occupied, &pinned) {
                Some(v) => v,
                None => return Err(CacheError::AllPinned(page_id)),
            }
        };

        if let Some(old_id) = state.frames[frame_idx].page_id {
            if state.frames[frame_idx].dirty {
                log::debug!("evicting dirty page {} to admit page {}", old_id, page_id);
                self.storage.write(&Page::from_bytes(
                    old_id,
                    state.frames[frame_idx].bytes.clone(),
                ))?;
            } else {
                log::trace!("evicting clean page {} to admit page {}", old_id, page_id);
            }
            state.page_table.remove(&old_id);
        }

        let page = self.storage.read(page_id)?;
        state.frames[frame_idx] = Frame {
            page_id: Some(page_id),
            bytes: page.bytes().to_vec(),
            dirty: false,
            pin_count: 0,
        };
        state.page_table.insert(page_id, frame_idx);
        state.policy.on_admit(frame_idx);
        state.policy.on_access(frame_idx);
        Ok(frame_idx)
    }

    fn unpin_frame(&self, frame_idx: usize) {
        let mut state = self.state.lock().unwrap();
        if state.frames[frame_idx].pin_count > 0 {
            state.frames[frame_idx].pin_count -= 1;
        }
        if state.frames[frame_idx].pin_count == 0 {
            state.policy.on_unpin(frame_idx);
        }
    }
}

enum HandleBacking {
    Resident {
        cache: Arc<BufferCache>,
        frame_idx: usize,
    },
    Direct {
        storage: Arc<dyn Storage>,
        frame: Arc<Mutex<Frame>>,
    },
}

/// A handle to a cached page without a pinning guarantee. See `BufferCache::get`.
pub struct CachedPage {
    backing: HandleBacking,
}

impl CachedPage {
    pub fn page_id(&self) -> PageId {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                cache.state.lock().unwrap().frames[*frame_idx].page_id.unwrap()
            }
            HandleBacking::Direct { frame, .. } => frame.lock().unwrap().page_id.unwrap(),
        }
    }

    /// View these bytes as a `SlottedPage` with the given header width.
    pub fn with_page<R>(&self, header_size: u32, f: impl FnOnce(&SlottedPage) -> R) -> R {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                let state = cache.state.lock().unwrap();
                let page = SlottedPage::from_bytes(state.frames[*frame_idx].bytes.clone(), header_size);
                f(&page)
            }
            HandleBacking::Direct { frame, .. } => {
                let guard = frame.lock().unwrap();
                let page = SlottedPage::from_bytes(guard.bytes.clone(), header_size);
                f(&page)
            }
        }
    }

    /// View and mutate these bytes as a `SlottedPage` with the given header width. The
    /// (possibly changed) bytes are written back into the frame and it is marked dirty.
    pub fn with_page_mut<R>(&self, header_size: u32, f: impl FnOnce(&mut SlottedPage) -> R) -> R {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                let mut state = cache.state.lock().unwrap();
                let mut page =
                    SlottedPage::from_bytes(state.frames[*frame_idx].bytes.clone(), header_size);
                let result = f(&mut page);
                state.frames[*frame_idx].bytes = page.into_bytes();
                state.frames[*frame_idx].dirty = true;
                result
            }
            HandleBacking::Direct { frame, .. } => {
                let mut guard = frame.lock().unwrap();
                let mut page = SlottedPage::from_bytes(guard.bytes.clone(), header_size);
                let result = f(&mut page);
                guard.bytes = page.into_bytes();
                guard.dirty = true;
                result
            }
        }
    }
}

impl Drop for CachedPage {
    fn drop(&mut self) {
        // In "none" mode a plain `get()` also writes through if it was mutated, since
        // there is no residency to defer the write to.
        if let HandleBacking::Direct { storage, frame } = &self.backing {
            let guard = frame.lock().unwrap();
            if guard.dirty {
                if let Some(id) = guard.page_id {
                    let _ = storage.write(&Page::from_bytes(id, guard.bytes.clone()));
                }
            }
        }
    }
}

/// A pinned handle: an owned, non-`Clone` resource whose `Drop` unpins the page on
/// every exit path, per the "scoped resource" guidance of `spec.md §9`.
pub struct PinnedPage {
    backing: HandleBacking,
}

impl PinnedPage {
    pub fn page_id(&self) -> PageId {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                cache.state.lock().unwrap().frames[*frame_idx].page_id.unwrap()
            }
            HandleBacking::Direct { frame, .. } => frame.lock().unwrap().page_id.unwrap(),
        }
    }

    pub fn with_page<R>(&self, header_size: u32, f: impl FnOnce(&SlottedPage) -> R) -> R {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                let state = cache.state.lock().unwrap();
                let page = SlottedPage::from_bytes(state.frames[*frame_idx].bytes.clone(), header_size);
                f(&page)
            }
            HandleBacking::Direct { frame, .. } => {
                let guard = frame.lock().unwrap();
                let page = SlottedPage::from_bytes(guard.bytes.clone(), header_size);
                f(&page)
            }
        }
    }

    pub fn with_page_mut<R>(&self, header_size: u32, f: impl FnOnce(&mut SlottedPage) -> R) -> R {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => {
                let mut state = cache.state.lock().unwrap();
                let mut page =
                    SlottedPage::from_bytes(state.frames[*frame_idx].bytes.clone(), header_size);
                let result = f(&mut page);
                state.frames[*frame_idx].bytes = page.into_bytes();
                state.frames[*frame_idx].dirty = true;
                result
            }
            HandleBacking::Direct { frame, .. } => {
                let mut guard = frame.lock().unwrap();
                let mut page = SlottedPage::from_bytes(guard.bytes.clone(), header_size);
                let result = f(&mut page);
                guard.bytes = page.into_bytes();
                guard.dirty = true;
                result
            }
        }
    }

    /// Explicitly release the pin. Equivalent to dropping the handle; provided for
    /// call sites that want the release to read as an explicit step.
    pub fn unpin(self) {
        drop(self)
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        match &self.backing {
            HandleBacking::Resident { cache, frame_idx } => cache.unpin_frame(*frame_idx),
            HandleBacking::Direct { storage, frame } => {
                let guard = frame.lock().unwrap();
                if guard.dirty {
                    if let Some(id) = guard.page_id {
                        let _ = storage.write(&Page::from_bytes(id, guard.bytes.clone()));
                    }
                }
            }
        }
    }
}
