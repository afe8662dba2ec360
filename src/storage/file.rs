//! A segment-file-backed `Storage` implementation: a directory of fixed-size segment
//! files, each memory-mapped once it exists. Page `p` lives in segment
//! `p / pages_per_segment` at offset `(p % pages_per_segment) * page_size`, per
//! `spec.md §4.1` and §6. Segments are created and pre-sized on first touch; `close`
//! forces every mapping to flush.

use super::{BulkWriter, CostAccumulator, Page, Storage};
use crate::error::StorageError;
use memmap2::{MmapMut, MmapOptions};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

pub struct FileStorage {
    dir: PathBuf,
    prefix: String,
    page_size: u32,
    segment_size: u64,
    pages_per_segment: u32,
    random_access_cost: f64,
    sequential_access_cost: f64,
    segments: RwLock<HashMap<u32, MmapMut>>,
    next_id: AtomicU32,
    cost: CostAccumulator,
}

impl FileStorage {
    pub fn open(
        dir: impl AsRef<Path>,
        prefix: &str,
        page_size: u32,
        segment_size: u64,
    ) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let pages_per_segment = (segment_size / page_size as u64) as u32;
        let storage = Self {
            dir,
            prefix: prefix.to_string(),
            page_size,
            segment_size,
            pages_per_segment,
            random_access_cost: crate::common::RANDOM_ACCESS_COST,
            sequential_access_cost: crate::common::SEQUENTIAL_ACCESS_COST,
            segments: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            cost: CostAccumulator::new(),
        };
        storage.discover_existing_segments()?;
        Ok(storage)
    }

    fn discover_existing_segments(&self) -> Result<(), StorageError> {
        let mut max_seen: i64 = -1;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name
                .strip_prefix(&self.prefix)
                .and_then(|s| s.strip_prefix('-'))
                .and_then(|s| s.strip_suffix(".seg"))
            {
                if let Ok(seg_no) = rest.parse::<u32>() {
                    let last_page = (seg_no + 1) as i64 * self.pages_per_segment as i64 - 1;
                    max_seen = max_seen.max(last_page);
                }
            }
        }
        if max_seen >= 0 {
            self.next_id.store((max_seen + 1) as u32, Ordering::SeqCst);
        }
        Ok(())
    }

    fn segment_path(&self, segment: u32) -> PathBuf {
        self.dir.join(format!("{}-{}.seg", self.prefix, segment))
    }

    fn segment_for(&self, page_id: u32) -> u32 {
        page_id / self.pages_per_segment
    }

    fn offset_in_segment(&self, page_id: u32) -> u64 {
        (page_id % self.pages_per_segment) as u64 * self.page_size as u64
    }

    fn ensure_segment_mapped(&self, segment: u32) -> Result<(), StorageError> {
        if self.segments.read().unwrap().contains_key(&segment) {
            return Ok(());
        }
        let mut segments = self.segments.write().unwrap();
        if segments.contains_key(&segment) {
            return Ok(());
        }
        let path = self.segment_path(segment);
        log::debug!("mapping segment {} at {}", segment, path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.set_len(self.segment_size)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        segments.insert(segment, mmap);
        Ok(())
    }

    fn bump_next_id(&self, id: u32) {
        let mut cur = self.next_id.load(Ordering::SeqCst);
        while id >= cur {
            match self
                .next_id
                .compare_exchange(cur, id + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    fn read_raw(&self, page_id: u32) -> Result<Vec<u8>, StorageError> {
        let segment = self.segment_for(page_id);
        self.ensure_segment_mapped(segment)?;
        let offset = self.offset_in_segment(page_id) as usize;
        let segments = self.segments.read().unwrap();
        let mmap = segments.get(&segment).unwrap();
        Ok(mmap[offset..offset + self.page_size as usize].to_vec())
    }

    fn write_raw(&self, page_id: u32, bytes: &[u8]) -> Result<(), StorageError> {
        let segment = self.segment_for(page_id);
        self.ensure_segment_mapped(segment)?;
        let offset = self.offset_in_segment(page_id) as usize;
        let mut segments = self.segments.write().unwrap();
        let mmap = segments.get_mut(&segment).unwrap();
        mmap[offset..offset + self.page_size as usize].copy_from_slice(bytes);
        drop(segments);
        self.bump_next_id(page_id);
        Ok(())
    }

    /// Force every mapping to flush to disk and release the mappings.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut segments = self.segments.write().unwrap();
        log::info!("flushing and unmapping {} segment(s)", segments.len());
        for mmap in segments.values() {
            mmap.flush()?;
        }
        segments.clear();
        Ok(())
    }
}

impl Storage for FileStorage {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read(&self, page_id: u32) -> Result<Page, StorageError> {
        self.cost.add(self.random_access_cost);
        let bytes = self.read_raw(page_id)?;
        self.bump_next_id(page_id);
        Ok(Page::from_bytes(page_id, bytes))
    }

    fn bulk_read(
        &self,
        start: i64,
        n: u32,
        consumer: &mut dyn FnMut(Page),
    ) -> Result<(), StorageError> {
        let start_id = if start < 0 {
            self.next_page_id()
        } else {
            start as u32
        };
        self.cost
            .add(self.random_access_cost + self.sequential_access_cost * n as f64);
        for i in 0..n {
            let id = start_id + i;
            let bytes = self.read_raw(id)?;
            consumer(Page::from_bytes(id, bytes));
        }
        Ok(())
    }

    fn write(&self, page: &Page) -> Result<(), StorageError> {
        self.cost.add(self.random_access_cost);
        self.write_no_cost(page)
    }

    fn write_no_cost(&self, page: &Page) -> Result<(), StorageError> {
        self.write_raw(page.id(), page.bytes())
    }

    fn bulk_write(&self, start: i64) -> Result<BulkWriter<'_>, StorageError> {
        let first_id = if start < 0 {
            self.next_page_id()
        } else {
            start as u32
        };
        Ok(BulkWriter::new(self, first_id))
    }

    fn next_page_id(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    fn cost(&self) -> &CostAccumulator {
        &self.cost
    }

    fn random_access_cost(&self) -> f64 {
        self.random_access_cost
    }

    fn sequential_access_cost(&self) -> f64 {
        self.sequential_access_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips_across_segments() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path(), "seg", 16, 16 * 4).unwrap();

        let mut page = Page::new(0, 16);
        page.bytes_mut()[0] = 9;
        storage.write(&page).unwrap();

        // Page 5 lives in the second segment (pages_per_segment == 4).
        let mut page5 = Page::new(5, 16);
        page5.bytes_mut()[0] = 55;
        storage.write(&page5).unwrap();

        assert_eq!(storage.read(0).unwrap().bytes()[0], 9);
        assert_eq!(storage.read(5).unwrap().bytes()[0], 55);
    }

    #[test]
    fn segment_files_are_presized() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path(), "seg", 16, 64).unwrap();
        storage.write(&Page::new(0, 16)).unwrap();
        let meta = std::fs::metadata(dir.path().join("seg-0.seg")).unwrap();
        assert_eq!(meta.len(), 64);
    }

    #[test]
    fn reopen_discovers_next_id_from_existing_segments() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path(), "seg", 16, 64).unwrap();
            storage.write(&Page::new(3, 16)).unwrap();
        }
        let storage = FileStorage::open(dir.path(), "seg", 16, 64).unwrap();
        assert_eq!(storage.next_page_id(), 4);
    }
}
