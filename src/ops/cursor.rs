//! `BufferedCursor`: one buffered iterator over a table's pages, keeping a window of
//! pages pinned at once (`spec.md §4.5`: "each iterator keeps a window of pages pinned,
//! exposes a top record and a pull that advances and refills"). Shared by the external
//! sort's merge phase and the sort-merge join.

use crate::cache::{BufferCache, PinnedPage};
use crate::common::PageId;
use crate::error::CacheError;
use crate::page::GetStatus;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) struct BufferedCursor {
    cache: Arc<BufferCache>,
    remaining: std::vec::IntoIter<PageId>,
    window: VecDeque<PinnedPage>,
    records: VecDeque<Vec<u8>>,
    window_size: usize,
}

impl BufferedCursor {
    pub fn new(cache: Arc<BufferCache>, page_ids: Vec<PageId>, window_size: usize) -> Result<Self, CacheError> {
        let mut cursor = Self {
            cache,
            remaining: page_ids.into_iter(),
            window: VecDeque::new(),
            records: VecDeque::new(),
            window_size: window_size.max(1),
        };
        cursor.fill_window()?;
        cursor.load_records()?;
        Ok(cursor)
    }

    fn fill_window(&mut self) -> Result<(), CacheError> {
        while self.window.len() < self.window_size {
            match self.remaining.next() {
                Some(id) => self.window.push_back(self.cache.get_and_pin(id)?),
                None => break,
            }
        }
        Ok(())
    }

    /// Pull live records off the next pinned page into the buffer, skipping pages that
    /// turn out to hold only tombstones, until either the buffer has something or the
    /// table is exhausted.
    fn load_records(&mut self) -> Result<(), CacheError> {
        while self.records.is_empty() {
            let page = match self.window.pop_front() {
                Some(p) => p,
                None => return Ok(()),
            };
            let live: Vec<Vec<u8>> = page.with_page(4, |p| {
                p.all_records()
                    .into_iter()
                    .filter_map(|(_, status)| match status {
                        GetStatus::Ok(bytes) => Some(bytes),
                        _ => None,
                    })
                    .collect()
            });
            drop(page);
            self.fill_window()?;
            if live.is_empty() {
                continue;
            }
            self.records.extend(live);
        }
        Ok(())
    }

    /// The current minimum-position record, if the cursor isn't exhausted.
    pub fn peek(&self) -> Option<&Vec<u8>> {
        self.records.front()
    }

    /// Consume and return the current record, refilling the buffer behind it.
    pub fn pull(&mut self) -> Result<Option<Vec<u8>>, CacheError> {
        let record = self.records.pop_front();
        if record.is_some() {
            self.load_records()?;
        }
        Ok(record)
    }
}
