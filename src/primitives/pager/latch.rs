#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{PageId, PagerError, Result};

const SHARDS: usize = 16;

#[derive(Default, Debug)]
struct LatchState {
    readers: u32,
    writer: bool,
}

/// Per-page reader/writer latches shared by every transaction of a pager.
///
/// Acquisition never blocks: a conflicting request fails with
/// [`PagerError::Invalid`], the same way an in-process writer collision is
/// reported. Idle pages have no entry.
pub(crate) struct LatchTable {
    shards: Box<[Mutex<HashMap<u64, LatchState>>]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LatchMode {
    Shared,
    Exclusive,
}

/// Held latch on one page, released on drop.
pub(crate) struct PageLatch<'a> {
    table: &'a LatchTable,
    page: u64,
    mode: LatchMode,
}

impl LatchTable {
    pub(crate) fn new() -> Self {
        let shards = (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, page: u64) -> &Mutex<HashMap<u64, LatchState>> {
        &self.shards[(page % SHARDS as u64) as usize]
    }

    /// Latches `page` for reading alongside other readers.
    pub(crate) fn shared(&self, page: PageId) -> Result<PageLatch<'_>> {
        let mut shard = self.shard(page.0).lock();
        let state = shard.entry(page.0).or_default();
        if state.writer {
            return Err(PagerError::Invalid("page is latched for writing"));
        }
        state.readers += 1;
        Ok(PageLatch {
            table: self,
            page: page.0,
            mode: LatchMode::Shared,
        })
    }

    /// Latches `page` for writing; fails while any other view holds it.
    pub(crate) fn exclusive(&self, page: PageId) -> Result<PageLatch<'_>> {
        let mut shard = self.shard(page.0).lock();
        let state = shard.entry(page.0).or_default();
        if state.writer {
            return Err(PagerError::Invalid("page is latched for writing"));
        }
        if state.readers > 0 {
            return Err(PagerError::Invalid("page is latched by readers"));
        }
        state.writer = true;
        Ok(PageLatch {
            table: self,
            page: page.0,
            mode: LatchMode::Exclusive,
        })
    }

    /// Number of pages currently latched.
    pub(crate) fn latched_pages(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|state| state.writer || state.readers > 0)
                    .count()
            })
            .sum()
    }
}

impl Drop for PageLatch<'_> {
    fn drop(&mut self) {
        let mut shard = self.table.shard(self.page).lock();
        let idle = match shard.get_mut(&self.page) {
            Some(state) => {
                match self.mode {
                    LatchMode::Shared => state.readers = state.readers.saturating_sub(1),
                    LatchMode::Exclusive => state.writer = false,
                }
                !state.writer && state.readers == 0
            }
            None => false,
        };
        if idle {
            shard.remove(&self.page);
        }
    }
}

impl std::fmt::Debug for PageLatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLatch")
            .field("page", &self.page)
            .field("mode", &self.mode)
            .finish()
    }
}
