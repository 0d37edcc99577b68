#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::primitives::io::Mapping;
use crate::types::{EpochId, PageId, Result};

/// Lifetime counters shared by a pager and every epoch it creates.
#[derive(Default, Debug)]
pub(crate) struct EpochCounters {
    created: AtomicU64,
    torn_down: AtomicU64,
}

impl EpochCounters {
    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    pub(crate) fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::Acquire)
    }
}

/// One mapping of the backing store at a fixed capacity.
///
/// The base address and capacity never change after construction. The
/// reference count is the only mutable state: the mapping is unmapped and its
/// file handle closed exactly once, by the `release` that takes the count
/// from one to zero. Epochs start at zero references; the creator acquires
/// them before publishing.
///
/// `Arc<MappingEpoch>` keeps the bookkeeping alive, the reference count keeps
/// the OS mapping alive. Holding an `Arc` without a reference does not make
/// page views valid. Only the pager and transaction pin sets move the count;
/// handles outside the crate are read-only:
///
/// ```compile_fail
/// # fn main() -> mmpager::Result<()> {
/// let pager = mmpager::Pager::scratch(mmpager::PagerOptions::default())?;
/// pager.current().release();
/// # Ok(())
/// # }
/// ```
pub struct MappingEpoch {
    id: EpochId,
    base: Option<NonNull<u8>>,
    len: usize,
    page_size: usize,
    refs: AtomicUsize,
    released: AtomicBool,
    region: Mutex<Option<Mapping>>,
    counters: Arc<EpochCounters>,
}

// SAFETY: `base` points into `region`, which is only dropped by the single
// teardown path once no reference remains. All other fields are atomics or
// behind a mutex.
unsafe impl Send for MappingEpoch {}
unsafe impl Sync for MappingEpoch {}

impl MappingEpoch {
    pub(crate) fn new(
        id: EpochId,
        mut mapping: Option<Mapping>,
        page_size: usize,
        counters: Arc<EpochCounters>,
    ) -> Self {
        let (base, len) = match mapping.as_mut() {
            Some(region) => (NonNull::new(region.as_mut_ptr()), region.len()),
            None => (None, 0),
        };
        counters.created.fetch_add(1, Ordering::AcqRel);
        Self {
            id,
            base,
            len,
            page_size,
            refs: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            region: Mutex::new(mapping),
            counters,
        }
    }

    /// Identifier of this epoch within its pager.
    pub fn id(&self) -> EpochId {
        self.id
    }

    /// Number of whole pages covered by the mapping.
    pub fn capacity_pages(&self) -> u64 {
        (self.len / self.page_size) as u64
    }

    /// Mapped length in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.len as u64
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// True once the mapping has been torn down.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Adds a reference.
    ///
    /// # Panics
    ///
    /// Panics if the epoch was already torn down.
    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
        assert!(
            !self.is_released(),
            "acquire on released mapping epoch {}",
            self.id
        );
    }

    /// Adds a reference only if at least one is still held.
    ///
    /// Returns false when the epoch has dropped to zero, which means it was
    /// superseded and torn down (or is about to be); callers must not use it.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops a reference, tearing the mapping down when it was the last one.
    ///
    /// # Panics
    ///
    /// Panics on a release without a matching acquire.
    pub(crate) fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev != 0,
            "release without matching acquire on mapping epoch {}",
            self.id
        );
        if prev == 1 {
            self.teardown();
        }
    }

    fn teardown(&self) {
        let already = self.released.swap(true, Ordering::AcqRel);
        assert!(!already, "mapping epoch {} torn down twice", self.id);
        let region = self.region.lock().take();
        drop(region);
        self.counters.torn_down.fetch_add(1, Ordering::AcqRel);
        debug!(
            epoch = self.id.0,
            capacity_pages = self.capacity_pages(),
            "epoch.teardown"
        );
    }

    /// Address of `page` inside this mapping, if the mapping covers it.
    pub(crate) fn page_ptr(&self, page: PageId) -> Option<NonNull<u8>> {
        if page.0 >= self.capacity_pages() {
            return None;
        }
        let base = self.base?;
        let offset = page.0 as usize * self.page_size;
        // SAFETY: `offset + page_size <= len`, so the result stays inside the
        // mapped region starting at `base`.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) })
    }

    /// Writes dirty pages of this mapping back to the store.
    pub(crate) fn flush(&self) -> Result<()> {
        match self.region.lock().as_ref() {
            Some(region) => region.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for MappingEpoch {
    fn drop(&mut self) {
        let refs = *self.refs.get_mut();
        if refs != 0 {
            warn!(epoch = self.id.0, refs, "epoch.dropped_with_references");
        }
    }
}

impl std::fmt::Debug for MappingEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingEpoch")
            .field("id", &self.id)
            .field("capacity_pages", &self.capacity_pages())
            .field("refs", &self.ref_count())
            .field("released", &self.is_released())
            .finish()
    }
}
