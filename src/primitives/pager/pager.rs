#![allow(unsafe_code)]

use std::cell::RefCell;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::epoch::{EpochCounters, MappingEpoch};
use super::latch::LatchTable;
use super::page::{Page, PageMut};
use super::pins::PinSet;
use crate::primitives::io::{BackingStore, FileStore, ScratchStore};
use crate::types::{EpochId, PageId, PagerError, Result};

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Configuration options for the pager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagerOptions {
    /// Size of each page in bytes; a power of two no smaller than 512.
    pub page_size: u32,
    /// Bytes reserved at the start of every page for the layer above.
    pub page_header_len: u32,
    /// Minimum number of pages a growth adds beyond the current capacity.
    pub min_grow_pages: u64,
    /// Whether `flush` also syncs the backing store after the mapping.
    pub sync_on_flush: bool,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_header_len: 0,
            min_grow_pages: 1,
            sync_on_flush: true,
        }
    }
}

impl PagerOptions {
    /// Returns these options with a different page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Returns these options with a different growth increment.
    pub fn with_min_grow_pages(mut self, pages: u64) -> Self {
        self.min_grow_pages = pages;
        self
    }
}

/// Point-in-time counters describing a pager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagerStats {
    /// Fixed page size in bytes.
    pub page_size: u32,
    /// Pages covered by the current epoch.
    pub allocated_pages: u64,
    /// Identifier of the current epoch.
    pub current_epoch: EpochId,
    /// Epochs constructed since open, including the initial one.
    pub epochs_created: u64,
    /// Epochs whose mapping has been torn down.
    pub epochs_torn_down: u64,
    /// Epochs still mapped.
    pub live_epochs: u64,
    /// Pages currently held by a [`Page`] or [`PageMut`] view.
    pub latched_pages: usize,
    /// Completed growth operations.
    pub growths: u64,
    /// Completed flushes.
    pub flushes: u64,
    /// Whether a flush has failed and new transactions are refused.
    pub durability_failed: bool,
}

struct GrowthState {
    store: Box<dyn BackingStore>,
    next_epoch: u64,
}

/// Page-indexed access over one growable, memory-mapped backing store.
///
/// Readers resolve pages through the current [`MappingEpoch`] with a single
/// atomic load. Growth runs under a pager-wide lock, builds a complete new
/// epoch, hands the superseded one to the growing transaction and only then
/// publishes the replacement, so a concurrent reader sees either the old or
/// the new epoch and never anything in between.
pub struct Pager {
    growth: Mutex<GrowthState>,
    current: ArcSwap<MappingEpoch>,
    allocated_pages: AtomicU64,
    latches: LatchTable,
    options: PagerOptions,
    page_size: usize,
    counters: Arc<EpochCounters>,
    next_txn: AtomicU64,
    growths: AtomicU64,
    flushes: AtomicU64,
    durability_failed: AtomicBool,
}

impl Pager {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let store = FileStore::open(path)?;
        Self::with_store(Box::new(store), options)
    }

    /// Creates a pager over an anonymous scratch store.
    pub fn scratch(options: PagerOptions) -> Result<Self> {
        Self::with_store(Box::new(ScratchStore::new()?), options)
    }

    /// Creates a pager over an arbitrary backing store.
    ///
    /// An empty store starts with zero allocated pages and no OS mapping.
    /// A non-empty store must be an exact multiple of the page size.
    pub fn with_store(store: Box<dyn BackingStore>, options: PagerOptions) -> Result<Self> {
        options.validate()?;
        let page_size = options.page_size as u64;
        let len = store.len()?;
        if len % page_size != 0 {
            return Err(PagerError::Corruption(
                "backing store length is not page aligned",
            ));
        }
        let counters = Arc::new(EpochCounters::default());
        let mapping = if len == 0 { None } else { Some(store.map(len)?) };
        let initial = Arc::new(MappingEpoch::new(
            EpochId(0),
            mapping,
            options.page_size as usize,
            Arc::clone(&counters),
        ));
        initial.acquire();
        let allocated_pages = initial.capacity_pages();
        info!(allocated_pages, page_size, "pager.open");
        Ok(Self {
            growth: Mutex::new(GrowthState {
                store,
                next_epoch: 1,
            }),
            current: ArcSwap::new(initial),
            allocated_pages: AtomicU64::new(allocated_pages),
            latches: LatchTable::new(),
            page_size: options.page_size as usize,
            options,
            counters,
            next_txn: AtomicU64::new(1),
            growths: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            durability_failed: AtomicBool::new(false),
        })
    }

    /// Fixed page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Options the pager was opened with.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    /// Number of allocated pages. Never decreases.
    pub fn allocated_pages(&self) -> u64 {
        self.allocated_pages.load(Ordering::Acquire)
    }

    /// Handle to the current epoch, for inspection.
    ///
    /// The handle does not pin the mapping; use a transaction for page access.
    pub fn current(&self) -> Arc<MappingEpoch> {
        self.current.load_full()
    }

    /// Snapshot of the pager counters.
    pub fn stats(&self) -> PagerStats {
        let created = self.counters.created();
        let torn_down = self.counters.torn_down();
        PagerStats {
            page_size: self.page_size as u32,
            allocated_pages: self.allocated_pages(),
            current_epoch: self.current.load().id(),
            epochs_created: created,
            epochs_torn_down: torn_down,
            live_epochs: created.saturating_sub(torn_down),
            latched_pages: self.latches.latched_pages(),
            growths: self.growths.load(Ordering::Acquire),
            flushes: self.flushes.load(Ordering::Acquire),
            durability_failed: self.durability_failed.load(Ordering::Acquire),
        }
    }

    /// Starts a transaction, pinning the current epoch.
    ///
    /// Fails once a flush has reported a durability failure.
    pub fn begin(&self) -> Result<Txn<'_>> {
        if self.durability_failed.load(Ordering::Acquire) {
            return Err(PagerError::Fatal(
                "pager stopped admitting transactions after a durability failure",
            ));
        }
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let txn = Txn {
            pager: self,
            id,
            pins: RefCell::new(PinSet::new()),
        };
        self.pin_current(&mut txn.pins.borrow_mut());
        trace!(txn = id, "txn.begin");
        Ok(txn)
    }

    /// Resolves `page` through the current epoch.
    ///
    /// If the transaction has not yet pinned the current epoch it is pinned
    /// now, so the view stays valid until the transaction ends even if another
    /// transaction grows the pager meanwhile. Range checks against
    /// [`allocated_pages`](Self::allocated_pages) belong to the caller; only
    /// pages outside the mapped epoch are rejected.
    ///
    /// The view holds a shared latch on the page. While any transaction
    /// holds a [`PageMut`] of it, this fails with [`PagerError::Invalid`].
    pub fn get<'t>(&self, txn: &'t Txn<'_>, page: PageId) -> Result<Page<'t>> {
        let latch = txn.pager.latches.shared(page)?;
        let (epoch, ptr) = self.resolve(txn, page)?;
        // SAFETY: `resolve` pinned `epoch` into `txn`. Pins are only released
        // when the transaction completes, which consumes it and ends `'t`.
        Ok(unsafe { Page::from_raw(page, epoch, ptr, self.page_size, self.header_len(), latch) })
    }

    /// Resolves `page` for writing. See [`get`](Self::get).
    ///
    /// The view holds the page's exclusive latch; this fails with
    /// [`PagerError::Invalid`] while any other view of the page exists.
    pub fn get_mut<'t>(&self, txn: &'t mut Txn<'_>, page: PageId) -> Result<PageMut<'t>> {
        let pager = txn.pager;
        let latch = pager.latches.exclusive(page)?;
        let (epoch, ptr) = self.resolve(txn, page)?;
        // SAFETY: as in `get`; the exclusive latch keeps every other view of
        // this page, from any transaction, from existing alongside it.
        Ok(unsafe {
            PageMut::from_raw(page, epoch, ptr, self.page_size, self.header_len(), latch)
        })
    }

    /// Grows the backing store so at least `requested_len` bytes are mapped.
    ///
    /// Growth is serialized. The superseded epoch is registered with `txn`
    /// for release at completion, the new epoch is pinned for both the pager
    /// and `txn`, and publication happens only after the new mapping exists.
    /// On error nothing is published; the store may already have been
    /// extended, and retrying with the same length reuses that space.
    pub fn ensure_capacity(&self, txn: &Txn<'_>, requested_len: u64) -> Result<()> {
        if !std::ptr::eq(txn.pager, self) {
            return Err(PagerError::Invalid("transaction belongs to another pager"));
        }
        let mut growth = self.growth.lock();
        let previous = self.current.load_full();
        let have = previous.capacity_bytes();
        if requested_len <= have {
            return Ok(());
        }
        let target = self.grow_target(have, requested_len)?;
        debug!(
            txn = txn.id,
            from_pages = previous.capacity_pages(),
            to_pages = target / self.page_size as u64,
            "pager.grow.start"
        );
        let epoch = match self.build_epoch(&mut growth, target) {
            Ok(epoch) => epoch,
            Err(err) => {
                warn!(txn = txn.id, target, error = %err, "pager.grow.error");
                return Err(err);
            }
        };
        epoch.acquire(); // current slot
        epoch.acquire(); // growing transaction
        {
            let mut pins = txn.pins.borrow_mut();
            pins.register_superseded(Arc::clone(&previous));
            pins.adopt(Arc::clone(&epoch));
        }
        self.current.store(Arc::clone(&epoch));
        previous.release();
        self.allocated_pages
            .store(epoch.capacity_pages(), Ordering::Release);
        self.growths.fetch_add(1, Ordering::AcqRel);
        debug!(
            txn = txn.id,
            epoch = epoch.id().0,
            superseded = previous.id().0,
            allocated_pages = epoch.capacity_pages(),
            "pager.grow.published"
        );
        Ok(())
    }

    /// Forces writes made through the current mapping, and the store itself,
    /// to durable storage.
    ///
    /// A failure is fatal for the pager: the error is returned as
    /// [`PagerError::Durability`] and later [`begin`](Self::begin) calls fail.
    pub fn flush(&self) -> Result<()> {
        let growth = self.growth.lock();
        let current = self.current.load_full();
        let result = current.flush().and_then(|()| {
            if self.options.sync_on_flush {
                growth.store.sync()
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::AcqRel);
                debug!(epoch = current.id().0, "pager.flush.complete");
                Ok(())
            }
            Err(err) => {
                self.durability_failed.store(true, Ordering::Release);
                error!(epoch = current.id().0, error = %err, "pager.flush.fatal");
                match err {
                    PagerError::Io(io) => Err(PagerError::Durability(io)),
                    other => Err(other),
                }
            }
        }
    }

    /// Releases the pager's hold on the current epoch and closes the store.
    ///
    /// Transactions borrow the pager, so none can still be active here.
    pub fn dispose(self) {
        drop(self);
    }

    fn header_len(&self) -> usize {
        self.options.page_header_len as usize
    }

    fn pin_current(&self, pins: &mut PinSet) -> usize {
        loop {
            let current = self.current.load();
            if let Some(idx) = pins.position(current.id()) {
                return idx;
            }
            if current.try_acquire() {
                return pins.push_acquired(Arc::clone(&*current));
            }
            // Superseded and released between the load and the acquire; the
            // next load observes its replacement.
            std::hint::spin_loop();
        }
    }

    fn resolve(&self, txn: &Txn<'_>, page: PageId) -> Result<(EpochId, NonNull<u8>)> {
        if !std::ptr::eq(txn.pager, self) {
            return Err(PagerError::Invalid("transaction belongs to another pager"));
        }
        let mut pins = txn.pins.borrow_mut();
        let idx = self.pin_current(&mut pins);
        let epoch = pins.get(idx);
        let ptr = epoch
            .page_ptr(page)
            .ok_or(PagerError::Invalid("page beyond mapped capacity"))?;
        Ok((epoch.id(), ptr))
    }

    fn grow_target(&self, have: u64, requested_len: u64) -> Result<u64> {
        const OVERFLOW: PagerError = PagerError::Invalid("growth length overflow");
        let page_size = self.page_size as u64;
        let floor = self
            .options
            .min_grow_pages
            .checked_mul(page_size)
            .and_then(|step| have.checked_add(step))
            .ok_or(OVERFLOW)?;
        let wanted = requested_len.max(floor);
        wanted
            .checked_add(page_size - 1)
            .map(|len| len / page_size * page_size)
            .ok_or(OVERFLOW)
    }

    fn build_epoch(&self, growth: &mut GrowthState, target: u64) -> Result<Arc<MappingEpoch>> {
        if growth.store.len()? < target {
            growth.store.set_len(target)?;
        }
        let mapping = growth.store.map(target)?;
        let id = EpochId(growth.next_epoch);
        growth.next_epoch += 1;
        Ok(Arc::new(MappingEpoch::new(
            id,
            Some(mapping),
            self.page_size,
            Arc::clone(&self.counters),
        )))
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        let current = self.current.load_full();
        current.release();
        let stats = self.stats();
        info!(
            allocated_pages = stats.allocated_pages,
            live_epochs = stats.live_epochs,
            "pager.dispose"
        );
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A transaction's view of the pager.
///
/// Holds one reference on every epoch it has read through or was handed by a
/// growth it triggered, and releases each exactly once when it completes.
pub struct Txn<'p> {
    pager: &'p Pager,
    id: u64,
    pins: RefCell<PinSet>,
}

impl<'p> Txn<'p> {
    /// Transaction identifier, unique per pager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pager this transaction runs against.
    pub fn pager(&self) -> &'p Pager {
        self.pager
    }

    /// Reads `page`. See [`Pager::get`].
    pub fn page(&self, page: PageId) -> Result<Page<'_>> {
        self.pager.get(self, page)
    }

    /// Writes `page`. See [`Pager::get_mut`].
    pub fn page_mut(&mut self, page: PageId) -> Result<PageMut<'_>> {
        let pager = self.pager;
        pager.get_mut(self, page)
    }

    /// Grows the pager on behalf of this transaction.
    pub fn ensure_capacity(&self, requested_len: u64) -> Result<()> {
        self.pager.ensure_capacity(self, requested_len)
    }

    /// Epochs currently pinned by this transaction.
    pub fn pinned_epochs(&self) -> Vec<EpochId> {
        self.pins.borrow().epochs().collect()
    }

    /// Completes the transaction successfully, releasing its pins.
    pub fn commit(self) {
        self.finish("commit");
    }

    /// Abandons the transaction, releasing its pins.
    pub fn abort(self) {
        self.finish("abort");
    }

    fn finish(mut self, outcome: &'static str) {
        let released = self.pins.get_mut().release_all();
        debug!(txn = self.id, outcome, released, "txn.complete");
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        let released = self.pins.get_mut().release_all();
        if released > 0 {
            trace!(txn = self.id, released, "txn.dropped");
        }
    }
}

impl std::fmt::Debug for Txn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("pins", &*self.pins.borrow())
            .finish()
    }
}
