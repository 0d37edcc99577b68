#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use super::latch::PageLatch;
use crate::types::{EpochId, PageId};

/// Read-only view of one page inside a pinned mapping epoch.
///
/// Views borrow the transaction that produced them. The transaction keeps the
/// epoch pinned until it completes, so the bytes stay mapped even after the
/// pager has moved on to a larger epoch. A shared page latch is held for the
/// life of the view, so no [`PageMut`] of the same page can exist meanwhile.
pub struct Page<'t> {
    id: PageId,
    epoch: EpochId,
    ptr: NonNull<u8>,
    page_size: usize,
    header_len: usize,
    _latch: PageLatch<'t>,
    _txn: PhantomData<&'t [u8]>,
}

/// Writable view of one page inside a pinned mapping epoch.
///
/// Holding a `PageMut` borrows the transaction exclusively and holds the
/// page's exclusive latch, so no other view of the page, from any
/// transaction, exists while it lives.
pub struct PageMut<'t> {
    id: PageId,
    epoch: EpochId,
    ptr: NonNull<u8>,
    page_size: usize,
    header_len: usize,
    _latch: PageLatch<'t>,
    _txn: PhantomData<&'t mut [u8]>,
}

impl<'t> Page<'t> {
    /// Caller guarantees `ptr..ptr + page_size` is mapped for `'t` and that
    /// `latch` is a shared latch on `id`.
    pub(crate) unsafe fn from_raw(
        id: PageId,
        epoch: EpochId,
        ptr: NonNull<u8>,
        page_size: usize,
        header_len: usize,
        latch: PageLatch<'t>,
    ) -> Self {
        Self {
            id,
            epoch,
            ptr,
            page_size,
            header_len,
            _latch: latch,
            _txn: PhantomData,
        }
    }

    /// Page number this view was resolved from.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Epoch the view points into.
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Byte offset of the page within the mapping.
    pub fn offset(&self) -> u64 {
        self.id.0 * self.page_size as u64
    }

    /// Full page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes available after the reserved page header.
    pub fn usable_span(&self) -> usize {
        self.page_size - self.header_len
    }

    /// Entire page, header included.
    pub fn data(&self) -> &[u8] {
        // SAFETY: `from_raw` guarantees the range is mapped while `'t` lives;
        // the shared latch keeps every writer out.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.page_size) }
    }

    /// Page bytes following the reserved header.
    pub fn usable(&self) -> &[u8] {
        &self.data()[self.header_len..]
    }
}

impl<'t> PageMut<'t> {
    /// Caller guarantees `ptr..ptr + page_size` is mapped for `'t` and that
    /// `latch` is the exclusive latch on `id`.
    pub(crate) unsafe fn from_raw(
        id: PageId,
        epoch: EpochId,
        ptr: NonNull<u8>,
        page_size: usize,
        header_len: usize,
        latch: PageLatch<'t>,
    ) -> Self {
        Self {
            id,
            epoch,
            ptr,
            page_size,
            header_len,
            _latch: latch,
            _txn: PhantomData,
        }
    }

    /// Page number this view was resolved from.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Epoch the view points into.
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Bytes available after the reserved page header.
    pub fn usable_span(&self) -> usize {
        self.page_size - self.header_len
    }

    /// Entire page, header included.
    pub fn data(&self) -> &[u8] {
        // SAFETY: see `from_raw`; `&self` borrows exclude `data_mut`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.page_size) }
    }

    /// Entire page, header included, for writing.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: the exclusive latch rules out views from other transactions
        // and `&mut self` rules out overlapping borrows of this one.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.page_size) }
    }

    /// Page bytes following the reserved header, for writing.
    pub fn usable_mut(&mut self) -> &mut [u8] {
        let header = self.header_len;
        &mut self.data_mut()[header..]
    }
}

impl std::fmt::Debug for Page<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl std::fmt::Debug for PageMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageMut")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("page_size", &self.page_size)
            .finish()
    }
}
