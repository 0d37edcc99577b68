#![allow(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::types::{PagerError, Result};

#[cfg(test)]
macro_rules! io_test_log {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(test))]
macro_rules! io_test_log {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Storage that can be extended and mapped into memory page by page.
///
/// A pager owns exactly one store and only touches it while holding its
/// growth lock, so implementations need not serialize calls themselves.
pub trait BackingStore: Send + Sync + 'static {
    /// Returns the current physical length of the store in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the store holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Extends the store to `len` bytes.
    ///
    /// Shrinking would pull bytes out from under live mappings, so a `len`
    /// below the current length must be rejected with
    /// [`PagerError::Invalid`].
    fn set_len(&self, len: u64) -> Result<()>;
    /// Creates a fresh shared, writable mapping over the first `len` bytes.
    fn map(&self, len: u64) -> Result<Mapping>;
    /// Forces the store's own buffers and metadata to durable storage.
    fn sync(&self) -> Result<()>;
}

/// One OS mapping together with the file handle it was created from.
///
/// Dropping a `Mapping` unmaps the view and closes the handle.
pub struct Mapping {
    mmap: MmapMut,
    _handle: File,
}

impl Mapping {
    /// Length of the mapped view in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true for a zero-length view.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Synchronously writes dirty mapped pages back to the store.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(PagerError::from)
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping").field("len", &self.len()).finish()
    }
}

fn map_file(file: &File, len: u64) -> Result<Mapping> {
    if len == 0 {
        return Err(PagerError::Invalid("cannot map an empty store"));
    }
    let map_len =
        usize::try_from(len).map_err(|_| PagerError::Invalid("mapping exceeds address space"))?;
    let handle = file.try_clone()?;
    io_test_log!("[io.map] len={}", map_len);
    // SAFETY: the mapping is shared and file backed. Only `FileStore` and
    // `ScratchStore` reach this, both own their handle exclusively and both
    // refuse to shrink (`extend_file`), so every mapped byte stays backed by
    // the file until the mapping is dropped. Truncation by another process
    // is outside what a mapping can defend against.
    let mmap = unsafe { MmapOptions::new().len(map_len).map_mut(&handle)? };
    Ok(Mapping {
        mmap,
        _handle: handle,
    })
}

fn extend_file(file: &File, len: u64) -> Result<()> {
    if len < file.metadata()?.len() {
        return Err(PagerError::Invalid("backing store cannot shrink"));
    }
    file.set_len(len).map_err(PagerError::from)
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(PagerError::from)
}

/// Store backed by a named database file.
///
/// The store owns its handle and is not `Clone`. Once handed to a pager, only
/// the pager changes its length.
pub struct FileStore {
    file: File,
    path: PathBuf,
}

impl FileStore {
    /// Opens or creates the file at `path`. Existing contents are kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_rw(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> &File {
        &self.file
    }
}

impl BackingStore for FileStore {
    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        io_test_log!("[io.set_len] path={} len={}", self.path.display(), len);
        extend_file(self.file(), len)
    }

    fn map(&self, len: u64) -> Result<Mapping> {
        map_file(self.file(), len)
    }

    fn sync(&self) -> Result<()> {
        io_test_log!("[io.sync] path={}", self.path.display());
        self.file().sync_all().map_err(PagerError::from)
    }
}

/// Scratch store backed by an unnamed temporary file.
///
/// Contents vanish when the store is dropped, so `sync` is a no-op.
pub struct ScratchStore {
    file: File,
}

impl ScratchStore {
    /// Creates an empty scratch store in the system temp directory.
    pub fn new() -> Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
        })
    }
}

impl BackingStore for ScratchStore {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        extend_file(&self.file, len)
    }

    fn map(&self, len: u64) -> Result<Mapping> {
        map_file(&self.file, len)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
