//! Paging layer for an embedded transactional storage engine.
//!
//! A database file is exposed as a flat array of fixed-size pages backed by a
//! growable memory mapping. Each mapping is a reference-counted
//! [`MappingEpoch`]; growth publishes a new epoch without invalidating pages
//! that running transactions obtained from the old one.

pub mod config;
pub mod primitives;
pub mod types;

pub use config::ConfigError;
pub use primitives::io::{BackingStore, FileStore, Mapping, ScratchStore};
pub use primitives::pager::{
    MappingEpoch, Page, PageMut, Pager, PagerOptions, PagerStats, PinSet, Txn, DEFAULT_PAGE_SIZE,
};
pub use types::{EpochId, PageId, PagerError, Result};
