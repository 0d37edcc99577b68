#![forbid(unsafe_code)]
//! Identifiers and the error type shared by the pager components.

use std::fmt;

use crate::config::ConfigError;

/// Index of a fixed-size page within the backing store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Identifier of a mapping epoch, unique for the lifetime of one pager.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EpochId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

/// Errors surfaced by the pager.
#[derive(thiserror::Error, Debug)]
pub enum PagerError {
    /// Backing-store I/O failure. Growth may be retried with the same length.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The backing store does not satisfy the page layout invariants.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// An argument was rejected before touching the backing store.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Flushing to durable storage failed; the pager stops admitting transactions.
    #[error("durability failure: {0}")]
    Durability(std::io::Error),
    /// The pager refuses work after an earlier fatal condition.
    #[error("fatal: {0}")]
    Fatal(&'static str),
    /// Configuration could not be loaded or validated.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PagerError>;
