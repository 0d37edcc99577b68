#![forbid(unsafe_code)]
//! Loading [`PagerOptions`] from TOML.
//!
//! ```toml
//! [pager]
//! page_size = 8192
//! page_header_len = 32
//! min_grow_pages = 64
//! sync_on_flush = true
//! ```
//!
//! Every key is optional; missing keys keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::primitives::pager::PagerOptions;

const MIN_PAGE_SIZE: u32 = 512;

/// Errors raised while reading or validating pager configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read pager config {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse pager config {path}: {source}")]
    ParseFile {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// An in-memory configuration document is not valid TOML for this schema.
    #[error("failed to parse pager config: {source}")]
    Parse {
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// A value is outside its permitted range.
    #[error("pager option '{field}' is invalid: {reason}")]
    Invalid {
        /// Offending option.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    pager: RawPagerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPagerSection {
    page_size: Option<u32>,
    page_header_len: Option<u32>,
    min_grow_pages: Option<u64>,
    sync_on_flush: Option<bool>,
}

impl RawPagerSection {
    fn merge_into(self, mut options: PagerOptions) -> PagerOptions {
        if let Some(page_size) = self.page_size {
            options.page_size = page_size;
        }
        if let Some(header) = self.page_header_len {
            options.page_header_len = header;
        }
        if let Some(pages) = self.min_grow_pages {
            options.min_grow_pages = pages;
        }
        if let Some(sync) = self.sync_on_flush {
            options.sync_on_flush = sync;
        }
        options
    }
}

impl PagerOptions {
    /// Parses options from a TOML document and validates them.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        let options = raw.pager.merge_into(PagerOptions::default());
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file and validates them.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })?;
        let options = raw.pager.merge_into(PagerOptions::default());
        options.validate()?;
        Ok(options)
    }

    /// Checks that the options describe a usable page layout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < MIN_PAGE_SIZE || !self.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be a power of two no smaller than 512",
            });
        }
        if self.page_header_len >= self.page_size {
            return Err(ConfigError::Invalid {
                field: "page_header_len",
                reason: "must be smaller than page_size",
            });
        }
        if self.min_grow_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "min_grow_pages",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}
