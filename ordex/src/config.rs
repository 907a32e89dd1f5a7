//! Engine configuration module.
//!
//! This module provides configuration loading for the engine from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `ORDEX_SEGMENT_SIZE_BYTES`: Bytes per existence/posting bitmap segment (default: `4000`)
//! - `ORDEX_BRANCHING_FACTOR`: Maximum children of a B+tree branch node (default: `40`)
//!
//! # Invariants
//!
//! - `segment_size` is always within the supported byte range
//! - `branching_factor` is always at least [`EngineConfig::MIN_BRANCHING_FACTOR`]

use crate::storage::{SegmentError, SegmentSize};

/// Environment variable naming the segment size in bytes.
pub const SEGMENT_SIZE_ENV: &str = "ORDEX_SEGMENT_SIZE_BYTES";
/// Environment variable naming the B+tree branching factor.
pub const BRANCHING_FACTOR_ENV: &str = "ORDEX_BRANCHING_FACTOR";

/// Engine configuration.
///
/// The segment size is fixed when a database is first opened and must match
/// on every later open. The branching factor applies to every ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of one segment of the record-number space.
    pub segment_size: SegmentSize,
    /// Maximum number of children of a root or branch node.
    pub branching_factor: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A setting has an invalid value.
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_size: SegmentSize::DEFAULT,
            branching_factor: Self::DEFAULT_BRANCHING_FACTOR,
        }
    }
}

impl EngineConfig {
    /// Default segment size in bytes.
    pub const DEFAULT_SEGMENT_SIZE_BYTES: usize = SegmentSize::DEFAULT_BYTES;
    /// Default branching factor.
    pub const DEFAULT_BRANCHING_FACTOR: usize = 40;
    /// Smallest branching factor that still allows a leaf split.
    pub const MIN_BRANCHING_FACTOR: usize = crate::storage::btree::MIN_BRANCHING_FACTOR;

    /// Build a configuration from explicit values.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment size is out of range or the branching
    /// factor is below [`Self::MIN_BRANCHING_FACTOR`].
    pub fn new(segment_size_bytes: usize, branching_factor: usize) -> Result<Self, ConfigError> {
        let segment_size = SegmentSize::new(segment_size_bytes).map_err(|e: SegmentError| {
            ConfigError::InvalidValue {
                name: SEGMENT_SIZE_ENV.to_string(),
                message: e.to_string(),
            }
        })?;
        if branching_factor < Self::MIN_BRANCHING_FACTOR {
            return Err(ConfigError::InvalidValue {
                name: BRANCHING_FACTOR_ENV.to_string(),
                message: format!(
                    "{branching_factor} is less than the minimum of {}",
                    Self::MIN_BRANCHING_FACTOR
                ),
            });
        }
        Ok(Self {
            segment_size,
            branching_factor,
        })
    }

    /// The smallest segment size and branching factor.
    ///
    /// Segment boundaries and node splits are reached after a few records.
    #[must_use]
    pub const fn smallest() -> Self {
        Self {
            segment_size: SegmentSize::MIN,
            branching_factor: Self::MIN_BRANCHING_FACTOR,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a valid number, or
    /// the resulting values fail validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let segment_size_bytes =
            Self::load_number(&lookup, SEGMENT_SIZE_ENV, Self::DEFAULT_SEGMENT_SIZE_BYTES)?;
        let branching_factor =
            Self::load_number(&lookup, BRANCHING_FACTOR_ENV, Self::DEFAULT_BRANCHING_FACTOR)?;
        Self::new(segment_size_bytes, branching_factor)
    }

    /// Return a copy of this configuration using `segment_size`.
    ///
    /// Used to reopen a database with the segment size recorded in it.
    #[must_use]
    pub const fn with_segment_size(mut self, segment_size: SegmentSize) -> Self {
        self.segment_size = segment_size;
        self
    }

    fn load_number(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
        default: usize,
    ) -> Result<usize, ConfigError> {
        match lookup(name) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{value}' is not a valid number"),
                }),
            None => Ok(default),
        }
    }
}
