//! Segment arithmetic over the record-number space.
//!
//! Record numbers are split into a segment number and an offset within the
//! segment: `record = segment * records_per_segment + offset`. Every
//! existence bitmap and every dense posting bitmap covers exactly one segment.

use serde::{Deserialize, Serialize};

/// A primary-key slot in a file.
pub type RecordNumber = u64;

/// Index of a fixed-size block of record numbers.
pub type SegmentNumber = u64;

/// Smallest supported segment size in bytes.
pub const MIN_SEGMENT_SIZE_BYTES: usize = 8;

/// Largest supported segment size in bytes. Offsets must fit in a `u16`.
pub const MAX_SEGMENT_SIZE_BYTES: usize = 8192;

/// Gap between the list-to-bitmap promotion threshold and the
/// bitmap-to-list demotion threshold.
pub const CONVERSION_HYSTERESIS: usize = 2;

/// Bytes used by one offset in a sparse list.
pub const LIST_ENTRY_BYTES: usize = 2;

/// Errors for segment size configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    /// The requested size is outside the supported range.
    #[error(
        "segment size {bytes} bytes is outside the supported range {MIN_SEGMENT_SIZE_BYTES}..={MAX_SEGMENT_SIZE_BYTES}"
    )]
    OutOfRange { bytes: usize },
}

/// Size of one segment, fixed when a database is first opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SegmentSize {
    bytes: usize,
}

impl SegmentSize {
    /// Default segment size in bytes.
    pub const DEFAULT_BYTES: usize = 4000;

    /// The default segment size.
    pub const DEFAULT: Self = Self {
        bytes: Self::DEFAULT_BYTES,
    };

    /// The smallest supported segment size.
    pub const MIN: Self = Self {
        bytes: MIN_SEGMENT_SIZE_BYTES,
    };

    /// Create a segment size of `bytes` bytes.
    pub const fn new(bytes: usize) -> Result<Self, SegmentError> {
        if bytes < MIN_SEGMENT_SIZE_BYTES || bytes > MAX_SEGMENT_SIZE_BYTES {
            return Err(SegmentError::OutOfRange { bytes });
        }
        Ok(Self { bytes })
    }

    /// Bytes in one segment bitmap.
    #[must_use]
    pub const fn bytes(self) -> usize {
        self.bytes
    }

    /// Record numbers covered by one segment.
    #[must_use]
    pub const fn records(self) -> usize {
        self.bytes * 8
    }

    /// Largest sparse list kept before promotion to a bitmap.
    ///
    /// Beyond this a list of 2-byte offsets is no smaller than the bitmap.
    #[must_use]
    pub const fn upper_conversion_limit(self) -> usize {
        self.bytes / LIST_ENTRY_BYTES - 1
    }

    /// Bitmap cardinality at or below which a bitmap is demoted to a list.
    #[must_use]
    pub const fn lower_conversion_limit(self) -> usize {
        let upper = self.upper_conversion_limit();
        if upper > CONVERSION_HYSTERESIS {
            upper - CONVERSION_HYSTERESIS
        } else {
            1
        }
    }

    /// Split a record number into its segment and offset.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn split(self, record: RecordNumber) -> (SegmentNumber, u16) {
        let per_segment = self.records() as u64;
        (record / per_segment, (record % per_segment) as u16)
    }

    /// Join a segment and offset into a record number.
    #[must_use]
    pub const fn join(self, segment: SegmentNumber, offset: u16) -> RecordNumber {
        segment * self.records() as u64 + offset as u64
    }

    /// Highest offset within a segment.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn last_offset(self) -> u16 {
        (self.records() - 1) as u16
    }
}

impl TryFrom<usize> for SegmentSize {
    type Error = SegmentError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}

impl From<SegmentSize> for usize {
    fn from(size: SegmentSize) -> Self {
        size.bytes
    }
}
