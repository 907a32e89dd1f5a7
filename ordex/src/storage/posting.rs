//! Posting sets: which records hold a given field value.
//!
//! Each value has a directory mapping segment number to a [`SegmentRef`].
//! A singleton is recorded in the directory itself; lists and bitmaps are
//! stored as a separate payload per segment.
//!
//! Encoding transitions within a segment:
//! - Singleton + different record → two-element list
//! - List growing past the upper conversion limit → bitmap
//! - Bitmap shrinking to the lower conversion limit → list
//! - List shrinking to one record → singleton
//!
//! The upper and lower limits differ so a segment whose count hovers near a
//! boundary is not re-encoded on every change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::storage::bitmap::Bitmap;
use crate::storage::codec::{self, CodecError};
use crate::storage::io::{BackingStore, StoreError};
use crate::storage::keys::FieldKeys;
use crate::storage::recordset::{RecordSet, SegmentRecords};
use crate::storage::segment::{LIST_ENTRY_BYTES, SegmentNumber, SegmentSize};

/// Errors from posting set maintenance.
#[derive(Debug, thiserror::Error)]
pub enum PostingError {
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Stored value could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The directory names a list or bitmap payload that is not stored.
    #[error("posting payload for segment {segment} is missing")]
    MissingPayload { segment: SegmentNumber },
    /// A stored list payload has an odd number of bytes.
    #[error("posting list for segment {segment} has {len} bytes")]
    MalformedList { segment: SegmentNumber, len: usize },
}

/// Directory entry for one segment of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentRef {
    /// Exactly one record, at this offset.
    Singleton(u16),
    /// A list payload holding this many records.
    List(u32),
    /// A bitmap payload holding this many records.
    Bitmap(u32),
}

impl SegmentRef {
    /// Number of records in the segment.
    #[must_use]
    pub const fn count(self) -> u32 {
        match self {
            Self::Singleton(_) => 1,
            Self::List(count) | Self::Bitmap(count) => count,
        }
    }
}

/// Segment directory of one value.
pub type PostingDirectory = BTreeMap<SegmentNumber, SegmentRef>;

/// Outcome of removing a record from a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The record was not referenced.
    Absent,
    /// The record was removed and the value still has records.
    Kept,
    /// The record was the value's last; its directory has been deleted.
    EntryDeleted,
}

/// Posting sets of one field.
#[derive(Debug, Clone)]
pub struct PostingSet {
    keys: FieldKeys,
    segment_size: SegmentSize,
}

impl PostingSet {
    /// Posting sets stored under `keys`.
    #[must_use]
    pub const fn new(keys: FieldKeys, segment_size: SegmentSize) -> Self {
        Self { keys, segment_size }
    }

    /// The field's keys.
    #[must_use]
    pub const fn keys(&self) -> &FieldKeys {
        &self.keys
    }

    /// The segment size record numbers are split by.
    #[must_use]
    pub const fn segment_size(&self) -> SegmentSize {
        self.segment_size
    }

    /// Read a value's directory.
    pub fn directory<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
    ) -> Result<Option<PostingDirectory>, PostingError> {
        codec::read(store, &self.keys.posting_directory(value))
    }

    /// Whether the value has any records.
    pub fn exists<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
    ) -> Result<bool, PostingError> {
        Ok(store.contains(&self.keys.posting_directory(value))?)
    }

    /// Read one segment's records.
    pub fn read_segment<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
        segment: SegmentNumber,
        reference: SegmentRef,
    ) -> Result<SegmentRecords, PostingError> {
        match reference {
            SegmentRef::Singleton(offset) => Ok(SegmentRecords::Singleton(offset)),
            SegmentRef::List(_) => {
                let bytes: Vec<u8> = codec::read::<_, _, PostingError>(
                    store,
                    &self.keys.posting_payload(segment, value),
                )?
                .ok_or(PostingError::MissingPayload { segment })?;
                Ok(SegmentRecords::List(decode_list(segment, &bytes)?))
            }
            SegmentRef::Bitmap(_) => {
                let bitmap: Bitmap = codec::read::<_, _, PostingError>(
                    store,
                    &self.keys.posting_payload(segment, value),
                )?
                .ok_or(PostingError::MissingPayload { segment })?;
                Ok(SegmentRecords::Bitmap(bitmap))
            }
        }
    }

    /// Union the value's records into `records`.
    pub fn populate<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
        records: &mut RecordSet,
    ) -> Result<(), PostingError> {
        let Some(directory) = self.directory(store, value)? else {
            return Ok(());
        };
        for (segment, reference) in directory {
            let segment_records = self.read_segment(store, value, segment, reference)?;
            records.merge_segment(segment, segment_records);
        }
        Ok(())
    }

    /// Every record holding the value.
    pub fn records<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
    ) -> Result<RecordSet, PostingError> {
        let mut records = RecordSet::new(self.segment_size);
        self.populate(store, value, &mut records)?;
        Ok(records)
    }

    /// Number of records holding the value, from the directory counts.
    pub fn count<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
    ) -> Result<usize, PostingError> {
        Ok(self.directory(store, value)?.map_or(0, |directory| {
            directory.values().map(|r| r.count() as usize).sum()
        }))
    }

    /// Reference `offset` of `segment` from the value.
    ///
    /// `directory` is the value's directory as already read by the caller,
    /// so a caller can act on the value's absence before it is created.
    pub fn add<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        directory: Option<PostingDirectory>,
        segment: SegmentNumber,
        offset: u16,
    ) -> Result<(), PostingError> {
        let mut directory = directory.unwrap_or_default();
        let updated = match directory.get(&segment).copied() {
            None => SegmentRecords::Singleton(offset),
            Some(reference) => {
                let current = self.read_segment(store, value, segment, reference)?;
                if current.contains(offset) {
                    return Ok(());
                }
                current.with(offset, self.segment_size)
            }
        };
        let reference = self.store_segment(store, value, segment, &updated)?;
        trace!(segment, ?reference, "posting segment grew");
        directory.insert(segment, reference);
        self.write_directory(store, value, &directory)
    }

    /// Remove `offset` of `segment` from the value.
    pub fn remove<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        segment: SegmentNumber,
        offset: u16,
    ) -> Result<Removal, PostingError> {
        let Some(mut directory) = self.directory(store, value)? else {
            return Ok(Removal::Absent);
        };
        let Some(reference) = directory.get(&segment).copied() else {
            return Ok(Removal::Absent);
        };
        let current = self.read_segment(store, value, segment, reference)?;
        if !current.contains(offset) {
            return Ok(Removal::Absent);
        }

        if let Some(remaining) = current.without(offset, self.segment_size) {
            let reference = self.store_segment(store, value, segment, &remaining)?;
            trace!(segment, ?reference, "posting segment shrank");
            directory.insert(segment, reference);
            self.write_directory(store, value, &directory)?;
            return Ok(Removal::Kept);
        }

        store.delete(&self.keys.posting_payload(segment, value))?;
        directory.remove(&segment);
        if directory.is_empty() {
            store.delete(&self.keys.posting_directory(value))?;
            return Ok(Removal::EntryDeleted);
        }
        self.write_directory(store, value, &directory)?;
        Ok(Removal::Kept)
    }

    /// Delete every segment of the value. Returns whether it had any.
    pub fn delete_all<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
    ) -> Result<bool, PostingError> {
        let Some(directory) = self.directory(store, value)? else {
            return Ok(false);
        };
        for (segment, reference) in directory {
            if !matches!(reference, SegmentRef::Singleton(_)) {
                store.delete(&self.keys.posting_payload(segment, value))?;
            }
        }
        store.delete(&self.keys.posting_directory(value))?;
        Ok(true)
    }

    /// Store `records` as the value's complete posting set.
    ///
    /// The value must have no existing segments. Returns whether anything
    /// was written.
    pub fn write_all<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        records: &RecordSet,
    ) -> Result<bool, PostingError> {
        let mut normal = records.clone();
        normal.normalize();
        let mut directory = PostingDirectory::new();
        for (segment, segment_records) in normal.segments() {
            let reference = self.store_segment(store, value, segment, segment_records)?;
            directory.insert(segment, reference);
        }
        if directory.is_empty() {
            return Ok(false);
        }
        self.write_directory(store, value, &directory)?;
        Ok(true)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn store_segment<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        segment: SegmentNumber,
        records: &SegmentRecords,
    ) -> Result<SegmentRef, PostingError> {
        let payload_key = self.keys.posting_payload(segment, value);
        match records {
            SegmentRecords::Singleton(offset) => {
                store.delete(&payload_key)?;
                Ok(SegmentRef::Singleton(*offset))
            }
            SegmentRecords::List(offsets) => {
                codec::write::<_, _, PostingError>(store, &payload_key, &encode_list(offsets))?;
                Ok(SegmentRef::List(offsets.len() as u32))
            }
            SegmentRecords::Bitmap(bitmap) => {
                codec::write::<_, _, PostingError>(store, &payload_key, bitmap)?;
                Ok(SegmentRef::Bitmap(bitmap.count() as u32))
            }
        }
    }

    fn write_directory<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        directory: &PostingDirectory,
    ) -> Result<(), PostingError> {
        codec::write(store, &self.keys.posting_directory(value), directory)
    }
}

/// Offsets as consecutive big-endian `u16`s.
fn encode_list(offsets: &[u16]) -> Vec<u8> {
    offsets.iter().flat_map(|o| o.to_be_bytes()).collect()
}

fn decode_list(segment: SegmentNumber, bytes: &[u8]) -> Result<Vec<u16>, PostingError> {
    if bytes.len() % LIST_ENTRY_BYTES != 0 {
        return Err(PostingError::MalformedList {
            segment,
            len: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(LIST_ENTRY_BYTES)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
