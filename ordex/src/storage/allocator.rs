//! Record number allocator using per-segment existence bitmaps.
//!
//! Each file keeps one bitmap per segment that has ever held a record.
//! Each bit represents one record number: 0 = free, 1 = in use. The allocator
//! hands out the number after the high-water mark, or a number freed by a
//! deletion in a segment below the high-water segment.

use tracing::debug;

use crate::storage::bitmap::Bitmap;
use crate::storage::codec::{self, CodecError};
use crate::storage::io::{BackingStore, StoreError};
use crate::storage::keys::FileKeys;
use crate::storage::recordset::{RecordSet, SegmentRecords};
use crate::storage::segment::{RecordNumber, SegmentNumber, SegmentSize};

/// Errors from existence bitmap maintenance.
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Stored value could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A segment expected to have an existence bitmap has none.
    #[error("existence bitmap for segment {segment} does not exist")]
    MissingSegment { segment: SegmentNumber },
}

/// Existence bitmap state for one file.
///
/// Loaded when the file is opened and owned by the caller until close.
#[derive(Debug)]
pub struct ExistenceBitmap {
    keys: FileKeys,
    segment_size: SegmentSize,
    /// Segments with a persisted bitmap, ascending.
    segments: Vec<SegmentNumber>,
    /// Highest record number in use.
    high_record: Option<RecordNumber>,
    /// Segments below the high-water segment known to have freed slots, ascending.
    freed: Vec<SegmentNumber>,
}

impl ExistenceBitmap {
    /// Load the existence bitmap state for a file, creating it if absent.
    pub fn open<S: BackingStore + ?Sized>(
        store: &mut S,
        keys: FileKeys,
        segment_size: SegmentSize,
    ) -> Result<Self, AllocatorError> {
        let directory_key = keys.existence_directory();
        let segments = match codec::read::<_, Vec<SegmentNumber>, AllocatorError>(
            store,
            &directory_key,
        )? {
            Some(segments) => segments,
            None => {
                codec::write::<_, _, AllocatorError>(store, &directory_key, &Vec::<u64>::new())?;
                Vec::new()
            }
        };
        let freed = codec::read::<_, Vec<SegmentNumber>, AllocatorError>(
            store,
            &keys.freed_segments(),
        )?
        .unwrap_or_default();

        let mut bitmap = Self {
            keys,
            segment_size,
            segments,
            high_record: None,
            freed,
        };
        bitmap.rescan_high_record(store)?;
        Ok(bitmap)
    }

    /// Segments with a persisted bitmap, ascending.
    #[must_use]
    pub fn segments(&self) -> &[SegmentNumber] {
        &self.segments
    }

    /// Highest record number in use, if any.
    #[must_use]
    pub const fn high_record(&self) -> Option<RecordNumber> {
        self.high_record
    }

    /// Segments known to hold reusable record numbers.
    #[must_use]
    pub fn freed_segments(&self) -> &[SegmentNumber] {
        &self.freed
    }

    /// The segment size of the file.
    #[must_use]
    pub const fn segment_size(&self) -> SegmentSize {
        self.segment_size
    }

    /// Read one segment's bitmap.
    pub fn get_segment<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        segment: SegmentNumber,
    ) -> Result<Option<Bitmap>, AllocatorError> {
        codec::read(store, &self.keys.existence_segment(segment))
    }

    /// Write one segment's bitmap.
    pub fn put_segment<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        segment: SegmentNumber,
        bitmap: &Bitmap,
    ) -> Result<(), AllocatorError> {
        codec::write(store, &self.keys.existence_segment(segment), bitmap)
    }

    /// Delete one segment's bitmap and its directory entry.
    pub fn delete_segment<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        segment: SegmentNumber,
    ) -> Result<(), AllocatorError> {
        if let Ok(at) = self.segments.binary_search(&segment) {
            self.segments.remove(at);
            codec::write::<_, _, AllocatorError>(
                store,
                &self.keys.existence_directory(),
                &self.segments,
            )?;
        }
        store.delete(&self.keys.existence_segment(segment))?;
        self.rescan_high_record(store)
    }

    /// Write a segment's bitmap, adding the segment to the directory in order.
    ///
    /// Explicit record numbers can leave gaps, so a new segment may land
    /// below existing ones.
    pub fn insert_segment<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        segment: SegmentNumber,
        bitmap: &Bitmap,
    ) -> Result<(), AllocatorError> {
        self.put_segment(store, segment, bitmap)?;
        let Err(at) = self.segments.binary_search(&segment) else {
            return Ok(());
        };
        self.segments.insert(at, segment);
        codec::write::<_, _, AllocatorError>(
            store,
            &self.keys.existence_directory(),
            &self.segments,
        )?;
        debug!(segment, "added existence segment");
        Ok(())
    }

    /// Whether `record` exists.
    pub fn contains<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        record: RecordNumber,
    ) -> Result<bool, AllocatorError> {
        let (segment, offset) = self.segment_size.split(record);
        if self.segments.binary_search(&segment).is_err() {
            return Ok(false);
        }
        Ok(self
            .get_segment(store, segment)?
            .is_some_and(|bitmap| bitmap.get(offset)))
    }

    /// Mark `record` as in use.
    pub fn add<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        record: RecordNumber,
    ) -> Result<(SegmentNumber, u16), AllocatorError> {
        let (segment, offset) = self.segment_size.split(record);
        if self.segments.binary_search(&segment).is_ok() {
            let mut bitmap = self
                .get_segment(store, segment)?
                .ok_or(AllocatorError::MissingSegment { segment })?;
            bitmap.set(offset);
            self.put_segment(store, segment, &bitmap)?;
        } else {
            let mut bitmap = Bitmap::new(self.segment_size.bytes());
            bitmap.set(offset);
            self.insert_segment(store, segment, &bitmap)?;
        }
        if self.high_record.is_none_or(|high| high < record) {
            self.high_record = Some(record);
        }
        Ok((segment, offset))
    }

    /// Mark `record` as free.
    pub fn remove<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        record: RecordNumber,
    ) -> Result<(SegmentNumber, u16), AllocatorError> {
        let (segment, offset) = self.segment_size.split(record);
        let mut bitmap = self
            .get_segment(store, segment)?
            .ok_or(AllocatorError::MissingSegment { segment })?;
        bitmap.clear(offset);
        self.put_segment(store, segment, &bitmap)?;
        if self.high_record == Some(record) {
            self.rescan_high_record(store)?;
        }
        Ok((segment, offset))
    }

    /// Remember that `segment` has a freed slot.
    ///
    /// `high_record` is the high-water mark before the deletion. Segments at
    /// or above the high-water segment are not recorded: their unused slots
    /// are simply not yet allocated.
    pub fn note_freed<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
        segment: SegmentNumber,
        offset: u16,
        high_record: Option<RecordNumber>,
    ) -> Result<(), AllocatorError> {
        let Some(high_record) = high_record else {
            return Ok(());
        };
        let (high_segment, _) = self.segment_size.split(high_record);
        if segment >= high_segment {
            return Ok(());
        }
        let Err(at) = self.freed.binary_search(&segment) else {
            return Ok(());
        };
        self.freed.insert(at, segment);
        self.write_freed(store)?;
        debug!(segment, offset, "noted freed record number");
        Ok(())
    }

    /// Lowest reusable record number, if any.
    ///
    /// Offset 0 of segment 0 is never reused. Candidates that turn out to
    /// be full or gone are dropped from the freed list.
    pub fn lowest_freed<S: BackingStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Result<Option<RecordNumber>, AllocatorError> {
        let Some(high_record) = self.high_record else {
            return Ok(None);
        };
        let (high_segment, _) = self.segment_size.split(high_record);
        while let Some(&candidate) = self.freed.first() {
            if candidate >= high_segment {
                return Ok(None);
            }
            let start = u16::from(candidate == 0);
            let free = self
                .get_segment(store, candidate)?
                .and_then(|bitmap| bitmap.first_zero_from(start));
            if let Some(offset) = free {
                return Ok(Some(self.segment_size.join(candidate, offset)));
            }
            self.freed.remove(0);
            self.write_freed(store)?;
            debug!(segment = candidate, "freed segment exhausted");
        }
        Ok(None)
    }

    /// Record number following the high-water mark.
    #[must_use]
    pub fn next_record_number(&self) -> RecordNumber {
        self.high_record.map_or(0, |high| high + 1)
    }

    /// Number of records in use.
    pub fn count<S: BackingStore + ?Sized>(&self, store: &S) -> Result<usize, AllocatorError> {
        let mut count = 0;
        for segment in &self.segments {
            if let Some(bitmap) = self.get_segment(store, *segment)? {
                count += bitmap.count();
            }
        }
        Ok(count)
    }

    /// Every record in use.
    pub fn records<S: BackingStore + ?Sized>(&self, store: &S) -> Result<RecordSet, AllocatorError> {
        let mut records = RecordSet::new(self.segment_size);
        for segment in &self.segments {
            let bitmap = self
                .get_segment(store, *segment)?
                .ok_or(AllocatorError::MissingSegment { segment: *segment })?;
            if let Some(encoded) = SegmentRecords::from_bitmap(bitmap, self.segment_size) {
                records.merge_segment(*segment, encoded);
            }
        }
        Ok(records)
    }

    fn write_freed<S: BackingStore + ?Sized>(&self, store: &mut S) -> Result<(), AllocatorError> {
        codec::write(store, &self.keys.freed_segments(), &self.freed)
    }

    fn rescan_high_record<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<(), AllocatorError> {
        self.high_record = None;
        for segment in self.segments.iter().rev() {
            if let Some(offset) = self
                .get_segment(store, *segment)?
                .and_then(|bitmap| bitmap.last())
            {
                self.high_record = Some(self.segment_size.join(*segment, offset));
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::storage::MemoryStore;

    fn open(store: &mut MemoryStore) -> ExistenceBitmap {
        ExistenceBitmap::open(store, FileKeys::new(1), SegmentSize::new(8).expect("valid"))
            .expect("Failed to open existence bitmap")
    }

    #[test]
    fn test_open_creates_directory() {
        let mut store = MemoryStore::new();
        let bitmap = open(&mut store);
        assert!(bitmap.segments().is_empty());
        assert_eq!(bitmap.high_record(), None);
        assert_eq!(bitmap.next_record_number(), 0);
        assert_eq!(store.get(b"1_0_E").expect("get"), Some(b"[]".to_vec()));
    }

    #[test]
    fn test_add_appends_segments_and_tracks_high() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        assert_eq!(bitmap.add(&mut store, 0).expect("add"), (0, 0));
        assert_eq!(bitmap.add(&mut store, 70).expect("add"), (1, 6));
        assert_eq!(bitmap.segments(), &[0, 1]);
        assert_eq!(bitmap.high_record(), Some(70));
        assert_eq!(bitmap.next_record_number(), 71);
        assert!(bitmap.contains(&store, 70).expect("contains"));
        assert!(!bitmap.contains(&store, 69).expect("contains"));
        assert_eq!(bitmap.count(&store).expect("count"), 2);

        // State survives a reload.
        let reloaded = open(&mut store);
        assert_eq!(reloaded.segments(), &[0, 1]);
        assert_eq!(reloaded.high_record(), Some(70));
    }

    #[test]
    fn test_add_below_existing_segment() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        bitmap.add(&mut store, 500).expect("add");
        assert_eq!(bitmap.add(&mut store, 3).expect("add"), (0, 3));
        assert_eq!(bitmap.add(&mut store, 200).expect("add"), (3, 8));
        assert_eq!(bitmap.segments(), &[0, 3, 7]);
        assert_eq!(store.get(b"1_0_E").expect("get"), Some(b"[0,3,7]".to_vec()));
        assert_eq!(bitmap.high_record(), Some(500));
        assert_eq!(
            bitmap.records(&store).expect("records").iter().collect::<Vec<_>>(),
            [3, 200, 500]
        );
    }

    #[test]
    fn test_add_into_missing_lower_segment_fails() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        bitmap.add(&mut store, 200).expect("add");
        assert!(matches!(
            bitmap.add(&mut store, 3),
            Err(AllocatorError::MissingSegment { segment: 0 })
        ));
    }

    #[test]
    fn test_remove_rescans_high() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        for record in [1, 5, 66] {
            bitmap.add(&mut store, record).expect("add");
        }
        bitmap.remove(&mut store, 66).expect("remove");
        assert_eq!(bitmap.high_record(), Some(5));
        bitmap.remove(&mut store, 1).expect("remove");
        assert_eq!(bitmap.high_record(), Some(5));
        bitmap.remove(&mut store, 5).expect("remove");
        assert_eq!(bitmap.high_record(), None);
        assert!(matches!(
            bitmap.remove(&mut store, 500),
            Err(AllocatorError::MissingSegment { segment: 7 })
        ));
    }

    #[test]
    fn test_note_freed_ignores_frontier_segment() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        for record in 0..150 {
            bitmap.add(&mut store, record).expect("add");
        }
        let high = bitmap.high_record();
        bitmap.note_freed(&mut store, 2, 3, high).expect("note");
        assert!(bitmap.freed_segments().is_empty());
        bitmap.note_freed(&mut store, 1, 3, high).expect("note");
        bitmap.note_freed(&mut store, 0, 3, high).expect("note");
        bitmap.note_freed(&mut store, 1, 4, high).expect("note");
        assert_eq!(bitmap.freed_segments(), &[0, 1]);
        assert_eq!(store.get(b"1_0_F").expect("get"), Some(b"[0,1]".to_vec()));
    }

    #[test]
    fn test_lowest_freed_skips_record_zero() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        for record in 0..100 {
            bitmap.add(&mut store, record).expect("add");
        }
        let high = bitmap.high_record();
        let (segment, offset) = bitmap.remove(&mut store, 0).expect("remove");
        bitmap.note_freed(&mut store, segment, offset, high).expect("note");
        assert_eq!(bitmap.lowest_freed(&mut store).expect("lowest"), None);
        assert!(bitmap.freed_segments().is_empty());
    }

    #[test]
    fn test_lowest_freed_drops_exhausted_segments() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        for record in 0..150 {
            bitmap.add(&mut store, record).expect("add");
        }
        let high = bitmap.high_record();
        for record in [10, 3] {
            let (segment, offset) = bitmap.remove(&mut store, record).expect("remove");
            bitmap.note_freed(&mut store, segment, offset, high).expect("note");
        }
        assert_eq!(bitmap.lowest_freed(&mut store).expect("lowest"), Some(3));
        bitmap.add(&mut store, 3).expect("add");
        assert_eq!(bitmap.lowest_freed(&mut store).expect("lowest"), Some(10));
        assert_eq!(bitmap.freed_segments(), &[0]);
        bitmap.add(&mut store, 10).expect("add");
        assert_eq!(bitmap.lowest_freed(&mut store).expect("lowest"), None);
        assert!(bitmap.freed_segments().is_empty());
    }

    #[test]
    fn test_records_reads_every_segment() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        for record in [2, 9, 10, 64] {
            bitmap.add(&mut store, record).expect("add");
        }
        let records = bitmap.records(&store).expect("records");
        assert_eq!(records.iter().collect::<Vec<_>>(), vec![2, 9, 10, 64]);
    }

    #[test]
    fn test_delete_segment_updates_directory() {
        let mut store = MemoryStore::new();
        let mut bitmap = open(&mut store);
        bitmap.add(&mut store, 1).expect("add");
        bitmap.add(&mut store, 100).expect("add");
        bitmap.delete_segment(&mut store, 1).expect("delete");
        assert_eq!(bitmap.segments(), &[0]);
        assert_eq!(bitmap.high_record(), Some(1));
        assert_eq!(store.get(b"1_0_E_1").expect("get"), None);
    }

    proptest! {
        #[test]
        fn prop_freed_number_is_reused_lowest_first(
            allocated in 70u64..200,
            deleted in proptest::collection::btree_set(1u64..16, 1..5),
        ) {
            let mut store = MemoryStore::new();
            let mut bitmap = open(&mut store);
            for record in 0..allocated {
                bitmap.add(&mut store, record).expect("add");
            }
            for record in &deleted {
                let high = bitmap.high_record();
                let (segment, offset) = bitmap.remove(&mut store, *record).expect("remove");
                bitmap.note_freed(&mut store, segment, offset, high).expect("note");
            }
            for expected in &deleted {
                let lowest = bitmap.lowest_freed(&mut store).expect("lowest");
                prop_assert_eq!(lowest, Some(*expected));
                bitmap.add(&mut store, *expected).expect("add");
            }
            prop_assert_eq!(bitmap.lowest_freed(&mut store).expect("lowest"), None);
        }
    }
}
