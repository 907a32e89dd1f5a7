//! Sets of record numbers.
//!
//! A [`RecordSet`] holds one [`SegmentRecords`] per non-empty segment. Each
//! segment uses whichever of three encodings is cheapest for its size:
//! a single offset, a sorted list of offsets, or a bitmap.

use std::collections::BTreeMap;

use crate::storage::bitmap::Bitmap;
use crate::storage::segment::{RecordNumber, SegmentNumber, SegmentSize};

/// The records of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRecords {
    /// Exactly one record.
    Singleton(u16),
    /// Sorted, duplicate-free offsets.
    List(Vec<u16>),
    /// One bit per offset.
    Bitmap(Bitmap),
}

impl SegmentRecords {
    /// Choose the encoding for a sorted, duplicate-free list of offsets.
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn from_sorted(offsets: Vec<u16>, size: SegmentSize) -> Option<Self> {
        match offsets.len() {
            0 => None,
            1 => Some(Self::Singleton(offsets[0])),
            n if n > size.upper_conversion_limit() => Some(Self::Bitmap(Bitmap::from_offsets(
                size.bytes(),
                offsets,
            ))),
            _ => Some(Self::List(offsets)),
        }
    }

    /// Choose the encoding for the offsets set in `bitmap`.
    #[must_use]
    pub fn from_bitmap(bitmap: Bitmap, size: SegmentSize) -> Option<Self> {
        match bitmap.count() {
            0 => None,
            n if n > size.upper_conversion_limit() => Some(Self::Bitmap(bitmap)),
            _ => Self::from_sorted(bitmap.iter().collect(), size),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Singleton(_) => 1,
            Self::List(offsets) => offsets.len(),
            Self::Bitmap(bitmap) => bitmap.count(),
        }
    }

    /// Whether `offset` is present.
    #[must_use]
    pub fn contains(&self, offset: u16) -> bool {
        match self {
            Self::Singleton(only) => *only == offset,
            Self::List(offsets) => offsets.binary_search(&offset).is_ok(),
            Self::Bitmap(bitmap) => bitmap.get(offset),
        }
    }

    /// Offsets in ascending order.
    #[must_use]
    pub fn offsets(&self) -> Vec<u16> {
        match self {
            Self::Singleton(only) => vec![*only],
            Self::List(offsets) => offsets.clone(),
            Self::Bitmap(bitmap) => bitmap.iter().collect(),
        }
    }

    /// The records as a bitmap of the given segment size.
    #[must_use]
    pub fn to_bitmap(&self, size: SegmentSize) -> Bitmap {
        match self {
            Self::Bitmap(bitmap) => bitmap.clone(),
            other => Bitmap::from_offsets(size.bytes(), other.offsets()),
        }
    }

    /// Lowest offset.
    #[must_use]
    pub fn first(&self) -> Option<u16> {
        match self {
            Self::Singleton(only) => Some(*only),
            Self::List(offsets) => offsets.first().copied(),
            Self::Bitmap(bitmap) => bitmap.first(),
        }
    }

    /// Highest offset.
    #[must_use]
    pub fn last(&self) -> Option<u16> {
        match self {
            Self::Singleton(only) => Some(*only),
            Self::List(offsets) => offsets.last().copied(),
            Self::Bitmap(bitmap) => bitmap.last(),
        }
    }

    /// Lowest offset strictly above `offset`.
    #[must_use]
    pub fn next_after(&self, offset: u16) -> Option<u16> {
        match self {
            Self::Singleton(only) => (*only > offset).then_some(*only),
            Self::List(offsets) => {
                let at = offsets.partition_point(|o| *o <= offset);
                offsets.get(at).copied()
            }
            Self::Bitmap(bitmap) => bitmap.next_after(offset),
        }
    }

    /// Highest offset strictly below `offset`.
    #[must_use]
    pub fn prev_before(&self, offset: u16) -> Option<u16> {
        match self {
            Self::Singleton(only) => (*only < offset).then_some(*only),
            Self::List(offsets) => {
                let at = offsets.partition_point(|o| *o < offset);
                at.checked_sub(1).map(|i| offsets[i])
            }
            Self::Bitmap(bitmap) => bitmap.prev_before(offset),
        }
    }

    /// Number of offsets strictly below `offset`.
    #[must_use]
    pub fn rank(&self, offset: u16) -> usize {
        match self {
            Self::Singleton(only) => usize::from(*only < offset),
            Self::List(offsets) => offsets.partition_point(|o| *o < offset),
            Self::Bitmap(bitmap) => bitmap.rank(offset),
        }
    }

    /// The `n`th offset (0-based) in ascending order.
    #[must_use]
    pub fn nth(&self, n: usize) -> Option<u16> {
        match self {
            Self::Singleton(only) => (n == 0).then_some(*only),
            Self::List(offsets) => offsets.get(n).copied(),
            Self::Bitmap(bitmap) => bitmap.nth(n),
        }
    }

    /// Add `offset`, promoting the encoding when it outgrows the current one.
    #[must_use]
    pub fn with(self, offset: u16, size: SegmentSize) -> Self {
        match self {
            Self::Singleton(only) if only == offset => Self::Singleton(only),
            Self::Singleton(only) => {
                let mut offsets = vec![only, offset];
                offsets.sort_unstable();
                Self::List(offsets)
            }
            Self::List(mut offsets) => {
                if let Err(at) = offsets.binary_search(&offset) {
                    offsets.insert(at, offset);
                }
                if offsets.len() > size.upper_conversion_limit() {
                    Self::Bitmap(Bitmap::from_offsets(size.bytes(), offsets))
                } else {
                    Self::List(offsets)
                }
            }
            Self::Bitmap(mut bitmap) => {
                bitmap.set(offset);
                Self::Bitmap(bitmap)
            }
        }
    }

    /// Remove `offset`, demoting the encoding once it is small enough.
    ///
    /// Returns `None` when no records remain.
    #[must_use]
    pub fn without(self, offset: u16, size: SegmentSize) -> Option<Self> {
        match self {
            Self::Singleton(only) if only == offset => None,
            Self::Singleton(only) => Some(Self::Singleton(only)),
            Self::List(mut offsets) => {
                if let Ok(at) = offsets.binary_search(&offset) {
                    offsets.remove(at);
                }
                Self::from_sorted(offsets, size)
            }
            Self::Bitmap(mut bitmap) => {
                bitmap.clear(offset);
                if bitmap.count() > size.lower_conversion_limit() {
                    Some(Self::Bitmap(bitmap))
                } else {
                    Self::from_sorted(bitmap.iter().collect(), size)
                }
            }
        }
    }
}

/// A set of record numbers in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    segment_size: SegmentSize,
    segments: BTreeMap<SegmentNumber, SegmentRecords>,
}

impl RecordSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new(segment_size: SegmentSize) -> Self {
        Self {
            segment_size,
            segments: BTreeMap::new(),
        }
    }

    /// Create a set holding `records`.
    #[must_use]
    pub fn from_records(
        segment_size: SegmentSize,
        records: impl IntoIterator<Item = RecordNumber>,
    ) -> Self {
        let mut set = Self::new(segment_size);
        for record in records {
            set.insert(record);
        }
        set
    }

    /// The segment size record numbers are split by.
    #[must_use]
    pub const fn segment_size(&self) -> SegmentSize {
        self.segment_size
    }

    /// Add `record`. Returns whether it was absent.
    pub fn insert(&mut self, record: RecordNumber) -> bool {
        let (segment, offset) = self.segment_size.split(record);
        let size = self.segment_size;
        match self.segments.remove(&segment) {
            Some(existing) => {
                let added = !existing.contains(offset);
                self.segments.insert(segment, existing.with(offset, size));
                added
            }
            None => {
                self.segments.insert(segment, SegmentRecords::Singleton(offset));
                true
            }
        }
    }

    /// Remove `record`. Returns whether it was present.
    pub fn remove(&mut self, record: RecordNumber) -> bool {
        let (segment, offset) = self.segment_size.split(record);
        let Some(existing) = self.segments.remove(&segment) else {
            return false;
        };
        let removed = existing.contains(offset);
        if let Some(remaining) = existing.without(offset, self.segment_size) {
            self.segments.insert(segment, remaining);
        }
        removed
    }

    /// Whether `record` is in the set.
    #[must_use]
    pub fn contains(&self, record: RecordNumber) -> bool {
        let (segment, offset) = self.segment_size.split(record);
        self.segments
            .get(&segment)
            .is_some_and(|records| records.contains(offset))
    }

    /// Number of records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.segments.values().map(SegmentRecords::count).sum()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The records of one segment.
    #[must_use]
    pub fn segment(&self, segment: SegmentNumber) -> Option<&SegmentRecords> {
        self.segments.get(&segment)
    }

    /// Segments in ascending order.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = (SegmentNumber, &SegmentRecords)> {
        self.segments.iter().map(|(s, r)| (*s, r))
    }

    /// Merge `records` into segment `segment`.
    pub fn merge_segment(&mut self, segment: SegmentNumber, records: SegmentRecords) {
        let merged = match self.segments.remove(&segment) {
            Some(existing) => {
                let mut bitmap = existing.to_bitmap(self.segment_size);
                bitmap.union_with(&records.to_bitmap(self.segment_size));
                SegmentRecords::from_bitmap(bitmap, self.segment_size)
            }
            None => Some(records),
        };
        if let Some(merged) = merged {
            self.segments.insert(segment, merged);
        }
    }

    /// Record numbers in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = RecordNumber> + '_ {
        let size = self.segment_size;
        self.segments.iter().flat_map(move |(segment, records)| {
            records
                .offsets()
                .into_iter()
                .map(move |offset| size.join(*segment, offset))
        })
    }

    /// Lowest record.
    #[must_use]
    pub fn first(&self) -> Option<RecordNumber> {
        let (segment, records) = self.segments.first_key_value()?;
        Some(self.segment_size.join(*segment, records.first()?))
    }

    /// Highest record.
    #[must_use]
    pub fn last(&self) -> Option<RecordNumber> {
        let (segment, records) = self.segments.last_key_value()?;
        Some(self.segment_size.join(*segment, records.last()?))
    }

    /// Lowest record strictly above `record`.
    #[must_use]
    pub fn next_after(&self, record: RecordNumber) -> Option<RecordNumber> {
        let (segment, offset) = self.segment_size.split(record);
        if let Some(next) = self
            .segments
            .get(&segment)
            .and_then(|records| records.next_after(offset))
        {
            return Some(self.segment_size.join(segment, next));
        }
        let (later, records) = self.segments.range(segment + 1..).next()?;
        Some(self.segment_size.join(*later, records.first()?))
    }

    /// Highest record strictly below `record`.
    #[must_use]
    pub fn prev_before(&self, record: RecordNumber) -> Option<RecordNumber> {
        let (segment, offset) = self.segment_size.split(record);
        if let Some(prev) = self
            .segments
            .get(&segment)
            .and_then(|records| records.prev_before(offset))
        {
            return Some(self.segment_size.join(segment, prev));
        }
        let (earlier, records) = self.segments.range(..segment).next_back()?;
        Some(self.segment_size.join(*earlier, records.last()?))
    }

    /// Zero-based position of `record`, if present.
    #[must_use]
    pub fn position_of(&self, record: RecordNumber) -> Option<usize> {
        let (segment, offset) = self.segment_size.split(record);
        let records = self.segments.get(&segment)?;
        if !records.contains(offset) {
            return None;
        }
        let before: usize = self
            .segments
            .range(..segment)
            .map(|(_, r)| r.count())
            .sum();
        Some(before + records.rank(offset))
    }

    /// Record at zero-based `position`.
    #[must_use]
    pub fn at_position(&self, position: usize) -> Option<RecordNumber> {
        let mut remaining = position;
        for (segment, records) in &self.segments {
            let count = records.count();
            if remaining < count {
                return Some(self.segment_size.join(*segment, records.nth(remaining)?));
            }
            remaining -= count;
        }
        None
    }

    /// Records in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (segment, records) in &other.segments {
            result.merge_segment(*segment, records.clone());
        }
        result
    }

    /// Records in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut result = Self::new(self.segment_size);
        for (segment, records) in &self.segments {
            let Some(theirs) = other.segments.get(segment) else {
                continue;
            };
            let mut bitmap = records.to_bitmap(self.segment_size);
            bitmap.intersect_with(&theirs.to_bitmap(self.segment_size));
            if let Some(both) = SegmentRecords::from_bitmap(bitmap, self.segment_size) {
                result.segments.insert(*segment, both);
            }
        }
        result
    }

    /// Records in this set but not `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut result = Self::new(self.segment_size);
        for (segment, records) in &self.segments {
            let remaining = match other.segments.get(segment) {
                Some(theirs) => {
                    let mut bitmap = records.to_bitmap(self.segment_size);
                    bitmap.difference_with(&theirs.to_bitmap(self.segment_size));
                    SegmentRecords::from_bitmap(bitmap, self.segment_size)
                }
                None => Some(records.clone()),
            };
            if let Some(remaining) = remaining {
                result.segments.insert(*segment, remaining);
            }
        }
        result
    }

    /// Re-encode every segment with the cheapest encoding for its size.
    pub fn normalize(&mut self) {
        let size = self.segment_size;
        let segments = std::mem::take(&mut self.segments);
        self.segments = segments
            .into_iter()
            .filter_map(|(segment, records)| {
                SegmentRecords::from_bitmap(records.to_bitmap(size), size)
                    .map(|normal| (segment, normal))
            })
            .collect();
    }
}
