//! Cursors over records and over index entries.
//!
//! Both borrow the [`Database`] immutably, so nothing can change underneath
//! them while they are alive.

use crate::query::{ValueScan, prefix_successor};
use crate::storage::btree::TreeCursor;
use crate::storage::database::{Database, DatabaseError, FileState};
use crate::storage::index::FieldIndex;
use crate::storage::io::BackingStore;
use crate::storage::recordset::RecordSet;
use crate::storage::segment::RecordNumber;

/// Cursor over the existing records of one file, in record-number order.
pub struct PrimaryCursor<'a, S> {
    store: &'a S,
    state: &'a FileState,
    current: Option<RecordNumber>,
}

impl<'a, S: BackingStore> PrimaryCursor<'a, S> {
    pub(crate) fn new(db: &'a Database<S>, file: &str) -> Result<Self, DatabaseError> {
        Ok(Self {
            store: db.store(),
            state: db.file_state(file)?,
            current: None,
        })
    }

    /// The record the cursor is on.
    #[must_use]
    pub const fn current(&self) -> Option<RecordNumber> {
        self.current
    }

    pub fn first(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        match self.following(None)? {
            Some(record) => self.settle(record).map(Some),
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    pub fn last(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        match self.preceding(None)? {
            Some(record) => self.settle(record).map(Some),
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    /// Move to the next record. At the end the position is unchanged.
    pub fn next(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        let Some(current) = self.current else {
            return self.first();
        };
        match self.following(Some(current))? {
            Some(record) => self.settle(record).map(Some),
            None => Ok(None),
        }
    }

    /// Move to the previous record. At the start the position is unchanged.
    pub fn prev(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        let Some(current) = self.current else {
            return self.last();
        };
        match self.preceding(Some(current))? {
            Some(record) => self.settle(record).map(Some),
            None => Ok(None),
        }
    }

    /// Move to the lowest record not less than `record`.
    ///
    /// Clears the position when there is none.
    pub fn nearest(
        &mut self,
        record: RecordNumber,
    ) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        let found = if self.state.existence.contains(self.store, record)? {
            Some(record)
        } else {
            self.following(Some(record))?
        };
        match found {
            Some(record) => self.settle(record).map(Some),
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    /// Move to `record` if it exists. The position is unchanged otherwise.
    pub fn setat(
        &mut self,
        record: RecordNumber,
    ) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        if !self.state.existence.contains(self.store, record)? {
            return Ok(None);
        }
        self.settle(record).map(Some)
    }

    pub fn count_records(&self) -> Result<usize, DatabaseError> {
        Ok(self.state.existence.count(self.store)?)
    }

    /// Zero-based position of `record` among existing records.
    pub fn position_of_record(&self, record: RecordNumber) -> Result<Option<usize>, DatabaseError> {
        let existence = &self.state.existence;
        let (segment, offset) = existence.segment_size().split(record);
        let mut before = 0;
        for &s in existence.segments() {
            let Some(bitmap) = existence.get_segment(self.store, s)? else {
                continue;
            };
            if s < segment {
                before += bitmap.count();
            } else if s == segment {
                if !bitmap.get(offset) {
                    return Ok(None);
                }
                return Ok(Some(before + bitmap.rank(offset)));
            } else {
                break;
            }
        }
        Ok(None)
    }

    /// Move to the record at `position`. Negative positions count from the end.
    pub fn record_at_position(
        &mut self,
        position: i64,
    ) -> Result<Option<(RecordNumber, Vec<u8>)>, DatabaseError> {
        let position = if position < 0 {
            let from_end = usize::try_from(position.unsigned_abs()).unwrap_or(usize::MAX);
            match self.count_records()?.checked_sub(from_end) {
                Some(position) => position,
                None => return Ok(None),
            }
        } else {
            usize::try_from(position).unwrap_or(usize::MAX)
        };

        let existence = &self.state.existence;
        let mut remaining = position;
        for &segment in existence.segments() {
            let Some(bitmap) = existence.get_segment(self.store, segment)? else {
                continue;
            };
            let count = bitmap.count();
            if remaining < count {
                return match bitmap.nth(remaining) {
                    Some(offset) => self
                        .settle(existence.segment_size().join(segment, offset))
                        .map(Some),
                    None => Ok(None),
                };
            }
            remaining -= count;
        }
        Ok(None)
    }

    fn settle(&mut self, record: RecordNumber) -> Result<(RecordNumber, Vec<u8>), DatabaseError> {
        let value = self
            .store
            .get(&self.state.keys.record(record))?
            .ok_or_else(|| DatabaseError::MissingRecord {
                file: self.state.name.clone(),
                record,
            })?;
        self.current = Some(record);
        Ok((record, value))
    }

    /// Lowest existing record above `record`, or the lowest of all.
    fn following(&self, record: Option<RecordNumber>) -> Result<Option<RecordNumber>, DatabaseError> {
        let existence = &self.state.existence;
        let size = existence.segment_size();
        let from = record.map(|r| size.split(r));
        for &segment in existence.segments() {
            if from.is_some_and(|(s, _)| segment < s) {
                continue;
            }
            let Some(bitmap) = existence.get_segment(self.store, segment)? else {
                continue;
            };
            let found = match from {
                Some((s, offset)) if s == segment => bitmap.next_after(offset),
                _ => bitmap.first(),
            };
            if let Some(offset) = found {
                return Ok(Some(size.join(segment, offset)));
            }
        }
        Ok(None)
    }

    /// Highest existing record below `record`, or the highest of all.
    fn preceding(&self, record: Option<RecordNumber>) -> Result<Option<RecordNumber>, DatabaseError> {
        let existence = &self.state.existence;
        let size = existence.segment_size();
        let from = record.map(|r| size.split(r));
        for &segment in existence.segments().iter().rev() {
            if from.is_some_and(|(s, _)| segment > s) {
                continue;
            }
            let Some(bitmap) = existence.get_segment(self.store, segment)? else {
                continue;
            };
            let found = match from {
                Some((s, offset)) if s == segment => bitmap.prev_before(offset),
                _ => bitmap.last(),
            };
            if let Some(offset) = found {
                return Ok(Some(size.join(segment, offset)));
            }
        }
        Ok(None)
    }
}

/// Cursor over the `(value, record)` pairs of one ordered field.
///
/// Pairs are visited by value, then by record number within a value. With a
/// prefix, only values starting with it are visited.
pub struct IndexCursor<'a, S> {
    store: &'a S,
    index: &'a FieldIndex,
    values: TreeCursor,
    prefix: Option<Vec<u8>>,
    current: Option<(Vec<u8>, RecordNumber)>,
    records: Option<RecordSet>,
}

impl<'a, S: BackingStore> IndexCursor<'a, S> {
    pub(crate) fn new(
        db: &'a Database<S>,
        file: &str,
        field: &str,
        prefix: Option<&[u8]>,
    ) -> Result<Self, DatabaseError> {
        let index = db.file_state(file)?.ordered_field(field)?;
        let values = index.cursor().ok_or_else(|| DatabaseError::NotOrdered {
            file: file.to_string(),
            field: field.to_string(),
        })?;
        Ok(Self {
            store: db.store(),
            index,
            values,
            prefix: prefix.map(<[u8]>::to_vec),
            current: None,
            records: None,
        })
    }

    /// The pair the cursor is on.
    #[must_use]
    pub fn current(&self) -> Option<(&[u8], RecordNumber)> {
        self.current.as_ref().map(|(v, r)| (v.as_slice(), *r))
    }

    pub fn first(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let key = match &self.prefix {
            Some(prefix) => self.values.nearest(self.store, prefix)?,
            None => self.values.first(self.store)?,
        };
        self.enter(key, false)
    }

    pub fn last(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let key = match self.prefix.as_deref().map(prefix_successor) {
            Some(Some(successor)) => {
                if self.values.nearest(self.store, &successor)?.is_some() {
                    self.values.prev(self.store)?.filter(|k| *k < successor)
                } else {
                    self.values.last(self.store)?
                }
            }
            _ => self.values.last(self.store)?,
        };
        self.enter(key, true)
    }

    /// Move to the next pair. At the end the position is unchanged.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let Some((value, record)) = self.current.clone() else {
            return self.first();
        };
        if let Some(next) = self.records.as_ref().and_then(|r| r.next_after(record)) {
            self.current = Some((value.clone(), next));
            return Ok(Some((value, next)));
        }
        self.values.setat(self.store, &value)?;
        match self.values.next(self.store)? {
            Some(key) if self.in_prefix(&key) => self.enter(Some(key), false),
            _ => Ok(None),
        }
    }

    /// Move to the previous pair. At the start the position is unchanged.
    pub fn prev(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let Some((value, record)) = self.current.clone() else {
            return self.last();
        };
        if let Some(prev) = self.records.as_ref().and_then(|r| r.prev_before(record)) {
            self.current = Some((value.clone(), prev));
            return Ok(Some((value, prev)));
        }
        self.values.setat(self.store, &value)?;
        match self.values.prev(self.store)? {
            Some(key) if self.in_prefix(&key) => self.enter(Some(key), true),
            _ => Ok(None),
        }
    }

    /// Move to the first pair whose value is not less than `value`.
    ///
    /// Clears the position when there is none.
    pub fn nearest(&mut self, value: &[u8]) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let seek = match &self.prefix {
            Some(prefix) if prefix.as_slice() > value => prefix.clone(),
            _ => value.to_vec(),
        };
        let key = self.values.nearest(self.store, &seek)?;
        self.enter(key, false)
    }

    /// Move to `(value, record)` if that pair exists. The position is unchanged otherwise.
    pub fn setat(
        &mut self,
        value: &[u8],
        record: RecordNumber,
    ) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        if !self.in_prefix(value) {
            return Ok(None);
        }
        let records = self.index.records(self.store, value)?;
        if !records.contains(record) {
            return Ok(None);
        }
        self.records = Some(records);
        self.current = Some((value.to_vec(), record));
        Ok(Some((value.to_vec(), record)))
    }

    /// Number of `(value, record)` pairs within the prefix.
    pub fn count_records(&self) -> Result<usize, DatabaseError> {
        let mut scan = ValueScan::new(self.store, self.values.clone());
        if let Some(prefix) = &self.prefix {
            scan = scan.prefixed(prefix.clone());
        }
        let mut count = 0;
        for value in scan {
            count += self.index.postings().count(self.store, &value?)?;
        }
        Ok(count)
    }

    /// The one record holding `value`, if any.
    ///
    /// Fails if more than one record holds it.
    pub fn get_unique_primary_for_index_key(
        &self,
        value: &[u8],
    ) -> Result<Option<RecordNumber>, DatabaseError> {
        let records = self.index.records(self.store, value)?;
        match records.count() {
            0 => Ok(None),
            1 => Ok(records.first()),
            count => Err(DatabaseError::NotUnique { count }),
        }
    }

    fn in_prefix(&self, key: &[u8]) -> bool {
        self.prefix.as_ref().is_none_or(|p| key.starts_with(p))
    }

    /// Position on the first or last record of `key`.
    fn enter(
        &mut self,
        key: Option<Vec<u8>>,
        from_end: bool,
    ) -> Result<Option<(Vec<u8>, RecordNumber)>, DatabaseError> {
        let Some(key) = key.filter(|k| self.in_prefix(k)) else {
            self.current = None;
            self.records = None;
            return Ok(None);
        };
        let records = self.index.records(self.store, &key)?;
        let record = if from_end { records.last() } else { records.first() };
        let Some(record) = record else {
            self.current = None;
            self.records = None;
            return Ok(None);
        };
        self.records = Some(records);
        self.current = Some((key.clone(), record));
        Ok(Some((key, record)))
    }
}
