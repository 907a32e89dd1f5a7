//! High-level database interface.
//!
//! A [`Database`] owns a backing store and the per-file state loaded from it:
//! each file's existence bitmap and one [`FieldIndex`] per secondary field.
//! Every mutation goes through here so that record existence, posting sets
//! and ordered indexes stay consistent with each other.
//!
//! # Control records
//!
//! The first open of a store records the segment size and the normalized
//! specification. Later opens must supply the same specification; a
//! different segment size is reported as the recoverable
//! [`DatabaseError::SegmentSizeMismatch`] carrying the recorded size.

use std::collections::{BTreeMap, BTreeSet};

use regex::bytes::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::query::{KeyRange, QueryError, ValueScan, ValueSpec};
use crate::storage::allocator::{AllocatorError, ExistenceBitmap};
use crate::storage::btree::{Tree, TreeError};
use crate::storage::codec::{self, CodecError};
use crate::storage::cursor::{IndexCursor, PrimaryCursor};
use crate::storage::index::{FieldIndex, IndexError};
use crate::storage::io::{BackingStore, StoreError};
use crate::storage::keys::{self, FileKeys};
use crate::storage::posting::{PostingError, PostingSet};
use crate::storage::recordset::{RecordSet, SegmentRecords};
use crate::storage::schema::{AccessMethod, DatabaseSpec, Schema, SchemaError};
use crate::storage::segment::{RecordNumber, SegmentError, SegmentSize};

/// Field values of one record, by field name.
pub type IndexValues = BTreeMap<String, Vec<Vec<u8>>>;

/// Errors returned by [`Database`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    #[error(transparent)]
    Posting(#[from] PostingError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The stored specification differs from the one supplied to open.
    #[error("stored specification differs from the one supplied")]
    SpecificationMismatch,
    /// The store was created with a different segment size.
    ///
    /// Reopen with `recorded` as the segment size.
    #[error("database was created with segment size {recorded}")]
    SegmentSizeMismatch { recorded: usize },
    /// The segment size is recorded but the specification is not.
    #[error("specification record is missing")]
    MissingSpecification,
    /// The specification is recorded but the segment size is not.
    #[error("segment size record is missing")]
    MissingSegmentSize,
    /// Range, prefix and pattern queries need an ordered field.
    #[error("field {field:?} of file {file:?} has no ordered index")]
    NotOrdered { file: String, field: String },
    /// A record marked as existing has no stored value.
    #[error("record {record} of file {file:?} has no stored value")]
    MissingRecord { file: String, record: RecordNumber },
    /// An index key expected to name one record names several.
    #[error("index key refers to {count} records")]
    NotUnique { count: usize },
}

impl DatabaseError {
    /// Whether the caller can recover by reopening with different settings.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SegmentSizeMismatch { .. })
    }
}

/// State of one open file.
#[derive(Debug)]
pub(crate) struct FileState {
    pub(crate) name: String,
    pub(crate) keys: FileKeys,
    pub(crate) existence: ExistenceBitmap,
    pub(crate) fields: BTreeMap<String, FieldIndex>,
}

impl FileState {
    pub(crate) fn field(&self, field: &str) -> Result<&FieldIndex, DatabaseError> {
        self.fields.get(field).ok_or_else(|| {
            SchemaError::UnknownField {
                file: self.name.clone(),
                field: field.to_string(),
            }
            .into()
        })
    }

    pub(crate) fn ordered_field(&self, field: &str) -> Result<&FieldIndex, DatabaseError> {
        let index = self.field(field)?;
        if !index.is_ordered() {
            return Err(DatabaseError::NotOrdered {
                file: self.name.clone(),
                field: field.to_string(),
            });
        }
        Ok(index)
    }
}

/// An open database.
///
/// Single-threaded: callers must serialize access.
#[derive(Debug)]
pub struct Database<S> {
    store: S,
    config: EngineConfig,
    schema: Schema,
    files: BTreeMap<String, FileState>,
}

impl<S: BackingStore> Database<S> {
    /// Open a database on `store`, recording `spec` and the segment size on
    /// first use.
    pub fn open(mut store: S, spec: &DatabaseSpec, config: EngineConfig) -> Result<Self, DatabaseError> {
        let schema = Schema::resolve(spec)?;
        let recorded_size =
            codec::read::<_, usize, DatabaseError>(&store, &keys::segment_size_key())?;
        let recorded_spec =
            codec::read::<_, DatabaseSpec, DatabaseError>(&store, &keys::specification_key())?;

        let created = match (recorded_size, recorded_spec) {
            (None, None) => {
                codec::write::<_, _, DatabaseError>(
                    &mut store,
                    &keys::segment_size_key(),
                    &config.segment_size.bytes(),
                )?;
                codec::write::<_, _, DatabaseError>(
                    &mut store,
                    &keys::specification_key(),
                    schema.spec(),
                )?;
                true
            }
            (Some(_), None) => return Err(DatabaseError::MissingSpecification),
            (None, Some(_)) => return Err(DatabaseError::MissingSegmentSize),
            (Some(recorded), Some(stored)) => {
                if recorded != config.segment_size.bytes() {
                    warn!(
                        recorded,
                        configured = config.segment_size.bytes(),
                        "segment size mismatch"
                    );
                    return Err(DatabaseError::SegmentSizeMismatch { recorded });
                }
                if stored.normalized() != *schema.spec() {
                    return Err(DatabaseError::SpecificationMismatch);
                }
                false
            }
        };

        let files = load_files(&mut store, &schema, config)?;
        info!(
            files = files.len(),
            segment_size = config.segment_size.bytes(),
            branching_factor = config.branching_factor,
            created,
            "opened database"
        );
        Ok(Self {
            store,
            config,
            schema,
            files,
        })
    }

    /// The segment size recorded in `store`, if it has been opened before.
    pub fn recorded_segment_size(store: &S) -> Result<Option<SegmentSize>, DatabaseError> {
        codec::read::<_, usize, DatabaseError>(store, &keys::segment_size_key())?
            .map(|bytes| SegmentSize::new(bytes).map_err(DatabaseError::from))
            .transpose()
    }

    /// Close the database, returning the backing store.
    pub fn close(self) -> S {
        debug!("closed database");
        self.store
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn segment_size(&self) -> SegmentSize {
        self.config.segment_size
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn file_state(&self, file: &str) -> Result<&FileState, DatabaseError> {
        file_state(&self.files, file)
    }

    /// Begin a transaction on the backing store.
    pub fn start_transaction(&mut self) -> Result<(), DatabaseError> {
        self.store.begin()?;
        Ok(())
    }

    /// Commit the backing store's transaction.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        self.store.commit()?;
        Ok(())
    }

    /// Roll back the backing store's transaction and reload file state.
    pub fn backout(&mut self) -> Result<(), DatabaseError> {
        self.store.rollback()?;
        self.files = load_files(&mut self.store, &self.schema, self.config)?;
        Ok(())
    }

    // Primary records.

    /// Store `value` as a record of `file`.
    ///
    /// With no record number, a freed number is reused if one is available,
    /// otherwise the number after the highest in use is taken.
    pub fn put_record(
        &mut self,
        file: &str,
        record: Option<RecordNumber>,
        value: &[u8],
    ) -> Result<RecordNumber, DatabaseError> {
        let state = file_state_mut(&mut self.files, file)?;
        let record = match record {
            Some(record) => record,
            None => match state.existence.lowest_freed(&mut self.store)? {
                Some(record) => record,
                None => state.existence.next_record_number(),
            },
        };
        state.existence.add(&mut self.store, record)?;
        self.store.set(&state.keys.record(record), value)?;
        Ok(record)
    }

    /// Replace a record's value if it is currently `old`. Returns whether it was replaced.
    pub fn replace_record(
        &mut self,
        file: &str,
        record: RecordNumber,
        old: &[u8],
        new: &[u8],
    ) -> Result<bool, DatabaseError> {
        let key = file_state(&self.files, file)?.keys.record(record);
        if self.store.get(&key)?.as_deref() != Some(old) {
            return Ok(false);
        }
        self.store.set(&key, new)?;
        Ok(true)
    }

    /// Delete a record if its value is currently `value`. Returns whether it was deleted.
    pub fn delete_record(
        &mut self,
        file: &str,
        record: RecordNumber,
        value: &[u8],
    ) -> Result<bool, DatabaseError> {
        let state = file_state_mut(&mut self.files, file)?;
        let key = state.keys.record(record);
        if self.store.get(&key)?.as_deref() != Some(value) {
            return Ok(false);
        }
        let high_record = state.existence.high_record();
        let (segment, offset) = state.existence.remove(&mut self.store, record)?;
        self.store.delete(&key)?;
        state
            .existence
            .note_freed(&mut self.store, segment, offset, high_record)?;
        Ok(true)
    }

    /// The stored value of a record.
    pub fn get_primary_record(
        &self,
        file: &str,
        record: RecordNumber,
    ) -> Result<Option<Vec<u8>>, DatabaseError> {
        let key = self.file_state(file)?.keys.record(record);
        Ok(self.store.get(&key)?)
    }

    /// Number of records in `file`.
    pub fn count_records(&self, file: &str) -> Result<usize, DatabaseError> {
        Ok(self.file_state(file)?.existence.count(&self.store)?)
    }

    /// Highest record number in use in `file`.
    pub fn high_record(&self, file: &str) -> Result<Option<RecordNumber>, DatabaseError> {
        Ok(self.file_state(file)?.existence.high_record())
    }

    // Field references.

    /// Reference `record` from `value` of `field`.
    pub fn add_record_to_field_value(
        &mut self,
        file: &str,
        field: &str,
        value: &[u8],
        record: RecordNumber,
    ) -> Result<(), DatabaseError> {
        let index = file_state(&self.files, file)?.field(field)?;
        index.add_reference(&mut self.store, value, record)?;
        Ok(())
    }

    /// Remove the reference to `record` from `value` of `field`. Returns whether it existed.
    pub fn remove_record_from_field_value(
        &mut self,
        file: &str,
        field: &str,
        value: &[u8],
        record: RecordNumber,
    ) -> Result<bool, DatabaseError> {
        let index = file_state(&self.files, file)?.field(field)?;
        Ok(index.remove_reference(&mut self.store, value, record)?)
    }

    /// Make `records` the complete set of records holding `value` of `field`.
    pub fn file_records_under(
        &mut self,
        file: &str,
        field: &str,
        value: &[u8],
        records: &RecordSet,
    ) -> Result<(), DatabaseError> {
        let index = file_state(&self.files, file)?.field(field)?;
        index.file_records_under(&mut self.store, value, records)?;
        Ok(())
    }

    /// Remove every record from `value` of `field`. Returns whether it had any.
    pub fn unfile_records_under(
        &mut self,
        file: &str,
        field: &str,
        value: &[u8],
    ) -> Result<bool, DatabaseError> {
        let index = file_state(&self.files, file)?.field(field)?;
        Ok(index.unfile_records_under(&mut self.store, value)?)
    }

    // Instances.

    /// Store a record and reference it from each of its field values.
    pub fn put_instance(
        &mut self,
        file: &str,
        value: &[u8],
        index_values: &IndexValues,
    ) -> Result<RecordNumber, DatabaseError> {
        self.check_fields(file, index_values)?;
        let record = self.put_record(file, None, value)?;
        for (field, values) in index_values {
            for v in values {
                self.add_record_to_field_value(file, field, v, record)?;
            }
        }
        Ok(record)
    }

    /// Delete a record whose value is `value` and its references from `index_values`.
    ///
    /// Returns whether the record was deleted.
    pub fn delete_instance(
        &mut self,
        file: &str,
        record: RecordNumber,
        value: &[u8],
        index_values: &IndexValues,
    ) -> Result<bool, DatabaseError> {
        self.check_fields(file, index_values)?;
        if !self.delete_record(file, record, value)? {
            return Ok(false);
        }
        for (field, values) in index_values {
            for v in values {
                self.remove_record_from_field_value(file, field, v, record)?;
            }
        }
        Ok(true)
    }

    /// Replace a record's value and move its references from `old_index` to `new_index`.
    ///
    /// Nothing changes unless the record's value is currently `old_value`.
    pub fn edit_instance(
        &mut self,
        file: &str,
        record: RecordNumber,
        old_value: &[u8],
        new_value: &[u8],
        old_index: &IndexValues,
        new_index: &IndexValues,
    ) -> Result<bool, DatabaseError> {
        self.check_fields(file, old_index)?;
        self.check_fields(file, new_index)?;
        if !self.replace_record(file, record, old_value, new_value)? {
            return Ok(false);
        }
        let fields: BTreeSet<&String> = old_index.keys().chain(new_index.keys()).collect();
        for field in fields {
            let old: BTreeSet<&Vec<u8>> = old_index.get(field).into_iter().flatten().collect();
            let new: BTreeSet<&Vec<u8>> = new_index.get(field).into_iter().flatten().collect();
            for v in old.difference(&new) {
                self.remove_record_from_field_value(file, field, v, record)?;
            }
            for v in new.difference(&old) {
                self.add_record_to_field_value(file, field, v, record)?;
            }
        }
        Ok(true)
    }

    fn check_fields(&self, file: &str, index_values: &IndexValues) -> Result<(), DatabaseError> {
        let state = self.file_state(file)?;
        for field in index_values.keys() {
            state.field(field)?;
        }
        Ok(())
    }

    // Record-set queries.

    /// Records holding exactly `value`.
    pub fn recordlist_key(&self, file: &str, field: &str, value: &[u8]) -> Result<RecordSet, DatabaseError> {
        let index = self.file_state(file)?.field(field)?;
        Ok(index.records(&self.store, value)?)
    }

    /// Records holding any value within `range`.
    pub fn recordlist_key_range(
        &self,
        file: &str,
        field: &str,
        range: &KeyRange,
    ) -> Result<RecordSet, DatabaseError> {
        let (lower, upper) = range.bounds()?;
        let scan = self.value_scan(file, field)?.bounded(lower, upper);
        self.collect_records(file, field, scan)
    }

    /// Records holding any value starting with `prefix`.
    pub fn recordlist_key_startswith(
        &self,
        file: &str,
        field: &str,
        prefix: &[u8],
    ) -> Result<RecordSet, DatabaseError> {
        let scan = self.value_scan(file, field)?.prefixed(prefix.to_vec());
        self.collect_records(file, field, scan)
    }

    /// Records holding any value of `field`.
    pub fn recordlist_all(&self, file: &str, field: &str) -> Result<RecordSet, DatabaseError> {
        let scan = self.value_scan(file, field)?;
        self.collect_records(file, field, scan)
    }

    /// Records holding a value containing a case-insensitive match for `pattern`.
    pub fn recordlist_key_like(
        &self,
        file: &str,
        field: &str,
        pattern: &str,
    ) -> Result<RecordSet, DatabaseError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(QueryError::from)?;
        let scan = self.value_scan(file, field)?.matching(regex);
        self.collect_records(file, field, scan)
    }

    /// Every record of `file`.
    pub fn recordlist_ebm(&self, file: &str) -> Result<RecordSet, DatabaseError> {
        Ok(self.file_state(file)?.existence.records(&self.store)?)
    }

    /// Records of `file` numbered from `start` to `end` inclusive.
    ///
    /// Either end may be open.
    pub fn recordlist_record_number_range(
        &self,
        file: &str,
        start: Option<RecordNumber>,
        end: Option<RecordNumber>,
    ) -> Result<RecordSet, DatabaseError> {
        let existence = &self.file_state(file)?.existence;
        let size = existence.segment_size();
        let mut records = RecordSet::new(size);
        if start.zip(end).is_some_and(|(s, e)| s > e) {
            return Ok(records);
        }
        let first = start.map(|r| size.split(r));
        let last = end.map(|r| size.split(r));
        for &segment in existence.segments() {
            if first.is_some_and(|(s, _)| segment < s) || last.is_some_and(|(s, _)| segment > s) {
                continue;
            }
            let Some(mut bitmap) = existence.get_segment(&self.store, segment)? else {
                continue;
            };
            if let Some((s, offset)) = first
                && s == segment
            {
                bitmap.clear_below(offset);
            }
            if let Some((s, offset)) = last
                && s == segment
            {
                bitmap.clear_above(offset);
            }
            if let Some(encoded) = SegmentRecords::from_bitmap(bitmap, size) {
                records.merge_segment(segment, encoded);
            }
        }
        Ok(records)
    }

    /// A set holding `record` if it exists.
    pub fn recordlist_record_number(
        &self,
        file: &str,
        record: RecordNumber,
    ) -> Result<RecordSet, DatabaseError> {
        let existence = &self.file_state(file)?.existence;
        let mut records = RecordSet::new(existence.segment_size());
        if existence.contains(&self.store, record)? {
            records.insert(record);
        }
        Ok(records)
    }

    /// An empty set for `file`.
    pub fn recordlist_nil(&self, file: &str) -> Result<RecordSet, DatabaseError> {
        Ok(RecordSet::new(self.file_state(file)?.existence.segment_size()))
    }

    /// Values of `field` selected by `spec`, produced lazily in ascending order.
    pub fn find_values(
        &self,
        file: &str,
        field: &str,
        spec: &ValueSpec,
    ) -> Result<impl Iterator<Item = Result<Vec<u8>, DatabaseError>> + '_, DatabaseError> {
        let (lower, upper) = spec.range.bounds()?;
        let mut scan = self.value_scan(file, field)?.bounded(lower, upper);
        if let Some(pattern) = &spec.pattern {
            scan = scan.matching(Regex::new(pattern).map_err(QueryError::from)?);
        }
        if let Some(values) = &spec.values {
            scan = scan.allowed(values.clone());
        }
        Ok(scan.map(|value| value.map_err(DatabaseError::from)))
    }

    fn value_scan(&self, file: &str, field: &str) -> Result<ValueScan<'_, S>, DatabaseError> {
        let index = self.file_state(file)?.ordered_field(field)?;
        let cursor = index.cursor().ok_or_else(|| DatabaseError::NotOrdered {
            file: file.to_string(),
            field: field.to_string(),
        })?;
        Ok(ValueScan::new(&self.store, cursor))
    }

    fn collect_records(
        &self,
        file: &str,
        field: &str,
        scan: ValueScan<'_, S>,
    ) -> Result<RecordSet, DatabaseError> {
        let index = self.file_state(file)?.field(field)?;
        let mut records = RecordSet::new(self.segment_size());
        for value in scan {
            index.postings().populate(&self.store, &value?, &mut records)?;
        }
        Ok(records)
    }

    // Cursors.

    /// A cursor over the records of `file`.
    pub fn primary_cursor(&self, file: &str) -> Result<PrimaryCursor<'_, S>, DatabaseError> {
        PrimaryCursor::new(self, file)
    }

    /// A cursor over the `(value, record)` pairs of an ordered field.
    ///
    /// With a prefix, only values starting with it are visited.
    pub fn index_cursor(
        &self,
        file: &str,
        field: &str,
        prefix: Option<&[u8]>,
    ) -> Result<IndexCursor<'_, S>, DatabaseError> {
        IndexCursor::new(self, file, field, prefix)
    }
}

fn file_state<'a>(
    files: &'a BTreeMap<String, FileState>,
    file: &str,
) -> Result<&'a FileState, DatabaseError> {
    files.get(file).ok_or_else(|| {
        SchemaError::UnknownFile {
            name: file.to_string(),
        }
        .into()
    })
}

fn file_state_mut<'a>(
    files: &'a mut BTreeMap<String, FileState>,
    file: &str,
) -> Result<&'a mut FileState, DatabaseError> {
    files.get_mut(file).ok_or_else(|| {
        SchemaError::UnknownFile {
            name: file.to_string(),
        }
        .into()
    })
}

fn load_files<S: BackingStore + ?Sized>(
    store: &mut S,
    schema: &Schema,
    config: EngineConfig,
) -> Result<BTreeMap<String, FileState>, DatabaseError> {
    let mut files = BTreeMap::new();
    for file in schema.files() {
        let keys = file.keys();
        let existence = ExistenceBitmap::open(store, keys.clone(), config.segment_size)?;
        let mut fields = BTreeMap::new();
        for (name, field) in &file.fields {
            let field_keys = keys.field(field.number);
            let tree = match field.access {
                AccessMethod::Ordered => Some(Tree::new(field_keys.clone(), config.branching_factor)?),
                AccessMethod::Unordered => None,
            };
            let postings = PostingSet::new(field_keys, config.segment_size);
            fields.insert(name.clone(), FieldIndex::new(postings, tree));
        }
        debug!(
            file = %file.name,
            table = file.table,
            high_record = ?existence.high_record(),
            "loaded file"
        );
        files.insert(
            file.name.clone(),
            FileState {
                name: file.name.clone(),
                keys,
                existence,
                fields,
            },
        );
    }
    Ok(files)
}
