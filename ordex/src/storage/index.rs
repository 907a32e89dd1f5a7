//! Combined posting-set and ordered-index maintenance for one field.
//!
//! A value is a key of the field's tree exactly when it has a posting
//! directory. Every mutation here changes both together, in this order:
//! the tree gains a key before its first posting is written, and loses it
//! only after its last posting is gone.

use tracing::trace;

use crate::storage::btree::{Tree, TreeCursor, TreeError};
use crate::storage::io::BackingStore;
use crate::storage::posting::{PostingError, PostingSet, Removal};
use crate::storage::recordset::RecordSet;
use crate::storage::segment::RecordNumber;

/// Errors from field index maintenance.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Posting(#[from] PostingError),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Posting sets of one field, plus its tree when the field is ordered.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    postings: PostingSet,
    tree: Option<Tree>,
}

impl FieldIndex {
    /// An index over `postings`, ordered by `tree` if given.
    #[must_use]
    pub const fn new(postings: PostingSet, tree: Option<Tree>) -> Self {
        Self { postings, tree }
    }

    #[must_use]
    pub const fn postings(&self) -> &PostingSet {
        &self.postings
    }

    /// The field's tree, if the field is ordered.
    #[must_use]
    pub const fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.tree.is_some()
    }

    /// A cursor over the field's values, if the field is ordered.
    #[must_use]
    pub fn cursor(&self) -> Option<TreeCursor> {
        self.tree.clone().map(TreeCursor::new)
    }

    /// Reference `record` from `value`.
    pub fn add_reference<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        record: RecordNumber,
    ) -> Result<(), IndexError> {
        let (segment, offset) = self.postings.segment_size().split(record);
        let directory = self.postings.directory(store, value)?;
        if directory.is_none()
            && let Some(tree) = &self.tree
        {
            tree.insert(store, value)?;
            trace!(record, "value entered the index");
        }
        self.postings.add(store, value, directory, segment, offset)?;
        Ok(())
    }

    /// Remove the reference to `record` from `value`. Returns whether it existed.
    pub fn remove_reference<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        record: RecordNumber,
    ) -> Result<bool, IndexError> {
        let (segment, offset) = self.postings.segment_size().split(record);
        match self.postings.remove(store, value, segment, offset)? {
            Removal::Absent => Ok(false),
            Removal::Kept => Ok(true),
            Removal::EntryDeleted => {
                if let Some(tree) = &self.tree {
                    tree.delete(store, value)?;
                    trace!(record, "value left the index");
                }
                Ok(true)
            }
        }
    }

    /// Make `records` the complete set of records holding `value`.
    pub fn file_records_under<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
        records: &RecordSet,
    ) -> Result<(), IndexError> {
        self.unfile_records_under(store, value)?;
        if records.is_empty() {
            return Ok(());
        }
        if let Some(tree) = &self.tree {
            tree.insert(store, value)?;
        }
        self.postings.write_all(store, value, records)?;
        Ok(())
    }

    /// Remove every record from `value`. Returns whether it had any.
    pub fn unfile_records_under<S: BackingStore + ?Sized>(
        &self,
        store: &mut S,
        value: &[u8],
    ) -> Result<bool, IndexError> {
        if !self.postings.delete_all(store, value)? {
            return Ok(false);
        }
        if let Some(tree) = &self.tree {
            tree.delete(store, value)?;
        }
        Ok(true)
    }

    /// Every record holding `value`.
    pub fn records<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        value: &[u8],
    ) -> Result<RecordSet, IndexError> {
        Ok(self.postings.records(store, value)?)
    }
}
