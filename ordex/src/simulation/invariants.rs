//! Invariant checking for deterministic simulation testing.
//!
//! The simulator keeps a model of every committed record in an
//! [`OperationHistory`]. After each step the [`InvariantChecker`] compares
//! the database against it: record values, existence counts, posting sets
//! of both fields, and the ordered index's tree structure.

use std::collections::{BTreeMap, BTreeSet};

use crate::query::ValueSpec;
use crate::storage::io::BackingStore;
use crate::storage::{Database, DatabaseError, RecordNumber};

use super::simulator::{FILE, GROUP_FIELD, TAG_FIELD};

/// A record the database is expected to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRecord {
    pub value: Vec<u8>,
    pub tag: Vec<u8>,
    pub group: Vec<u8>,
}

/// A recorded operation in the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put {
        record: Option<RecordNumber>,
        committed: bool,
    },
    Delete {
        record: RecordNumber,
        committed: bool,
    },
}

/// Tracks the history of operations and the state they should produce.
#[derive(Debug, Default)]
pub struct OperationHistory {
    operations: Vec<Operation>,
    expected: BTreeMap<RecordNumber, ExpectedRecord>,
}

impl OperationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a put; a committed put adds `record` to the expected state.
    pub fn record_put(&mut self, record: Option<RecordNumber>, expected: ExpectedRecord) {
        if let Some(record) = record {
            self.expected.insert(record, expected);
        }
        self.operations.push(Operation::Put {
            record,
            committed: record.is_some(),
        });
    }

    /// Record a delete; a committed delete removes `record` from the expected state.
    pub fn record_delete(&mut self, record: RecordNumber, committed: bool) {
        if committed {
            self.expected.remove(&record);
        }
        self.operations.push(Operation::Delete { record, committed });
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The records the database should hold.
    #[must_use]
    pub const fn expected(&self) -> &BTreeMap<RecordNumber, ExpectedRecord> {
        &self.expected
    }

    /// Expected records per value of one field.
    fn postings(
        &self,
        field: impl Fn(&ExpectedRecord) -> &[u8],
    ) -> BTreeMap<Vec<u8>, Vec<RecordNumber>> {
        let mut postings: BTreeMap<Vec<u8>, Vec<RecordNumber>> = BTreeMap::new();
        for (&record, expected) in &self.expected {
            postings.entry(field(expected).to_vec()).or_default().push(record);
        }
        postings
    }
}

/// An invariant violation detected during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub description: String,
    /// Operation index where it was detected.
    pub operation_index: usize,
    pub context: String,
}

/// Checker for database invariants.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    #[must_use]
    pub const fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn clear(&mut self) {
        self.violations.clear();
    }

    fn violation(&mut self, operation_index: usize, description: &str, context: String) {
        self.violations.push(InvariantViolation {
            description: description.to_string(),
            operation_index,
            context,
        });
    }

    /// Run every check against `db`. Reads must not fault.
    pub fn check<S: BackingStore>(
        &mut self,
        db: &Database<S>,
        history: &OperationHistory,
        operation_index: usize,
    ) {
        if let Err(e) = self.check_all(db, history, operation_index) {
            self.violation(operation_index, "check failed to read database", e.to_string());
        }
    }

    fn check_all<S: BackingStore>(
        &mut self,
        db: &Database<S>,
        history: &OperationHistory,
        operation_index: usize,
    ) -> Result<(), DatabaseError> {
        self.check_records(db, history, operation_index)?;
        for (field, postings) in [
            (TAG_FIELD, history.postings(|r| &r.tag)),
            (GROUP_FIELD, history.postings(|r| &r.group)),
        ] {
            self.check_postings(db, field, &postings, operation_index)?;
        }
        self.check_ordered_values(db, history, operation_index)
    }

    /// Existence count, record values and the set of all records agree with the model.
    fn check_records<S: BackingStore>(
        &mut self,
        db: &Database<S>,
        history: &OperationHistory,
        operation_index: usize,
    ) -> Result<(), DatabaseError> {
        let expected = history.expected();
        let count = db.count_records(FILE)?;
        if count != expected.len() {
            self.violation(
                operation_index,
                "record count differs",
                format!("database {count}, expected {}", expected.len()),
            );
        }
        let present: Vec<RecordNumber> = db.recordlist_ebm(FILE)?.iter().collect();
        let wanted: Vec<RecordNumber> = expected.keys().copied().collect();
        if present != wanted {
            self.violation(
                operation_index,
                "existing records differ",
                format!("database {present:?}, expected {wanted:?}"),
            );
        }
        for (&record, model) in expected {
            let stored = db.get_primary_record(FILE, record)?;
            if stored.as_deref() != Some(model.value.as_slice()) {
                self.violation(
                    operation_index,
                    "record value differs",
                    format!("record {record}: {stored:?}"),
                );
            }
        }
        Ok(())
    }

    /// Each field value names exactly the records the model gives it.
    fn check_postings<S: BackingStore>(
        &mut self,
        db: &Database<S>,
        field: &str,
        postings: &BTreeMap<Vec<u8>, Vec<RecordNumber>>,
        operation_index: usize,
    ) -> Result<(), DatabaseError> {
        for (value, records) in postings {
            let stored: Vec<RecordNumber> = db.recordlist_key(FILE, field, value)?.iter().collect();
            if &stored != records {
                self.violation(
                    operation_index,
                    "posting set differs",
                    format!(
                        "{field}={}: database {stored:?}, expected {records:?}",
                        String::from_utf8_lossy(value)
                    ),
                );
            }
        }
        Ok(())
    }

    /// The ordered field's tree is well formed and holds exactly the referenced values.
    fn check_ordered_values<S: BackingStore>(
        &mut self,
        db: &Database<S>,
        history: &OperationHistory,
        operation_index: usize,
    ) -> Result<(), DatabaseError> {
        let wanted: Vec<Vec<u8>> = history
            .expected()
            .values()
            .map(|r| r.tag.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let found = db
            .find_values(FILE, TAG_FIELD, &ValueSpec::default())?
            .collect::<Result<Vec<_>, _>>()?;
        if found != wanted {
            self.violation(
                operation_index,
                "ordered values differ",
                format!("found {} values, expected {}", found.len(), wanted.len()),
            );
        }

        let index = db.file_state(FILE)?.field(TAG_FIELD)?;
        if let Some(tree) = index.tree() {
            match tree.verify(db.store()) {
                Ok(keys) if keys == wanted => {}
                Ok(keys) => self.violation(
                    operation_index,
                    "tree keys differ",
                    format!("tree has {} keys, expected {}", keys.len(), wanted.len()),
                ),
                Err(e) => self.violation(operation_index, "tree is malformed", e.to_string()),
            }
        }
        Ok(())
    }
}
