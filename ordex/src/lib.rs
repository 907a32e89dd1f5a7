//! Ordered record-set indexing on top of a point key-value store.
//!
//! Life of a query:
//! 1. Resolve the file and field names against the open schema
//! 2. For ordered fields, walk the field's B+tree to find matching values
//! 3. Merge each value's posting set into a [`storage::RecordSet`]
//!
//! Life of an update:
//! 1. Allocate a record number from the file's existence bitmap
//! 2. Store the record value
//! 3. Add the record to each field value's posting set, inserting the
//!    value into the B+tree when it gains its first record
//!
//! System components:
//!  - Backing stores (in-memory and single-file)
//!  - Segmented existence bitmaps and posting sets
//!  - Persisted B+trees for ordered fields
//!  - Deterministic simulation with fault injection

pub mod config;
pub mod query;
pub mod simulation;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, EngineConfig};
