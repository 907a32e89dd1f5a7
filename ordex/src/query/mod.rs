//! Query support for ordered fields.
//!
//! - [`KeyRange`] and [`ValueSpec`] describe which values of a field to visit
//! - [`ValueScan`] visits them lazily through a tree cursor
//!
//! Record-set queries built on these live on
//! [`Database`](crate::storage::Database).
//!
//! # Example
//!
//! ```
//! use ordex::query::{KeyRange, ValueSpec};
//! use ordex::storage::{Database, DatabaseSpec, FileSpec, MemoryStore};
//! use ordex::EngineConfig;
//!
//! let spec = DatabaseSpec::new().file(FileSpec::new("fruit", "item").ordered("name"));
//! let mut db = Database::open(MemoryStore::new(), &spec, EngineConfig::default())?;
//! for name in ["apple", "banana", "cherry"] {
//!     let record = db.put_record("fruit", None, name.as_bytes())?;
//!     db.add_record_to_field_value("fruit", "name", name.as_bytes(), record)?;
//! }
//!
//! let values = db
//!     .find_values("fruit", "name", &ValueSpec::new(KeyRange::all().above("apple")))?
//!     .collect::<Result<Vec<_>, _>>()?;
//! assert_eq!(values, [b"banana".to_vec(), b"cherry".to_vec()]);
//! # Ok::<(), ordex::storage::DatabaseError>(())
//! ```

mod scan;
pub mod types;

pub use scan::ValueScan;
pub use types::{KeyRange, QueryError, ValueSpec, prefix_successor};
