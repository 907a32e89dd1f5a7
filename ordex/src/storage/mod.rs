//! Record-set storage engine.
//!
//! Every structure lives as composite keys in a point key-value store
//! behind the [`BackingStore`] trait:
//!
//! - Per-file existence bitmaps, split into fixed-size segments
//! - Per-field posting sets, stored per segment as an offset list or a bitmap
//! - Per-ordered-field B+trees over the distinct field values
//!
//! [`Database`] ties these together; record-set queries return a
//! [`RecordSet`] of record numbers.
//!
//! # Usage
//!
//! ```
//! use ordex::storage::{Database, DatabaseSpec, FileSpec, IndexValues, MemoryStore};
//! use ordex::EngineConfig;
//!
//! let spec = DatabaseSpec::new().file(FileSpec::new("games", "game").ordered("event"));
//! let mut db = Database::open(MemoryStore::new(), &spec, EngineConfig::default())?;
//!
//! let mut values = IndexValues::new();
//! values.insert("event".to_string(), vec![b"open".to_vec()]);
//! let record = db.put_instance("games", b"1. e4 e5", &values)?;
//!
//! let found = db.recordlist_key("games", "event", b"open")?;
//! assert!(found.contains(record));
//! # Ok::<(), ordex::storage::DatabaseError>(())
//! ```

mod allocator;
mod bitmap;
pub mod btree;
mod codec;
mod cursor;
mod database;
mod file;
mod index;
pub mod io;
pub mod keys;
mod memory;
mod posting;
mod recordset;
mod schema;
mod segment;

pub use allocator::{AllocatorError, ExistenceBitmap};
pub use bitmap::Bitmap;
pub use codec::CodecError;
pub use cursor::{IndexCursor, PrimaryCursor};
pub use database::{Database, DatabaseError, IndexValues};
pub use file::FileStore;
pub use index::{FieldIndex, IndexError};
pub use io::{BackingStore, StoreError};
pub use memory::MemoryStore;
pub use posting::{PostingDirectory, PostingError, PostingSet, Removal, SegmentRef};
pub use recordset::{RecordSet, SegmentRecords};
pub use schema::{
    AccessMethod, DatabaseSpec, FieldSchema, FieldSpec, FileSchema, FileSpec, Schema, SchemaError,
};
pub use segment::{
    MAX_SEGMENT_SIZE_BYTES, MIN_SEGMENT_SIZE_BYTES, RecordNumber, SegmentError, SegmentNumber,
    SegmentSize,
};
