//! Shared fixtures for unit and end-to-end tests.

use crate::config::EngineConfig;
use crate::storage::{
    BackingStore, Database, DatabaseSpec, FileSpec, IndexValues, MemoryStore, RecordNumber,
    RecordSet,
};

/// A `books` file with an ordered `author` field and an unordered `isbn` field.
pub fn books_spec() -> DatabaseSpec {
    DatabaseSpec::new().file(
        FileSpec::new("books", "book")
            .ordered("author")
            .unordered("isbn"),
    )
}

/// 8-byte segments and a branching factor of 4.
pub fn small_config() -> EngineConfig {
    EngineConfig::smallest()
}

/// Open `spec` on a fresh memory store with [`small_config`].
pub fn new_test_database(spec: &DatabaseSpec) -> Database<MemoryStore> {
    #[allow(clippy::expect_used)]
    let db = Database::open(MemoryStore::new(), spec, small_config()).expect("open test database");
    db
}

/// Build field values from `(field, value)` pairs.
pub fn index_values(pairs: &[(&str, &str)]) -> IndexValues {
    let mut values = IndexValues::new();
    for (field, value) in pairs {
        values
            .entry((*field).to_string())
            .or_default()
            .push(value.as_bytes().to_vec());
    }
    values
}

/// The record numbers of `set` in ascending order.
pub fn records(set: &RecordSet) -> Vec<RecordNumber> {
    set.iter().collect()
}

/// Keys of `store` starting with `prefix`, as strings, sorted.
pub fn keys_with_prefix(store: &MemoryStore, prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = store
        .keys()
        .filter(|k| k.starts_with(prefix.as_bytes()))
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .collect();
    keys.sort();
    keys
}

/// The value under `key` as a string.
pub fn value_string<S: BackingStore>(store: &S, key: &str) -> Option<String> {
    #[allow(clippy::expect_used)]
    let value = store.get(key.as_bytes()).expect("read");
    value.map(|v| String::from_utf8_lossy(&v).into_owned())
}
