//! Common helpers for end-to-end tests.

use crate::storage::{Database, IndexValues, MemoryStore, RecordNumber};
use crate::testing::index_values;

/// Store one `books` record per author and return their record numbers.
pub fn put_authors(db: &mut Database<MemoryStore>, authors: &[&str]) -> Vec<RecordNumber> {
    authors
        .iter()
        .enumerate()
        .map(|(i, author)| {
            let values = book(author, &format!("isbn-{i}"));
            #[allow(clippy::expect_used)]
            let record = db
                .put_instance("books", format!("book {i}").as_bytes(), &values)
                .expect("put instance");
            record
        })
        .collect()
}

pub fn book(author: &str, isbn: &str) -> IndexValues {
    index_values(&[("author", author), ("isbn", isbn)])
}
