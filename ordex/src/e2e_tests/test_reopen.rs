//! Reopening stores: recorded settings and persistence through a file.

use crate::config::EngineConfig;
use crate::query::{KeyRange, ValueSpec};
use crate::storage::{Database, DatabaseError, FileStore, MemoryStore};
use crate::testing::{books_spec, records};

use super::helpers::{book, put_authors};

#[test]
fn test_segment_size_mismatch_reopens_with_recorded_size() {
    let config = EngineConfig::new(16, 4).expect("valid config");
    let mut db = Database::open(MemoryStore::new(), &books_spec(), config).expect("open");
    let held = put_authors(&mut db, &["le guin", "butler", "delany"]);
    let store = db.close();

    let Err(error) = Database::open(store.clone(), &books_spec(), EngineConfig::smallest()) else {
        panic!("segment size should not match");
    };
    assert!(error.is_recoverable());
    assert!(matches!(error, DatabaseError::SegmentSizeMismatch { recorded: 16 }));

    let size = Database::recorded_segment_size(&store)
        .expect("read")
        .expect("recorded");
    let db = Database::open(
        store,
        &books_spec(),
        EngineConfig::smallest().with_segment_size(size),
    )
    .expect("reopen");
    assert_eq!(db.segment_size().bytes(), 16);
    assert_eq!(records(&db.recordlist_ebm("books").expect("ebm")), held);
    assert_eq!(
        records(&db.recordlist_key("books", "author", b"butler").expect("query")),
        [held[1]]
    );
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("books.db");
    let config = EngineConfig::smallest();

    {
        let store = FileStore::open(&path).expect("open store");
        let mut db = Database::open(store, &books_spec(), config).expect("open");
        db.start_transaction().expect("begin");
        for (i, author) in ["orwell", "huxley", "bradbury", "atwood"].iter().enumerate() {
            db.put_instance("books", format!("book {i}").as_bytes(), &book(author, "x"))
                .expect("put");
        }
        db.commit().expect("commit");

        db.start_transaction().expect("begin");
        db.put_instance("books", b"lost", &book("zamyatin", "y"))
            .expect("put");
        db.backout().expect("backout");
        db.close().sync().expect("sync");
    }

    let store = FileStore::open(&path).expect("reopen store");
    let db = Database::open(store, &books_spec(), config).expect("reopen");
    assert_eq!(db.count_records("books").expect("count"), 4);
    assert_eq!(
        db.get_primary_record("books", 2).expect("get"),
        Some(b"book 2".to_vec())
    );
    let values = db
        .find_values("books", "author", &ValueSpec::new(KeyRange::all().to("m")))
        .expect("find")
        .collect::<Result<Vec<_>, _>>()
        .expect("values");
    assert_eq!(values, [b"atwood".to_vec(), b"bradbury".to_vec(), b"huxley".to_vec()]);
    assert_eq!(records(&db.recordlist_key("books", "isbn", b"x").expect("query")), [0, 1, 2, 3]);
    assert!(db.recordlist_key("books", "isbn", b"y").expect("query").is_empty());
}

#[test]
fn test_reopen_with_other_files_is_rejected() {
    let store = Database::open(MemoryStore::new(), &books_spec(), EngineConfig::smallest())
        .expect("open")
        .close();
    let other = crate::storage::DatabaseSpec::new().file(
        crate::storage::FileSpec::new("films", "film").ordered("director"),
    );
    assert!(matches!(
        Database::open(store, &other, EngineConfig::smallest()),
        Err(DatabaseError::SpecificationMismatch)
    ));
}
