//! Posting segments move between singleton, list and bitmap encodings.

use crate::storage::{Database, MemoryStore, PostingDirectory, RecordNumber, SegmentRef};
use crate::testing::{books_spec, keys_with_prefix, new_test_database, records};

fn directory(db: &Database<MemoryStore>, value: &[u8]) -> Option<PostingDirectory> {
    db.file_state("books")
        .expect("file")
        .field("isbn")
        .expect("field")
        .postings()
        .directory(db.store(), value)
        .expect("directory")
}

fn put(db: &mut Database<MemoryStore>, count: u64) {
    for i in 0..count {
        db.put_record("books", None, format!("book {i}").as_bytes())
            .expect("put");
    }
}

fn reference(db: &Database<MemoryStore>, segment: u64) -> Option<SegmentRef> {
    directory(db, b"x").and_then(|d| d.get(&segment).copied())
}

#[test]
fn test_promotion_and_demotion_with_hysteresis() {
    // 8-byte segments: lists hold up to 3 offsets; bitmaps shrink back at 1.
    let mut db = new_test_database(&books_spec());
    put(&mut db, 4);

    let mut expected = [
        SegmentRef::Singleton(0),
        SegmentRef::List(2),
        SegmentRef::List(3),
        SegmentRef::Bitmap(4),
    ]
    .into_iter();
    for record in 0..4 {
        db.add_record_to_field_value("books", "isbn", b"x", record)
            .expect("add");
        assert_eq!(reference(&db, 0), expected.next());
    }
    assert_eq!(keys_with_prefix(db.store(), "1_2_R_"), ["1_2_R_0_x"]);

    let mut expected = [
        Some(SegmentRef::Bitmap(3)),
        Some(SegmentRef::Bitmap(2)),
        Some(SegmentRef::Singleton(0)),
        None,
    ]
    .into_iter();
    for record in (0..4).rev() {
        assert!(db
            .remove_record_from_field_value("books", "isbn", b"x", record)
            .expect("remove"));
        assert_eq!(reference(&db, 0), expected.next().flatten());
    }
    assert!(keys_with_prefix(db.store(), "1_2_").is_empty());
}

#[test]
fn test_value_spans_segments() {
    let mut db = new_test_database(&books_spec());
    put(&mut db, 200);
    let held: Vec<RecordNumber> = vec![1, 2, 64, 130, 131, 132, 133, 199];
    for &record in &held {
        db.add_record_to_field_value("books", "isbn", b"x", record)
            .expect("add");
    }
    let dir = directory(&db, b"x").expect("directory");
    assert_eq!(dir.get(&0), Some(&SegmentRef::List(2)));
    assert_eq!(dir.get(&1), Some(&SegmentRef::Singleton(0)));
    assert_eq!(dir.get(&2), Some(&SegmentRef::Bitmap(4)));
    assert_eq!(dir.get(&3), Some(&SegmentRef::Singleton(7)));
    assert_eq!(
        keys_with_prefix(db.store(), "1_2_R_"),
        ["1_2_R_0_x", "1_2_R_2_x"]
    );
    assert_eq!(records(&db.recordlist_key("books", "isbn", b"x").expect("query")), held);

    assert!(db.remove_record_from_field_value("books", "isbn", b"x", 64).expect("remove"));
    assert_eq!(directory(&db, b"x").expect("directory").get(&1), None);
    assert!(!db.remove_record_from_field_value("books", "isbn", b"x", 64).expect("remove"));
}

#[test]
fn test_file_records_under_replaces_value() {
    let mut db = new_test_database(&books_spec());
    put(&mut db, 70);
    let mut set = db.recordlist_nil("books").expect("nil");
    for record in [3, 5, 8, 13, 21, 34, 55, 69] {
        set.insert(record);
    }
    db.file_records_under("books", "author", b"fib", &set)
        .expect("file");
    assert_eq!(
        records(&db.recordlist_key("books", "author", b"fib").expect("query")),
        records(&set)
    );
    let values = db
        .find_values("books", "author", &crate::query::ValueSpec::default())
        .expect("find")
        .collect::<Result<Vec<_>, _>>()
        .expect("values");
    assert_eq!(values, [b"fib".to_vec()]);

    let mut smaller = db.recordlist_nil("books").expect("nil");
    smaller.insert(1);
    db.file_records_under("books", "author", b"fib", &smaller)
        .expect("file");
    assert_eq!(records(&db.recordlist_key("books", "author", b"fib").expect("query")), [1]);

    assert!(db.unfile_records_under("books", "author", b"fib").expect("unfile"));
    assert!(db.recordlist_all("books", "author").expect("all").is_empty());
}
