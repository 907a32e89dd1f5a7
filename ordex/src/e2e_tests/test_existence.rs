//! Existence bitmaps and record number reuse across segments.

use crate::storage::BackingStore;
use crate::testing::{books_spec, keys_with_prefix, new_test_database, value_string};

fn value(i: u64) -> Vec<u8> {
    format!("book {i}").into_bytes()
}

#[test]
fn test_segments_and_freed_numbers() {
    // 64 records per segment.
    let mut db = new_test_database(&books_spec());
    for i in 0..130 {
        assert_eq!(db.put_record("books", None, &value(i)).expect("put"), i);
    }
    assert_eq!(
        keys_with_prefix(db.store(), "1_0_E"),
        ["1_0_E", "1_0_E_0", "1_0_E_1", "1_0_E_2"]
    );
    assert_eq!(value_string(db.store(), "1_0_E").as_deref(), Some("[0,1,2]"));

    assert!(db.delete_record("books", 70, &value(70)).expect("delete"));
    assert_eq!(value_string(db.store(), "1_0_F").as_deref(), Some("[1]"));
    assert_eq!(db.put_record("books", None, b"again").expect("put"), 70);
    assert_eq!(db.put_record("books", None, b"next").expect("put"), 130);
    assert_eq!(value_string(db.store(), "1_0_F").as_deref(), Some("[]"));
}

#[test]
fn test_record_zero_is_not_reused() {
    let mut db = new_test_database(&books_spec());
    for i in 0..70 {
        db.put_record("books", None, &value(i)).expect("put");
    }
    assert!(db.delete_record("books", 0, &value(0)).expect("delete"));
    assert_eq!(db.put_record("books", None, b"new").expect("put"), 70);
    assert_eq!(db.count_records("books").expect("count"), 70);
    assert!(db.get_primary_record("books", 0).expect("get").is_none());
}

#[test]
fn test_deleting_the_top_record_lowers_the_frontier() {
    let mut db = new_test_database(&books_spec());
    for i in 0..3 {
        db.put_record("books", None, &value(i)).expect("put");
    }
    assert!(db.delete_record("books", 2, &value(2)).expect("delete"));
    assert_eq!(db.high_record("books").expect("high"), Some(1));
    assert!(db.store().get(b"1_0_F").expect("get").is_none());
    assert_eq!(db.put_record("books", None, b"top").expect("put"), 2);
}

#[test]
fn test_explicit_record_numbers() {
    let mut db = new_test_database(&books_spec());
    db.put_record("books", Some(500), b"far").expect("put");
    assert_eq!(db.high_record("books").expect("high"), Some(500));
    assert_eq!(db.count_records("books").expect("count"), 1);
    assert_eq!(
        keys_with_prefix(db.store(), "1_0_E_"),
        ["1_0_E_7"]
    );
    assert_eq!(db.put_record("books", None, b"after").expect("put"), 501);

    let mut cursor = db.primary_cursor("books").expect("cursor");
    assert_eq!(cursor.first().expect("first"), Some((500, b"far".to_vec())));
    assert_eq!(cursor.next().expect("next"), Some((501, b"after".to_vec())));
    assert_eq!(cursor.next().expect("next"), None);
}

#[test]
fn test_explicit_record_below_a_gap() {
    let mut db = new_test_database(&books_spec());
    db.put_record("books", Some(500), b"far").expect("put");
    assert_eq!(db.put_record("books", Some(3), b"near").expect("put"), 3);
    assert_eq!(
        keys_with_prefix(db.store(), "1_0_E_"),
        ["1_0_E_0", "1_0_E_7"]
    );
    assert_eq!(value_string(db.store(), "1_0_E").as_deref(), Some("[0,7]"));
    assert_eq!(db.count_records("books").expect("count"), 2);
    assert_eq!(
        db.recordlist_ebm("books").expect("ebm").iter().collect::<Vec<_>>(),
        [3, 500]
    );
    assert_eq!(db.put_record("books", None, b"next").expect("put"), 501);
}

#[test]
fn test_allocation_after_deleting_the_only_far_record() {
    let mut db = new_test_database(&books_spec());
    db.put_record("books", Some(500), b"far").expect("put");
    assert!(db.delete_record("books", 500, b"far").expect("delete"));
    assert_eq!(db.high_record("books").expect("high"), None);

    assert_eq!(db.put_record("books", None, b"first").expect("put"), 0);
    assert_eq!(db.put_record("books", None, b"second").expect("put"), 1);
    assert_eq!(value_string(db.store(), "1_0_E").as_deref(), Some("[0,7]"));
    assert_eq!(db.count_records("books").expect("count"), 2);
}
