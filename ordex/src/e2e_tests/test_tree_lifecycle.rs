//! Tree shape as values enter and leave an ordered field.

use crate::config::EngineConfig;
use crate::storage::btree::NodeKind;
use crate::storage::{Database, MemoryStore};
use crate::testing::{books_spec, keys_with_prefix, records};

fn open(branching_factor: usize) -> Database<MemoryStore> {
    let config = EngineConfig::new(16, branching_factor).expect("valid config");
    Database::open(MemoryStore::new(), &books_spec(), config).expect("open")
}

fn add_author(db: &mut Database<MemoryStore>, author: &str) -> u64 {
    let record = db.put_record("books", None, author.as_bytes()).expect("put");
    db.add_record_to_field_value("books", "author", author.as_bytes(), record)
        .expect("add");
    record
}

fn strings(keys: &[Vec<u8>]) -> Vec<String> {
    keys.iter()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .collect()
}

#[test]
fn test_solo_root_splits_into_two_leaves() {
    let mut db = open(5);
    for author in ["k3", "k2", "k5", "k1"] {
        add_author(&mut db, author);
    }
    let tree = db
        .file_state("books")
        .expect("file")
        .field("author")
        .expect("field")
        .tree()
        .expect("ordered")
        .clone();

    let root = tree.read_root(db.store()).expect("read").expect("root");
    assert_eq!(root.kind, NodeKind::SoloRoot);
    assert_eq!(strings(&root.keys), ["k1", "k2", "k3", "k5"]);

    add_author(&mut db, "k4");
    let root = tree.read_root(db.store()).expect("read").expect("root");
    assert_eq!(strings(&root.keys), ["k4"]);
    let children = root.children().expect("root has children").clone();
    assert_eq!(children.len(), 2);
    let left = tree.read_node(db.store(), children[0]).expect("left");
    let right = tree.read_node(db.store(), children[1]).expect("right");
    assert_eq!(strings(&left.keys), ["k1", "k2", "k3"]);
    assert_eq!(strings(&right.keys), ["k4", "k5"]);
    assert_eq!(left.right(), Some(right.number));
    assert_eq!(right.left(), Some(left.number));

    assert_eq!(
        strings(&tree.verify(db.store()).expect("verify")),
        ["k1", "k2", "k3", "k4", "k5"]
    );
}

#[test]
fn test_single_reference_reads_back_as_list() {
    let mut db = open(5);
    let first = add_author(&mut db, "austen");
    assert_eq!(records(&db.recordlist_key("books", "author", b"austen").expect("query")), [first]);
    assert!(keys_with_prefix(db.store(), "1_1_R_").is_empty());

    let second = db.put_record("books", None, b"emma").expect("put");
    db.add_record_to_field_value("books", "author", b"austen", second)
        .expect("add");
    assert_eq!(
        records(&db.recordlist_key("books", "author", b"austen").expect("query")),
        [first, second]
    );
    assert_eq!(keys_with_prefix(db.store(), "1_1_R_"), ["1_1_R_0_austen"]);
}

#[test]
fn test_last_reference_removes_value_everywhere() {
    let mut db = open(4);
    let records_of = |db: &mut Database<MemoryStore>| -> Vec<u64> {
        (0..3)
            .map(|i| {
                let record = db.put_record("books", None, format!("b{i}").as_bytes()).expect("put");
                db.add_record_to_field_value("books", "author", b"bronte", record)
                    .expect("add");
                record
            })
            .collect()
    };
    let held = records_of(&mut db);
    add_author(&mut db, "austen");
    assert_eq!(keys_with_prefix(db.store(), "1_1_S_"), ["1_1_S_austen", "1_1_S_bronte"]);
    assert_eq!(keys_with_prefix(db.store(), "1_1_R_"), ["1_1_R_0_bronte"]);

    for record in held {
        assert!(db
            .remove_record_from_field_value("books", "author", b"bronte", record)
            .expect("remove"));
    }
    assert_eq!(keys_with_prefix(db.store(), "1_1_S_"), ["1_1_S_austen"]);
    assert!(keys_with_prefix(db.store(), "1_1_R_").is_empty());
    let values = db
        .find_values("books", "author", &crate::query::ValueSpec::default())
        .expect("find")
        .collect::<Result<Vec<_>, _>>()
        .expect("values");
    assert_eq!(values, [b"austen".to_vec()]);

    assert!(db.unfile_records_under("books", "author", b"austen").expect("unfile"));
    assert!(!db.unfile_records_under("books", "author", b"austen").expect("unfile"));
    assert!(keys_with_prefix(db.store(), "1_1").is_empty());
}

#[test]
fn test_many_values_shrink_back_to_empty() {
    let mut db = open(4);
    let authors: Vec<String> = (0..120).map(|i| format!("author-{:03}", (i * 37) % 120)).collect();
    let mut held = Vec::new();
    for author in &authors {
        held.push((add_author(&mut db, author), author.clone()));
    }
    assert_eq!(db.recordlist_all("books", "author").expect("all").count(), 120);
    assert_eq!(
        db.recordlist_key_startswith("books", "author", b"author-01")
            .expect("prefix")
            .count(),
        10
    );

    for (record, author) in held.iter().rev() {
        db.remove_record_from_field_value("books", "author", author.as_bytes(), *record)
            .expect("remove");
    }
    assert!(keys_with_prefix(db.store(), "1_1").is_empty());
    assert!(db.recordlist_all("books", "author").expect("all").is_empty());
}
