//! Store failures surface as errors and leave committed data intact.

use crate::config::EngineConfig;
use crate::query::ValueSpec;
use crate::simulation::{FaultConfig, SimulatedStore};
use crate::storage::{Database, DatabaseError, StoreError};
use crate::testing::{books_spec, records};

use super::helpers::book;

fn always(read: bool, write: bool) -> FaultConfig {
    FaultConfig {
        read_error_rate: if read { 1.0 } else { 0.0 },
        write_error_rate: if write { 1.0 } else { 0.0 },
        corruption_rate: 0.0,
    }
}

#[test]
fn test_open_reports_read_failure() {
    let store = SimulatedStore::with_config(1, always(true, false));
    assert!(matches!(
        Database::open(store, &books_spec(), EngineConfig::smallest()),
        Err(DatabaseError::Store(StoreError::InjectedFault(_)))
    ));
}

#[test]
fn test_write_failure_is_reported() {
    let mut db = Database::open(SimulatedStore::new(2), &books_spec(), EngineConfig::smallest())
        .expect("open");
    db.store().set_fault_config(always(false, true));
    let error = db
        .put_instance("books", b"dune", &book("herbert", "1"))
        .expect_err("write fails");
    assert!(error.to_string().contains("simulated write error"), "{error}");
    assert!(db.store().stats().injected_write_errors > 0);
}

#[test]
fn test_backout_after_fault_restores_committed_state() {
    let mut db = Database::open(SimulatedStore::new(3), &books_spec(), EngineConfig::smallest())
        .expect("open");
    db.start_transaction().expect("begin");
    let kept = db
        .put_instance("books", b"kept", &book("le guin", "1"))
        .expect("put");
    db.commit().expect("commit");

    db.start_transaction().expect("begin");
    db.put_instance("books", b"dropped", &book("banks", "2"))
        .expect("put");
    db.store().set_fault_config(always(true, false));
    {
        let mut scan = db
            .find_values("books", "author", &ValueSpec::default())
            .expect("scan");
        assert!(matches!(scan.next(), Some(Err(DatabaseError::Tree(_)))));
    }
    db.store().set_fault_config(FaultConfig::no_faults());
    db.backout().expect("backout");

    assert_eq!(records(&db.recordlist_ebm("books").expect("ebm")), [kept]);
    let values = db
        .find_values("books", "author", &ValueSpec::default())
        .expect("find")
        .collect::<Result<Vec<_>, _>>()
        .expect("values");
    assert_eq!(values, [b"le guin".to_vec()]);
    assert!(db.recordlist_key("books", "isbn", b"2").expect("query").is_empty());
    assert!(db.store().stats().injected_read_errors > 0);
}
