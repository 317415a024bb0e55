//! End-to-end tests against `TicTocDb<RefStore>`.
//!
//! Exercises the concrete end-to-end scenarios and round-trip
//! properties from the project spec's Testable Properties section.

use tictoc_concurrency::{CoreError, IsolationLevel, LookupResult, TicTocConfig, TicTocDb, TxnError};
use tictoc_refstore::{RefStore, RefStoreConfig};

fn new_db() -> TicTocDb<RefStore> {
    TicTocDb::<RefStore>::create(TicTocConfig::new(RefStoreConfig)).unwrap()
}

fn lookup_value(db: &TicTocDb<RefStore>, txn: &mut tictoc_concurrency::TransactionContext, key: &[u8]) -> Option<Vec<u8>> {
    let mut out = LookupResult::new();
    db.lookup(txn, key, &mut out).unwrap();
    if out.found {
        Some(out.value)
    } else {
        None
    }
}

#[test]
fn scenario_1_insert_then_lookup_in_separate_transactions() {
    let db = new_db();
    let _guard = db.register_thread();

    let mut t1 = db.begin();
    db.insert(&mut t1, b"alpha", b"1").unwrap();
    assert_eq!(db.commit(&mut t1).map(|_| ()), Ok(()));

    let mut t2 = db.begin();
    assert_eq!(lookup_value(&db, &mut t2, b"alpha"), Some(b"1".to_vec()));
    assert_eq!(db.commit(&mut t2).map(|_| ()), Ok(()));
}

#[test]
fn scenario_2_read_then_concurrent_update_aborts_the_late_writer() {
    let db = new_db();
    let _guard = db.register_thread();

    let mut setup = db.begin();
    db.insert(&mut setup, b"x", b"v0").unwrap();
    db.commit(&mut setup).unwrap();

    // T1: begin; lookup("x") -> v0.
    let mut t1 = db.begin();
    assert_eq!(lookup_value(&db, &mut t1, b"x"), Some(b"v0".to_vec()));

    // T2: begin; update("x", +1); commit -> 0.
    let mut t2 = db.begin();
    db.update(&mut t2, b"x", b"v1").unwrap();
    assert!(db.commit(&mut t2).is_ok());

    // T1: update("x", +1); commit -> aborts (x's wts changed since our read).
    db.update(&mut t1, b"x", b"v2").unwrap();
    let result = db.commit(&mut t1);
    assert!(matches!(result, Err(TxnError::Aborted { .. })));
}

#[test]
fn scenario_3_multi_key_insert_commits_atomically() {
    let db = new_db();
    let _guard = db.register_thread();

    let mut t1 = db.begin();
    db.insert(&mut t1, b"a", b"1").unwrap();
    db.insert(&mut t1, b"b", b"2").unwrap();
    assert!(db.commit(&mut t1).is_ok());

    let mut t2 = db.begin();
    assert_eq!(lookup_value(&db, &mut t2, b"a"), Some(b"1".to_vec()));
    assert_eq!(lookup_value(&db, &mut t2, b"b"), Some(b"2".to_vec()));
    db.commit(&mut t2).unwrap();
}

#[test]
fn scenario_6_abort_discards_buffered_writes() {
    let db = new_db();
    let _guard = db.register_thread();

    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"v").unwrap();
    db.abort(&mut t1);

    let mut t2 = db.begin();
    assert_eq!(lookup_value(&db, &mut t2, b"k"), None);
    db.commit(&mut t2).unwrap();
}

#[test]
fn round_trip_insert_then_lookup_returns_value() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"hello").unwrap();
    db.commit(&mut t1).unwrap();

    let mut t2 = db.begin();
    assert_eq!(lookup_value(&db, &mut t2, b"k"), Some(b"hello".to_vec()));
    db.commit(&mut t2).unwrap();
}

#[test]
fn round_trip_delete_then_lookup_returns_not_found() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"hello").unwrap();
    db.commit(&mut t1).unwrap();

    let mut t2 = db.begin();
    db.delete(&mut t2, b"k").unwrap();
    db.commit(&mut t2).unwrap();

    let mut t3 = db.begin();
    assert_eq!(lookup_value(&db, &mut t3, b"k"), None);
    db.commit(&mut t3).unwrap();
}

#[test]
fn two_updates_in_one_transaction_merge_to_the_last_write() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"v0").unwrap();
    db.commit(&mut t1).unwrap();

    let mut t2 = db.begin();
    db.update(&mut t2, b"k", b"v1").unwrap();
    db.update(&mut t2, b"k", b"v2").unwrap();
    db.commit(&mut t2).unwrap();

    let mut t3 = db.begin();
    assert_eq!(lookup_value(&db, &mut t3, b"k"), Some(b"v2".to_vec()));
    db.commit(&mut t3).unwrap();
}

#[test]
fn read_your_own_write_within_a_transaction() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"v1").unwrap();
    assert_eq!(lookup_value(&db, &mut t1, b"k"), Some(b"v1".to_vec()));
    db.update(&mut t1, b"k", b"v2").unwrap();
    assert_eq!(lookup_value(&db, &mut t1, b"k"), Some(b"v2".to_vec()));
    db.commit(&mut t1).unwrap();
}

#[test]
fn read_only_transaction_against_steady_state_never_aborts() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut setup = db.begin();
    for i in 0..8u8 {
        db.insert(&mut setup, &[i], b"v").unwrap();
    }
    db.commit(&mut setup).unwrap();

    for _ in 0..50 {
        let mut t = db.begin();
        for i in 0..8u8 {
            let _ = lookup_value(&db, &mut t, &[i]);
        }
        assert!(db.commit(&mut t).is_ok());
    }
}

#[test]
fn write_write_conflict_exactly_one_of_two_commits() {
    let db = new_db();
    let _guard = db.register_thread();
    let mut setup = db.begin();
    db.insert(&mut setup, b"k", b"v0").unwrap();
    db.commit(&mut setup).unwrap();

    let mut t1 = db.begin();
    let mut t2 = db.begin();
    assert_eq!(lookup_value(&db, &mut t1, b"k"), Some(b"v0".to_vec()));
    assert_eq!(lookup_value(&db, &mut t2, b"k"), Some(b"v0".to_vec()));
    db.update(&mut t1, b"k", b"v1").unwrap();
    db.update(&mut t2, b"k", b"v2").unwrap();

    let r1 = db.commit(&mut t1);
    let r2 = db.commit(&mut t2);
    let commits = [r1.is_ok(), r2.is_ok()].iter().filter(|&&ok| ok).count();
    assert_eq!(commits, 1, "exactly one of the two conflicting transactions should commit");
}

#[test]
fn scenario_5_retain_all_mode_keeps_the_slot_after_the_key_is_deleted() {
    let db = TicTocDb::<RefStore>::create(TicTocConfig::new_retain_all(RefStoreConfig)).unwrap();
    let _guard = db.register_thread();

    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"v").unwrap();
    db.commit(&mut t1).unwrap();
    assert_eq!(db.cache_len(), 1);

    let mut t2 = db.begin();
    db.delete(&mut t2, b"k").unwrap();
    db.commit(&mut t2).unwrap();

    assert_eq!(
        db.cache_len(),
        1,
        "retain-all mode must not reclaim a slot after its key is deleted"
    );
}

#[test]
fn ephemeral_mode_reclaims_the_slot_once_no_transaction_references_it() {
    let db = new_db();
    let _guard = db.register_thread();

    let mut t1 = db.begin();
    db.insert(&mut t1, b"k", b"v").unwrap();
    db.commit(&mut t1).unwrap();

    assert_eq!(
        db.cache_len(),
        0,
        "ephemeral mode reclaims a slot as soon as its last referencing transaction tears down"
    );
}

#[test]
fn snapshot_isolation_is_rejected_at_create_time() {
    let mut config = TicTocConfig::new(RefStoreConfig);
    config.isol_level = IsolationLevel::Snapshot;
    let result = TicTocDb::<RefStore>::create(config);
    assert!(matches!(result, Err(CoreError::UnsupportedIsolationLevel(_))));
}

#[test]
fn snapshot_isolation_is_rejected_by_set_isolation_level() {
    let db = new_db();
    let _guard = db.register_thread();
    let result = db.set_isolation_level(IsolationLevel::Snapshot);
    assert!(matches!(result, Err(CoreError::UnsupportedIsolationLevel(_))));
}
