//! Conflicts between writers on different handles.

use vellum::{ConcurrencyControl, MutableDocument, ReadDictionary};

use crate::helpers::{save_json, setup};

/// Saves `id` once and returns two stale-able copies read through
/// different handles of one instance.
fn two_copies(id: &str) -> (vellum::Collection, MutableDocument, vellum::Collection, MutableDocument) {
    let (instance, _db, docs) = setup();
    save_json(&docs, id, r#"{"writer": "original"}"#);
    let other = instance
        .open_database()
        .unwrap()
        .default_collection()
        .unwrap();
    let a = docs.get_document(id).unwrap().unwrap().to_mutable();
    let b = other.get_document(id).unwrap().unwrap().to_mutable();
    (docs, a, other, b)
}

#[test]
fn fail_on_conflict_keeps_the_winner() {
    let (docs_a, mut a, docs_b, mut b) = two_copies("race");
    a.set_value("writer", "a").unwrap();
    docs_a.save(&mut a).unwrap();

    b.set_value("writer", "b").unwrap();
    let stale_revision = b.revision_id().cloned();
    let saved = docs_b
        .save_with_concurrency(&mut b, ConcurrencyControl::FailOnConflict)
        .unwrap();
    assert!(!saved);
    assert_eq!(b.revision_id().cloned(), stale_revision);
    assert_eq!(b.get_string("writer").as_deref(), Some("b"));

    let stored = docs_b.get_document("race").unwrap().unwrap();
    assert_eq!(stored.get_string("writer").as_deref(), Some("a"));
    assert_eq!(stored.revision_id(), a.revision_id());
}

#[test]
fn last_write_wins_replaces_the_winner() {
    let (docs_a, mut a, docs_b, mut b) = two_copies("race");
    a.set_value("writer", "a").unwrap();
    a.set_value("only_a", true).unwrap();
    docs_a.save(&mut a).unwrap();

    b.set_value("writer", "b").unwrap();
    assert!(
        docs_b
            .save_with_concurrency(&mut b, ConcurrencyControl::LastWriteWins)
            .unwrap()
    );
    assert!(b.revision_id().unwrap() > a.revision_id().unwrap());
    assert!(b.sequence() > a.sequence());

    let stored = docs_a.get_document("race").unwrap().unwrap();
    assert_eq!(stored.get_string("writer").as_deref(), Some("b"));
    // The losing revision's content is replaced, not merged
    assert!(!stored.contains("only_a"));
    assert_eq!(stored.revision_id(), b.revision_id());
}

#[test]
fn conflicting_delete_under_fail_on_conflict_is_dropped() {
    let (docs_a, mut a, docs_b, mut b) = two_copies("victim");
    a.set_value("writer", "a").unwrap();
    docs_a.save(&mut a).unwrap();

    assert!(
        !docs_b
            .delete_with_concurrency(&mut b, ConcurrencyControl::FailOnConflict)
            .unwrap()
    );
    assert!(!b.is_deleted());
    let stored = docs_a.get_document("victim").unwrap().unwrap();
    assert_eq!(stored.revision_id(), a.revision_id());
}

#[test]
fn conflicting_delete_under_last_write_wins_deletes() {
    let (docs_a, mut a, docs_b, mut b) = two_copies("victim");
    docs_a.save(&mut a).unwrap();
    docs_b.delete(&mut b).unwrap();
    assert!(b.is_deleted());
    assert!(docs_a.get_document("victim").unwrap().is_none());
}

#[test]
fn save_over_a_remote_delete() {
    let (docs_a, mut a, docs_b, mut b) = two_copies("zombie");
    docs_a.delete(&mut a).unwrap();

    b.set_value("writer", "b").unwrap();
    assert!(
        !docs_b
            .save_with_concurrency(&mut b, ConcurrencyControl::FailOnConflict)
            .unwrap()
    );
    assert!(docs_b.get_document("zombie").unwrap().is_none());

    docs_b.save(&mut b).unwrap();
    let stored = docs_a.get_document("zombie").unwrap().unwrap();
    assert_eq!(stored.get_string("writer").as_deref(), Some("b"));
}

#[test]
fn documents_stay_with_their_handle() {
    let (docs_a, mut a, docs_b, _b) = two_copies("owned");
    let err = docs_b.save(&mut a).unwrap_err();
    assert!(err.is_invalid_parameter());
    assert!(docs_b.delete(&mut a).unwrap_err().is_invalid_parameter());
    assert!(docs_b.purge(&mut a).unwrap_err().is_invalid_parameter());

    let elsewhere = docs_a.database().create_collection("elsewhere").unwrap();
    assert!(elsewhere.save(&mut a).unwrap_err().is_invalid_parameter());
    docs_a.save(&mut a).unwrap();
}

#[test]
fn concurrent_writers_on_threads_all_land() {
    let (instance, _db, docs) = setup();
    save_json(&docs, "counter", r#"{"n": 0}"#);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let instance = instance.clone();
            std::thread::spawn(move || {
                let docs = instance
                    .open_database()
                    .unwrap()
                    .default_collection()
                    .unwrap();
                for _ in 0..10 {
                    let mut doc = docs.get_document("counter").unwrap().unwrap().to_mutable();
                    doc.set_value("writer", i).unwrap();
                    docs.save(&mut doc).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = docs.get_document("counter").unwrap().unwrap();
    assert_eq!(stored.sequence(), 41);
    assert_eq!(stored.revision_id().unwrap().generation(), 41);
}
