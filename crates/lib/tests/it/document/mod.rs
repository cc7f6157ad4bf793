//! Document lifecycle: unsaved, saved, deleted, purged.

use vellum::{ConcurrencyControl, MutableDocument, ReadDictionary};

use crate::helpers::{save_json, setup};

#[test]
fn unsaved_documents_have_no_revision() {
    let doc = MutableDocument::with_id("new").unwrap();
    assert!(doc.revision_id().is_none());
    assert_eq!(doc.sequence(), 0);
    assert!(!doc.is_deleted());
}

#[test]
fn saving_assigns_revision_and_sequence() {
    let (_instance, db, docs) = setup();
    let mut doc = save_json(&docs, "a", r#"{"v": 1}"#);
    let first = doc.revision_id().cloned().unwrap();
    assert_eq!(first.generation(), 1);
    assert_eq!(doc.sequence(), 1);

    doc.set_value("v", 2).unwrap();
    docs.save(&mut doc).unwrap();
    let second = doc.revision_id().cloned().unwrap();
    assert_eq!(second.generation(), 2);
    assert!(second > first);
    assert_eq!(doc.sequence(), 2);
    assert_eq!(db.last_sequence().unwrap(), 2);

    let read = docs.get_document("a").unwrap().unwrap();
    assert_eq!(read.revision_id(), Some(&second));
    assert_eq!(read.sequence(), 2);
    assert_eq!(read.get_long("v"), 2);
}

#[test]
fn resaving_unchanged_content_makes_a_new_revision() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "same", r#"{"v": 1}"#);
    let first = doc.revision_id().cloned().unwrap();
    let first_sequence = doc.sequence();
    docs.save(&mut doc).unwrap();
    assert_ne!(doc.revision_id(), Some(&first));
    assert!(doc.revision_id().unwrap() > &first);
    assert!(doc.sequence() > first_sequence);
}

#[test]
fn sequences_are_store_wide() {
    let (_instance, db, docs) = setup();
    let other = db.create_collection("other").unwrap();
    let a = save_json(&docs, "a", "{}");
    let b = save_json(&other, "b", "{}");
    let c = save_json(&docs, "c", "{}");
    assert!(a.sequence() < b.sequence());
    assert!(b.sequence() < c.sequence());
}

#[test]
fn delete_leaves_a_tombstone() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "gone", r#"{"keep": "me"}"#);
    docs.delete(&mut doc).unwrap();

    assert!(doc.is_deleted());
    assert_eq!(doc.get_string("keep").as_deref(), Some("me"));
    assert!(docs.get_document("gone").unwrap().is_none());
    assert_eq!(docs.count().unwrap(), 0);

    let tombstone = docs.get_document_including_deleted("gone").unwrap().unwrap();
    assert!(tombstone.is_deleted());
    assert_eq!(tombstone.count(), 0);
    assert_eq!(tombstone.revision_id(), doc.revision_id());
}

#[test]
fn deleting_twice_makes_a_new_tombstone_generation() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "twice", "{}");
    docs.delete(&mut doc).unwrap();
    let first = doc.revision_id().cloned().unwrap();
    let sequence = doc.sequence();
    docs.delete(&mut doc).unwrap();
    assert!(doc.revision_id().unwrap() > &first);
    assert!(doc.sequence() > sequence);
}

#[test]
fn unsaved_documents_cannot_be_deleted_or_purged() {
    let (_instance, _db, docs) = setup();
    let mut doc = MutableDocument::with_id("never").unwrap();
    assert!(docs.delete(&mut doc).unwrap_err().is_not_found());
    assert!(docs.purge(&mut doc).unwrap_err().is_not_found());
    assert!(docs.purge_by_id("never").unwrap_err().is_not_found());
}

#[test]
fn purge_removes_everything() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "p", r#"{"x": 1}"#);
    docs.purge(&mut doc).unwrap();
    assert!(doc.revision_id().is_none());
    assert!(docs.get_document_including_deleted("p").unwrap().is_none());
    assert!(docs.purge_by_id("p").unwrap_err().is_not_found());
}

#[test]
fn deleting_a_purged_document_is_not_found() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "p", "{}");
    docs.purge_by_id("p").unwrap();
    let err = docs
        .delete_with_concurrency(&mut doc, ConcurrencyControl::FailOnConflict)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn saving_after_purge_recreates_the_document() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "p", r#"{"v": 1}"#);
    docs.purge_by_id("p").unwrap();
    docs.save(&mut doc).unwrap();
    assert_eq!(doc.revision_id().unwrap().generation(), 1);
    assert!(docs.get_document("p").unwrap().is_some());
}

#[test]
fn tombstones_can_be_resurrected() {
    let (_instance, _db, docs) = setup();
    let mut original = save_json(&docs, "phoenix", "{}");
    docs.delete(&mut original).unwrap();

    let mut fresh = MutableDocument::with_json("phoenix", r#"{"again": true}"#).unwrap();
    assert!(
        docs.save_with_concurrency(&mut fresh, ConcurrencyControl::FailOnConflict)
            .unwrap()
    );
    assert!(!fresh.is_deleted());
    let read = docs.get_document("phoenix").unwrap().unwrap();
    assert!(read.get_boolean("again"));
    assert!(read.revision_id().unwrap() > original.revision_id().unwrap());
}

#[test]
fn empty_ids_are_bad_doc_ids() {
    let (_instance, _db, docs) = setup();
    assert!(MutableDocument::with_id("").unwrap_err().is_bad_doc_id());
    assert!(docs.get_document("").unwrap_err().is_bad_doc_id());
    assert!(docs.purge_by_id("").unwrap_err().is_bad_doc_id());
    assert!(
        docs.set_document_expiration("", None)
            .unwrap_err()
            .is_bad_doc_id()
    );
    assert!(docs.get_document_expiration("").unwrap_err().is_bad_doc_id());
}

#[test]
fn reads_are_independent_trees() {
    let (_instance, _db, docs) = setup();
    save_json(&docs, "shared", r#"{"inner": {"n": 1}}"#);
    let first = docs.get_document("shared").unwrap().unwrap().to_mutable();
    let second = docs.get_document("shared").unwrap().unwrap();
    first
        .get_dictionary("inner")
        .unwrap()
        .set_value("n", 2)
        .unwrap();
    assert_eq!(second.get_dictionary("inner").unwrap().get_long("n"), 1);
}

#[test]
fn failed_save_leaves_the_document_untouched() {
    let (_instance, _db, docs) = setup();
    let mut doc = save_json(&docs, "stable", "{}");
    let revision = doc.revision_id().cloned();
    let sequence = doc.sequence();
    doc.set_value("bad", f64::NAN).unwrap_err();
    let cyclic = vellum::MutableArray::new();
    let holder = vellum::MutableArray::new();
    cyclic.add_value(&holder).unwrap();
    holder.add_value(&cyclic).unwrap();
    doc.set_value("cycle", &cyclic).unwrap();

    assert!(docs.save(&mut doc).is_err());
    assert_eq!(doc.revision_id().cloned(), revision);
    assert_eq!(doc.sequence(), sequence);
}
