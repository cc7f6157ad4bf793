//! Handle lifecycle, collections, batches and change listeners.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use vellum::{
    CollectionChange, DocumentChange, InlineExecutor, MutableDocument, ThreadExecutor,
    constants::DEFAULT_COLLECTION,
};

use crate::helpers::{save_json, setup, test_instance};

type Seen = Arc<Mutex<Vec<CollectionChange>>>;

fn record(docs: &vellum::Collection) -> (Seen, vellum::ListenerToken) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let token = docs
        .add_change_listener(Arc::new(InlineExecutor), move |change| {
            sink.lock().unwrap().push(change.clone());
        })
        .unwrap();
    (seen, token)
}

// ==========================
// LIFECYCLE
// ==========================

#[test]
fn closed_handles_reject_operations() {
    let (_instance, db, docs) = setup();
    save_json(&docs, "doc", "{}");
    db.close().unwrap();
    db.close().unwrap();

    assert!(!db.is_open());
    assert!(!docs.is_valid());
    assert!(db.default_collection().unwrap_err().is_not_open());
    assert!(docs.get_document("doc").unwrap_err().is_not_open());
    assert!(docs.count().unwrap_err().is_not_open());
    let mut doc = MutableDocument::with_id("other").unwrap();
    assert!(docs.save(&mut doc).unwrap_err().is_not_open());
    assert!(db.in_batch(|_| Ok(())).unwrap_err().is_not_open());
}

#[test]
fn other_handles_survive_a_close() {
    let (instance, db, docs) = setup();
    save_json(&docs, "doc", "{}");
    let other = instance.open_database().unwrap();
    assert_eq!(instance.open_handles(), 2);
    db.close().unwrap();
    assert_eq!(instance.open_handles(), 1);
    let read = other.default_collection().unwrap().get_document("doc").unwrap();
    assert!(read.is_some());
}

#[test]
fn dropping_a_handle_releases_it() {
    let instance = test_instance();
    {
        let _db = instance.open_database().unwrap();
        assert_eq!(instance.open_handles(), 1);
    }
    assert_eq!(instance.open_handles(), 0);
}

#[test]
fn delete_is_busy_while_other_handles_are_open() {
    let (instance, db, docs) = setup();
    save_json(&docs, "doc", "{}");
    let other = instance.open_database().unwrap();

    assert!(db.delete().unwrap_err().is_busy());
    assert!(db.is_open());

    other.close().unwrap();
    db.delete().unwrap();
    assert!(!db.is_open());
    assert!(instance.is_deleted());
    assert!(db.delete().unwrap_err().is_not_open());
}

#[test]
fn reopening_after_delete_starts_empty() {
    let (instance, db, docs) = setup();
    save_json(&docs, "doc", "{}");
    db.create_collection("extra").unwrap();
    db.delete().unwrap();

    let db = instance.open_database().unwrap();
    assert!(!instance.is_deleted());
    let docs = db.default_collection().unwrap();
    assert_eq!(docs.count().unwrap(), 0);
    assert!(db.collection("extra").unwrap().is_none());
}

#[test]
fn close_and_delete_inside_a_batch_are_rejected() {
    let (_instance, db, _docs) = setup();
    let err = db.in_batch(|db| db.close()).unwrap_err();
    assert!(err.is_transaction_not_closed());
    let err = db.in_batch(|db| db.delete()).unwrap_err();
    assert!(err.is_transaction_not_closed());
    assert!(db.is_open());
    assert!(!db.is_in_batch());
}

// ==========================
// COLLECTIONS
// ==========================

#[test]
fn collections_are_created_once() {
    let (_instance, db, _docs) = setup();
    assert!(db.collection("people").unwrap().is_none());
    let people = db.create_collection("people").unwrap();
    save_json(&people, "p1", r#"{"name": "Ada"}"#);

    let again = db.create_collection("people").unwrap();
    assert_eq!(again, people);
    assert_eq!(again.count().unwrap(), 1);
    assert_eq!(
        db.collection_names().unwrap(),
        vec![DEFAULT_COLLECTION.to_string(), "people".to_string()]
    );
    assert!(db.create_collection("").unwrap_err().is_invalid_parameter());
}

#[test]
fn documents_are_scoped_to_their_collection() {
    let (_instance, db, docs) = setup();
    let other = db.create_collection("other").unwrap();
    save_json(&docs, "same-id", r#"{"where": "default"}"#);
    save_json(&other, "same-id", r#"{"where": "other"}"#);
    assert_eq!(docs.document_ids().unwrap(), vec!["same-id".to_string()]);
    assert_eq!(other.count().unwrap(), 1);
    docs.purge_by_id("same-id").unwrap();
    assert!(other.get_document("same-id").unwrap().is_some());
}

#[test]
fn deleted_collections_are_not_open() {
    let (_instance, db, _docs) = setup();
    let temp = db.create_collection("temp").unwrap();
    save_json(&temp, "doc", "{}");
    assert!(db.delete_collection("temp").unwrap());
    assert!(!db.delete_collection("temp").unwrap());

    assert!(temp.get_document("doc").unwrap_err().is_not_open());
    let mut doc = MutableDocument::with_id("new").unwrap();
    assert!(temp.save(&mut doc).unwrap_err().is_not_open());

    let recreated = db.create_collection("temp").unwrap();
    assert_eq!(recreated.count().unwrap(), 0);
}

#[test]
fn default_collection_cannot_be_deleted() {
    let (_instance, db, docs) = setup();
    let err = db.delete_collection(DEFAULT_COLLECTION).unwrap_err();
    assert!(err.is_invalid_parameter());
    assert!(docs.is_valid());
}

// ==========================
// BATCHES
// ==========================

#[test]
fn batch_commits_every_write() {
    let (_instance, db, docs) = setup();
    let (seen, _token) = record(&docs);
    let count = db
        .in_batch(|_| {
            for id in ["a", "b", "c"] {
                docs.save(&mut MutableDocument::with_id(id)?)?;
            }
            // Nothing is delivered while the batch is open
            assert!(seen.lock().unwrap().is_empty());
            docs.count()
        })
        .unwrap();
    assert_eq!(count, 3);
    assert_eq!(docs.count().unwrap(), 3);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].doc_ids, vec!["a", "b", "c"]);
}

#[test]
fn failed_batch_rolls_back() {
    let (_instance, db, docs) = setup();
    let mut existing = save_json(&docs, "existing", r#"{"v": 1}"#);
    let sequence = existing.sequence();
    let (seen, _token) = record(&docs);

    let err = db
        .in_batch(|_| {
            docs.save(&mut MutableDocument::with_id("new")?)?;
            existing.set_value("v", 2)?;
            docs.save(&mut existing)?;
            docs.get_document("")
        })
        .unwrap_err();
    assert!(err.is_bad_doc_id());

    assert!(docs.get_document("new").unwrap().is_none());
    let stored = docs.get_document("existing").unwrap().unwrap();
    assert_eq!(vellum::ReadDictionary::get_long(&stored, "v"), 1);
    assert_eq!(stored.sequence(), sequence);
    assert!(seen.lock().unwrap().is_empty());

    // Sequences handed out inside the rolled-back batch are not reused
    let next = save_json(&docs, "after", "{}");
    assert!(next.sequence() > sequence + 2);
}

#[test]
fn nested_batches_join_the_outer_one() {
    let (_instance, db, docs) = setup();
    let result = db.in_batch(|db| {
        docs.save(&mut MutableDocument::with_id("outer")?)?;
        db.in_batch(|_| docs.save(&mut MutableDocument::with_id("inner")?))?;
        assert!(db.is_in_batch());
        Err::<(), _>(docs.get_document("").unwrap_err())
    });
    assert!(result.is_err());
    assert_eq!(docs.count().unwrap(), 0);
}

#[test]
fn batches_on_another_handle_join_the_open_one() {
    let (instance, a, docs) = setup();
    let b = instance.open_database().unwrap();
    let b_docs = b.default_collection().unwrap();
    let (seen, _token) = record(&docs);

    a.in_batch(|_| {
        docs.save(&mut MutableDocument::with_id("before")?)?;
        let inner = b.in_batch(|_| -> vellum::Result<()> {
            assert!(b.is_in_batch());
            b_docs.save(&mut MutableDocument::with_id("inner")?)?;
            Err(docs.get_document("").unwrap_err())
        });
        assert!(inner.unwrap_err().is_bad_doc_id());
        // The failed inner batch did not end the outer one
        assert!(a.is_in_batch());
        assert!(!b.is_in_batch());
        assert!(seen.lock().unwrap().is_empty());
        docs.save(&mut MutableDocument::with_id("after")?)?;
        Ok(())
    })
    .unwrap();

    for id in ["before", "inner", "after"] {
        assert!(docs.get_document(id).unwrap().is_some(), "{id} missing");
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].doc_ids, vec!["before", "inner", "after"]);
}

#[test]
fn failed_outer_batch_rolls_back_writes_from_other_handles() {
    let (instance, a, docs) = setup();
    let b = instance.open_database().unwrap();
    let b_docs = b.default_collection().unwrap();

    let result = a.in_batch(|_| {
        b.in_batch(|_| b_docs.save(&mut MutableDocument::with_id("inner")?))?;
        // A handle inside the batch cannot be closed until it ends
        assert!(a.close().unwrap_err().is_transaction_not_closed());
        Err::<(), _>(docs.get_document("").unwrap_err())
    });
    assert!(result.is_err());
    assert_eq!(docs.count().unwrap(), 0);
    assert!(!a.is_in_batch());
    assert!(!b.is_in_batch());
}

#[test]
fn panicking_batch_rolls_back_and_releases_the_handle() {
    let (instance, db, docs) = setup();
    let (seen, _token) = record(&docs);

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        db.in_batch(|db| -> vellum::Result<()> {
            docs.save(&mut MutableDocument::with_id("lost")?)?;
            db.in_batch(|_| -> vellum::Result<()> { panic!("batch closure failed") })
        })
    }));
    assert!(outcome.is_err());

    assert!(!db.is_in_batch());
    assert!(docs.get_document("lost").unwrap().is_none());
    assert!(seen.lock().unwrap().is_empty());

    // Other threads can write again, and later batches work normally
    let other = instance.open_database().unwrap().default_collection().unwrap();
    std::thread::spawn(move || {
        save_json(&other, "elsewhere", "{}");
    })
    .join()
    .unwrap();
    db.in_batch(|_| docs.save(&mut MutableDocument::with_id("kept")?))
        .unwrap();
    assert_eq!(docs.count().unwrap(), 2);
    db.close().unwrap();
}

#[test]
fn batches_exclude_writers_on_other_handles() {
    let (instance, db, docs) = setup();
    let other = instance
        .open_database()
        .unwrap()
        .default_collection()
        .unwrap();
    let (tx, rx) = std::sync::mpsc::channel();

    db.in_batch(|_| {
        docs.save(&mut MutableDocument::with_id("first")?)?;
        let writer = std::thread::spawn(move || {
            other.save(&mut MutableDocument::with_id("second").unwrap()).unwrap();
            tx.send(other.get_document("first").unwrap().is_some()).unwrap();
        });
        // The other writer is blocked until the batch ends
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        Ok((writer, rx))
    })
    .map(|(writer, rx)| {
        writer.join().unwrap();
        assert!(rx.recv().unwrap());
    })
    .unwrap();
    assert_eq!(docs.count().unwrap(), 2);
}

// ==========================
// LISTENERS
// ==========================

#[test]
fn listeners_see_their_collection_only() {
    let (_instance, db, docs) = setup();
    let other = db.create_collection("other").unwrap();
    let (seen, _token) = record(&docs);

    let mut doc = save_json(&docs, "a", "{}");
    save_json(&other, "b", "{}");
    docs.delete(&mut doc).unwrap();
    docs.purge(&mut doc).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|c| c.collection == DEFAULT_COLLECTION));
    assert!(seen.iter().all(|c| c.doc_ids == vec!["a"]));
}

#[test]
fn changes_on_other_handles_are_delivered() {
    let (instance, _db, docs) = setup();
    let (seen, _token) = record(&docs);
    let other = instance.open_database().unwrap();
    save_json(&other.default_collection().unwrap(), "remote", "{}");
    assert_eq!(seen.lock().unwrap()[0].doc_ids, vec!["remote"]);
}

#[test]
fn removed_listeners_stop_receiving() {
    let (_instance, _db, docs) = setup();
    let (seen, token) = record(&docs);
    save_json(&docs, "a", "{}");
    token.remove();
    token.remove();
    assert!(!token.is_active());
    save_json(&docs, "b", "{}");
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn closing_a_handle_removes_its_listeners() {
    let (instance, db, docs) = setup();
    let (seen, token) = record(&docs);
    db.close().unwrap();
    assert!(!token.is_active());

    let other = instance.open_database().unwrap();
    save_json(&other.default_collection().unwrap(), "a", "{}");
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn deleting_a_collection_removes_its_listeners() {
    let (_instance, db, _docs) = setup();
    let temp = db.create_collection("temp").unwrap();
    let (_seen, token) = record(&temp);
    db.delete_collection("temp").unwrap();
    assert!(!token.is_active());
}

#[test]
fn document_listeners_filter_by_id() {
    let (_instance, _db, docs) = setup();
    let seen: Arc<Mutex<Vec<DocumentChange>>> = Arc::default();
    let sink = seen.clone();
    let _token = docs
        .add_document_change_listener("watched", Arc::new(InlineExecutor), move |change| {
            sink.lock().unwrap().push(change.clone());
        })
        .unwrap();

    save_json(&docs, "ignored", "{}");
    save_json(&docs, "watched", "{}");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].doc_id, "watched");
    assert_eq!(seen[0].collection, DEFAULT_COLLECTION);
}

#[test]
fn thread_executor_delivers_in_order() {
    let (_instance, _db, docs) = setup();
    let (tx, rx) = std::sync::mpsc::channel();
    let executor = Arc::new(ThreadExecutor::new().unwrap());
    let _token = docs
        .add_change_listener(executor, move |change| {
            tx.send(change.doc_ids.clone()).unwrap();
        })
        .unwrap();
    for id in ["1", "2", "3"] {
        save_json(&docs, id, "{}");
    }
    for id in ["1", "2", "3"] {
        let ids = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ids, vec![id.to_string()]);
    }
}

#[test]
fn listeners_may_write_from_the_callback() {
    let (_instance, _db, docs) = setup();
    let writer = docs.clone();
    let _token = docs
        .add_change_listener(Arc::new(InlineExecutor), move |change| {
            if change.doc_ids.iter().any(|id| id == "trigger") {
                writer
                    .save(&mut MutableDocument::with_id("echo").unwrap())
                    .unwrap();
            }
        })
        .unwrap();
    save_json(&docs, "trigger", "{}");
    assert!(docs.get_document("echo").unwrap().is_some());
}
