//! Blob storage through documents.

use std::io::{Cursor, Read};

use vellum::{Blob, MutableDocument, ReadDictionary, blob::digest_of};

use crate::helpers::{save_json, setup};

fn save_with_blob(docs: &vellum::Collection, id: &str, blob: &Blob) -> MutableDocument {
    let mut doc = MutableDocument::with_id(id).unwrap();
    doc.set_value("attachment", blob.clone()).unwrap();
    docs.save(&mut doc).unwrap();
    doc
}

#[test]
fn saving_assigns_the_digest() {
    let (_instance, _db, docs) = setup();
    let blob = Blob::from_bytes("text/plain", b"hello blob".to_vec());
    save_with_blob(&docs, "doc", &blob);

    assert_eq!(blob.digest(), Some(digest_of(b"hello blob")));
    assert!(blob.digest().unwrap().starts_with("sha256-"));
    let json: serde_json::Value = serde_json::from_str(&blob.to_json().unwrap()).unwrap();
    assert_eq!(json["@type"], "blob");
    assert_eq!(json["length"], 10);
    assert_eq!(json["content_type"], "text/plain");
}

#[test]
fn content_reads_back_through_a_new_read() {
    let (_instance, _db, docs) = setup();
    let blob = Blob::from_bytes("image/png", vec![0u8, 1, 2, 3, 255]);
    save_with_blob(&docs, "doc", &blob);

    let read = docs.get_document("doc").unwrap().unwrap();
    let stored = read.get_blob("attachment").unwrap();
    assert_eq!(stored, blob);
    assert_eq!(stored.length(), 5);
    assert_eq!(stored.content_type().as_deref(), Some("image/png"));
    assert_eq!(stored.content().unwrap(), vec![0u8, 1, 2, 3, 255]);

    let mut streamed = Vec::new();
    stored
        .content_stream()
        .unwrap()
        .read_to_end(&mut streamed)
        .unwrap();
    assert_eq!(streamed, vec![0u8, 1, 2, 3, 255]);
}

#[test]
fn stream_blobs_learn_their_length_on_save() {
    let (_instance, _db, docs) = setup();
    let content = vec![42u8; 100_000];
    let blob = Blob::from_reader("application/octet-stream", Cursor::new(content.clone()));
    assert_eq!(blob.length(), 0);

    save_with_blob(&docs, "big", &blob);
    assert_eq!(blob.length(), 100_000);
    assert_eq!(blob.digest(), Some(digest_of(&content)));

    let stored = docs
        .get_document("big")
        .unwrap()
        .unwrap()
        .get_blob("attachment")
        .unwrap();
    assert_eq!(stored.content().unwrap(), content);
}

struct BrokenPipe;

impl Read for BrokenPipe {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upload cut off"))
    }
}

#[test]
fn failed_stream_save_is_reported_on_retry() {
    let (_instance, _db, docs) = setup();
    let blob = Blob::from_reader("application/octet-stream", BrokenPipe);
    let mut doc = MutableDocument::with_id("upload").unwrap();
    doc.set_value("attachment", blob.clone()).unwrap();

    let first = docs.save(&mut doc).unwrap_err();
    assert!(first.is_io_error());
    assert!(docs.get_document("upload").unwrap().is_none());

    // The stream is gone; retrying says why instead of reporting an unsaved blob
    let retry = docs.save(&mut doc).unwrap_err();
    assert!(retry.is_io_error());
    assert!(retry.to_string().contains("upload cut off"), "{retry}");
    assert!(blob.content().unwrap_err().to_string().contains("upload cut off"));
    assert!(blob.digest().is_none());
}

#[test]
fn identical_content_is_stored_once() {
    let (instance, _db, docs) = setup();
    save_with_blob(&docs, "a", &Blob::from_bytes("text/plain", b"dup".to_vec()));
    save_with_blob(&docs, "b", &Blob::from_bytes("text/plain", b"dup".to_vec()));
    let backend = instance
        .backend()
        .as_any()
        .downcast_ref::<vellum::InMemory>()
        .unwrap();
    assert_eq!(backend.blob_count(), 1);
}

#[test]
fn reading_after_close_is_not_open() {
    let (_instance, db, docs) = setup();
    save_with_blob(&docs, "doc", &Blob::from_bytes("text/plain", b"x".to_vec()));

    let unresolved = docs
        .get_document("doc")
        .unwrap()
        .unwrap()
        .get_blob("attachment")
        .unwrap();
    let resolved = docs
        .get_document("doc")
        .unwrap()
        .unwrap()
        .get_blob("attachment")
        .unwrap();
    assert_eq!(resolved.content().unwrap(), b"x");

    db.close().unwrap();
    assert!(unresolved.content().unwrap_err().is_not_open());
    // Content already read stays available
    assert_eq!(resolved.content().unwrap(), b"x");
}

#[test]
fn metadata_without_content_is_not_found() {
    let (_instance, _db, docs) = setup();
    let digest = digest_of(b"never stored");
    let json = format!(
        r#"{{"ghost": {{"@type": "blob", "digest": "{digest}", "length": 12}}}}"#
    );
    let doc = MutableDocument::with_json("ghost", &json).unwrap();
    let ghost = doc.get_blob("ghost").unwrap();
    assert_eq!(ghost.digest(), Some(digest.clone()));
    assert!(ghost.content().unwrap_err().is_not_found());

    // Saving binds it to the store, which still lacks the bytes
    let mut doc = doc;
    docs.save(&mut doc).unwrap();
    let read = docs
        .get_document("ghost")
        .unwrap()
        .unwrap()
        .get_blob("ghost")
        .unwrap();
    assert_eq!(read.length(), 12);
    assert!(read.content().unwrap_err().is_not_found());
}

#[test]
fn metadata_blob_copied_from_another_document() {
    let (_instance, _db, docs) = setup();
    let original = Blob::from_bytes("text/plain", b"shared bytes".to_vec());
    save_with_blob(&docs, "source", &original);

    let metadata = original.to_json().unwrap();
    let mut copy = MutableDocument::with_json("copy", &format!(r#"{{"a": {metadata}}}"#)).unwrap();
    docs.save(&mut copy).unwrap();

    let read = docs.get_document("copy").unwrap().unwrap();
    assert_eq!(read.get_blob("a").unwrap().content().unwrap(), b"shared bytes");
}

#[test]
fn unsaved_blobs_have_no_json() {
    let blob = Blob::from_bytes("text/plain", b"x".to_vec());
    assert!(blob.to_json().unwrap_err().is_illegal_state());
    let doc = MutableDocument::new();
    doc.set_value("b", blob).unwrap();
    assert!(doc.to_json().is_err());
}

#[test]
fn compact_reclaims_unreferenced_blobs() {
    let (instance, db, docs) = setup();
    let kept = Blob::from_bytes("text/plain", b"kept".to_vec());
    let dropped = Blob::from_bytes("text/plain", b"dropped".to_vec());
    save_with_blob(&docs, "keep", &kept);
    let mut doc = save_with_blob(&docs, "drop", &dropped);
    let mut nested = save_json(&docs, "nested", r#"{"list": []}"#);
    nested
        .get_array("list")
        .unwrap()
        .add_value(Blob::from_bytes("text/plain", b"nested".to_vec()))
        .unwrap();
    docs.save(&mut nested).unwrap();

    assert_eq!(db.compact().unwrap(), 0);
    docs.delete(&mut doc).unwrap();
    assert_eq!(db.compact().unwrap(), 1);

    let backend = instance
        .backend()
        .as_any()
        .downcast_ref::<vellum::InMemory>()
        .unwrap();
    assert_eq!(backend.blob_count(), 2);
    let read = docs.get_document("keep").unwrap().unwrap();
    assert_eq!(read.get_blob("attachment").unwrap().content().unwrap(), b"kept");
}

#[test]
fn compact_on_closed_database_is_not_open() {
    let (_instance, db, _docs) = setup();
    db.close().unwrap();
    assert!(db.compact().unwrap_err().is_not_open());
}
