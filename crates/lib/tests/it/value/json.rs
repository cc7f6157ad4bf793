//! Parsing and the JSON projection.

use vellum::{Blob, MutableArray, MutableDictionary, MutableDocument, ReadArray, ReadDictionary};

use crate::helpers::{save_json, setup};

#[test]
fn saved_content_round_trips() {
    let (_instance, _db, docs) = setup();
    let json = r#"{"a":[1,2.5,"three",null,true],"b":{"c":{"d":[]}},"e":""}"#;
    save_json(&docs, "doc", json);
    let stored = docs.get_document("doc").unwrap().unwrap();
    let text = stored.to_json().unwrap();

    let reparsed = MutableDictionary::from_json(&text).unwrap();
    assert_eq!(stored.content(), &reparsed);
    let expected: serde_json::Value = serde_json::from_str(json).unwrap();
    let actual: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn blob_metadata_round_trips() {
    let (_instance, _db, docs) = setup();
    let mut doc = MutableDocument::with_id("attached").unwrap();
    let list = MutableArray::new();
    list.add_value(Blob::from_bytes("image/png", vec![0u8, 1, 2]))
        .unwrap();
    doc.set_value("images", &list).unwrap();
    docs.save(&mut doc).unwrap();

    let stored = docs.get_document("attached").unwrap().unwrap();
    let text = stored.to_json().unwrap();
    let reparsed = MutableDictionary::from_json(&text).unwrap();
    let blob = reparsed
        .get_array("images")
        .unwrap()
        .get_blob(0)
        .unwrap()
        .unwrap();
    assert_eq!(blob.length(), 3);
    assert_eq!(blob.content_type().as_deref(), Some("image/png"));
    assert_eq!(stored.content(), &reparsed);
}

#[test]
fn malformed_and_mismatched_json_are_invalid_arguments() {
    assert!(
        MutableDictionary::from_json("{not json")
            .unwrap_err()
            .is_invalid_argument()
    );
    assert!(
        MutableDictionary::from_json("[1, 2]")
            .unwrap_err()
            .is_invalid_argument()
    );
    assert!(MutableArray::from_json(r#"{"a": 1}"#).is_err());
    let mut doc = MutableDocument::new();
    assert!(doc.set_json("42").unwrap_err().is_invalid_argument());
}

#[test]
fn mutable_values_have_no_json_projection() {
    let dict = MutableDictionary::from_json(r#"{"a": 1}"#).unwrap();
    assert!(dict.to_json().unwrap_err().is_illegal_state());
    assert!(MutableArray::new().to_json().unwrap_err().is_illegal_state());
    let doc = MutableDocument::new();
    assert!(doc.to_json().unwrap_err().is_illegal_state());
    // Freezing gives a value that does have one
    assert_eq!(dict.to_immutable().unwrap().to_json().unwrap(), r#"{"a":1}"#);
}

#[test]
fn display_renders_json_like_text() {
    let dict = MutableDictionary::from_json(r#"{"b": [1, "x"], "a": null}"#).unwrap();
    assert_eq!(
        vellum::Value::from(&dict).to_string(),
        r#"{"a":null,"b":[1,"x"]}"#
    );

    let array = MutableArray::new();
    array.add_value(1).unwrap();
    let wrapper = MutableDictionary::new();
    wrapper.set_array("inner", &array).unwrap();
    array.add_value(&wrapper).unwrap();
    assert_eq!(
        vellum::Value::from(&wrapper).to_string(),
        r#"{"inner":[1,{...}]}"#
    );
    assert_eq!(wrapper.get_array("inner").unwrap().get_long(0).unwrap(), 1);
}
