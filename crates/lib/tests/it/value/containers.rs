//! Copy-on-write containers, detachment and self-reference.

use std::collections::BTreeMap;

use serde::Serialize;
use vellum::{
    ImmutableDictionary, MutableArray, MutableDictionary, MutableDocument, ReadArray,
    ReadDictionary, Value,
};

use crate::helpers::{save_json, setup};

fn stored_profile() -> ImmutableDictionary {
    let (_instance, _db, docs) = setup();
    save_json(
        &docs,
        "profile",
        r#"{"name": "Ada", "address": {"city": "London"}, "tags": ["a", "b"]}"#,
    );
    docs.get_document("profile")
        .unwrap()
        .unwrap()
        .content()
        .clone()
}

#[test]
fn edits_do_not_touch_the_snapshot() {
    let snapshot = stored_profile();
    let dict = snapshot.to_mutable();
    dict.set_value("name", "Grace").unwrap();
    dict.get_dictionary("address")
        .unwrap()
        .set_value("city", "Arlington")
        .unwrap();

    assert_eq!(snapshot.get_string("name").as_deref(), Some("Ada"));
    assert_eq!(
        snapshot
            .get_dictionary("address")
            .unwrap()
            .get_string("city")
            .as_deref(),
        Some("London")
    );
    assert_eq!(
        dict.get_dictionary("address")
            .unwrap()
            .get_string("city")
            .as_deref(),
        Some("Arlington")
    );
}

#[test]
fn untouched_children_stay_shared() {
    let snapshot = stored_profile();
    let dict = snapshot.to_mutable();
    dict.set_value("name", "Grace").unwrap();
    let frozen = dict.to_immutable().unwrap();

    let before = snapshot.get_array("tags").unwrap();
    let after = frozen.get_array("tags").unwrap();
    assert!(before.same_snapshot(&after));
}

#[test]
fn unchanged_overlay_freezes_to_the_same_snapshot() {
    let snapshot = stored_profile();
    let dict = snapshot.to_mutable();
    // Reading promotes children without changing anything
    let _ = dict.get_dictionary("address").unwrap();
    assert!(!dict.is_changed());
    assert!(dict.to_immutable().unwrap().same_snapshot(&snapshot));
}

#[test]
fn promoted_children_write_through() {
    let dict = MutableDictionary::from_json(r#"{"inner": {"n": 1}}"#).unwrap();
    let inner = dict.get_dictionary("inner").unwrap();
    inner.set_value("n", 2).unwrap();
    assert_eq!(dict.get_dictionary("inner").unwrap().get_long("n"), 2);
    assert!(dict.get_dictionary("inner").unwrap().same_instance(&inner));
}

#[test]
fn replaced_child_is_detached() {
    let parent = MutableDictionary::new();
    let old = MutableArray::new();
    old.add_value(1).unwrap();
    parent.set_array("list", &old).unwrap();

    let replacement = MutableArray::new();
    replacement.add_value("new").unwrap();
    parent.set_array("list", &replacement).unwrap();

    old.add_value(2).unwrap();
    assert_eq!(old.count(), 2);
    let current = parent.get_array("list").unwrap();
    assert_eq!(current.count(), 1);
    assert_eq!(current.get_string(0).unwrap().as_deref(), Some("new"));
    assert_eq!(replacement.count(), 1);
}

#[test]
fn one_child_in_two_parents_is_aliased() {
    let child = MutableDictionary::new();
    let a = MutableDictionary::new();
    let b = MutableDictionary::new();
    a.set_dictionary("shared", &child).unwrap();
    b.set_dictionary("shared", &child).unwrap();

    child.set_value("k", "v").unwrap();
    assert_eq!(
        a.get_dictionary("shared").unwrap().get_string("k").as_deref(),
        Some("v")
    );
    assert_eq!(
        b.get_dictionary("shared").unwrap().get_string("k").as_deref(),
        Some("v")
    );
}

#[test]
fn self_assignment_stores_a_copy() {
    let array = MutableArray::new();
    array.add_value(1).unwrap();
    array.add_value(&array).unwrap();

    let nested = array.get_array(1).unwrap().unwrap();
    assert!(!nested.same_instance(&array));
    assert_eq!(nested.count(), 1);
    assert_eq!(array.to_immutable().unwrap().count(), 2);

    let dict = MutableDictionary::new();
    dict.set_value("me", &dict).unwrap();
    assert!(!dict.get_dictionary("me").unwrap().same_instance(&dict));
}

#[test]
fn indirect_cycles_fail_to_save() {
    let (_instance, _db, docs) = setup();
    let mut doc = MutableDocument::with_id("cyclic").unwrap();
    let a = MutableDictionary::new();
    let b = MutableDictionary::new();
    a.set_dictionary("b", &b).unwrap();
    b.set_dictionary("a", &a).unwrap();
    doc.set_value("a", &a).unwrap();

    let err = docs.save(&mut doc).unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(doc.revision_id().is_none());
    assert!(docs.get_document("cyclic").unwrap().is_none());
}

#[test]
fn null_is_not_removal() {
    let dict = MutableDictionary::from_json(r#"{"a": 1, "b": 2}"#).unwrap();
    dict.set_value("a", ()).unwrap();
    assert!(dict.contains("a"));
    assert_eq!(dict.count(), 2);
    assert_eq!(dict.get_value("a"), Value::Null);

    assert!(dict.remove("a"));
    assert!(!dict.contains("a"));
    assert_eq!(dict.count(), 1);
    assert!(!dict.remove("a"));
}

#[test]
fn array_index_rules() {
    let array = MutableArray::new();
    assert!(array.set_value(0, 1).is_err());
    array.insert_value(0, "b").unwrap();
    array.insert_value(0, "a").unwrap();
    array.insert_value(2, "c").unwrap();
    assert!(array.insert_value(4, "x").is_err());
    assert!(array.remove(3).is_err());
    array.remove(1).unwrap();

    let items: Vec<_> = array
        .iter()
        .map(|v| v.as_string().map(str::to_string))
        .collect();
    assert_eq!(items, vec![Some("a".to_string()), Some("c".to_string())]);
}

#[test]
fn immutable_values_are_adopted_into_a_fresh_overlay() {
    let snapshot = stored_profile();
    let tags = snapshot.get_array("tags").unwrap();

    let dict = MutableDictionary::new();
    dict.set_array("copied", tags.clone()).unwrap();
    let adopted = dict.get_array("copied").unwrap();
    adopted.add_value("c").unwrap();

    assert_eq!(tags.count(), 2);
    assert_eq!(dict.get_array("copied").unwrap().count(), 3);
}

#[test]
fn plain_aggregates_convert_recursively() {
    let mut map = BTreeMap::new();
    map.insert("xs".to_string(), vec![1, 2, 3]);
    let dict = MutableDictionary::new();
    dict.set_value("map", map).unwrap();
    dict.set_value("json", serde_json::json!({"nested": [true, null]}))
        .unwrap();

    let xs = dict.get_dictionary("map").unwrap().get_array("xs").unwrap();
    assert_eq!(xs.get_long(2).unwrap(), 3);
    let nested = dict
        .get_dictionary("json")
        .unwrap()
        .get_array("nested")
        .unwrap();
    assert!(nested.get_boolean(0).unwrap());
    assert_eq!(nested.get_value(1).unwrap(), Value::Null);
}

#[derive(Serialize)]
struct Point {
    x: i32,
    y: i32,
    label: Option<String>,
}

#[test]
fn set_data_writes_serializable_values() {
    let dict = MutableDictionary::new();
    dict.set_data(
        "point",
        &Point {
            x: 3,
            y: -4,
            label: None,
        },
    )
    .unwrap();
    let point = dict.get_dictionary("point").unwrap();
    assert_eq!(point.get_int("x"), 3);
    assert_eq!(point.get_int("y"), -4);
    assert!(point.contains("label"));

    let array = MutableArray::new();
    array.add_value(()).unwrap();
    array.set_data(0, &vec!["a", "b"]).unwrap();
    assert_eq!(array.get_array(0).unwrap().unwrap().count(), 2);
}

#[test]
fn unrepresentable_values_are_rejected() {
    let dict = MutableDictionary::new();
    let err = dict.set_value("nan", f64::NAN).unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(dict.set_double("inf", f64::INFINITY).is_err());
    assert!(!dict.contains("nan"));

    let mut keyed = std::collections::HashMap::new();
    keyed.insert((1, 2), "tuple key");
    assert!(dict.set_data("bad", &keyed).is_err());
}

#[test]
fn writes_mark_containers_changed() {
    let snapshot = stored_profile();
    let dict = snapshot.to_mutable();
    assert!(!dict.is_changed());
    dict.set_value("name", "Ada").unwrap();
    assert!(dict.is_changed());

    let array = MutableArray::new();
    assert!(!array.is_changed());
    array.clear();
    array.add_value(1).unwrap();
    assert!(array.is_changed());
}

#[test]
fn clear_empties_both_kinds() {
    let dict = MutableDictionary::from_json(r#"{"a": 1, "b": [1]}"#).unwrap();
    dict.clear();
    assert_eq!(dict.count(), 0);
    assert!(dict.keys().is_empty());

    let array = MutableArray::from_json("[1, 2, 3]").unwrap();
    array.clear();
    assert!(array.is_empty());
}
