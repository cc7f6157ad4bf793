//! Conversion between values and `serde_json` trees.
//!
//! Encoding only accepts frozen trees (mutable input is frozen first, which
//! is where cycles are caught). Decoding a stored body yields immutable
//! containers; parsing application JSON yields mutable ones. In both
//! directions an object tagged `"@type": "blob"` with a string digest is
//! blob metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Number as JsonNumber, Value as Json};

use super::{
    ArrayRef, DictRef, ImmutableArray, ImmutableDictionary, MutableArray, MutableDictionary,
    Value, ValueError, container_id,
};
use crate::{
    Result,
    blob::{Blob, BlobSource, is_blob_metadata},
    constants::{BLOB_CONTENT_TYPE_KEY, BLOB_DIGEST_KEY, BLOB_LENGTH_KEY, BLOB_TYPE, BLOB_TYPE_KEY},
};

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Parse `text`, requiring a top-level `"array"` or `"object"`.
pub(crate) fn parse_text(text: &str, expected: &'static str) -> std::result::Result<Json, ValueError> {
    let parsed: Json =
        serde_json::from_str(text).map_err(|source| ValueError::MalformedJson { source })?;
    let actual = json_kind(&parsed);
    if actual != expected {
        return Err(ValueError::UnexpectedJsonShape { expected, actual });
    }
    Ok(parsed)
}

/// Project any serializable value into a mutable value tree.
pub(crate) fn serialize_data<T: Serialize + ?Sized>(data: &T) -> std::result::Result<Value, ValueError> {
    serde_json::to_value(data)
        .map(mutable_from_json)
        .map_err(|err| ValueError::UnsupportedType {
            reason: err.to_string(),
        })
}

fn number(json: &JsonNumber) -> Value {
    match json.as_i64() {
        Some(n) => Value::Int(n),
        None => json.as_f64().map_or(Value::Null, Value::Float),
    }
}

fn blob_from_metadata(object: &Map<String, Json>, source: Option<&Arc<dyn BlobSource>>) -> Value {
    let text = |key: &str| object.get(key).and_then(Json::as_str).map(str::to_owned);
    Value::Blob(Blob::from_metadata(
        text(BLOB_DIGEST_KEY).unwrap_or_default(),
        object.get(BLOB_LENGTH_KEY).and_then(Json::as_u64).unwrap_or(0),
        text(BLOB_CONTENT_TYPE_KEY),
        source.cloned(),
    ))
}

/// Application JSON to a mutable value tree.
pub(crate) fn mutable_from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => number(&n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => {
            MutableArray::from_values(items.into_iter().map(mutable_from_json).collect()).into()
        }
        Json::Object(object) if is_blob_metadata(&object) => blob_from_metadata(&object, None),
        Json::Object(object) => MutableDictionary::from_entries(
            object
                .into_iter()
                .map(|(key, value)| (key, mutable_from_json(value))),
        )
        .into(),
    }
}

/// Stored JSON to an immutable value tree, blobs bound to `source`.
pub(crate) fn decode(json: &Json, source: Option<&Arc<dyn BlobSource>>) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => number(n),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => ImmutableArray::from_items(
            items.iter().map(|item| decode(item, source)).collect(),
        )
        .into(),
        Json::Object(object) if is_blob_metadata(object) => blob_from_metadata(object, source),
        Json::Object(object) => decode_object(object, source).into(),
    }
}

pub(crate) fn decode_object(
    object: &Map<String, Json>,
    source: Option<&Arc<dyn BlobSource>>,
) -> ImmutableDictionary {
    ImmutableDictionary::from_entries(
        object
            .iter()
            .map(|(key, value)| (key.clone(), decode(value, source)))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub(crate) fn encode_value(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(f) => JsonNumber::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| ValueError::UnsupportedType {
                reason: format!("non-finite float {f}"),
            })?,
        Value::String(s) | Value::Date(s) => Json::String(s.clone()),
        Value::Blob(blob) => Json::Object(blob.properties()?),
        Value::Array(ArrayRef::Immutable(array)) => encode_array(array)?,
        Value::Array(ArrayRef::Mutable(array)) => encode_array(&array.to_immutable()?)?,
        Value::Dictionary(DictRef::Immutable(dict)) => encode_dictionary(dict)?,
        Value::Dictionary(DictRef::Mutable(dict)) => encode_dictionary(&dict.to_immutable()?)?,
    })
}

pub(crate) fn encode_array(array: &ImmutableArray) -> Result<Json> {
    array
        .iter()
        .map(encode_value)
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

pub(crate) fn encode_dictionary(dict: &ImmutableDictionary) -> Result<Json> {
    let mut object = Map::new();
    for (key, value) in dict.iter() {
        object.insert(key.clone(), encode_value(value)?);
    }
    Ok(Json::Object(object))
}

/// Human-readable JSON-like rendering that never fails.
///
/// Unsaved blobs render without a digest and a container met again while
/// rendering itself renders as `[...]` or `{...}`.
pub(crate) fn display_string(value: &Value) -> String {
    let mut out = String::new();
    render(value, &mut out, &mut Vec::new());
    out
}

fn render(value: &Value, out: &mut String, path: &mut Vec<usize>) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(f) => match JsonNumber::from_f64(*f) {
            Some(n) => out.push_str(&n.to_string()),
            None => out.push_str(&f.to_string()),
        },
        Value::String(s) | Value::Date(s) => out.push_str(&Json::String(s.clone()).to_string()),
        Value::Blob(blob) => match blob.properties() {
            Ok(properties) => out.push_str(&Json::Object(properties).to_string()),
            Err(_) => {
                let mut properties = Map::new();
                properties.insert(BLOB_TYPE_KEY.into(), BLOB_TYPE.into());
                properties.insert(BLOB_LENGTH_KEY.into(), blob.length().into());
                out.push_str(&Json::Object(properties).to_string());
            }
        },
        Value::Array(_) | Value::Dictionary(_) => {
            let id = container_id(value);
            if let Some(id) = id {
                if path.contains(&id) {
                    out.push_str(if matches!(value, Value::Array(_)) { "[...]" } else { "{...}" });
                    return;
                }
                path.push(id);
            }
            match value {
                Value::Array(array) => {
                    let items = match array {
                        ArrayRef::Immutable(array) => array.items().to_vec(),
                        ArrayRef::Mutable(array) => array.snapshot(),
                    };
                    out.push('[');
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        render(item, out, path);
                    }
                    out.push(']');
                }
                Value::Dictionary(dict) => {
                    let entries: Vec<(String, Value)> = match dict {
                        DictRef::Immutable(dict) => dict
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                        DictRef::Mutable(dict) => dict.snapshot(),
                    };
                    out.push('{');
                    for (i, (key, item)) in entries.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(&Json::String(key.clone()).to_string());
                        out.push(':');
                        render(item, out, path);
                    }
                    out.push('}');
                }
                _ => {}
            }
            if id.is_some() {
                path.pop();
            }
        }
    }
}
