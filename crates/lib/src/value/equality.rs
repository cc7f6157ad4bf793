//! Structural equality and hashing.
//!
//! Both ignore representation: a mutable container equals an immutable one
//! with the same content, integers equal floats of the same numeric value,
//! and dates equal strings of the same text. Traversal of mutable containers
//! carries a guard so cyclic structures terminate.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use super::{
    ArrayRef, DictRef, ImmutableArray, ImmutableDictionary, MutableArray, MutableDictionary,
    Value,
};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_DICT: u8 = 6;
const TAG_REVISIT: u8 = 7;

/// Exact integer value of `f`, if it has one in `i64` range.
fn integral(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

enum Items<'a> {
    Shared(&'a [Value]),
    Owned(Vec<Value>),
}

impl Items<'_> {
    fn of(array: &ArrayRef) -> Items<'_> {
        match array {
            ArrayRef::Immutable(array) => Items::Shared(array.items()),
            ArrayRef::Mutable(array) => Items::Owned(array.snapshot()),
        }
    }

    fn as_slice(&self) -> &[Value] {
        match self {
            Items::Shared(items) => items,
            Items::Owned(items) => items,
        }
    }
}

enum Entries<'a> {
    Shared(&'a BTreeMap<String, Value>),
    Owned(Vec<(String, Value)>),
}

impl Entries<'_> {
    fn of(dict: &DictRef) -> Entries<'_> {
        match dict {
            DictRef::Immutable(dict) => Entries::Shared(dict.entries()),
            DictRef::Mutable(dict) => Entries::Owned(dict.snapshot()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Entries::Shared(map) => map.len(),
            Entries::Owned(entries) => entries.len(),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&String, &Value)> + '_> {
        match self {
            Entries::Shared(map) => Box::new(map.iter()),
            Entries::Owned(entries) => Box::new(entries.iter().map(|(k, v)| (k, v))),
        }
    }
}

fn mutable_id(value: &Value) -> Option<usize> {
    super::container_id(value)
}

fn values_equal(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
            integral(*f) == Some(*i)
        }
        (Value::String(x) | Value::Date(x), Value::String(y) | Value::Date(y)) => x == y,
        (Value::Blob(x), Value::Blob(y)) => x == y,
        (Value::Array(_), Value::Array(_)) | (Value::Dictionary(_), Value::Dictionary(_)) => {
            let pair = match (mutable_id(a), mutable_id(b)) {
                (Some(x), Some(y)) if x == y => return true,
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            };
            if let Some(pair) = pair {
                if seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
            }
            let equal = match (a, b) {
                (Value::Array(x), Value::Array(y)) => arrays_equal(x, y, seen),
                (Value::Dictionary(x), Value::Dictionary(y)) => dicts_equal(x, y, seen),
                _ => false,
            };
            if pair.is_some() {
                seen.pop();
            }
            equal
        }
        _ => false,
    }
}

fn arrays_equal(a: &ArrayRef, b: &ArrayRef, seen: &mut Vec<(usize, usize)>) -> bool {
    if let (ArrayRef::Immutable(x), ArrayRef::Immutable(y)) = (a, b)
        && x.same_snapshot(y)
    {
        return true;
    }
    let (a, b) = (Items::of(a), Items::of(b));
    let (a, b) = (a.as_slice(), b.as_slice());
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y, seen))
}

fn dicts_equal(a: &DictRef, b: &DictRef, seen: &mut Vec<(usize, usize)>) -> bool {
    if let (DictRef::Immutable(x), DictRef::Immutable(y)) = (a, b)
        && x.same_snapshot(y)
    {
        return true;
    }
    let (a, b) = (Entries::of(a), Entries::of(b));
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb, seen))
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H, path: &mut Vec<usize>) {
    match value {
        Value::Null => TAG_NULL.hash(state),
        Value::Bool(b) => {
            TAG_BOOL.hash(state);
            b.hash(state);
        }
        Value::Int(n) => {
            TAG_NUMBER.hash(state);
            n.hash(state);
        }
        Value::Float(f) => {
            TAG_NUMBER.hash(state);
            match integral(*f) {
                Some(n) => n.hash(state),
                None => f.to_bits().hash(state),
            }
        }
        Value::String(s) | Value::Date(s) => {
            TAG_TEXT.hash(state);
            s.hash(state);
        }
        Value::Blob(blob) => {
            TAG_BLOB.hash(state);
            blob.hash(state);
        }
        Value::Array(_) | Value::Dictionary(_) => {
            let id = mutable_id(value);
            if let Some(id) = id {
                if path.contains(&id) {
                    TAG_REVISIT.hash(state);
                    return;
                }
                path.push(id);
            }
            match value {
                Value::Array(array) => {
                    TAG_ARRAY.hash(state);
                    let items = Items::of(array);
                    let items = items.as_slice();
                    items.len().hash(state);
                    for item in items {
                        hash_value(item, state, path);
                    }
                }
                Value::Dictionary(dict) => {
                    TAG_DICT.hash(state);
                    let entries = Entries::of(dict);
                    entries.len().hash(state);
                    for (key, item) in entries.iter() {
                        key.hash(state);
                        hash_value(item, state, path);
                    }
                }
                _ => {}
            }
            if id.is_some() {
                path.pop();
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other, &mut Vec::new())
    }
}

// Non-finite floats are rejected on assignment, so stored values compare
// reflexively.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(self, state, &mut Vec::new());
    }
}

// Every container type compares through `Value` so the rules stay in one place.
macro_rules! container_eq {
    ($wrap:path; $($a:ty, $b:ty);* $(;)?) => {
        $(impl PartialEq<$b> for $a {
            fn eq(&self, other: &$b) -> bool {
                Value::from($wrap(self.clone().into())) == Value::from($wrap(other.clone().into()))
            }
        })*
    };
}

container_eq!(Value::Array;
    ArrayRef, ArrayRef;
    ImmutableArray, ImmutableArray;
    MutableArray, MutableArray;
    ImmutableArray, MutableArray;
    MutableArray, ImmutableArray;
);

container_eq!(Value::Dictionary;
    DictRef, DictRef;
    ImmutableDictionary, ImmutableDictionary;
    MutableDictionary, MutableDictionary;
    ImmutableDictionary, MutableDictionary;
    MutableDictionary, ImmutableDictionary;
);

macro_rules! container_hash {
    ($($t:ty => $wrap:path),* $(,)?) => {
        $(impl Hash for $t {
            fn hash<H: Hasher>(&self, state: &mut H) {
                Value::from($wrap(self.clone().into())).hash(state);
            }
        })*
    };
}

container_hash!(
    ArrayRef => Value::Array,
    ImmutableArray => Value::Array,
    MutableArray => Value::Array,
    DictRef => Value::Dictionary,
    ImmutableDictionary => Value::Dictionary,
    MutableDictionary => Value::Dictionary,
);
