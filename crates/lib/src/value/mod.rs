//! Document values and containers.
//!
//! Every piece of document content is a [`Value`]: a closed tagged union of
//! scalars, dates, blobs and the two container kinds. Containers come in two
//! forms:
//!
//! - **Immutable** ([`ImmutableArray`], [`ImmutableDictionary`]): decoded from
//!   a persisted body, backed by an `Arc` snapshot, `Send + Sync`, never mutated.
//! - **Mutable** ([`MutableArray`], [`MutableDictionary`]): cheap-to-clone
//!   handles over a copy-on-write overlay. Clones alias the same instance.
//!
//! Reads through either form go through the coercion functions in
//! [`coerce`], so `get_long` on a boolean, or `get_string` on a number, has one
//! well-defined answer.
//!
//! ```
//! use vellum::value::{MutableDictionary, ReadDictionary};
//!
//! let dict = MutableDictionary::new();
//! dict.set_value("name", "Alice").unwrap();
//! dict.set_value("age", 30).unwrap();
//! dict.set_value("nickname", ()).unwrap();
//!
//! assert_eq!(dict.get_string("name").as_deref(), Some("Alice"));
//! assert_eq!(dict.get_double("age"), 30.0);
//! assert!(dict.contains("nickname"));
//! assert_eq!(dict.get_string("nickname"), None);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::blob::Blob;

pub mod array;
pub mod coerce;
pub mod dictionary;
mod equality;
pub mod errors;
pub(crate) mod json;
pub mod traits;

pub use array::{ArrayRef, ImmutableArray, MutableArray};
pub use dictionary::{DictRef, ImmutableDictionary, MutableDictionary};
pub use errors::ValueError;
pub use traits::{ReadArray, ReadDictionary};

/// Values that can be stored in documents.
///
/// # Value Types
///
/// ## Scalars
/// - [`Value::Null`] - explicit null; also the result of reading an absent key
/// - [`Value::Bool`], [`Value::Int`], [`Value::Float`]
/// - [`Value::String`] - UTF-8 text
/// - [`Value::Date`] - canonical ISO-8601 text; persisted as a plain string
///
/// ## References and containers
/// - [`Value::Blob`] - content-addressed binary payload
/// - [`Value::Array`], [`Value::Dictionary`] - either container form
///
/// Equality is structural: a mutable and an immutable container with the same
/// contents are equal, `Int(1) == Float(1.0)`, and a date equals the string
/// holding the same text.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Null/absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text
    String(String),
    /// ISO-8601 date text
    Date(String),
    /// Binary payload reference
    Blob(Blob),
    /// Ordered collection
    Array(ArrayRef),
    /// Keyed collection
    Dictionary(DictRef),
}

/// A numeric value as returned by `get_number`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
}

impl Number {
    /// The number as an `f64`.
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(n) => *n as f64,
            Number::Float(f) => *f,
        }
    }

    /// The number as an `i64`, truncating floats toward zero.
    pub fn as_i64(&self) -> i64 {
        match self {
            Number::Int(n) => *n,
            Number::Float(f) => *f as i64,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

impl Value {
    /// Returns the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Blob(_) => "blob",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dictionary",
        }
    }

    /// Returns true if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this is an array or a dictionary
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Dictionary(_))
    }

    /// Creates a date value from any timezone-aware datetime.
    ///
    /// The value holds the canonical UTC form with millisecond precision,
    /// e.g. `2017-01-01T00:00:00.000Z`.
    pub fn date<Tz: TimeZone>(at: &DateTime<Tz>) -> Value {
        Value::Date(canonical_date(&at.with_timezone(&Utc)))
    }

    /// Computes the stable 64-bit hash used for hashed collections.
    pub fn hash_code(&self) -> u64 {
        use std::hash::{DefaultHasher, Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Formats a datetime in the canonical stored date form.
pub fn canonical_date(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Identity of a mutable container instance, used for cycle guards.
pub(crate) fn container_id(value: &Value) -> Option<usize> {
    match value {
        Value::Array(ArrayRef::Mutable(array)) => Some(array.instance_id()),
        Value::Dictionary(DictRef::Mutable(dict)) => Some(dict.instance_id()),
        _ => None,
    }
}

/// Readies a value for storage inside the mutable container `owner`.
///
/// Immutable containers are adopted as the snapshot of a fresh mutable
/// overlay, a container assigned into itself is replaced by a copy of its
/// current content, and unrepresentable values are rejected.
pub(crate) fn prepare_for_assignment(value: Value, owner: usize) -> Result<Value, ValueError> {
    validate(&value, &mut Vec::new())?;
    Ok(match value {
        Value::Array(ArrayRef::Immutable(array)) => {
            Value::Array(ArrayRef::Mutable(MutableArray::over(array)))
        }
        Value::Dictionary(DictRef::Immutable(dict)) => {
            Value::Dictionary(DictRef::Mutable(MutableDictionary::over(dict)))
        }
        Value::Array(ArrayRef::Mutable(array)) if array.instance_id() == owner => {
            Value::Array(ArrayRef::Mutable(array.copy()))
        }
        Value::Dictionary(DictRef::Mutable(dict)) if dict.instance_id() == owner => {
            Value::Dictionary(DictRef::Mutable(dict.copy()))
        }
        other => other,
    })
}

/// Freezes `value` into its immutable form.
///
/// `path` holds the mutable containers currently being frozen; meeting one of
/// them again means the tree reaches itself.
pub(crate) fn freeze(value: &Value, path: &mut Vec<usize>) -> Result<Value, ValueError> {
    Ok(match value {
        Value::Array(ArrayRef::Mutable(array)) => array.freeze_guarded(path)?.into(),
        Value::Dictionary(DictRef::Mutable(dict)) => dict.freeze_guarded(path)?.into(),
        Value::Float(f) if !f.is_finite() => {
            return Err(ValueError::UnsupportedType {
                reason: format!("non-finite float {f}"),
            });
        }
        other => other.clone(),
    })
}

/// Whether a frozen child is still the value its snapshot held.
///
/// Only meaningful for positions that received no direct write, where
/// scalars are unchanged by construction.
pub(crate) fn shares_storage(before: &Value, after: &Value) -> bool {
    match (before, after) {
        (Value::Array(ArrayRef::Immutable(a)), Value::Array(ArrayRef::Immutable(b))) => {
            a.same_snapshot(b)
        }
        (Value::Dictionary(DictRef::Immutable(a)), Value::Dictionary(DictRef::Immutable(b))) => {
            a.same_snapshot(b)
        }
        (a, b) => !a.is_container() && !b.is_container(),
    }
}

fn validate(value: &Value, seen: &mut Vec<usize>) -> Result<(), ValueError> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(ValueError::UnsupportedType {
            reason: format!("non-finite float {f}"),
        }),
        Value::Array(ArrayRef::Mutable(array)) => {
            let id = array.instance_id();
            if seen.contains(&id) {
                return Ok(());
            }
            seen.push(id);
            for item in array.snapshot() {
                validate(&item, seen)?;
            }
            Ok(())
        }
        Value::Dictionary(DictRef::Mutable(dict)) => {
            let id = dict.instance_id();
            if seen.contains(&id) {
                return Ok(());
            }
            seen.push(id);
            for (_, item) in dict.snapshot() {
                validate(&item, seen)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&json::display_string(self))
    }
}

// Convenient From implementations for common types
impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::Int(value as i64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize, u8, u16, u32);

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        // Values above i64::MAX only fit in a double
        i64::try_from(value).map_or(Value::Float(value as f64), Value::Int)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::from(value as u64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(value: DateTime<Tz>) -> Self {
        Value::date(&value)
    }
}

impl From<Blob> for Value {
    fn from(value: Blob) -> Self {
        Value::Blob(value)
    }
}

impl From<ArrayRef> for Value {
    fn from(value: ArrayRef) -> Self {
        Value::Array(value)
    }
}

impl From<ImmutableArray> for Value {
    fn from(value: ImmutableArray) -> Self {
        Value::Array(ArrayRef::Immutable(value))
    }
}

impl From<MutableArray> for Value {
    fn from(value: MutableArray) -> Self {
        Value::Array(ArrayRef::Mutable(value))
    }
}

impl From<&MutableArray> for Value {
    fn from(value: &MutableArray) -> Self {
        Value::Array(ArrayRef::Mutable(value.clone()))
    }
}

impl From<DictRef> for Value {
    fn from(value: DictRef) -> Self {
        Value::Dictionary(value)
    }
}

impl From<ImmutableDictionary> for Value {
    fn from(value: ImmutableDictionary) -> Self {
        Value::Dictionary(DictRef::Immutable(value))
    }
}

impl From<MutableDictionary> for Value {
    fn from(value: MutableDictionary) -> Self {
        Value::Dictionary(DictRef::Mutable(value))
    }
}

impl From<&MutableDictionary> for Value {
    fn from(value: &MutableDictionary) -> Self {
        Value::Dictionary(DictRef::Mutable(value.clone()))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        MutableArray::from_values(value.into_iter().map(Into::into).collect()).into()
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(value: BTreeMap<String, T>) -> Self {
        MutableDictionary::from_entries(value.into_iter().map(|(k, v)| (k, v.into()))).into()
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(value: HashMap<String, T>) -> Self {
        MutableDictionary::from_entries(value.into_iter().map(|(k, v)| (k, v.into()))).into()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        json::mutable_from_json(value)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        MutableArray::from_values(iter.into_iter().collect()).into()
    }
}
