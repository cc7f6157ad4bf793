//! Total coercions from a stored [`Value`] to each accessor type.
//!
//! | stored | string | number | int/long | float/double | boolean |
//! |---|---|---|---|---|---|
//! | null/absent | None | None | 0 | 0.0 | false |
//! | bool | None | 0 or 1 | 0 or 1 | 0.0 or 1.0 | itself |
//! | string | itself | None | 0 | 0.0 | non-empty |
//! | int/float | None | itself | truncated | itself | non-zero |
//! | date | itself | None | 0 | 0.0 | true |
//! | array/dict/blob | None | None | 0 | 0.0 | true |
//!
//! Narrowing never fails: `i64 -> i32` keeps the low 32 bits, floats
//! truncate toward zero and saturate at the integer bounds.

use chrono::{DateTime, Utc};

use super::{ArrayRef, DictRef, Number, Value};
use crate::blob::Blob;

impl Value {
    /// Text of a string or date; None for everything else.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of numbers and booleans.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            _ => None,
        }
    }

    /// 64-bit integer view; 0 when not numeric.
    pub fn as_long(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Float(f) => *f as i64,
            Value::Bool(b) => i64::from(*b),
            _ => 0,
        }
    }

    /// 32-bit integer view; 0 when not numeric.
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(n) => *n as i32,
            Value::Float(f) => *f as i32,
            Value::Bool(b) => i32::from(*b),
            _ => 0,
        }
    }

    /// Double view; 0.0 when not numeric.
    pub fn as_double(&self) -> f64 {
        match self {
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Bool(b) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    /// Single-precision view; 0.0 when not numeric.
    pub fn as_float(&self) -> f32 {
        match self {
            Value::Int(n) => *n as f32,
            Value::Float(f) => *f as f32,
            Value::Bool(b) => f32::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    /// Truthiness: null and false are false, numbers are true unless zero,
    /// strings are true unless empty, everything else is true.
    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Date(_) | Value::Blob(_) | Value::Array(_) | Value::Dictionary(_) => true,
        }
    }

    /// Date parsed from string or date text; None when absent or unparsable.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        self.as_string()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    /// The blob, if this is one.
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// The array, in whichever form it is stored.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// The dictionary, in whichever form it is stored.
    pub fn as_dictionary(&self) -> Option<&DictRef> {
        match self {
            Value::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }
}
