//! Read accessors shared by both forms of each container.
//!
//! Implementors supply raw element access; the typed getters are provided
//! and all go through the coercions in [`coerce`](super::coerce).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{Number, Value};
use crate::{Result, blob::Blob};

/// Positional read access to an array.
///
/// Every getter fails with
/// [`ValueError::IndexOutOfBounds`](super::ValueError::IndexOutOfBounds) when
/// `index >= count()`.
pub trait ReadArray {
    /// Number of elements.
    fn count(&self) -> usize;

    /// The element at `index`.
    fn get_value(&self, index: usize) -> Result<Value>;

    /// All elements in order.
    fn to_vec(&self) -> Vec<Value>;

    /// Returns true if the array has no elements.
    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn get_string(&self, index: usize) -> Result<Option<String>> {
        Ok(self.get_value(index)?.as_string().map(str::to_owned))
    }

    fn get_number(&self, index: usize) -> Result<Option<Number>> {
        Ok(self.get_value(index)?.as_number())
    }

    fn get_int(&self, index: usize) -> Result<i32> {
        Ok(self.get_value(index)?.as_int())
    }

    fn get_long(&self, index: usize) -> Result<i64> {
        Ok(self.get_value(index)?.as_long())
    }

    fn get_float(&self, index: usize) -> Result<f32> {
        Ok(self.get_value(index)?.as_float())
    }

    fn get_double(&self, index: usize) -> Result<f64> {
        Ok(self.get_value(index)?.as_double())
    }

    fn get_boolean(&self, index: usize) -> Result<bool> {
        Ok(self.get_value(index)?.as_boolean())
    }

    fn get_date(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get_value(index)?.as_date())
    }

    fn get_blob(&self, index: usize) -> Result<Option<Blob>> {
        Ok(self.get_value(index)?.as_blob().cloned())
    }
}

/// Keyed read access to a dictionary.
///
/// Missing keys are not errors: every getter returns the absent result of
/// its type. Use [`contains`](ReadDictionary::contains) to tell an absent key
/// from one holding null.
pub trait ReadDictionary {
    /// Number of keys, including keys holding null.
    fn count(&self) -> usize;

    /// Returns true if `key` is present, even when it holds null.
    fn contains(&self, key: &str) -> bool;

    /// All keys in ascending order.
    fn keys(&self) -> Vec<String>;

    /// The value at `key`, or [`Value::Null`] when absent.
    fn get_value(&self, key: &str) -> Value;

    /// Returns true if the dictionary has no keys.
    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get_value(key).as_string().map(str::to_owned)
    }

    fn get_number(&self, key: &str) -> Option<Number> {
        self.get_value(key).as_number()
    }

    fn get_int(&self, key: &str) -> i32 {
        self.get_value(key).as_int()
    }

    fn get_long(&self, key: &str) -> i64 {
        self.get_value(key).as_long()
    }

    fn get_float(&self, key: &str) -> f32 {
        self.get_value(key).as_float()
    }

    fn get_double(&self, key: &str) -> f64 {
        self.get_value(key).as_double()
    }

    fn get_boolean(&self, key: &str) -> bool {
        self.get_value(key).as_boolean()
    }

    fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_value(key).as_date()
    }

    fn get_blob(&self, key: &str) -> Option<Blob> {
        self.get_value(key).as_blob().cloned()
    }

    /// All entries, keyed in ascending order.
    fn to_map(&self) -> BTreeMap<String, Value> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get_value(&key);
                (key, value)
            })
            .collect()
    }
}
