//! Keyed containers.
//!
//! [`MutableDictionary`] layers a sparse overlay of per-key edits over an
//! [`ImmutableDictionary`] snapshot. Lookups check the overlay first and
//! fall through to the snapshot; freezing merges the two so that untouched
//! entries keep sharing storage.

use std::collections::{BTreeMap, btree_map};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use parking_lot::Mutex;
use serde::Serialize;

use super::{
    ArrayRef, MutableArray, ReadDictionary, Value, ValueError, freeze, json,
    prepare_for_assignment, shares_storage,
};
use crate::{Result, blob::Blob};

/// Read-only dictionary backed by a shared snapshot.
#[derive(Clone, Default)]
pub struct ImmutableDictionary {
    entries: Arc<BTreeMap<String, Value>>,
}

impl ImmutableDictionary {
    pub(crate) fn from_entries(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// The immutable array at `key`, if present and an array.
    pub fn get_array(&self, key: &str) -> Option<super::ImmutableArray> {
        match self.entries.get(key) {
            Some(Value::Array(ArrayRef::Immutable(array))) => Some(array.clone()),
            _ => None,
        }
    }

    /// The immutable dictionary at `key`, if present and a dictionary.
    pub fn get_dictionary(&self, key: &str) -> Option<ImmutableDictionary> {
        match self.entries.get(key) {
            Some(Value::Dictionary(DictRef::Immutable(dict))) => Some(dict.clone()),
            _ => None,
        }
    }

    /// Canonical JSON text of this dictionary.
    pub fn to_json(&self) -> Result<String> {
        Ok(json::encode_dictionary(self)?.to_string())
    }

    /// A mutable copy-on-write view over this snapshot.
    pub fn to_mutable(&self) -> MutableDictionary {
        MutableDictionary::over(self.clone())
    }

    /// Returns true if both dictionaries are backed by the same snapshot.
    pub fn same_snapshot(&self, other: &ImmutableDictionary) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    pub(crate) fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }
}

impl ReadDictionary for ImmutableDictionary {
    fn count(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn get_value(&self, key: &str) -> Value {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        (*self.entries).clone()
    }
}

impl<'a> IntoIterator for &'a ImmutableDictionary {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for ImmutableDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[derive(Clone)]
enum Slot {
    Value(Value),
    Removed,
}

#[derive(Default)]
struct DictState {
    base: Option<ImmutableDictionary>,
    overlay: BTreeMap<String, Slot>,
    count: usize,
    mutations: u64,
}

impl DictState {
    fn lookup(&self, key: &str) -> Option<&Value> {
        match self.overlay.get(key) {
            Some(Slot::Value(value)) => Some(value),
            Some(Slot::Removed) => None,
            None => self.base.as_ref().and_then(|base| base.entries.get(key)),
        }
    }

    fn put(&mut self, key: String, slot: Slot) {
        let present = self.lookup(&key).is_some();
        match (&slot, present) {
            (Slot::Value(_), false) => self.count += 1,
            (Slot::Removed, true) => self.count -= 1,
            _ => {}
        }
        if matches!(slot, Slot::Removed)
            && !self
                .base
                .as_ref()
                .is_some_and(|base| base.entries.contains_key(&key))
        {
            // Nothing underneath to mask
            self.overlay.remove(&key);
        } else {
            self.overlay.insert(key, slot);
        }
        self.mutations += 1;
    }

    fn get_promoted(&mut self, key: &str) -> Value {
        let promoted: Value = match self.lookup(key) {
            None => return Value::Null,
            Some(Value::Array(ArrayRef::Immutable(array))) => array.to_mutable().into(),
            Some(Value::Dictionary(DictRef::Immutable(dict))) => dict.to_mutable().into(),
            Some(other) => return other.clone(),
        };
        // Recorded without counting as a write
        self.overlay
            .insert(key.to_owned(), Slot::Value(promoted.clone()));
        promoted
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match &self.base {
            Some(base) => base
                .entries
                .keys()
                .filter(|key| !self.overlay.contains_key(*key))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        keys.extend(
            self.overlay
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Value(_)))
                .map(|(key, _)| key.clone()),
        );
        keys.sort_unstable();
        keys
    }

    fn raw_entries(&self) -> Vec<(String, Value)> {
        let mut merged: BTreeMap<&String, &Value> = self
            .base
            .as_ref()
            .map(|base| base.entries.iter().collect())
            .unwrap_or_default();
        for (key, slot) in &self.overlay {
            match slot {
                Slot::Value(value) => {
                    merged.insert(key, value);
                }
                Slot::Removed => {
                    merged.remove(key);
                }
            }
        }
        merged
            .into_iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Editable dictionary handle.
///
/// Clones are aliases of one instance. Writing null keeps the key;
/// [`remove`](MutableDictionary::remove) is the only way to drop one.
///
/// ```
/// use vellum::value::{MutableDictionary, ReadDictionary};
///
/// let dict = MutableDictionary::new();
/// dict.set_value("address", MutableDictionary::new()).unwrap();
/// let address = dict.get_dictionary("address").unwrap();
/// address.set_string("city", "Lisbon").unwrap();
///
/// let address = dict.get_dictionary("address").unwrap();
/// assert_eq!(address.get_string("city").as_deref(), Some("Lisbon"));
/// ```
#[derive(Clone)]
pub struct MutableDictionary {
    inner: Arc<Mutex<DictState>>,
}

impl MutableDictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::with_state(DictState::default())
    }

    /// Parse JSON text holding an object.
    pub fn from_json(text: &str) -> Result<Self> {
        let parsed = json::parse_text(text, "object")?;
        match json::mutable_from_json(parsed) {
            Value::Dictionary(DictRef::Mutable(dict)) => Ok(dict),
            // An object carrying blob metadata parses as a blob
            other => Err(ValueError::UnexpectedJsonShape {
                expected: "object",
                actual: other.type_name(),
            }
            .into()),
        }
    }

    pub(crate) fn over(base: ImmutableDictionary) -> Self {
        let count = base.entries.len();
        Self::with_state(DictState {
            base: Some(base),
            count,
            ..DictState::default()
        })
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let overlay: BTreeMap<String, Slot> = entries
            .into_iter()
            .map(|(key, value)| (key, Slot::Value(value)))
            .collect();
        Self::with_state(DictState {
            count: overlay.len(),
            overlay,
            ..DictState::default()
        })
    }

    fn with_state(state: DictState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Store `value` at `key`. Null is stored, not treated as removal.
    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let value = prepare_for_assignment(value.into(), self.instance_id())?;
        self.inner.lock().put(key.into(), Slot::Value(value));
        Ok(())
    }

    pub fn set_string(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.set_value(key, Value::String(value.into()))
    }

    pub fn set_int(&self, key: impl Into<String>, value: i32) -> Result<()> {
        self.set_value(key, value)
    }

    pub fn set_long(&self, key: impl Into<String>, value: i64) -> Result<()> {
        self.set_value(key, value)
    }

    pub fn set_float(&self, key: impl Into<String>, value: f32) -> Result<()> {
        self.set_value(key, value)
    }

    pub fn set_double(&self, key: impl Into<String>, value: f64) -> Result<()> {
        self.set_value(key, value)
    }

    pub fn set_boolean(&self, key: impl Into<String>, value: bool) -> Result<()> {
        self.set_value(key, value)
    }

    /// Store a date in its canonical UTC text form.
    pub fn set_date<Tz: TimeZone>(&self, key: impl Into<String>, at: &DateTime<Tz>) -> Result<()> {
        self.set_value(key, Value::date(at))
    }

    pub fn set_blob(&self, key: impl Into<String>, blob: Blob) -> Result<()> {
        self.set_value(key, blob)
    }

    pub fn set_array(&self, key: impl Into<String>, array: impl Into<ArrayRef>) -> Result<()> {
        self.set_value(key, Value::Array(array.into()))
    }

    pub fn set_dictionary(&self, key: impl Into<String>, dict: impl Into<DictRef>) -> Result<()> {
        self.set_value(key, Value::Dictionary(dict.into()))
    }

    /// Store any serde-serializable value at `key`.
    ///
    /// Fails with [`ValueError::UnsupportedType`] when the value has no JSON
    /// projection, e.g. a map with non-string keys.
    pub fn set_data<T: Serialize + ?Sized>(&self, key: impl Into<String>, data: &T) -> Result<()> {
        self.set_value(key, json::serialize_data(data)?)
    }

    /// Remove `key`; returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.inner.lock();
        if state.lookup(key).is_none() {
            return false;
        }
        state.put(key.to_owned(), Slot::Removed);
        true
    }

    /// Remove every key.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.base = None;
        state.overlay.clear();
        state.count = 0;
        state.mutations += 1;
    }

    /// The array at `key` as a mutable handle attached to this dictionary.
    pub fn get_array(&self, key: &str) -> Option<MutableArray> {
        match self.get_value(key) {
            Value::Array(ArrayRef::Mutable(array)) => Some(array),
            _ => None,
        }
    }

    /// The dictionary at `key` as a mutable handle attached to this one.
    pub fn get_dictionary(&self, key: &str) -> Option<MutableDictionary> {
        match self.get_value(key) {
            Value::Dictionary(DictRef::Mutable(dict)) => Some(dict),
            _ => None,
        }
    }

    /// Iterate over a snapshot of the entries in key order.
    pub fn iter(&self) -> btree_map::IntoIter<String, Value> {
        self.to_map().into_iter()
    }

    /// Returns true once any write has been applied to this instance.
    pub fn is_changed(&self) -> bool {
        self.inner.lock().mutations > 0
    }

    /// Freeze the current content.
    pub fn to_immutable(&self) -> Result<ImmutableDictionary> {
        Ok(self.freeze_guarded(&mut Vec::new())?)
    }

    /// Always fails: mutable content has no saved JSON projection.
    pub fn to_json(&self) -> Result<String> {
        Err(ValueError::NotSaved {
            what: "mutable dictionary",
        }
        .into())
    }

    /// Returns true if both handles refer to the same instance.
    pub fn same_instance(&self, other: &MutableDictionary) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// The stored entries in key order, without promotion.
    pub(crate) fn snapshot(&self) -> Vec<(String, Value)> {
        self.inner.lock().raw_entries()
    }

    /// A new instance holding the current entries, nested handles shared.
    pub(crate) fn copy(&self) -> MutableDictionary {
        let state = self.inner.lock();
        Self::with_state(DictState {
            base: state.base.clone(),
            overlay: state.overlay.clone(),
            count: state.count,
            mutations: state.mutations,
        })
    }

    pub(crate) fn freeze_guarded(
        &self,
        path: &mut Vec<usize>,
    ) -> std::result::Result<ImmutableDictionary, ValueError> {
        let id = self.instance_id();
        if path.contains(&id) {
            return Err(ValueError::CycleDetected);
        }
        let (base, overlay, untouched) = {
            let state = self.inner.lock();
            (
                state.base.clone(),
                state.overlay.clone(),
                state.mutations == 0,
            )
        };
        if overlay.is_empty() {
            return Ok(base.unwrap_or_default());
        }

        path.push(id);
        let frozen = freeze_overlay(&overlay, path);
        path.pop();
        let frozen = frozen?;

        if let Some(base) = &base
            && untouched
            && frozen.iter().all(|(key, slot)| match (slot, base.entries.get(key)) {
                (Some(after), Some(before)) => shares_storage(before, after),
                _ => false,
            })
        {
            return Ok(base.clone());
        }

        let mut entries = base.map(|b| (*b.entries).clone()).unwrap_or_default();
        for (key, slot) in frozen {
            match slot {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(ImmutableDictionary::from_entries(entries))
    }
}

fn freeze_overlay(
    overlay: &BTreeMap<String, Slot>,
    path: &mut Vec<usize>,
) -> std::result::Result<Vec<(String, Option<Value>)>, ValueError> {
    overlay
        .iter()
        .map(|(key, slot)| {
            let frozen = match slot {
                Slot::Value(value) => Some(freeze(value, path)?),
                Slot::Removed => None,
            };
            Ok((key.clone(), frozen))
        })
        .collect()
}

impl Default for MutableDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadDictionary for MutableDictionary {
    fn count(&self) -> usize {
        self.inner.lock().count
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.lock().lookup(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.lock().keys()
    }

    fn get_value(&self, key: &str) -> Value {
        self.inner.lock().get_promoted(key)
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        let mut state = self.inner.lock();
        state
            .keys()
            .into_iter()
            .map(|key| {
                let value = state.get_promoted(&key);
                (key, value)
            })
            .collect()
    }
}

impl fmt::Debug for MutableDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableDictionary")
            .field("id", &self.instance_id())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// A dictionary in either form.
#[derive(Debug, Clone)]
pub enum DictRef {
    /// Shared read-only snapshot
    Immutable(ImmutableDictionary),
    /// Editable handle
    Mutable(MutableDictionary),
}

impl DictRef {
    /// Returns true for the mutable form.
    pub fn is_mutable(&self) -> bool {
        matches!(self, DictRef::Mutable(_))
    }

    /// The dictionary as a mutable handle; immutable ones get a fresh overlay.
    pub fn to_mutable(&self) -> MutableDictionary {
        match self {
            DictRef::Immutable(dict) => dict.to_mutable(),
            DictRef::Mutable(dict) => dict.clone(),
        }
    }
}

impl ReadDictionary for DictRef {
    fn count(&self) -> usize {
        match self {
            DictRef::Immutable(dict) => dict.count(),
            DictRef::Mutable(dict) => dict.count(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        match self {
            DictRef::Immutable(dict) => dict.contains(key),
            DictRef::Mutable(dict) => dict.contains(key),
        }
    }

    fn keys(&self) -> Vec<String> {
        match self {
            DictRef::Immutable(dict) => dict.keys(),
            DictRef::Mutable(dict) => dict.keys(),
        }
    }

    fn get_value(&self, key: &str) -> Value {
        match self {
            DictRef::Immutable(dict) => dict.get_value(key),
            DictRef::Mutable(dict) => dict.get_value(key),
        }
    }
}

impl From<ImmutableDictionary> for DictRef {
    fn from(dict: ImmutableDictionary) -> Self {
        DictRef::Immutable(dict)
    }
}

impl From<MutableDictionary> for DictRef {
    fn from(dict: MutableDictionary) -> Self {
        DictRef::Mutable(dict)
    }
}

impl From<&MutableDictionary> for DictRef {
    fn from(dict: &MutableDictionary) -> Self {
        DictRef::Mutable(dict.clone())
    }
}
