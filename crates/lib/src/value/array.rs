//! Ordered containers.
//!
//! [`ImmutableArray`] is a shared snapshot of decoded items. [`MutableArray`]
//! is a handle over that snapshot plus a lazily materialised item vector: the
//! snapshot is only copied (shallowly, children stay shared) on the first
//! write or on the first promotion of a container child.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::{
    DictRef, ImmutableDictionary, MutableDictionary, ReadArray, Value, ValueError, freeze, json,
    prepare_for_assignment, shares_storage,
};
use crate::Result;

fn out_of_bounds(index: usize, count: usize) -> ValueError {
    ValueError::IndexOutOfBounds { index, count }
}

/// Read-only array backed by a shared snapshot.
///
/// Cloning is a reference count bump. Instances are only produced by decoding
/// a stored body or by freezing a [`MutableArray`], so every nested container
/// is itself immutable.
#[derive(Clone, Default)]
pub struct ImmutableArray {
    items: Arc<[Value]>,
}

impl ImmutableArray {
    pub(crate) fn from_items(items: Vec<Value>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Iterate over the items in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    /// The immutable array at `index`, if that item is an array.
    pub fn get_array(&self, index: usize) -> Result<Option<ImmutableArray>> {
        Ok(match self.item(index)? {
            Value::Array(super::ArrayRef::Immutable(array)) => Some(array.clone()),
            _ => None,
        })
    }

    /// The immutable dictionary at `index`, if that item is a dictionary.
    pub fn get_dictionary(&self, index: usize) -> Result<Option<ImmutableDictionary>> {
        Ok(match self.item(index)? {
            Value::Dictionary(DictRef::Immutable(dict)) => Some(dict.clone()),
            _ => None,
        })
    }

    /// Canonical JSON text of this array.
    pub fn to_json(&self) -> Result<String> {
        Ok(json::encode_array(self)?.to_string())
    }

    /// A mutable copy-on-write view over this snapshot.
    pub fn to_mutable(&self) -> MutableArray {
        MutableArray::over(self.clone())
    }

    /// Returns true if both arrays are backed by the same snapshot.
    pub fn same_snapshot(&self, other: &ImmutableArray) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }

    pub(crate) fn items(&self) -> &[Value] {
        &self.items
    }

    fn item(&self, index: usize) -> std::result::Result<&Value, ValueError> {
        self.items
            .get(index)
            .ok_or_else(|| out_of_bounds(index, self.items.len()))
    }
}

impl ReadArray for ImmutableArray {
    fn count(&self) -> usize {
        self.items.len()
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        Ok(self.item(index)?.clone())
    }

    fn to_vec(&self) -> Vec<Value> {
        self.items.to_vec()
    }
}

impl<'a> IntoIterator for &'a ImmutableArray {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for ImmutableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

struct ArrayState {
    base: Option<ImmutableArray>,
    /// Working copy of the items, allocated on first write or promotion.
    items: Option<Vec<Value>>,
    mutations: u64,
}

impl ArrayState {
    fn count(&self) -> usize {
        match (&self.items, &self.base) {
            (Some(items), _) => items.len(),
            (None, Some(base)) => base.items.len(),
            (None, None) => 0,
        }
    }

    fn materialize(&mut self) -> &mut Vec<Value> {
        let base = &self.base;
        self.items
            .get_or_insert_with(|| base.as_ref().map(|b| b.items.to_vec()).unwrap_or_default())
    }

    /// Replace an immutable container child with a mutable overlay so that
    /// edits through the returned handle are visible through this array.
    fn promote(&mut self, index: usize) -> Value {
        let items = self.materialize();
        let promoted = match &items[index] {
            Value::Array(super::ArrayRef::Immutable(array)) => Some(array.to_mutable().into()),
            Value::Dictionary(DictRef::Immutable(dict)) => Some(dict.to_mutable().into()),
            _ => None,
        };
        if let Some(promoted) = promoted {
            items[index] = promoted;
        }
        items[index].clone()
    }

    fn needs_promotion(&self, index: usize) -> bool {
        let item = match (&self.items, &self.base) {
            (Some(items), _) => &items[index],
            (None, Some(base)) => &base.items[index],
            (None, None) => return false,
        };
        matches!(
            item,
            Value::Array(super::ArrayRef::Immutable(_))
                | Value::Dictionary(DictRef::Immutable(_))
        )
    }

    fn raw(&self, index: usize) -> Value {
        match (&self.items, &self.base) {
            (Some(items), _) => items[index].clone(),
            (None, Some(base)) => base.items[index].clone(),
            (None, None) => Value::Null,
        }
    }
}

/// Editable array handle.
///
/// Clones are aliases: every clone reads and writes the same instance.
/// Reading a container item returns a mutable handle that stays attached to
/// this array until the item is replaced or removed.
///
/// ```
/// use vellum::value::{MutableArray, ReadArray};
///
/// let array = MutableArray::new();
/// array.add_value("a").unwrap();
/// array.add_value(2).unwrap();
/// array.insert_value(0, true).unwrap();
///
/// assert_eq!(array.count(), 3);
/// assert!(array.get_boolean(0).unwrap());
/// assert_eq!(array.get_long(2).unwrap(), 2);
/// assert!(array.get_value(3).is_err());
/// ```
#[derive(Clone)]
pub struct MutableArray {
    inner: Arc<Mutex<ArrayState>>,
}

impl MutableArray {
    /// Create an empty array.
    pub fn new() -> Self {
        Self::with_state(ArrayState {
            base: None,
            items: Some(Vec::new()),
            mutations: 0,
        })
    }

    /// Parse JSON text holding an array.
    pub fn from_json(text: &str) -> Result<Self> {
        let parsed = json::parse_text(text, "array")?;
        match json::mutable_from_json(parsed) {
            Value::Array(super::ArrayRef::Mutable(array)) => Ok(array),
            other => Err(ValueError::UnexpectedJsonShape {
                expected: "array",
                actual: other.type_name(),
            }
            .into()),
        }
    }

    pub(crate) fn over(base: ImmutableArray) -> Self {
        Self::with_state(ArrayState {
            base: Some(base),
            items: None,
            mutations: 0,
        })
    }

    pub(crate) fn from_values(items: Vec<Value>) -> Self {
        Self::with_state(ArrayState {
            base: None,
            items: Some(items),
            mutations: 0,
        })
    }

    fn with_state(state: ArrayState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Append a value.
    pub fn add_value(&self, value: impl Into<Value>) -> Result<()> {
        let value = prepare_for_assignment(value.into(), self.instance_id())?;
        let mut state = self.inner.lock();
        state.materialize().push(value);
        state.mutations += 1;
        Ok(())
    }

    /// Replace the item at `index`; fails unless `index < count`.
    pub fn set_value(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = prepare_for_assignment(value.into(), self.instance_id())?;
        let mut state = self.inner.lock();
        let count = state.count();
        if index >= count {
            return Err(out_of_bounds(index, count).into());
        }
        state.materialize()[index] = value;
        state.mutations += 1;
        Ok(())
    }

    /// Insert before `index`; `index == count` appends.
    pub fn insert_value(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = prepare_for_assignment(value.into(), self.instance_id())?;
        let mut state = self.inner.lock();
        let count = state.count();
        if index > count {
            return Err(out_of_bounds(index, count).into());
        }
        state.materialize().insert(index, value);
        state.mutations += 1;
        Ok(())
    }

    /// Store any serde-serializable value at `index`.
    pub fn set_data<T: Serialize + ?Sized>(&self, index: usize, data: &T) -> Result<()> {
        self.set_value(index, json::serialize_data(data)?)
    }

    /// Remove the item at `index`, shifting later items down.
    pub fn remove(&self, index: usize) -> Result<()> {
        let mut state = self.inner.lock();
        let count = state.count();
        if index >= count {
            return Err(out_of_bounds(index, count).into());
        }
        state.materialize().remove(index);
        state.mutations += 1;
        Ok(())
    }

    /// Remove every item.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.items = Some(Vec::new());
        state.mutations += 1;
    }

    /// The array at `index` as a mutable handle attached to this array.
    pub fn get_array(&self, index: usize) -> Result<Option<MutableArray>> {
        Ok(match self.get_value(index)? {
            Value::Array(super::ArrayRef::Mutable(array)) => Some(array),
            _ => None,
        })
    }

    /// The dictionary at `index` as a mutable handle attached to this array.
    pub fn get_dictionary(&self, index: usize) -> Result<Option<MutableDictionary>> {
        Ok(match self.get_value(index)? {
            Value::Dictionary(DictRef::Mutable(dict)) => Some(dict),
            _ => None,
        })
    }

    /// Iterate over a snapshot of the items, container items promoted.
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    /// Returns true once any write has been applied to this instance.
    pub fn is_changed(&self) -> bool {
        self.inner.lock().mutations > 0
    }

    /// Freeze the current content.
    ///
    /// Items that were never written keep sharing storage with the snapshot
    /// this array was created over. Fails with
    /// [`ValueError::CycleDetected`] if the array reaches itself.
    pub fn to_immutable(&self) -> Result<ImmutableArray> {
        Ok(self.freeze_guarded(&mut Vec::new())?)
    }

    /// Always fails: mutable content has no saved JSON projection.
    pub fn to_json(&self) -> Result<String> {
        Err(ValueError::NotSaved {
            what: "mutable array",
        }
        .into())
    }

    /// Returns true if both handles refer to the same instance.
    pub fn same_instance(&self, other: &MutableArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// The stored items without promotion.
    pub(crate) fn snapshot(&self) -> Vec<Value> {
        let state = self.inner.lock();
        match (&state.items, &state.base) {
            (Some(items), _) => items.clone(),
            (None, Some(base)) => base.items.to_vec(),
            (None, None) => Vec::new(),
        }
    }

    /// A new instance holding the current items, nested handles shared.
    pub(crate) fn copy(&self) -> MutableArray {
        let state = self.inner.lock();
        Self::with_state(ArrayState {
            base: state.base.clone(),
            items: state.items.clone(),
            mutations: state.mutations,
        })
    }

    pub(crate) fn freeze_guarded(
        &self,
        path: &mut Vec<usize>,
    ) -> std::result::Result<ImmutableArray, ValueError> {
        let id = self.instance_id();
        if path.contains(&id) {
            return Err(ValueError::CycleDetected);
        }
        let (base, items, untouched) = {
            let state = self.inner.lock();
            (state.base.clone(), state.items.clone(), state.mutations == 0)
        };
        let Some(items) = items else {
            return Ok(base.unwrap_or_default());
        };

        path.push(id);
        let frozen: std::result::Result<Vec<Value>, ValueError> =
            items.iter().map(|item| freeze(item, path)).collect();
        path.pop();
        let frozen = frozen?;

        if let Some(base) = base.filter(|_| untouched)
            && base.items.len() == frozen.len()
            && base.items.iter().zip(&frozen).all(|(a, b)| shares_storage(a, b))
        {
            return Ok(base);
        }
        Ok(ImmutableArray::from_items(frozen))
    }
}

impl Default for MutableArray {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadArray for MutableArray {
    fn count(&self) -> usize {
        self.inner.lock().count()
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        let mut state = self.inner.lock();
        let count = state.count();
        if index >= count {
            return Err(out_of_bounds(index, count).into());
        }
        if state.needs_promotion(index) {
            Ok(state.promote(index))
        } else {
            Ok(state.raw(index))
        }
    }

    fn to_vec(&self) -> Vec<Value> {
        let mut state = self.inner.lock();
        (0..state.count())
            .map(|index| {
                if state.needs_promotion(index) {
                    state.promote(index)
                } else {
                    state.raw(index)
                }
            })
            .collect()
    }
}

impl fmt::Debug for MutableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents may be cyclic
        f.debug_struct("MutableArray")
            .field("id", &self.instance_id())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// An array in either form.
#[derive(Debug, Clone)]
pub enum ArrayRef {
    /// Shared read-only snapshot
    Immutable(ImmutableArray),
    /// Editable handle
    Mutable(MutableArray),
}

impl ArrayRef {
    /// Returns true for the mutable form.
    pub fn is_mutable(&self) -> bool {
        matches!(self, ArrayRef::Mutable(_))
    }

    /// The array as a mutable handle; immutable arrays get a fresh overlay.
    pub fn to_mutable(&self) -> MutableArray {
        match self {
            ArrayRef::Immutable(array) => array.to_mutable(),
            ArrayRef::Mutable(array) => array.clone(),
        }
    }
}

impl ReadArray for ArrayRef {
    fn count(&self) -> usize {
        match self {
            ArrayRef::Immutable(array) => array.count(),
            ArrayRef::Mutable(array) => array.count(),
        }
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        match self {
            ArrayRef::Immutable(array) => array.get_value(index),
            ArrayRef::Mutable(array) => array.get_value(index),
        }
    }

    fn to_vec(&self) -> Vec<Value> {
        match self {
            ArrayRef::Immutable(array) => array.to_vec(),
            ArrayRef::Mutable(array) => array.to_vec(),
        }
    }
}

impl From<ImmutableArray> for ArrayRef {
    fn from(array: ImmutableArray) -> Self {
        ArrayRef::Immutable(array)
    }
}

impl From<MutableArray> for ArrayRef {
    fn from(array: MutableArray) -> Self {
        ArrayRef::Mutable(array)
    }
}

impl From<&MutableArray> for ArrayRef {
    fn from(array: &MutableArray) -> Self {
        ArrayRef::Mutable(array.clone())
    }
}
