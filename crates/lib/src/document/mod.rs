//! Documents: a named root dictionary plus commit metadata.
//!
//! [`Document`] is what a read returns: an immutable snapshot of one stored
//! revision. [`MutableDocument`] is what gets saved; it is created fresh or
//! from a [`Document`] via [`Document::to_mutable`], and is updated in place
//! with the new revision and sequence on every successful commit.
//!
//! ```
//! use vellum::{MutableDocument, value::ReadDictionary};
//!
//! let mut doc = MutableDocument::with_id("profile").unwrap();
//! doc.set_value("name", "Ada").unwrap();
//! assert_eq!(doc.id(), "profile");
//! assert!(doc.revision_id().is_none());
//! assert_eq!(doc.sequence(), 0);
//! assert_eq!(doc.get_string("name").as_deref(), Some("Ada"));
//! ```

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use uuid::Uuid;

use crate::{
    Result,
    value::{
        DictRef, ImmutableArray, ImmutableDictionary, MutableArray, MutableDictionary,
        ReadDictionary, Value, ValueError,
    },
};

pub mod errors;
pub mod revision;

pub use errors::DocumentError;
pub use revision::RevisionId;

/// The database handle and collection a document was read from or saved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DocumentOrigin {
    pub(crate) database_id: Uuid,
    pub(crate) collection: String,
}

/// An immutable snapshot of one stored revision.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    revision_id: Option<RevisionId>,
    sequence: u64,
    deleted: bool,
    content: ImmutableDictionary,
    origin: Option<DocumentOrigin>,
}

impl Document {
    pub(crate) fn stored(
        id: String,
        revision_id: RevisionId,
        sequence: u64,
        deleted: bool,
        content: ImmutableDictionary,
        origin: DocumentOrigin,
    ) -> Self {
        Self {
            id,
            revision_id: Some(revision_id),
            sequence,
            deleted,
            content,
            origin: Some(origin),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn revision_id(&self) -> Option<&RevisionId> {
        self.revision_id.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The root dictionary.
    pub fn content(&self) -> &ImmutableDictionary {
        &self.content
    }

    pub fn get_array(&self, key: &str) -> Option<ImmutableArray> {
        self.content.get_array(key)
    }

    pub fn get_dictionary(&self, key: &str) -> Option<ImmutableDictionary> {
        self.content.get_dictionary(key)
    }

    /// A mutable copy whose next save is conditioned on this revision.
    pub fn to_mutable(&self) -> MutableDocument {
        MutableDocument {
            id: self.id.clone(),
            revision_id: self.revision_id.clone(),
            sequence: self.sequence,
            deleted: self.deleted,
            content: self.content.to_mutable(),
            origin: self.origin.clone(),
        }
    }

    /// Canonical JSON text of the content.
    pub fn to_json(&self) -> Result<String> {
        self.content.to_json()
    }
}

impl ReadDictionary for Document {
    fn count(&self) -> usize {
        self.content.count()
    }

    fn contains(&self, key: &str) -> bool {
        self.content.contains(key)
    }

    fn keys(&self) -> Vec<String> {
        self.content.keys()
    }

    fn get_value(&self, key: &str) -> Value {
        self.content.get_value(key)
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        self.content.to_map()
    }
}

/// An editable document.
///
/// The content is a [`MutableDictionary`] handle; the metadata is updated by
/// the collection whenever a save or delete through it succeeds. A failed
/// save leaves the document exactly as it was.
#[derive(Debug)]
pub struct MutableDocument {
    id: String,
    revision_id: Option<RevisionId>,
    sequence: u64,
    deleted: bool,
    content: MutableDictionary,
    origin: Option<DocumentOrigin>,
}

impl MutableDocument {
    /// A new, empty document with a generated id.
    pub fn new() -> Self {
        Self::unsaved(Uuid::new_v4().to_string(), MutableDictionary::new())
    }

    /// A new, empty document with the given id.
    pub fn with_id(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        errors::check_id(&id)?;
        Ok(Self::unsaved(id, MutableDictionary::new()))
    }

    /// A new document with the given id and content parsed from a JSON object.
    pub fn with_json(id: impl Into<String>, json: &str) -> Result<Self> {
        let mut doc = Self::with_id(id)?;
        doc.set_json(json)?;
        Ok(doc)
    }

    fn unsaved(id: String, content: MutableDictionary) -> Self {
        Self {
            id,
            revision_id: None,
            sequence: 0,
            deleted: false,
            content,
            origin: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Revision the next save is conditioned on; None until first saved.
    pub fn revision_id(&self) -> Option<&RevisionId> {
        self.revision_id.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The root dictionary handle.
    pub fn content(&self) -> &MutableDictionary {
        &self.content
    }

    /// Replace the whole content. Immutable content is adopted as the
    /// snapshot of a fresh overlay.
    pub fn set_content(&mut self, content: impl Into<DictRef>) {
        self.content = content.into().to_mutable();
    }

    /// Replace the whole content with the object parsed from `json`.
    pub fn set_json(&mut self, json: &str) -> Result<()> {
        self.content = MutableDictionary::from_json(json)?;
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.content.set_value(key, value)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.content.remove(key)
    }

    pub fn get_array(&self, key: &str) -> Option<MutableArray> {
        self.content.get_array(key)
    }

    pub fn get_dictionary(&self, key: &str) -> Option<MutableDictionary> {
        self.content.get_dictionary(key)
    }

    /// Always fails: a mutable document has no saved JSON projection.
    pub fn to_json(&self) -> Result<String> {
        Err(ValueError::NotSaved {
            what: "mutable document",
        }
        .into())
    }

    pub(crate) fn origin(&self) -> Option<&DocumentOrigin> {
        self.origin.as_ref()
    }

    pub(crate) fn committed(
        &mut self,
        revision_id: RevisionId,
        sequence: u64,
        deleted: bool,
        origin: DocumentOrigin,
    ) {
        self.revision_id = Some(revision_id);
        self.sequence = sequence;
        self.deleted = deleted;
        self.origin = Some(origin);
    }

    pub(crate) fn purged(&mut self) {
        self.revision_id = None;
        self.sequence = 0;
        self.deleted = false;
        self.origin = None;
    }
}

impl Default for MutableDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadDictionary for MutableDocument {
    fn count(&self) -> usize {
        self.content.count()
    }

    fn contains(&self, key: &str) -> bool {
        self.content.contains(key)
    }

    fn keys(&self) -> Vec<String> {
        self.content.keys()
    }

    fn get_value(&self, key: &str) -> Value {
        self.content.get_value(key)
    }

    fn to_map(&self) -> BTreeMap<String, Value> {
        self.content.to_map()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.content == other.content
    }
}

impl PartialEq for MutableDocument {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.content == other.content
    }
}

impl PartialEq<MutableDocument> for Document {
    fn eq(&self, other: &MutableDocument) -> bool {
        self.id == other.id && self.content == other.content
    }
}

impl PartialEq<Document> for MutableDocument {
    fn eq(&self, other: &Document) -> bool {
        other == self
    }
}

impl Eq for Document {}

impl Eq for MutableDocument {}

// Both representations hash the id and the content as a dictionary value, so
// a document and its mutable copy land in the same bucket.
impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.content.hash(state);
    }
}

impl Hash for MutableDocument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.content.hash(state);
    }
}

impl Document {
    /// Computes the stable 64-bit hash of the id and content.
    pub fn hash_code(&self) -> u64 {
        document_hash_code(self)
    }
}

impl MutableDocument {
    /// Computes the stable 64-bit hash of the id and content; equal to
    /// [`Document::hash_code`] for an equal document.
    pub fn hash_code(&self) -> u64 {
        document_hash_code(self)
    }
}

fn document_hash_code(doc: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    doc.hash(&mut hasher);
    hasher.finish()
}
