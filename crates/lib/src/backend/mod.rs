//! Persistence backend for Vellum documents
//!
//! This module provides the [`Backend`] trait, the storage collaborator the
//! rest of the crate talks to, and [`InMemory`], a reference implementation
//! with JSON file snapshots.
//!
//! The backend owns storage only: conflict policy, document encoding and
//! change notification all live above it. Its one piece of protocol is the
//! compare-and-swap in [`Backend::commit`], which is what optimistic
//! concurrency is built on.

use std::any::Any;
use std::io::Read;

use crate::{Result, blob::BlobKey, document::RevisionId};

pub mod errors;
pub mod in_memory;

pub use errors::BackendError;
pub use in_memory::InMemory;

/// One stored revision of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Revision id assigned at commit
    pub revision_id: RevisionId,
    /// Store-wide sequence of the commit
    pub sequence: u64,
    /// Whether this revision is a tombstone
    pub is_deleted: bool,
    /// Encoded JSON body; empty for tombstones
    pub body: Vec<u8>,
}

/// A conditional write of one document revision.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub collection: String,
    pub doc_id: String,
    /// Revision the caller's copy was derived from; None for a new document.
    pub expected_revision: Option<RevisionId>,
    pub body: Vec<u8>,
    pub is_deletion: bool,
}

/// Result of a [`Backend::commit`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write landed.
    Committed {
        revision_id: RevisionId,
        sequence: u64,
    },
    /// The stored revision differs from the expected one; nothing was written.
    Conflict {
        /// Revision currently stored, None if the document was purged
        current: Option<RevisionId>,
    },
}

/// Storage trait abstracting where documents, expiry deadlines and blobs live.
///
/// All backend implementations must be `Send` and `Sync` so an
/// [`Instance`](crate::Instance) can share one across database handles and
/// its reaper thread, and implement `Any` to allow for downcasting.
///
/// Times are milliseconds since the Unix epoch.
pub trait Backend: Send + Sync + Any {
    /// The current revision of a document, tombstones included.
    fn read(&self, collection: &str, doc_id: &str) -> Result<Option<StoredDocument>>;

    /// Write a revision if the stored one matches `expected_revision`.
    ///
    /// The write succeeds when the stored revision equals the expected one,
    /// when nothing is stored and nothing is expected, or when only a
    /// tombstone is stored and nothing is expected. Otherwise the outcome is
    /// [`CommitOutcome::Conflict`]. A deletion of a document with no stored
    /// record fails with [`BackendError::DocumentNotFound`].
    ///
    /// A successful commit gets a sequence one greater than
    /// [`last_sequence`](Backend::last_sequence) and a revision id whose
    /// parent is the revision it replaced.
    fn commit(&self, request: CommitRequest) -> Result<CommitOutcome>;

    /// Hard-remove a document and its expiry.
    fn purge(&self, collection: &str, doc_id: &str) -> Result<()>;

    /// Set or clear the expiry of a stored document.
    fn set_expiry(&self, collection: &str, doc_id: &str, expires_at: Option<u64>) -> Result<()>;

    /// The expiry of a document, None if unset or the document is unknown.
    fn get_expiry(&self, collection: &str, doc_id: &str) -> Result<Option<u64>>;

    /// Every `(collection, doc_id)` whose expiry is at or before `now`.
    fn expired(&self, now: u64) -> Result<Vec<(String, String)>>;

    /// Store blob content read from `reader`, digesting it on the way.
    fn save_blob(&self, reader: &mut dyn Read) -> Result<BlobKey>;

    fn has_blob(&self, digest: &str) -> Result<bool>;

    fn get_blob(&self, digest: &str) -> Result<Option<Vec<u8>>>;

    /// Drop blobs no live document references; returns how many were dropped.
    fn compact(&self) -> Result<usize>;

    /// Create a collection; returns false if it already existed.
    fn create_collection(&self, name: &str) -> Result<bool>;

    /// Delete a collection and everything in it; returns false if absent.
    fn delete_collection(&self, name: &str) -> Result<bool>;

    fn has_collection(&self, name: &str) -> Result<bool>;

    fn collection_names(&self) -> Result<Vec<String>>;

    /// Number of live (non-deleted) documents.
    fn document_count(&self, collection: &str) -> Result<usize>;

    /// Ids of live documents in ascending order.
    fn document_ids(&self, collection: &str) -> Result<Vec<String>>;

    /// Start a batch. Writes until the matching commit or rollback are
    /// applied as one unit.
    fn begin_batch(&self) -> Result<()>;

    fn commit_batch(&self) -> Result<()>;

    /// Discard every write since the outermost [`begin_batch`](Backend::begin_batch).
    fn rollback_batch(&self) -> Result<()>;

    /// Highest sequence assigned so far.
    fn last_sequence(&self) -> Result<u64>;

    /// Remove every collection, document and blob.
    fn clear(&self) -> Result<()>;

    /// Returns a reference to the backend instance as a dynamic `Any` type.
    fn as_any(&self) -> &dyn Any;
}
