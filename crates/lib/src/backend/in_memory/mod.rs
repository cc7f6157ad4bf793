//! In-memory backend implementation
//!
//! This module provides an in-memory implementation of the [`Backend`]
//! trait, suitable for testing, development, or embedding where durability is
//! handled by periodic snapshots to a JSON file.

mod persistence;

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::{
    Result,
    backend::{Backend, BackendError, CommitOutcome, CommitRequest, StoredDocument},
    blob::{BlobKey, read_digested, referenced_digests},
    constants::DEFAULT_COLLECTION,
    document::RevisionId,
};

#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionState {
    pub(crate) documents: BTreeMap<String, StoredDocument>,
    pub(crate) expiry: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) collections: BTreeMap<String, CollectionState>,
    pub(crate) blobs: BTreeMap<String, Vec<u8>>,
    pub(crate) last_sequence: u64,
}

impl StoreState {
    fn with_default_collection() -> Self {
        let mut state = Self::default();
        state
            .collections
            .insert(DEFAULT_COLLECTION.to_string(), CollectionState::default());
        state
    }

    fn collection(&self, name: &str) -> Result<&CollectionState> {
        self.collections.get(name).ok_or_else(|| {
            BackendError::CollectionNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut CollectionState> {
        self.collections.get_mut(name).ok_or_else(|| {
            BackendError::CollectionNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }
}

#[derive(Debug, Default)]
struct BatchState {
    depth: usize,
    snapshot: Option<StoreState>,
}

/// A simple in-memory backend using ordered maps for storage.
///
/// A fresh store holds only the default collection. Batches snapshot the
/// whole state on entry so a rollback can restore it.
#[derive(Debug)]
pub struct InMemory {
    pub(crate) state: RwLock<StoreState>,
    batch: Mutex<BatchState>,
}

impl InMemory {
    /// Creates a new, empty `InMemory` backend.
    pub fn new() -> Self {
        Self::from_state(StoreState::with_default_collection())
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
            batch: Mutex::new(BatchState::default()),
        }
    }

    /// Number of blobs currently held.
    pub fn blob_count(&self) -> usize {
        self.state.read().blobs.len()
    }

    /// Saves the entire store to a file as JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path)
    }

    /// Loads a store from a JSON file.
    ///
    /// If the file does not exist, a new, empty `InMemory` backend is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path)
    }
}

impl Default for InMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(collection: &str, doc_id: &str) -> crate::Error {
    BackendError::DocumentNotFound {
        collection: collection.to_string(),
        doc_id: doc_id.to_string(),
    }
    .into()
}

impl Backend for InMemory {
    fn read(&self, collection: &str, doc_id: &str) -> Result<Option<StoredDocument>> {
        let state = self.state.read();
        Ok(state.collection(collection)?.documents.get(doc_id).cloned())
    }

    fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        let mut state = self.state.write();
        let sequence = state.last_sequence + 1;
        let coll = state.collection_mut(&request.collection)?;
        let current = coll.documents.get(&request.doc_id);

        let accepted = match (current, &request.expected_revision) {
            (None, _) if request.is_deletion => {
                return Err(not_found(&request.collection, &request.doc_id));
            }
            (None, None) => true,
            (Some(stored), None) => stored.is_deleted,
            (Some(stored), Some(expected)) => stored.revision_id == *expected,
            (None, Some(_)) => false,
        };
        if !accepted {
            let current = current.map(|stored| stored.revision_id.clone());
            tracing::trace!(
                collection = %request.collection,
                doc_id = %request.doc_id,
                current = ?current,
                "Commit rejected: revision mismatch"
            );
            return Ok(CommitOutcome::Conflict { current });
        }

        let parent = current.map(|stored| stored.revision_id.clone());
        let revision_id = RevisionId::next(
            parent.as_ref(),
            request.is_deletion,
            sequence,
            &request.body,
        );
        coll.documents.insert(
            request.doc_id,
            StoredDocument {
                revision_id: revision_id.clone(),
                sequence,
                is_deleted: request.is_deletion,
                body: if request.is_deletion {
                    Vec::new()
                } else {
                    request.body
                },
            },
        );
        state.last_sequence = sequence;
        Ok(CommitOutcome::Committed {
            revision_id,
            sequence,
        })
    }

    fn purge(&self, collection: &str, doc_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let coll = state.collection_mut(collection)?;
        coll.expiry.remove(doc_id);
        match coll.documents.remove(doc_id) {
            Some(_) => Ok(()),
            None => Err(not_found(collection, doc_id)),
        }
    }

    fn set_expiry(&self, collection: &str, doc_id: &str, expires_at: Option<u64>) -> Result<()> {
        let mut state = self.state.write();
        let coll = state.collection_mut(collection)?;
        if !coll.documents.contains_key(doc_id) {
            return Err(not_found(collection, doc_id));
        }
        match expires_at {
            Some(at) => coll.expiry.insert(doc_id.to_string(), at),
            None => coll.expiry.remove(doc_id),
        };
        Ok(())
    }

    fn get_expiry(&self, collection: &str, doc_id: &str) -> Result<Option<u64>> {
        let state = self.state.read();
        Ok(state.collection(collection)?.expiry.get(doc_id).copied())
    }

    fn expired(&self, now: u64) -> Result<Vec<(String, String)>> {
        let state = self.state.read();
        Ok(state
            .collections
            .iter()
            .flat_map(|(name, coll)| {
                coll.expiry
                    .iter()
                    .filter(move |(_, at)| **at <= now)
                    .map(move |(doc_id, _)| (name.clone(), doc_id.clone()))
            })
            .collect())
    }

    fn save_blob(&self, reader: &mut dyn Read) -> Result<BlobKey> {
        let (key, content) =
            read_digested(reader).map_err(|source| BackendError::BlobStream { source })?;
        self.state
            .write()
            .blobs
            .entry(key.digest.clone())
            .or_insert(content);
        Ok(key)
    }

    fn has_blob(&self, digest: &str) -> Result<bool> {
        Ok(self.state.read().blobs.contains_key(digest))
    }

    fn get_blob(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().blobs.get(digest).cloned())
    }

    fn compact(&self) -> Result<usize> {
        let mut state = self.state.write();
        let mut live = HashSet::new();
        for coll in state.collections.values() {
            for (doc_id, stored) in &coll.documents {
                if stored.is_deleted {
                    continue;
                }
                let body: serde_json::Value = serde_json::from_slice(&stored.body).map_err(
                    |source| BackendError::CorruptBody {
                        doc_id: doc_id.clone(),
                        source,
                    },
                )?;
                referenced_digests(&body, &mut live);
            }
        }
        let before = state.blobs.len();
        state.blobs.retain(|digest, _| live.contains(digest));
        Ok(before - state.blobs.len())
    }

    fn create_collection(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write();
        if state.collections.contains_key(name) {
            return Ok(false);
        }
        state
            .collections
            .insert(name.to_string(), CollectionState::default());
        Ok(true)
    }

    fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.state.write().collections.remove(name).is_some())
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.state.read().collections.contains_key(name))
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.state.read().collections.keys().cloned().collect())
    }

    fn document_count(&self, collection: &str) -> Result<usize> {
        let state = self.state.read();
        Ok(state
            .collection(collection)?
            .documents
            .values()
            .filter(|stored| !stored.is_deleted)
            .count())
    }

    fn document_ids(&self, collection: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .collection(collection)?
            .documents
            .iter()
            .filter(|(_, stored)| !stored.is_deleted)
            .map(|(doc_id, _)| doc_id.clone())
            .collect())
    }

    fn begin_batch(&self) -> Result<()> {
        let mut batch = self.batch.lock();
        if batch.depth == 0 {
            batch.snapshot = Some(self.state.read().clone());
        }
        batch.depth += 1;
        Ok(())
    }

    fn commit_batch(&self) -> Result<()> {
        let mut batch = self.batch.lock();
        match batch.depth {
            0 => Err(BackendError::NoBatchOpen.into()),
            1 => {
                batch.depth = 0;
                batch.snapshot = None;
                Ok(())
            }
            _ => {
                batch.depth -= 1;
                Ok(())
            }
        }
    }

    fn rollback_batch(&self) -> Result<()> {
        let mut batch = self.batch.lock();
        let snapshot = batch.snapshot.take().ok_or(BackendError::NoBatchOpen)?;
        batch.depth = 0;
        let mut state = self.state.write();
        // Sequences handed out inside the batch are never reused
        let last_sequence = state.last_sequence;
        *state = snapshot;
        state.last_sequence = last_sequence;
        Ok(())
    }

    fn last_sequence(&self) -> Result<u64> {
        Ok(self.state.read().last_sequence)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        let last_sequence = state.last_sequence;
        *state = StoreState::with_default_collection();
        state.last_sequence = last_sequence;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
