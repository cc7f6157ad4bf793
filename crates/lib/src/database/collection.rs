//! Named sets of documents within a store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    Blob, Result,
    backend::{BackendError, CommitRequest},
    clock::{millis_to_utc, utc_to_millis},
    concurrency::{self, ConcurrencyControl},
    database::{
        Database, DatabaseError,
        listener::{CollectionChange, DocumentChange, Executor, ListenerToken},
    },
    document::{Document, DocumentOrigin, MutableDocument, errors::check_id},
    value::{ArrayRef, DictRef, ImmutableDictionary, Value, json},
};

/// A collection reached through one database handle.
///
/// Every operation fails with `NotOpen` once the handle is closed, the store
/// deleted, or the collection itself deleted.
#[derive(Clone)]
pub struct Collection {
    database: Database,
    name: String,
}

impl Collection {
    pub(crate) fn new(database: Database, name: impl Into<String>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Whether the handle is open and the collection still exists.
    pub fn is_valid(&self) -> bool {
        self.check_open().is_ok()
    }

    fn check_open(&self) -> Result<()> {
        self.database.check_open()?;
        if self.database.instance().backend().has_collection(&self.name)? {
            Ok(())
        } else {
            Err(DatabaseError::NotOpen {
                what: format!("collection {}", self.name),
            }
            .into())
        }
    }

    fn origin(&self) -> DocumentOrigin {
        DocumentOrigin {
            database_id: self.database.id(),
            collection: self.name.clone(),
        }
    }

    /// Reject documents that belong to another handle or collection.
    fn check_origin(&self, doc: &MutableDocument) -> Result<()> {
        match doc.origin() {
            Some(origin)
                if origin.database_id != self.database.id() || origin.collection != self.name =>
            {
                Err(DatabaseError::InvalidParameter {
                    reason: format!(
                        "document {} belongs to collection {} of database handle {}",
                        doc.id(),
                        origin.collection,
                        origin.database_id
                    ),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    fn not_found(&self, doc_id: &str) -> crate::Error {
        DatabaseError::DocumentNotFound {
            collection: self.name.clone(),
            doc_id: doc_id.to_string(),
        }
        .into()
    }

    /// Number of live documents.
    pub fn count(&self) -> Result<usize> {
        self.check_open()?;
        self.database.instance().backend().document_count(&self.name)
    }

    /// Ids of live documents in ascending order.
    pub fn document_ids(&self) -> Result<Vec<String>> {
        self.check_open()?;
        self.database.instance().backend().document_ids(&self.name)
    }

    /// The current revision of a document, None if it is unknown or deleted.
    ///
    /// Every call decodes its own tree; two reads of the same revision share
    /// nothing.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.load(id, false)
    }

    /// Like [`get_document`](Self::get_document), but tombstones are returned
    /// with empty content and `is_deleted` set.
    pub fn get_document_including_deleted(&self, id: &str) -> Result<Option<Document>> {
        self.load(id, true)
    }

    fn load(&self, id: &str, include_deleted: bool) -> Result<Option<Document>> {
        check_id(id)?;
        self.check_open()?;
        let Some(stored) = self.database.instance().backend().read(&self.name, id)? else {
            return Ok(None);
        };
        if stored.is_deleted && !include_deleted {
            return Ok(None);
        }
        let content = if stored.is_deleted {
            ImmutableDictionary::default()
        } else {
            let object: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&stored.body).map_err(|source| {
                    BackendError::CorruptBody {
                        doc_id: id.to_string(),
                        source,
                    }
                })?;
            json::decode_object(&object, Some(&self.database.blob_source()))
        };
        Ok(Some(Document::stored(
            id.to_string(),
            stored.revision_id,
            stored.sequence,
            stored.is_deleted,
            content,
            self.origin(),
        )))
    }

    /// Save with [`ConcurrencyControl::LastWriteWins`].
    pub fn save(&self, doc: &mut MutableDocument) -> Result<()> {
        self.save_with_concurrency(doc, ConcurrencyControl::LastWriteWins)
            .map(|_| ())
    }

    /// Save `doc`, conditioned on the revision it was derived from.
    ///
    /// Returns false, leaving `doc` and the store untouched, when the policy
    /// is [`ConcurrencyControl::FailOnConflict`] and another writer saved a
    /// newer revision. On success `doc` carries the new revision and sequence.
    pub fn save_with_concurrency(
        &self,
        doc: &mut MutableDocument,
        concurrency: ConcurrencyControl,
    ) -> Result<bool> {
        self.check_open()?;
        self.check_origin(doc)?;
        let body = self.encode(doc)?;
        self.commit(doc, body, false, concurrency)
    }

    /// Delete with [`ConcurrencyControl::LastWriteWins`].
    pub fn delete(&self, doc: &mut MutableDocument) -> Result<()> {
        self.delete_with_concurrency(doc, ConcurrencyControl::LastWriteWins)
            .map(|_| ())
    }

    /// Replace the stored document with a tombstone.
    ///
    /// The content of `doc` stays readable in memory. Deleting a document
    /// that was never saved, or whose stored record has been purged, is
    /// `NotFound`.
    pub fn delete_with_concurrency(
        &self,
        doc: &mut MutableDocument,
        concurrency: ConcurrencyControl,
    ) -> Result<bool> {
        self.check_open()?;
        self.check_origin(doc)?;
        if doc.revision_id().is_none() {
            return Err(self.not_found(doc.id()));
        }
        self.commit(doc, Vec::new(), true, concurrency)
    }

    /// Freeze the content, store its blobs and encode the body.
    fn encode(&self, doc: &MutableDocument) -> Result<Vec<u8>> {
        let content = doc.content().to_immutable()?;
        let mut blobs = Vec::new();
        for (_, value) in content.iter() {
            collect_blobs(value, &mut blobs);
        }
        if !blobs.is_empty() {
            let backend = self.database.instance().backend();
            let source = self.database.blob_source();
            for blob in &blobs {
                blob.install(backend, &source)?;
            }
        }
        Ok(serde_json::to_vec(&json::encode_dictionary(&content)?)?)
    }

    fn commit(
        &self,
        doc: &mut MutableDocument,
        body: Vec<u8>,
        is_deletion: bool,
        concurrency: ConcurrencyControl,
    ) -> Result<bool> {
        let request = CommitRequest {
            collection: self.name.clone(),
            doc_id: doc.id().to_string(),
            expected_revision: doc.revision_id().cloned(),
            body,
            is_deletion,
        };
        let instance = self.database.instance();
        let committed = {
            let _write = instance.write_lock();
            concurrency::commit(instance.backend(), request, concurrency)?
        };
        let Some(committed) = committed else {
            return Ok(false);
        };
        doc.committed(
            committed.revision_id,
            committed.sequence,
            is_deletion,
            self.origin(),
        );
        self.database
            .instance()
            .record_changes(&self.name, vec![doc.id().to_string()]);
        Ok(true)
    }

    /// Hard-remove a document; `doc` goes back to the unsaved state.
    pub fn purge(&self, doc: &mut MutableDocument) -> Result<()> {
        self.check_open()?;
        self.check_origin(doc)?;
        if doc.revision_id().is_none() {
            return Err(self.not_found(doc.id()));
        }
        self.purge_stored(doc.id())?;
        doc.purged();
        Ok(())
    }

    /// Hard-remove a document by id.
    pub fn purge_by_id(&self, id: &str) -> Result<()> {
        check_id(id)?;
        self.check_open()?;
        self.purge_stored(id)
    }

    fn purge_stored(&self, id: &str) -> Result<()> {
        let instance = self.database.instance();
        {
            let _write = instance.write_lock();
            instance.backend().purge(&self.name, id)?;
        }
        info!(collection = %self.name, doc_id = id, "Purged document");
        self.database
            .instance()
            .record_changes(&self.name, vec![id.to_string()]);
        Ok(())
    }

    /// Set or clear the time after which a document is purged.
    pub fn set_document_expiration(
        &self,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        check_id(id)?;
        self.check_open()?;
        let instance = self.database.instance();
        let deadline = expires_at.as_ref().map(utc_to_millis);
        {
            let _write = instance.write_lock();
            instance.backend().set_expiry(&self.name, id, deadline)?;
        }
        debug!(collection = %self.name, doc_id = id, deadline = ?deadline, "Set expiration");
        if let Some(deadline) = deadline
            && deadline <= instance.clock().now_millis()
        {
            instance.trigger_reaper();
        }
        Ok(())
    }

    /// The time after which a document will be purged, if one is set.
    pub fn get_document_expiration(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        check_id(id)?;
        self.check_open()?;
        let backend = self.database.instance().backend();
        if backend.read(&self.name, id)?.is_none() {
            return Err(self.not_found(id));
        }
        Ok(backend.get_expiry(&self.name, id)?.map(millis_to_utc))
    }

    /// Call `listener` with every batch of changed ids in this collection.
    pub fn add_change_listener(
        &self,
        executor: Arc<dyn Executor>,
        listener: impl Fn(&CollectionChange) + Send + Sync + 'static,
    ) -> Result<ListenerToken> {
        self.check_open()?;
        Ok(self.database.instance().listeners().add_collection_listener(
            self.database.id(),
            &self.name,
            executor,
            Arc::new(listener),
        ))
    }

    /// Call `listener` whenever the document `doc_id` changes.
    pub fn add_document_change_listener(
        &self,
        doc_id: &str,
        executor: Arc<dyn Executor>,
        listener: impl Fn(&DocumentChange) + Send + Sync + 'static,
    ) -> Result<ListenerToken> {
        check_id(doc_id)?;
        self.check_open()?;
        Ok(self.database.instance().listeners().add_document_listener(
            self.database.id(),
            &self.name,
            doc_id,
            executor,
            Arc::new(listener),
        ))
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("database", &self.database.id())
            .finish()
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.database.id() == other.database.id()
    }
}

/// Blobs anywhere in a frozen value tree.
fn collect_blobs(value: &Value, blobs: &mut Vec<Blob>) {
    match value {
        Value::Blob(blob) => blobs.push(blob.clone()),
        Value::Array(ArrayRef::Immutable(array)) => {
            for item in array {
                collect_blobs(item, blobs);
            }
        }
        Value::Dictionary(DictRef::Immutable(dict)) => {
            for (_, item) in dict {
                collect_blobs(item, blobs);
            }
        }
        _ => {}
    }
}
