//! Database handles.
//!
//! A [`Database`] is one open handle on an [`Instance`]. Handles on the same
//! instance see the same collections and documents, but each tracks its own
//! lifecycle: closing one leaves the others usable, and documents remember
//! which handle they were read or saved through.
//!
//! Writes are grouped with [`Database::in_batch`], which holds the instance
//! write lock for its whole duration and commits or rolls back as one unit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    Instance, Result, blob::BlobSource, constants::DEFAULT_COLLECTION, expiration,
};

pub mod collection;
pub mod errors;
pub mod listener;

pub use collection::Collection;
pub use errors::DatabaseError;
pub use listener::{
    CollectionChange, DocumentChange, Executor, InlineExecutor, ListenerToken, ThreadExecutor,
};

#[derive(Debug, Default)]
struct HandleState {
    closed: bool,
    /// Batch levels entered through this handle and not yet left
    batch_depth: usize,
}

pub(crate) struct DatabaseInternal {
    id: Uuid,
    instance: Instance,
    state: Mutex<HandleState>,
}

impl Drop for DatabaseInternal {
    fn drop(&mut self) {
        if !self.state.get_mut().closed {
            self.instance.listeners().remove_for_database(self.id);
            self.instance.release_handle();
        }
    }
}

/// An open handle on an [`Instance`].
///
/// Clones alias the same handle: closing one closes them all.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInternal>,
}

impl Database {
    pub(crate) fn new(instance: Instance) -> Self {
        Self {
            inner: Arc::new(DatabaseInternal {
                id: Uuid::new_v4(),
                instance,
                state: Mutex::new(HandleState::default()),
            }),
        }
    }

    /// Identifier of this handle, distinct for every open.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn instance(&self) -> &Instance {
        &self.inner.instance
    }

    /// Whether the handle can still be used.
    pub fn is_open(&self) -> bool {
        !self.inner.state.lock().closed && !self.inner.instance.is_deleted()
    }

    /// Whether a batch is open on this handle.
    pub fn is_in_batch(&self) -> bool {
        self.inner.state.lock().batch_depth > 0
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DatabaseError::NotOpen {
                what: "database".to_string(),
            }
            .into())
        }
    }

    /// Close the handle.
    ///
    /// Closing twice is a no-op. Listeners added through this handle stop
    /// receiving changes.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.batch_depth > 0 {
                return Err(DatabaseError::TransactionNotClosed { operation: "close" }.into());
            }
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        let instance = self.instance();
        instance.listeners().remove_for_database(self.id());
        let remaining = instance.release_handle();
        info!(database_id = %self.id(), open_handles = remaining, "Closed database handle");
        Ok(())
    }

    /// Delete every collection, document and blob in the store, then close.
    ///
    /// Fails with `Busy` while any other handle on the instance is open.
    pub fn delete(&self) -> Result<()> {
        let instance = self.instance();
        let _write = instance.write_lock();
        if instance.in_batch() {
            return Err(DatabaseError::TransactionNotClosed { operation: "delete" }.into());
        }
        self.check_open()?;
        let others = instance.open_handles().saturating_sub(1);
        if others > 0 {
            return Err(DatabaseError::Busy {
                reason: format!("{others} other handle(s) are open"),
            }
            .into());
        }
        instance.backend().clear()?;
        instance.mark_deleted();
        info!(database_id = %self.id(), "Deleted store");
        self.close()
    }

    /// The collection every store starts with.
    pub fn default_collection(&self) -> Result<Collection> {
        self.check_open()?;
        Ok(Collection::new(self.clone(), DEFAULT_COLLECTION))
    }

    /// An existing collection by name.
    pub fn collection(&self, name: &str) -> Result<Option<Collection>> {
        self.check_open()?;
        if self.instance().backend().has_collection(name)? {
            Ok(Some(Collection::new(self.clone(), name)))
        } else {
            Ok(None)
        }
    }

    /// Create a collection, or return it if it already exists.
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        self.check_open()?;
        if name.is_empty() {
            return Err(DatabaseError::InvalidParameter {
                reason: "collection name must not be empty".to_string(),
            }
            .into());
        }
        if self.instance().backend().create_collection(name)? {
            debug!(collection = name, "Created collection");
        }
        Ok(Collection::new(self.clone(), name))
    }

    /// Delete a collection and its documents; returns false if it did not exist.
    ///
    /// The default collection cannot be deleted.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        self.check_open()?;
        if name == DEFAULT_COLLECTION {
            return Err(DatabaseError::InvalidParameter {
                reason: "the default collection cannot be deleted".to_string(),
            }
            .into());
        }
        let instance = self.instance();
        let deleted = {
            let _write = instance.write_lock();
            instance.backend().delete_collection(name)?
        };
        if deleted {
            instance.listeners().remove_for_collection(name);
            info!(collection = name, "Deleted collection");
        }
        Ok(deleted)
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.check_open()?;
        self.instance().backend().collection_names()
    }

    /// Run `f` as one batch.
    ///
    /// Writers on other threads wait until the batch finishes. If `f` fails
    /// every write it made is rolled back and its change notifications are
    /// dropped; otherwise the notifications are delivered after the commit.
    /// A batch opened inside another one, through this handle or any other
    /// handle on the same instance, joins the outer batch.
    ///
    /// A panic inside `f` rolls the batch back before it propagates.
    pub fn in_batch<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let instance = self.instance().clone();
        let write = instance.write_lock();

        if instance.in_batch() {
            let _scope = BatchScope::enter(self, false);
            return f(self);
        }
        instance.backend().begin_batch()?;
        let scope = BatchScope::enter(self, true);
        debug!(database_id = %self.id(), "Batch started");

        let result = f(self);
        let finished = match &result {
            Ok(_) => instance.backend().commit_batch(),
            Err(_) => instance.backend().rollback_batch(),
        };
        let pending = scope.finish();
        drop(write);

        match (result, finished) {
            (Ok(value), Ok(())) => {
                debug!(database_id = %self.id(), collections = pending.len(), "Batch committed");
                for (collection, doc_ids) in pending {
                    instance.listeners().notify(&collection, doc_ids);
                }
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), rolled_back) => {
                if let Err(rollback) = rolled_back {
                    warn!(error = %rollback, "Batch rollback failed");
                }
                debug!(database_id = %self.id(), error = %e, "Batch rolled back");
                Err(e)
            }
        }
    }

    /// Drop blob content no live document references; returns how many
    /// blobs were reclaimed.
    pub fn compact(&self) -> Result<usize> {
        self.check_open()?;
        let instance = self.instance();
        let reclaimed = {
            let _write = instance.write_lock();
            instance.backend().compact()?
        };
        info!(reclaimed, "Compacted blobs");
        Ok(reclaimed)
    }

    /// Run one expiration pass now; returns the number of documents purged.
    pub fn reap_expired(&self) -> Result<usize> {
        self.check_open()?;
        expiration::reap_expired(self.instance())
    }

    /// Highest sequence committed in the store.
    pub fn last_sequence(&self) -> Result<u64> {
        self.check_open()?;
        self.instance().backend().last_sequence()
    }

    pub(crate) fn blob_source(&self) -> Arc<dyn BlobSource> {
        Arc::new(DatabaseBlobs {
            database: Arc::downgrade(&self.inner),
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("closed", &state.closed)
            .field("batch_depth", &state.batch_depth)
            .finish()
    }
}

/// One level of [`Database::in_batch`].
///
/// Dropping the outermost scope without [`BatchScope::finish`] means `f`
/// panicked: the backend batch is rolled back and its changes discarded.
struct BatchScope<'a> {
    database: &'a Database,
    outermost: bool,
    finished: bool,
}

impl<'a> BatchScope<'a> {
    fn enter(database: &'a Database, outermost: bool) -> Self {
        database.instance().enter_batch();
        database.inner.state.lock().batch_depth += 1;
        Self {
            database,
            outermost,
            finished: false,
        }
    }

    /// Leave the outermost batch after it committed or rolled back, returning
    /// the changes it buffered.
    fn finish(mut self) -> BTreeMap<String, Vec<String>> {
        self.finished = true;
        self.leave()
    }

    fn leave(&self) -> BTreeMap<String, Vec<String>> {
        let mut state = self.database.inner.state.lock();
        state.batch_depth = state.batch_depth.saturating_sub(1);
        drop(state);
        self.database.instance().leave_batch()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let dropped = self.leave();
        if self.outermost {
            let instance = self.database.instance();
            if let Err(e) = instance.backend().rollback_batch() {
                warn!(error = %e, "Batch rollback failed");
            }
            warn!(
                database_id = %self.database.id(),
                collections = dropped.len(),
                "Batch rolled back after a panic"
            );
        }
    }
}

/// Resolves blob content through a database handle while it stays open.
struct DatabaseBlobs {
    database: Weak<DatabaseInternal>,
}

impl BlobSource for DatabaseBlobs {
    fn fetch(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        let database = self
            .database
            .upgrade()
            .map(|inner| Database { inner })
            .filter(Database::is_open)
            .ok_or_else(|| DatabaseError::NotOpen {
                what: "database".to_string(),
            })?;
        database.instance().backend().get_blob(digest)
    }
}
