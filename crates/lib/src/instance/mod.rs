//!
//! Provides [`Instance`], the owner of one underlying store.
//!
//! An `Instance` wraps a [`Backend`] and is shared by every [`Database`]
//! handle opened on it. It owns what those handles have in common: the
//! write lock that serializes commits and batches, the change listener
//! registry, the open-handle count that guards deletion, and the
//! background expiration reaper.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info};

use crate::{
    Clock, Database, DatabaseConfig, Result,
    backend::{Backend, InMemory},
    database::listener::ListenerRegistry,
    expiration::Reaper,
};

#[derive(Debug, Default)]
struct LifecycleState {
    /// Set by [`Database::delete`]; cleared by the next open.
    deleted: bool,
    open_handles: usize,
}

/// The batch open on the instance, shared by every handle.
#[derive(Debug, Default)]
struct BatchState {
    depth: usize,
    /// Thread running the outermost batch; it also holds the write lock
    owner: Option<ThreadId>,
    /// Changes made inside the batch, delivered once it commits
    pending: BTreeMap<String, Vec<String>>,
}

/// Internal state for Instance
///
/// Instance itself is just a cheap-to-clone handle wrapping Arc<InstanceInternal>.
pub(crate) struct InstanceInternal {
    backend: Box<dyn Backend>,
    config: DatabaseConfig,
    lifecycle: Mutex<LifecycleState>,
    /// Held by every commit, and by a batch for its whole duration
    write_lock: ReentrantMutex<()>,
    batch: Mutex<BatchState>,
    listeners: Arc<ListenerRegistry>,
    reaper: Mutex<Option<Reaper>>,
}

impl std::fmt::Debug for InstanceInternal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceInternal")
            .field("backend", &"<Backend>")
            .field("config", &self.config)
            .field("lifecycle", &*self.lifecycle.lock())
            .field("batch_depth", &self.batch.lock().depth)
            .field("listeners", &self.listeners)
            .field("reaper", &self.reaper.lock().is_some())
            .finish()
    }
}

impl Drop for InstanceInternal {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().take() {
            reaper.shutdown();
        }
    }
}

/// A store shared by any number of [`Database`] handles.
///
/// Instance is a cheap-to-clone handle around `Arc<InstanceInternal>`.
///
/// ## Example
///
/// ```
/// # use vellum::{DatabaseConfig, Instance, InMemory, MutableDocument};
/// # fn main() -> vellum::Result<()> {
/// let instance = Instance::open(Box::new(InMemory::new()), DatabaseConfig::default())?;
/// let db = instance.open_database()?;
/// let docs = db.default_collection()?;
///
/// let mut doc = MutableDocument::with_id("greeting")?;
/// doc.set_value("text", "hello")?;
/// docs.save(&mut doc)?;
/// assert_eq!(doc.sequence(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Instance {
    inner: Arc<InstanceInternal>,
}

/// Weak reference to an Instance.
///
/// Dependent objects (the reaper thread, blob sources) hold weak references
/// so they never keep a store alive on their own.
///
/// Use `upgrade()` to convert to a strong `Instance` reference.
#[derive(Clone, Debug)]
pub struct WeakInstance {
    inner: Weak<InstanceInternal>,
}

impl Instance {
    /// Open an instance over `backend`.
    ///
    /// Starts the background expiration reaper unless
    /// [`DatabaseConfig::reaper_enabled`] is false.
    pub fn open(backend: Box<dyn Backend>, config: DatabaseConfig) -> Result<Self> {
        let reaper_enabled = config.reaper_enabled;
        let interval = config.expiration_interval();
        let instance = Self {
            inner: Arc::new(InstanceInternal {
                backend,
                config,
                lifecycle: Mutex::new(LifecycleState::default()),
                write_lock: ReentrantMutex::new(()),
                batch: Mutex::new(BatchState::default()),
                listeners: Arc::new(ListenerRegistry::default()),
                reaper: Mutex::new(None),
            }),
        };
        if reaper_enabled {
            let reaper = Reaper::start(instance.downgrade(), interval)?;
            *instance.inner.reaper.lock() = Some(reaper);
        }
        info!(
            reaper = reaper_enabled,
            interval_ms = interval.as_millis() as u64,
            "Opened instance"
        );
        Ok(instance)
    }

    /// Open an instance over a fresh [`InMemory`] backend.
    pub fn in_memory(config: DatabaseConfig) -> Result<Self> {
        Self::open(Box::new(InMemory::new()), config)
    }

    /// Open a new database handle.
    ///
    /// Opening after the store was deleted starts over with an empty store.
    pub fn open_database(&self) -> Result<Database> {
        let handles = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.deleted = false;
            lifecycle.open_handles += 1;
            lifecycle.open_handles
        };
        let database = Database::new(self.clone());
        debug!(database_id = %database.id(), open_handles = handles, "Opened database handle");
        Ok(database)
    }

    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// The time source expiration deadlines are measured against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.inner.config.clock()
    }

    /// Number of handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.inner.lifecycle.lock().open_handles
    }

    /// Whether the store has been deleted and not reopened since.
    pub fn is_deleted(&self) -> bool {
        self.inner.lifecycle.lock().deleted
    }

    /// Ask the reaper to run a pass now instead of at its next tick.
    pub fn trigger_reaper(&self) {
        if let Some(reaper) = self.inner.reaper.lock().as_ref() {
            reaper.trigger();
        }
    }

    pub(crate) fn write_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.write_lock.lock()
    }

    pub(crate) fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.inner.listeners
    }

    /// Whether a batch is open on any handle.
    pub(crate) fn in_batch(&self) -> bool {
        self.inner.batch.lock().depth > 0
    }

    /// Join the open batch, or mark the start of a new one.
    ///
    /// Callers hold the write lock.
    pub(crate) fn enter_batch(&self) {
        let mut batch = self.inner.batch.lock();
        batch.depth += 1;
        if batch.depth == 1 {
            batch.owner = Some(thread::current().id());
        }
    }

    /// Leave a batch level. Leaving the outermost one hands back the changes
    /// buffered while it was open.
    pub(crate) fn leave_batch(&self) -> BTreeMap<String, Vec<String>> {
        let mut batch = self.inner.batch.lock();
        batch.depth = batch.depth.saturating_sub(1);
        if batch.depth > 0 {
            return BTreeMap::new();
        }
        batch.owner = None;
        std::mem::take(&mut batch.pending)
    }

    /// Notify listeners of committed changes, or hold them until the open
    /// batch commits.
    ///
    /// Only writes from the thread running the batch are held: any other
    /// writer committed before the batch took the write lock.
    pub(crate) fn record_changes(&self, collection: &str, doc_ids: Vec<String>) {
        {
            let mut batch = self.inner.batch.lock();
            if batch.depth > 0 && batch.owner == Some(thread::current().id()) {
                let held = batch.pending.entry(collection.to_string()).or_default();
                for doc_id in doc_ids {
                    if !held.contains(&doc_id) {
                        held.push(doc_id);
                    }
                }
                return;
            }
        }
        self.listeners().notify(collection, doc_ids);
    }

    /// Forget a handle that was closed or dropped.
    pub(crate) fn release_handle(&self) -> usize {
        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.open_handles = lifecycle.open_handles.saturating_sub(1);
        lifecycle.open_handles
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.lifecycle.lock().deleted = true;
    }

    /// Downgrade to a weak reference.
    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl WeakInstance {
    /// Upgrade to a strong reference.
    ///
    /// Returns `None` if the Instance has already been dropped.
    ///
    /// ```
    /// # use vellum::{DatabaseConfig, Instance};
    /// # fn main() -> vellum::Result<()> {
    /// let instance = Instance::in_memory(DatabaseConfig::default().with_reaper(false))?;
    /// let weak = instance.downgrade();
    /// assert!(weak.upgrade().is_some());
    ///
    /// drop(instance);
    /// assert!(weak.upgrade().is_none());
    /// # Ok(())
    /// # }
    /// ```
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}
