//! Change notification.
//!
//! Listeners are registered per collection, or per document within a
//! collection, and are shared by every handle on the same
//! [`Instance`](crate::Instance): a save through one handle notifies
//! listeners registered through another, and so does the expiration
//! reaper.
//!
//! Callbacks never run on the writer's stack directly; each delivery is
//! handed to the [`Executor`] the listener was registered with.

use std::cell::Cell;
use std::fmt;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};
use std::thread;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A unit of listener work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs listener deliveries.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs each delivery on the thread that made the change, once the change
/// has been committed.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// Runs deliveries in order on a dedicated worker thread.
///
/// The worker exits once the executor and every pending task have been
/// dropped.
pub struct ThreadExecutor {
    tasks: mpsc::UnboundedSender<Task>,
}

impl ThreadExecutor {
    pub fn new() -> std::io::Result<Self> {
        let (tasks, mut rx) = mpsc::unbounded_channel::<Task>();
        thread::Builder::new()
            .name("vellum-listener".into())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
            })?;
        Ok(Self { tasks })
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        if self.tasks.send(task).is_err() {
            tracing::warn!("Listener worker has exited; dropping notification");
        }
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("closed", &self.tasks.is_closed())
            .finish()
    }
}

/// Documents changed in one collection by one commit or batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    pub collection: String,
    pub doc_ids: Vec<String>,
}

/// One document changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub collection: String,
    pub doc_id: String,
}

type CollectionCallback = Arc<dyn Fn(&CollectionChange) + Send + Sync>;
type DocumentCallback = Arc<dyn Fn(&DocumentChange) + Send + Sync>;

enum Callback {
    Collection(CollectionCallback),
    Document {
        doc_id: String,
        callback: DocumentCallback,
    },
}

struct Registration {
    id: u64,
    database_id: Uuid,
    collection: String,
    callback: Callback,
    /// Held for the whole of a delivery; false once removed.
    active: ReentrantMutex<Cell<bool>>,
    executor: Arc<dyn Executor>,
}

impl Registration {
    fn deactivate(&self) {
        self.active.lock().set(false);
    }

    fn deliver_collection(&self, change: &CollectionChange) {
        let active = self.active.lock();
        if !active.get() {
            return;
        }
        if let Callback::Collection(callback) = &self.callback {
            callback(change);
        }
    }

    fn deliver_document(&self, change: &DocumentChange) {
        let active = self.active.lock();
        if !active.get() {
            return;
        }
        if let Callback::Document { callback, .. } = &self.callback {
            callback(change);
        }
    }
}

/// Every listener registered on one instance.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Arc<Registration>>>,
}

impl ListenerRegistry {
    pub(crate) fn add_collection_listener(
        self: &Arc<Self>,
        database_id: Uuid,
        collection: &str,
        executor: Arc<dyn Executor>,
        callback: CollectionCallback,
    ) -> ListenerToken {
        self.register(
            database_id,
            collection,
            executor,
            Callback::Collection(callback),
        )
    }

    pub(crate) fn add_document_listener(
        self: &Arc<Self>,
        database_id: Uuid,
        collection: &str,
        doc_id: &str,
        executor: Arc<dyn Executor>,
        callback: DocumentCallback,
    ) -> ListenerToken {
        self.register(
            database_id,
            collection,
            executor,
            Callback::Document {
                doc_id: doc_id.to_string(),
                callback,
            },
        )
    }

    fn register(
        self: &Arc<Self>,
        database_id: Uuid,
        collection: &str,
        executor: Arc<dyn Executor>,
        callback: Callback,
    ) -> ListenerToken {
        let registration = Arc::new(Registration {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            database_id,
            collection: collection.to_string(),
            callback,
            active: ReentrantMutex::new(Cell::new(true)),
            executor,
        });
        self.registrations.lock().push(Arc::clone(&registration));
        ListenerToken {
            registry: Arc::downgrade(self),
            registration,
        }
    }

    fn remove(&self, id: u64) {
        self.registrations.lock().retain(|r| r.id != id);
    }

    /// Drop every listener registered through one database handle.
    pub(crate) fn remove_for_database(&self, database_id: Uuid) {
        let removed: Vec<_> = {
            let mut registrations = self.registrations.lock();
            let (removed, kept) = registrations
                .drain(..)
                .partition(|r| r.database_id == database_id);
            *registrations = kept;
            removed
        };
        for registration in removed {
            registration.deactivate();
        }
    }

    /// Drop every listener of a collection.
    pub(crate) fn remove_for_collection(&self, collection: &str) {
        let removed: Vec<_> = {
            let mut registrations = self.registrations.lock();
            let (removed, kept) = registrations
                .drain(..)
                .partition(|r| r.collection == collection);
            *registrations = kept;
            removed
        };
        for registration in removed {
            registration.deactivate();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Hand a change to every interested listener's executor.
    pub(crate) fn notify(&self, collection: &str, doc_ids: Vec<String>) {
        if doc_ids.is_empty() {
            return;
        }
        let interested: Vec<_> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.collection == collection)
            .cloned()
            .collect();
        if interested.is_empty() {
            return;
        }
        tracing::trace!(
            collection,
            changed = doc_ids.len(),
            listeners = interested.len(),
            "Notifying listeners"
        );

        let change = Arc::new(CollectionChange {
            collection: collection.to_string(),
            doc_ids,
        });
        for registration in interested {
            match &registration.callback {
                Callback::Collection(_) => {
                    let change = Arc::clone(&change);
                    let target = Arc::clone(&registration);
                    registration
                        .executor
                        .execute(Box::new(move || target.deliver_collection(&change)));
                }
                Callback::Document { doc_id, .. } => {
                    if !change.doc_ids.contains(doc_id) {
                        continue;
                    }
                    let change = DocumentChange {
                        collection: collection.to_string(),
                        doc_id: doc_id.clone(),
                    };
                    let target = Arc::clone(&registration);
                    registration
                        .executor
                        .execute(Box::new(move || target.deliver_document(&change)));
                }
            }
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &format!("<{} listeners>", self.len()))
            .finish()
    }
}

/// Handle returned when a listener is added.
///
/// Dropping the token does not remove the listener; call
/// [`remove`](ListenerToken::remove).
pub struct ListenerToken {
    registry: Weak<ListenerRegistry>,
    registration: Arc<Registration>,
}

impl ListenerToken {
    /// Stop deliveries to this listener.
    ///
    /// Once this returns no new delivery starts. A delivery already running
    /// on another thread is waited for; calling this from inside the
    /// listener's own callback is allowed. Removing twice is a no-op.
    pub fn remove(&self) {
        self.registration.deactivate();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.registration.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.registration.active.lock().get()
    }
}

impl fmt::Debug for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerToken")
            .field("id", &self.registration.id)
            .field("collection", &self.registration.collection)
            .field("active", &self.is_active())
            .finish()
    }
}
