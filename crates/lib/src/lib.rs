//!
//! Vellum: an embedded, schema-less document store.
//! This library provides the value model and the optimistic-concurrency save
//! protocol of a document database, over a pluggable storage backend.
//!
//! ## Core Concepts
//!
//! * **Values (`value::Value`)**: JSON-like content. Containers come in an
//!   immutable form decoded from stored bodies and a mutable copy-on-write
//!   form whose unchanged substructure stays shared with the snapshot it was
//!   derived from.
//! * **Documents (`document::Document`, `document::MutableDocument`)**: a root
//!   dictionary plus an id, an ordered revision id and a store-wide sequence.
//! * **Blobs (`blob::Blob`)**: binary payloads stored by content digest.
//! * **Backends (`backend::Backend`)**: the storage layer, with a
//!   compare-and-swap commit that optimistic concurrency is built on.
//! * **Instances and databases (`Instance`, `Database`)**: one store shared by
//!   any number of handles, each with its own lifecycle, batches and
//!   change listeners.
//! * **Expiration (`Collection::set_document_expiration`)**: per-document
//!   deadlines enforced by a background reaper.

pub mod backend;
pub mod blob;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod constants;
pub mod database;
pub mod document;
pub mod expiration;
pub mod instance;
pub mod value;

pub use backend::{Backend, InMemory};
pub use blob::Blob;
/// Re-export time provider types for easy access.
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use concurrency::ConcurrencyControl;
pub use config::DatabaseConfig;
pub use database::{
    Collection, CollectionChange, Database, DocumentChange, Executor, InlineExecutor,
    ListenerToken, ThreadExecutor,
};
pub use document::{Document, MutableDocument, RevisionId};
pub use instance::{Instance, WeakInstance};
pub use value::{
    ArrayRef, DictRef, ImmutableArray, ImmutableDictionary, MutableArray, MutableDictionary,
    Number, ReadArray, ReadDictionary, Value,
};

/// Result type used throughout the Vellum library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Vellum library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured value errors from the value module
    #[error(transparent)]
    Value(value::ValueError),

    /// Structured blob errors from the blob module
    #[error(transparent)]
    Blob(blob::BlobError),

    /// Structured document errors from the document module
    #[error(transparent)]
    Document(document::DocumentError),

    /// Structured storage errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured handle and collection errors from the database module
    #[error(transparent)]
    Database(database::DatabaseError),
}

/// Stable classification of every [`Error`].
///
/// `InvalidArgument` and `IllegalState` are programmer errors; the rest
/// describe the state of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A value, index or JSON text the operation cannot accept
    InvalidArgument,
    /// The object is not in a state that allows the call
    IllegalState,
    NotFound,
    /// An argument belongs to another handle or collection
    InvalidParameter,
    Busy,
    TransactionNotClosed,
    NotOpen,
    BadDocId,
    Io,
    /// Stored data could not be decoded
    Corrupt,
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Value(_) => "value",
            Error::Blob(_) => "blob",
            Error::Document(_) => "document",
            Error::Backend(_) => "backend",
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Value(err) if err.is_illegal_state() => ErrorCode::IllegalState,
            Error::Value(_) => ErrorCode::InvalidArgument,
            Error::Blob(err) if err.is_illegal_state() => ErrorCode::IllegalState,
            Error::Blob(err) if err.is_not_found() => ErrorCode::NotFound,
            Error::Blob(_) => ErrorCode::Io,
            Error::Document(_) => ErrorCode::BadDocId,
            Error::Backend(err) if err.is_not_found() => ErrorCode::NotFound,
            Error::Backend(err) if err.is_corrupt() => ErrorCode::Corrupt,
            Error::Backend(backend::BackendError::NoBatchOpen) => ErrorCode::IllegalState,
            Error::Backend(_) => ErrorCode::Io,
            Error::Database(err) => match err {
                database::DatabaseError::NotOpen { .. } => ErrorCode::NotOpen,
                database::DatabaseError::Busy { .. } => ErrorCode::Busy,
                database::DatabaseError::TransactionNotClosed { .. } => {
                    ErrorCode::TransactionNotClosed
                }
                database::DatabaseError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
                database::DatabaseError::DocumentNotFound { .. } => ErrorCode::NotFound,
            },
            Error::Io(_) => ErrorCode::Io,
            Error::Serialize(_) => ErrorCode::Corrupt,
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// Check if this error was caused by an argument the call cannot accept.
    pub fn is_invalid_argument(&self) -> bool {
        self.code() == ErrorCode::InvalidArgument
    }

    /// Check if this error was caused by calling a method in the wrong state.
    pub fn is_illegal_state(&self) -> bool {
        self.code() == ErrorCode::IllegalState
    }

    pub fn is_invalid_parameter(&self) -> bool {
        self.code() == ErrorCode::InvalidParameter
    }

    pub fn is_busy(&self) -> bool {
        self.code() == ErrorCode::Busy
    }

    pub fn is_transaction_not_closed(&self) -> bool {
        self.code() == ErrorCode::TransactionNotClosed
    }

    /// Check if this error was caused by using a closed or deleted handle.
    pub fn is_not_open(&self) -> bool {
        self.code() == ErrorCode::NotOpen
    }

    pub fn is_bad_doc_id(&self) -> bool {
        self.code() == ErrorCode::BadDocId
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        self.code() == ErrorCode::Io
    }

    /// Check if this error indicates stored data could not be decoded.
    pub fn is_corrupt(&self) -> bool {
        self.code() == ErrorCode::Corrupt
    }
}
