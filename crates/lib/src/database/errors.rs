//! Error types for database handles and collections.
//!
//! These cover the lifecycle of a handle (closed, deleted, mid-batch) and
//! misuse of documents across handles, keeping them distinct from the
//! storage failures reported by the backend.

use thiserror::Error;

/// Errors that can occur while using a [`Database`](crate::Database) or
/// [`Collection`](crate::Collection).
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Field additions/changes require a major version bump
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The handle is closed, the store was deleted, or the collection was deleted.
    #[error("{what} is not open")]
    NotOpen {
        /// What was used after being closed
        what: String,
    },

    /// The operation would disturb other users of the store.
    #[error("Database busy: {reason}")]
    Busy {
        /// Why the operation could not proceed
        reason: String,
    },

    /// A close or delete was attempted inside an open batch.
    #[error("Cannot {operation} while a batch is open")]
    TransactionNotClosed {
        /// The rejected operation
        operation: &'static str,
    },

    /// An argument belongs to a different handle or collection, or is malformed.
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of the problem
        reason: String,
    },

    /// The document has never been saved, or has been purged.
    #[error("Document not found: {collection}/{doc_id}")]
    DocumentNotFound {
        /// Collection that was searched
        collection: String,
        /// The missing document id
        doc_id: String,
    },
}

impl DatabaseError {
    /// Check if this error indicates a document was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::DocumentNotFound { .. })
    }

    /// Check if this error was caused by using a closed handle or collection.
    pub fn is_not_open(&self) -> bool {
        matches!(self, DatabaseError::NotOpen { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DatabaseError::Busy { .. })
    }

    pub fn is_transaction_not_closed(&self) -> bool {
        matches!(self, DatabaseError::TransactionNotClosed { .. })
    }

    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, DatabaseError::InvalidParameter { .. })
    }
}

impl From<DatabaseError> for crate::Error {
    fn from(err: DatabaseError) -> Self {
        crate::Error::Database(err)
    }
}
