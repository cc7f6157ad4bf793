//! Error types for the persistence backend.
//!
//! This module defines structured error types for backend operations,
//! keeping storage failures distinguishable from caller mistakes.

use thiserror::Error;

/// Errors that can occur during backend operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Field additions/changes require a major version bump
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// No stored record for the document.
    #[error("Document not found: {collection}/{doc_id}")]
    DocumentNotFound {
        /// Collection that was searched
        collection: String,
        /// The missing document id
        doc_id: String,
    },

    /// The collection does not exist.
    #[error("Collection not found: {name}")]
    CollectionNotFound {
        /// Name of the missing collection
        name: String,
    },

    /// A batch was committed or rolled back without being started.
    #[error("No batch is open")]
    NoBatchOpen,

    /// A stored body does not decode as a JSON object.
    #[error("Stored body of {doc_id} is corrupt")]
    CorruptBody {
        /// Document whose body failed to decode
        doc_id: String,
        /// The underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading blob content from the caller's stream failed.
    #[error("Failed to read blob stream")]
    BlobStream {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::DocumentNotFound { .. } | BackendError::CollectionNotFound { .. }
        )
    }

    /// Check if this error indicates stored data could not be decoded.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            BackendError::CorruptBody { .. } | BackendError::DeserializationFailed { .. }
        )
    }

    /// Check if this error is related to I/O operations.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            BackendError::FileIo { .. }
                | BackendError::BlobStream { .. }
                | BackendError::SerializationFailed { .. }
        )
    }

    /// Get the document id if this error is about a specific document.
    pub fn doc_id(&self) -> Option<&str> {
        match self {
            BackendError::DocumentNotFound { doc_id, .. }
            | BackendError::CorruptBody { doc_id, .. } => Some(doc_id),
            _ => None,
        }
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
