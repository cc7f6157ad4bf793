//! Error types for blob content and metadata access.

use thiserror::Error;

/// Errors that can occur when reading a blob's metadata or content.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob has no digest yet because it was never saved in a document.
    #[error("Blob has not been saved in a document yet")]
    Unsaved,

    /// The blob carries only metadata and is not bound to any store.
    #[error("Blob {digest} has no content and is not attached to a database")]
    NotAttached {
        /// Digest from the blob's metadata
        digest: String,
    },

    /// The store the blob is bound to does not hold its content.
    #[error("Blob content not found for digest {digest}")]
    ContentMissing {
        /// Digest that was looked up
        digest: String,
    },

    /// An earlier read of the blob's source stream failed part way; the
    /// stream cannot be read again.
    #[error("Blob source stream failed earlier and cannot be re-read: {reason}")]
    StreamFailed {
        /// The failure reported by the first read
        reason: String,
    },

    /// Reading the blob's source stream failed.
    #[error("Failed to read blob content")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl BlobError {
    /// Check if this error means the blob content could not be located.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BlobError::NotAttached { .. } | BlobError::ContentMissing { .. }
        )
    }

    /// Check if this error reports use of a blob before it was saved.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, BlobError::Unsaved)
    }

    /// Check if this error is an I/O failure.
    pub fn is_io_error(&self) -> bool {
        matches!(self, BlobError::Io { .. } | BlobError::StreamFailed { .. })
    }
}

impl From<BlobError> for crate::Error {
    fn from(err: BlobError) -> Self {
        crate::Error::Blob(err)
    }
}
