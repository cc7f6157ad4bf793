//! Error types for document construction.

use thiserror::Error;

/// Errors that can occur when creating or addressing a document.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Document ids must be non-empty.
    #[error("Document id must not be empty")]
    EmptyId,
}

impl DocumentError {
    /// Check if this error rejected a document id.
    pub fn is_bad_doc_id(&self) -> bool {
        matches!(self, DocumentError::EmptyId)
    }
}

impl From<DocumentError> for crate::Error {
    fn from(err: DocumentError) -> Self {
        crate::Error::Document(err)
    }
}

/// Validate a caller-supplied document id.
pub(crate) fn check_id(id: &str) -> Result<(), DocumentError> {
    if id.is_empty() {
        Err(DocumentError::EmptyId)
    } else {
        Ok(())
    }
}
