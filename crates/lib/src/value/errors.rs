//! Error types for value and container operations.
//!
//! These are programmer errors: passing an index outside a container, a value
//! the document model cannot represent, or JSON text that does not describe
//! the requested container.

use thiserror::Error;

/// Structured error types for value and container operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ValueError {
    /// Array index outside the valid range for the operation.
    #[error("Array index {index} out of bounds for count {count}")]
    IndexOutOfBounds {
        /// The offending index
        index: usize,
        /// Number of elements at the time of the call
        count: usize,
    },

    /// Value that cannot be stored in a document.
    #[error("Unsupported value type: {reason}")]
    UnsupportedType {
        /// Description of the rejected value
        reason: String,
    },

    /// Text that is not valid JSON.
    #[error("Malformed JSON")]
    MalformedJson {
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// Valid JSON of the wrong shape, e.g. an array where an object is required.
    #[error("Expected a JSON {expected}, found {actual}")]
    UnexpectedJsonShape {
        /// Shape that was required
        expected: &'static str,
        /// Shape that was found
        actual: &'static str,
    },

    /// A mutable container reaches itself through its descendants.
    #[error("Container cycle detected while encoding")]
    CycleDetected,

    /// JSON projection requested for a value that is not part of a saved document.
    #[error("Cannot encode {what} as JSON: not part of a saved document")]
    NotSaved {
        /// Kind of value that was asked for its JSON projection
        what: &'static str,
    },
}

impl ValueError {
    /// Check if this error is an invalid-argument programmer error.
    pub fn is_invalid_argument(&self) -> bool {
        !self.is_illegal_state()
    }

    /// Check if this error reports use of a value in the wrong lifecycle state.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, ValueError::NotSaved { .. })
    }

    /// Check if this error is an index bounds violation.
    pub fn is_index_error(&self) -> bool {
        matches!(self, ValueError::IndexOutOfBounds { .. })
    }

    /// Check if this error rejected an unsupported value.
    pub fn is_unsupported_type(&self) -> bool {
        matches!(self, ValueError::UnsupportedType { .. })
    }

    /// Check if this error came from parsing JSON text.
    pub fn is_json_error(&self) -> bool {
        matches!(
            self,
            ValueError::MalformedJson { .. } | ValueError::UnexpectedJsonShape { .. }
        )
    }
}

impl From<ValueError> for crate::Error {
    fn from(err: ValueError) -> Self {
        crate::Error::Value(err)
    }
}
