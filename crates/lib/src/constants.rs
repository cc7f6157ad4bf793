//! Constants used throughout the Vellum library.
//!
//! This module provides central definitions for reserved names, the blob
//! metadata keys of the JSON projection, and tuning defaults.

/// Name of the collection every database starts with.
pub const DEFAULT_COLLECTION: &str = "_default";

/// Key tagging a dictionary in the JSON projection as blob metadata.
pub const BLOB_TYPE_KEY: &str = "@type";

/// Value of [`BLOB_TYPE_KEY`] for blob metadata.
pub const BLOB_TYPE: &str = "blob";

/// Blob metadata key holding the content digest.
pub const BLOB_DIGEST_KEY: &str = "digest";

/// Blob metadata key holding the content length in bytes.
pub const BLOB_LENGTH_KEY: &str = "length";

/// Blob metadata key holding the MIME content type.
pub const BLOB_CONTENT_TYPE_KEY: &str = "content_type";

/// Prefix of every blob digest.
pub const BLOB_DIGEST_PREFIX: &str = "sha256-";

/// Read buffer size used while digesting blob streams.
pub const BLOB_CHUNK_SIZE: usize = 8 * 1024;

/// Default period of the background expiration reaper.
pub const DEFAULT_EXPIRATION_INTERVAL_MS: u64 = 1_000;

/// Upper bound on commits re-issued by last-write-wins when the stored
/// revision keeps moving underneath it.
pub const MAX_FORCED_COMMIT_ATTEMPTS: usize = 16;
