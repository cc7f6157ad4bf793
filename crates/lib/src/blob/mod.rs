//! Content-addressed binary payloads.
//!
//! A [`Blob`] is created from bytes or a reader and stored inside a document
//! like any other value. Saving the document streams the content into the
//! backend, which assigns the digest (`sha256-<base64>`). From then on the
//! blob is identified by that digest; its JSON projection is a small metadata
//! object instead of the bytes.
//!
//! ```
//! use vellum::Blob;
//!
//! let blob = Blob::from_bytes("text/plain", b"hello".to_vec());
//! assert_eq!(blob.length(), 5);
//! assert_eq!(blob.content().unwrap(), b"hello");
//! // No digest until the blob is saved
//! assert!(blob.digest().is_none());
//! assert!(blob.to_json().is_err());
//! ```

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read};
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::{
    Result,
    backend::Backend,
    constants::{
        BLOB_CHUNK_SIZE, BLOB_CONTENT_TYPE_KEY, BLOB_DIGEST_KEY, BLOB_DIGEST_PREFIX,
        BLOB_LENGTH_KEY, BLOB_TYPE, BLOB_TYPE_KEY,
    },
};

pub mod errors;

pub use errors::BlobError;

/// Where a stored blob's bytes can be fetched from.
pub(crate) trait BlobSource: Send + Sync {
    /// Content for `digest`, or None if the store does not hold it.
    fn fetch(&self, digest: &str) -> Result<Option<Vec<u8>>>;
}

/// Digest and length of stored blob content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    /// `sha256-<base64>` digest
    pub digest: String,
    /// Content length in bytes
    pub length: u64,
}

/// Incremental blob digest.
#[derive(Default)]
pub struct BlobDigester {
    hasher: Sha256,
    length: u64,
}

impl BlobDigester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.length += chunk.len() as u64;
    }

    pub fn finish(self) -> BlobKey {
        BlobKey {
            digest: format!(
                "{BLOB_DIGEST_PREFIX}{}",
                Base64::encode_string(&self.hasher.finalize())
            ),
            length: self.length,
        }
    }
}

/// Digest of in-memory content.
pub fn digest_of(bytes: &[u8]) -> String {
    let mut digester = BlobDigester::new();
    digester.update(bytes);
    digester.finish().digest
}

/// Drain `reader` in fixed-size chunks, digesting as it goes.
pub(crate) fn read_digested(reader: &mut dyn Read) -> std::io::Result<(BlobKey, Vec<u8>)> {
    let mut digester = BlobDigester::new();
    let mut content = Vec::new();
    let mut chunk = vec![0u8; BLOB_CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        digester.update(&chunk[..read]);
        content.extend_from_slice(&chunk[..read]);
    }
    Ok((digester.finish(), content))
}

/// An error and its causes, joined into one line.
fn failure_reason(err: &dyn std::error::Error) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    reason
}

/// Whether a JSON object is blob metadata.
pub(crate) fn is_blob_metadata(object: &serde_json::Map<String, serde_json::Value>) -> bool {
    object.get(BLOB_TYPE_KEY).and_then(|t| t.as_str()) == Some(BLOB_TYPE)
        && object
            .get(BLOB_DIGEST_KEY)
            .is_some_and(serde_json::Value::is_string)
}

/// Collect every blob digest referenced anywhere in a stored body.
pub(crate) fn referenced_digests(body: &serde_json::Value, digests: &mut HashSet<String>) {
    match body {
        serde_json::Value::Object(object) if is_blob_metadata(object) => {
            if let Some(digest) = object.get(BLOB_DIGEST_KEY).and_then(|d| d.as_str()) {
                digests.insert(digest.to_owned());
            }
        }
        serde_json::Value::Object(object) => {
            for value in object.values() {
                referenced_digests(value, digests);
            }
        }
        serde_json::Value::Array(items) => {
            for value in items {
                referenced_digests(value, digests);
            }
        }
        _ => {}
    }
}

struct BlobState {
    content_type: Option<String>,
    digest: Option<String>,
    length: u64,
    content: Option<Vec<u8>>,
    stream: Option<Box<dyn Read + Send>>,
    /// Created from a reader; compared by identity until saved
    streamed: bool,
    /// Why the stream was lost, once a read of it has failed
    failure: Option<String>,
    source: Option<Arc<dyn BlobSource>>,
    /// Digest of in-memory content not yet saved, for comparisons only.
    content_digest: Option<String>,
}

/// Hashed in place of a digest by blobs that compare by identity.
const UNSAVED_STREAM_HASH: &str = "unsaved-stream";

impl BlobState {
    fn new(content_type: Option<String>) -> Self {
        Self {
            content_type,
            digest: None,
            length: 0,
            content: None,
            stream: None,
            streamed: false,
            failure: None,
            source: None,
            content_digest: None,
        }
    }

    fn resolve(&mut self) -> Result<Vec<u8>> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        if let Some(mut stream) = self.stream.take() {
            let mut content = Vec::new();
            if let Err(e) = stream.read_to_end(&mut content) {
                self.failure = Some(e.to_string());
                return Err(BlobError::from(e).into());
            }
            self.length = content.len() as u64;
            self.content = Some(content.clone());
            return Ok(content);
        }
        self.check_stream()?;
        let Some(digest) = self.digest.clone() else {
            return Err(BlobError::Unsaved.into());
        };
        let Some(source) = &self.source else {
            return Err(BlobError::NotAttached { digest }.into());
        };
        match source.fetch(&digest)? {
            Some(content) => {
                self.content = Some(content.clone());
                Ok(content)
            }
            None => Err(BlobError::ContentMissing { digest }.into()),
        }
    }

    fn check_stream(&self) -> std::result::Result<(), BlobError> {
        match &self.failure {
            Some(reason) => Err(BlobError::StreamFailed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn equality_digest(&mut self) -> Option<String> {
        if let Some(digest) = &self.digest {
            return Some(digest.clone());
        }
        if self.streamed {
            return None;
        }
        if self.content_digest.is_none() {
            self.content_digest = self.content.as_deref().map(digest_of);
        }
        self.content_digest.clone()
    }
}

/// A binary payload stored by digest.
///
/// Clones share state: resolving content or saving through one clone is
/// visible through all of them. Two blobs are equal when their digests are.
#[derive(Clone)]
pub struct Blob {
    inner: Arc<Mutex<BlobState>>,
}

impl Blob {
    /// A blob over in-memory bytes.
    pub fn from_bytes(content_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let mut state = BlobState::new(Some(content_type.into()));
        state.length = content.len() as u64;
        state.content = Some(content);
        Self::with_state(state)
    }

    /// A blob whose content is read from `reader` when first needed.
    ///
    /// The length is unknown (reported as 0) until the content is read or
    /// the blob is saved. Until it is saved the blob is equal only to itself
    /// and its clones. The reader is consumed once: if that read fails, later
    /// reads and saves report [`BlobError::StreamFailed`].
    pub fn from_reader(content_type: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        let mut state = BlobState::new(Some(content_type.into()));
        state.stream = Some(Box::new(reader));
        state.streamed = true;
        Self::with_state(state)
    }

    pub(crate) fn from_metadata(
        digest: String,
        length: u64,
        content_type: Option<String>,
        source: Option<Arc<dyn BlobSource>>,
    ) -> Self {
        let mut state = BlobState::new(content_type);
        state.digest = Some(digest);
        state.length = length;
        state.source = source;
        Self::with_state(state)
    }

    fn with_state(state: BlobState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Digest assigned when the blob was saved.
    pub fn digest(&self) -> Option<String> {
        self.inner.lock().digest.clone()
    }

    /// Content length in bytes.
    pub fn length(&self) -> u64 {
        self.inner.lock().length
    }

    pub fn content_type(&self) -> Option<String> {
        self.inner.lock().content_type.clone()
    }

    /// The content bytes.
    ///
    /// Resolved content is cached, so repeated calls return the same bytes
    /// even after the database the blob came from has been closed.
    pub fn content(&self) -> Result<Vec<u8>> {
        self.inner.lock().resolve()
    }

    /// A reader over the content.
    pub fn content_stream(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.content()?)))
    }

    /// Metadata object that stands in for the blob in JSON.
    pub fn properties(&self) -> std::result::Result<serde_json::Map<String, serde_json::Value>, BlobError> {
        let state = self.inner.lock();
        let digest = state.digest.clone().ok_or(BlobError::Unsaved)?;
        let mut properties = serde_json::Map::new();
        properties.insert(BLOB_TYPE_KEY.into(), BLOB_TYPE.into());
        properties.insert(BLOB_DIGEST_KEY.into(), digest.into());
        properties.insert(BLOB_LENGTH_KEY.into(), state.length.into());
        if let Some(content_type) = &state.content_type {
            properties.insert(BLOB_CONTENT_TYPE_KEY.into(), content_type.clone().into());
        }
        Ok(properties)
    }

    /// JSON text of the metadata object; fails until the blob is saved.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::Value::Object(self.properties()?).to_string())
    }

    /// Store the content in `backend` and bind the blob to `source`.
    ///
    /// Metadata-only blobs whose bytes are nowhere to be found are bound
    /// without storing anything; reading them later reports the missing
    /// content.
    pub(crate) fn install(&self, backend: &dyn Backend, source: &Arc<dyn BlobSource>) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(digest) = state.digest.clone() {
            if !backend.has_blob(&digest)? {
                let available = match (&state.content, &state.source) {
                    (Some(content), _) => Some(content.clone()),
                    (None, Some(previous)) => previous.fetch(&digest)?,
                    (None, None) => None,
                };
                if let Some(content) = available {
                    backend.save_blob(&mut content.as_slice())?;
                }
            }
        } else {
            let key = if let Some(content) = state.content.as_deref() {
                backend.save_blob(&mut &content[..])?
            } else if let Some(mut stream) = state.stream.take() {
                match backend.save_blob(&mut stream) {
                    Ok(key) => key,
                    Err(e) => {
                        state.failure = Some(failure_reason(&e));
                        return Err(e);
                    }
                }
            } else {
                state.check_stream()?;
                return Err(BlobError::Unsaved.into());
            };
            tracing::debug!(digest = %key.digest, length = key.length, "Stored blob");
            state.digest = Some(key.digest);
            state.length = key.length;
        }
        state.source = Some(Arc::clone(source));
        Ok(())
    }

    fn equality_digest(&self) -> Option<String> {
        self.inner.lock().equality_digest()
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        // An unsaved stream is only equal to itself, even once read
        match (self.equality_digest(), other.equality_digest()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Blob {}

impl Hash for Blob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.equality_digest() {
            Some(digest) => digest.hash(state),
            None => UNSAVED_STREAM_HASH.hash(state),
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Blob")
            .field("digest", &state.digest)
            .field("length", &state.length)
            .field("content_type", &state.content_type)
            .finish_non_exhaustive()
    }
}
