//! Persistence operations for the InMemory backend
//!
//! This module handles serialization and file I/O for saving/loading
//! the in-memory store to/from JSON files. Bodies and blob content are
//! written as base64 strings.

use std::collections::BTreeMap;
use std::path::Path;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Deserializer, Serialize};

use super::{CollectionState, InMemory, StoreState};
use crate::{
    Error, Result,
    backend::{StoredDocument, errors::BackendError},
    document::RevisionId,
};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

/// Helper to check if version is default (0) for serde skip_serializing_if
fn is_v0(v: &u8) -> bool {
    *v == 0
}

/// Validates the persistence version during deserialization.
fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        Base64::decode_vec(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct SerializableDocument {
    revision_id: RevisionId,
    sequence: u64,
    #[serde(default)]
    deleted: bool,
    #[serde(with = "base64_bytes")]
    body: Vec<u8>,
}

#[derive(Serialize, Deserialize, Default)]
struct SerializableCollection {
    #[serde(default)]
    documents: BTreeMap<String, SerializableDocument>,
    #[serde(default)]
    expiry: BTreeMap<String, u64>,
}

/// Serializable version of the InMemory store for persistence
#[derive(Serialize, Deserialize)]
struct SerializableStore {
    /// File format version for compatibility checking
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    collections: BTreeMap<String, SerializableCollection>,
    /// Blob content keyed by digest, base64 encoded
    #[serde(default)]
    blobs: BTreeMap<String, String>,
    #[serde(default)]
    last_sequence: u64,
}

impl From<&StoreState> for SerializableStore {
    fn from(state: &StoreState) -> Self {
        let collections = state
            .collections
            .iter()
            .map(|(name, coll)| {
                let documents = coll
                    .documents
                    .iter()
                    .map(|(doc_id, stored)| {
                        (
                            doc_id.clone(),
                            SerializableDocument {
                                revision_id: stored.revision_id.clone(),
                                sequence: stored.sequence,
                                deleted: stored.is_deleted,
                                body: stored.body.clone(),
                            },
                        )
                    })
                    .collect();
                (
                    name.clone(),
                    SerializableCollection {
                        documents,
                        expiry: coll.expiry.clone(),
                    },
                )
            })
            .collect();
        Self {
            version: PERSISTENCE_VERSION,
            collections,
            blobs: state
                .blobs
                .iter()
                .map(|(digest, content)| (digest.clone(), Base64::encode_string(content)))
                .collect(),
            last_sequence: state.last_sequence,
        }
    }
}

impl TryFrom<SerializableStore> for StoreState {
    type Error = Error;

    fn try_from(store: SerializableStore) -> Result<Self> {
        let collections = store
            .collections
            .into_iter()
            .map(|(name, coll)| {
                let documents = coll
                    .documents
                    .into_iter()
                    .map(|(doc_id, doc)| {
                        (
                            doc_id,
                            StoredDocument {
                                revision_id: doc.revision_id,
                                sequence: doc.sequence,
                                is_deleted: doc.deleted,
                                body: doc.body,
                            },
                        )
                    })
                    .collect();
                (
                    name,
                    CollectionState {
                        documents,
                        expiry: coll.expiry,
                    },
                )
            })
            .collect();
        let blobs = store
            .blobs
            .into_iter()
            .map(|(digest, encoded)| {
                Base64::decode_vec(&encoded)
                    .map(|content| (digest, content))
                    .map_err(|e| -> Error {
                        BackendError::DeserializationFailed {
                            source: serde::de::Error::custom(e),
                        }
                        .into()
                    })
            })
            .collect::<Result<_>>()?;
        Ok(StoreState {
            collections,
            blobs,
            last_sequence: store.last_sequence,
        })
    }
}

/// Saves the entire store to a specified file as JSON.
pub(crate) fn save_to_file<P: AsRef<Path>>(backend: &InMemory, path: P) -> Result<()> {
    let serializable = SerializableStore::from(&*backend.state.read());
    let json = serde_json::to_string_pretty(&serializable)
        .map_err(|e| -> Error { BackendError::SerializationFailed { source: e }.into() })?;
    std::fs::write(path, json).map_err(|e| -> Error { BackendError::FileIo { source: e }.into() })
}

/// Loads the store from a specified JSON file.
///
/// If the file does not exist, a new, empty `InMemory` backend is returned.
pub(crate) fn load_from_file<P: AsRef<Path>>(path: P) -> Result<InMemory> {
    match std::fs::read_to_string(path) {
        Ok(json) => {
            let store: SerializableStore = serde_json::from_str(&json).map_err(|e| -> Error {
                BackendError::DeserializationFailed { source: e }.into()
            })?;
            Ok(InMemory::from_state(store.try_into()?))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InMemory::new()),
        Err(e) => Err(BackendError::FileIo { source: e }.into()),
    }
}
