//! Optimistic concurrency for document writes.
//!
//! Every save and delete is a compare-and-swap against the backend: the write
//! is conditioned on the revision the caller's copy was derived from. When
//! another writer got there first the backend reports a conflict, and the
//! [`ConcurrencyControl`] chosen for the call decides what happens next.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Result,
    backend::{Backend, CommitOutcome, CommitRequest},
    constants::MAX_FORCED_COMMIT_ATTEMPTS,
    database::DatabaseError,
    document::RevisionId,
};

/// Conflict policy for a save or delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyControl {
    /// The caller's write replaces whatever revision is stored.
    #[default]
    LastWriteWins,
    /// A stale write is dropped and reported as `false`.
    FailOnConflict,
}

/// A revision that landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Committed {
    pub(crate) revision_id: RevisionId,
    pub(crate) sequence: u64,
}

/// Commit `request`, resolving conflicts with `policy`.
///
/// Returns None when `policy` is [`ConcurrencyControl::FailOnConflict`] and
/// the stored revision has moved; nothing is written in that case. Under
/// last-write-wins the commit is re-issued against the revision that beat
/// it, up to [`MAX_FORCED_COMMIT_ATTEMPTS`] times.
pub(crate) fn commit(
    backend: &dyn Backend,
    mut request: CommitRequest,
    policy: ConcurrencyControl,
) -> Result<Option<Committed>> {
    match backend.commit(request.clone())? {
        CommitOutcome::Committed {
            revision_id,
            sequence,
        } => {
            debug!(
                collection = %request.collection,
                doc_id = %request.doc_id,
                deletion = request.is_deletion,
                %revision_id,
                sequence,
                "Committed"
            );
            return Ok(Some(Committed {
                revision_id,
                sequence,
            }));
        }
        CommitOutcome::Conflict { current } => {
            if policy == ConcurrencyControl::FailOnConflict {
                debug!(doc_id = %request.doc_id, current = ?current, "Conflict, write dropped");
                return Ok(None);
            }
            debug!(doc_id = %request.doc_id, current = ?current, "Conflict, forcing write");
            request.expected_revision = current;
        }
    }

    for attempt in 1..=MAX_FORCED_COMMIT_ATTEMPTS {
        match backend.commit(request.clone())? {
            CommitOutcome::Committed {
                revision_id,
                sequence,
            } => {
                debug!(
                    doc_id = %request.doc_id,
                    %revision_id,
                    sequence,
                    attempt,
                    "Forced commit landed"
                );
                return Ok(Some(Committed {
                    revision_id,
                    sequence,
                }));
            }
            CommitOutcome::Conflict { current } => {
                request.expected_revision = current;
            }
        }
    }

    warn!(
        collection = %request.collection,
        doc_id = %request.doc_id,
        attempts = MAX_FORCED_COMMIT_ATTEMPTS,
        "Forced commit kept losing to concurrent writers"
    );
    Err(DatabaseError::Busy {
        reason: format!(
            "document {} changed on every one of {MAX_FORCED_COMMIT_ATTEMPTS} forced commits",
            request.doc_id
        ),
    }
    .into())
}
