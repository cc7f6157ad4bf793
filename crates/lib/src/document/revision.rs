//! Revision identifiers.
//!
//! A revision id has the form `<generation>-<hex sha256>`. The generation is
//! one more than the parent's, and the digest covers the parent revision, the
//! deletion flag, the commit sequence and the body, so every commit gets a
//! distinct id even when the body is unchanged.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ordered identifier of one committed generation of a document.
///
/// Ordering is by generation first and digest second, so a later revision of
/// the same document always compares greater than an earlier one.
///
/// The generation prefix is kept in canonical decimal form, so `01-ab` and
/// `1-ab` are the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct RevisionId(String);

impl RevisionId {
    /// Wraps an existing revision string.
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        let canonical = s.split_once('-').and_then(|(generation, digest)| {
            let parsed: u64 = generation.parse().ok()?;
            (parsed.to_string() != generation).then(|| format!("{parsed}-{digest}"))
        });
        Self(canonical.unwrap_or(s))
    }

    /// The revision id of the commit that follows `parent`.
    pub(crate) fn next(
        parent: Option<&RevisionId>,
        deleted: bool,
        sequence: u64,
        body: &[u8],
    ) -> RevisionId {
        let mut hasher = Sha256::new();
        if let Some(parent) = parent {
            hasher.update(parent.as_str().as_bytes());
        }
        hasher.update([0, u8::from(deleted)]);
        hasher.update(sequence.to_be_bytes());
        hasher.update(body);
        let generation = parent.map_or(0, RevisionId::generation) + 1;
        RevisionId(format!("{generation}-{}", hex::encode(hasher.finalize())))
    }

    /// Returns the revision as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of commits in this revision's history, starting at 1.
    ///
    /// Ids not in `<generation>-<digest>` form report generation 0.
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(generation, _)| generation.parse().ok())
            .unwrap_or(0)
    }

    /// The digest part of the id.
    pub fn digest(&self) -> &str {
        self.0.split_once('-').map_or(&self.0, |(_, digest)| digest)
    }
}

// Ties on the parsed parts (`x-ab` against `ab`) are broken on the raw text.
impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation()
            .cmp(&other.generation())
            .then_with(|| self.digest().cmp(other.digest()))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<String> for RevisionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<RevisionId> for String {
    fn from(revision: RevisionId) -> Self {
        revision.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for RevisionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
