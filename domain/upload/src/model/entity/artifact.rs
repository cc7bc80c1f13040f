use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::vo::HashAlgorithm;

/// Dedup index entry: one stored artifact per content hash.
///
/// Many sessions may resolve to the same record. The index keeps the set of
/// sessions referring to it, the owner included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    /// Content hash of the whole file.
    pub hash: String,
    pub hash_algorithm: HashAlgorithm,
    /// Path relative to the artifact root.
    pub path: String,
    pub url: String,
    pub size: u64,
    /// The session whose assembly wrote the file.
    pub owner_session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a session letting go of an indexed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRelease {
    /// Nothing is registered for the hash.
    Unregistered,
    /// Other sessions still refer to the artifact, or this one never did.
    Retained,
    /// The session was the last referrer, the record is unregistered.
    Released(ArtifactRecord),
}
