use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::HashAlgorithm;
use crate::model::entity::ArtifactRecord;

/// Input of one assembly.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub session_id: Uuid,
    pub total_chunks: u64,
    pub file_name: String,
    pub declared_mime_type: String,
    /// Hash the caller expects the assembled bytes to have.
    pub expected_hash: Option<String>,
}

/// Result of an assembly, also kept on the completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledArtifact {
    /// Path relative to the artifact root, `date/uniqueName.ext`.
    pub path: String,
    pub url: String,
    pub content_hash: String,
    pub hash_algorithm: HashAlgorithm,
    pub size: u64,
    /// Whether an already stored artifact with the same hash was reused.
    pub is_duplicate: bool,
}

impl AssembledArtifact {
    pub fn from_record(record: &ArtifactRecord, is_duplicate: bool) -> Self {
        Self {
            path: record.path.to_owned(),
            url: record.url.to_owned(),
            content_hash: record.hash.to_owned(),
            hash_algorithm: record.hash_algorithm,
            size: record.size,
            is_duplicate,
        }
    }
}
