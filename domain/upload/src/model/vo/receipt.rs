use serde::Serialize;
use uuid::Uuid;

use crate::model::entity::SessionState;

/// Parameters of a new upload.
#[derive(Debug, Clone, Default)]
pub struct InitUpload {
    pub file_name: String,
    pub file_size: u64,
    pub declared_mime_type: String,
    pub total_chunks: u64,
}

/// Acknowledgement of a received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub session_id: Uuid,
    pub received_count: u64,
    pub total_chunks: u64,
}

/// State after resuming, with what is already there so the caller can
/// compute the remaining indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReceipt {
    pub state: SessionState,
    pub received_chunks: Vec<u64>,
}
