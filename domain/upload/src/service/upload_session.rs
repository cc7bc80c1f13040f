use async_trait::async_trait;
use uuid::Uuid;

use crate::exception::UploadResult;
use crate::model::entity::{SessionState, UploadSession};
use crate::model::vo::{AssembledArtifact, ChunkPart, ChunkReceipt, InitUpload, ResumeReceipt};

/// # Upload session service
///
/// Drives an upload through `Active`, `Paused`, `Completed`, or removal on cancel.
#[async_trait]
pub trait UploadSessionService: Send + Sync {
    /// Start a session. The id is generated here, never chosen by the caller.
    async fn init(&self, init: InitUpload) -> UploadResult<Uuid>;

    /// Store one chunk. Re-sending a received index succeeds without rewriting it.
    async fn receive_chunk(&self, part: ChunkPart) -> UploadResult<ChunkReceipt>;

    async fn pause(&self, session_id: Uuid) -> UploadResult<SessionState>;

    async fn resume(&self, session_id: Uuid) -> UploadResult<ResumeReceipt>;

    /// Assemble a fully received session, or return the stored result if it
    /// is already completed.
    async fn finalize(
        &self,
        session_id: Uuid,
        expected_hash: Option<String>,
    ) -> UploadResult<AssembledArtifact>;

    /// Drop chunks, status and an artifact this session created. Unknown ids are fine.
    async fn cancel(&self, session_id: Uuid) -> UploadResult<()>;

    async fn status(&self, session_id: Uuid) -> UploadResult<UploadSession>;
}
