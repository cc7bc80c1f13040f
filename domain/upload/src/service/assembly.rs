use async_trait::async_trait;
use uuid::Uuid;

use crate::exception::UploadResult;
use crate::model::vo::{AssembleRequest, AssembledArtifact};

/// # Assembly service
///
/// Merges the chunks of a fully received session into one artifact, hashes it
/// and deduplicates it against already stored artifacts. Consumed chunks are
/// removed from the chunk store.
#[async_trait]
pub trait AssemblyService: Send + Sync {
    /// Assemble chunks `0..total_chunks` in index order.
    ///
    /// A missing chunk aborts with `MissingChunk`, an expected hash that
    /// doesn't match aborts with `IntegrityFailure`. In both cases no artifact
    /// is left behind.
    async fn assemble(&self, request: AssembleRequest) -> UploadResult<AssembledArtifact>;

    /// Whether the artifact file is still on disk.
    async fn artifact_exists(&self, artifact: &AssembledArtifact) -> UploadResult<bool>;

    /// Whether every chunk of the session is still stored.
    async fn chunks_present(&self, session_id: Uuid, total_chunks: u64) -> UploadResult<bool>;

    /// Let go of `session_id`'s reference to an artifact.
    ///
    /// The file and its dedup entry are removed once no other session refers to them.
    async fn discard(&self, artifact: &AssembledArtifact, session_id: Uuid) -> UploadResult<()>;
}
