use crate::{
    command::{ChunkOperateCommand, ChunkReadCommand},
    exception::UploadResult,
    model::{
        entity::{ArtifactRecord, ArtifactRelease, SessionPatch, UploadSession},
        vo::{AssembleRequest, AssembledArtifact},
    },
    repository::{ArtifactIndexRepo, StatusRepo},
    service::{AssemblyService, ChunkStoreService},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use uuid::Uuid;

mock! {
    pub StatusRepo {}
    #[async_trait]
    impl StatusRepo for StatusRepo {
        async fn get(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>>;
        async fn insert(&self, session: &UploadSession) -> anyhow::Result<()>;
        async fn save(&self, id: Uuid, patch: &SessionPatch) -> anyhow::Result<Option<UploadSession>>;
        async fn delete(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>>;
        async fn purge_idle(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;
    }
}

mock! {
    pub ArtifactIndexRepo {}
    #[async_trait]
    impl ArtifactIndexRepo for ArtifactIndexRepo {
        async fn get_by_hash(&self, hash: &str) -> anyhow::Result<Option<ArtifactRecord>>;
        async fn insert_if_absent(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>>;
        async fn replace(&self, record: &ArtifactRecord) -> anyhow::Result<()>;
        async fn add_referrer(&self, hash: &str, session_id: Uuid) -> anyhow::Result<Option<ArtifactRecord>>;
        async fn release(&self, hash: &str, session_id: Uuid) -> anyhow::Result<ArtifactRelease>;
    }
}

mock! {
    pub ChunkStoreService {}
    #[async_trait]
    impl ChunkStoreService for ChunkStoreService {
        async fn operate(&self, cmd: ChunkOperateCommand) -> anyhow::Result<()>;
        async fn read(&self, cmd: ChunkReadCommand) -> anyhow::Result<Option<Vec<u8>>>;
        async fn exists(&self, session_id: Uuid, index: u64) -> anyhow::Result<bool>;
    }
}

mock! {
    pub AssemblyService {}
    #[async_trait]
    impl AssemblyService for AssemblyService {
        async fn assemble(&self, request: AssembleRequest) -> UploadResult<AssembledArtifact>;
        async fn artifact_exists(&self, artifact: &AssembledArtifact) -> UploadResult<bool>;
        async fn chunks_present(&self, session_id: Uuid, total_chunks: u64) -> UploadResult<bool>;
        async fn discard(&self, artifact: &AssembledArtifact, session_id: Uuid) -> UploadResult<()>;
    }
}
