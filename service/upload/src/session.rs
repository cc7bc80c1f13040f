use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain_upload::{
    command::ChunkOperateCommand,
    exception::{UploadException, UploadResult},
    model::{
        entity::{SessionPatch, SessionState, UploadSession},
        vo::{
            mime::{check_signature, normalize_mime},
            AssembleRequest, AssembledArtifact, ChunkPart, ChunkReceipt, HashAlgorithm, InitUpload,
            ResumeReceipt,
        },
    },
    repository::StatusRepo,
    service::{AssemblyService, ChunkStoreService, UploadSessionService},
};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(TypedBuilder)]
pub struct UploadSessionServiceImpl {
    status_repo: Arc<dyn StatusRepo>,
    chunk_store: Arc<dyn ChunkStoreService>,
    assembly_service: Arc<dyn AssemblyService>,
}

fn validate(init: &InitUpload) -> UploadResult<()> {
    if init.file_name.trim().is_empty() {
        return Err(UploadException::invalid_argument("file name is blank"));
    }
    if init.declared_mime_type.trim().is_empty() {
        return Err(UploadException::invalid_argument("mime type is blank"));
    }
    if init.file_size == 0 {
        return Err(UploadException::invalid_argument("file is empty"));
    }
    if init.total_chunks < 1 {
        return Err(UploadException::invalid_argument("total chunks must be at least 1"));
    }
    if init.total_chunks > init.file_size {
        return Err(UploadException::invalid_argument(format!(
            "{} chunks can't hold {} bytes without empty chunks",
            init.total_chunks, init.file_size
        )));
    }
    Ok(())
}

impl UploadSessionServiceImpl {
    async fn load(&self, session_id: Uuid) -> UploadResult<UploadSession> {
        self.status_repo
            .get(session_id)
            .await?
            .ok_or(UploadException::SessionNotFound { session_id })
    }

    async fn save(&self, session_id: Uuid, patch: &SessionPatch) -> UploadResult<UploadSession> {
        self.status_repo
            .save(session_id, patch)
            .await?
            .ok_or(UploadException::SessionNotFound { session_id })
    }

    /// Finalize of a session that is already completed.
    async fn finalize_completed(
        &self,
        session: UploadSession,
        expected_hash: Option<String>,
    ) -> UploadResult<AssembledArtifact> {
        let session_id = session.id;
        let Some(artifact) = session.artifact.to_owned() else {
            return Err(UploadException::StorageFailure {
                source: anyhow::anyhow!("Completed session: {session_id} has no artifact"),
            });
        };
        if self.assembly_service.artifact_exists(&artifact).await? {
            if let Some(expected_hash) = expected_hash {
                if !HashAlgorithm::same_digest(&expected_hash, &artifact.content_hash) {
                    return Err(UploadException::IntegrityFailure {
                        session_id,
                        expected_hash: expected_hash.trim().to_uppercase(),
                        computed_hash: artifact.content_hash,
                    });
                }
            }
            return Ok(artifact);
        }
        if !self.assembly_service.chunks_present(session_id, session.total_chunks).await? {
            return Err(UploadException::ArtifactMissing {
                session_id,
                path: artifact.path,
            });
        }
        warn!("Artifact {} of session {session_id} vanished, assembling again", artifact.path);
        self.assemble_and_publish(session, expected_hash).await
    }

    /// Drops received chunks that a failed assembly consumed, so they can be sent again.
    async fn forget_lost_chunks(&self, session: &UploadSession) -> UploadResult<()> {
        let mut lost = BTreeSet::new();
        for index in &session.received_chunks {
            if !self.chunk_store.exists(session.id, *index).await? {
                lost.insert(*index);
            }
        }
        if lost.is_empty() {
            return Ok(());
        }
        warn!("Session {} has to send chunks {lost:?} again", session.id);
        self.status_repo.save(session.id, &SessionPatch::chunks_lost(lost, Utc::now())).await?;
        Ok(())
    }

    /// Assembles and records completion. If the session was cancelled meanwhile,
    /// the new artifact is discarded and the session reported as gone.
    async fn assemble_and_publish(
        &self,
        session: UploadSession,
        expected_hash: Option<String>,
    ) -> UploadResult<AssembledArtifact> {
        let session_id = session.id;
        let artifact = self
            .assembly_service
            .assemble(AssembleRequest {
                session_id,
                total_chunks: session.total_chunks,
                file_name: session.file_name,
                declared_mime_type: session.declared_mime_type,
                expected_hash,
            })
            .await?;
        let patch = SessionPatch::completed(artifact.to_owned(), Utc::now());
        match self.status_repo.save(session_id, &patch).await? {
            Some(_) => {
                info!("Session {session_id} completed as {}", artifact.path);
                Ok(artifact)
            }
            None => {
                info!("Session {session_id} was cancelled during assembly");
                self.assembly_service.discard(&artifact, session_id).await?;
                Err(UploadException::SessionNotFound { session_id })
            }
        }
    }
}

#[async_trait]
impl UploadSessionService for UploadSessionServiceImpl {
    #[tracing::instrument(skip_all, fields(file_name = %init.file_name))]
    async fn init(&self, init: InitUpload) -> UploadResult<Uuid> {
        validate(&init)?;
        let init = InitUpload {
            declared_mime_type: normalize_mime(&init.declared_mime_type),
            ..init
        };
        let session = UploadSession::new(Uuid::new_v4(), init, Utc::now());
        self.status_repo.insert(&session).await?;
        info!(
            "Session {} started for {} in {} chunks",
            session.id, session.file_name, session.total_chunks
        );
        Ok(session.id)
    }

    #[tracing::instrument(skip_all, fields(session_id = %part.session_id, index = part.index))]
    async fn receive_chunk(&self, part: ChunkPart) -> UploadResult<ChunkReceipt> {
        let session_id = part.session_id;
        let index = part.index;
        let session = self.load(session_id).await?;
        match session.state() {
            SessionState::Completed => return Err(UploadException::SessionCompleted { session_id }),
            SessionState::Paused => return Err(UploadException::SessionPaused { session_id }),
            SessionState::Active => {}
        }
        if !session.contains_index(index) {
            return Err(UploadException::ChunkIndexOutOfRange {
                session_id,
                index,
                total_chunks: session.total_chunks,
            });
        }
        if session.received_chunks.contains(&index) {
            debug!("Chunk {index} already received");
            return Ok(ChunkReceipt {
                session_id,
                received_count: session.received_count(),
                total_chunks: session.total_chunks,
            });
        }
        if index == 0 {
            check_signature(&session.declared_mime_type, &part.content)?;
        }

        self.chunk_store.operate(ChunkOperateCommand::WriteChunk(part)).await?;
        let session = match self
            .status_repo
            .save(session_id, &SessionPatch::chunk_received(index, Utc::now()))
            .await?
        {
            Some(session) => session,
            None => {
                // Cancelled between the write and the save.
                self.chunk_store
                    .operate(ChunkOperateCommand::RemoveChunk { session_id, index })
                    .await?;
                return Err(UploadException::SessionNotFound { session_id });
            }
        };
        debug!("Chunk {index} stored, {}/{}", session.received_count(), session.total_chunks);
        Ok(ChunkReceipt {
            session_id,
            received_count: session.received_count(),
            total_chunks: session.total_chunks,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn pause(&self, session_id: Uuid) -> UploadResult<SessionState> {
        let session = self.load(session_id).await?;
        match session.state() {
            SessionState::Completed => Err(UploadException::SessionCompleted { session_id }),
            SessionState::Paused => Ok(SessionState::Paused),
            SessionState::Active => {
                let session = self.save(session_id, &SessionPatch::paused(true, Utc::now())).await?;
                info!("Session {session_id} paused");
                Ok(session.state())
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn resume(&self, session_id: Uuid) -> UploadResult<ResumeReceipt> {
        let session = self.load(session_id).await?;
        let session = match session.state() {
            SessionState::Completed => return Err(UploadException::SessionCompleted { session_id }),
            SessionState::Active => session,
            SessionState::Paused => {
                let session =
                    self.save(session_id, &SessionPatch::paused(false, Utc::now())).await?;
                info!("Session {session_id} resumed");
                session
            }
        };
        Ok(ResumeReceipt {
            state: session.state(),
            received_chunks: session.received_chunks.iter().copied().collect(),
        })
    }

    #[tracing::instrument(skip(self, expected_hash))]
    async fn finalize(
        &self,
        session_id: Uuid,
        expected_hash: Option<String>,
    ) -> UploadResult<AssembledArtifact> {
        let session = self.load(session_id).await?;
        if session.is_completed {
            return self.finalize_completed(session, expected_hash).await;
        }
        let missing = session.missing_chunks();
        if !missing.is_empty() {
            return Err(UploadException::IncompleteUpload {
                session_id,
                missing,
            });
        }
        match self.assemble_and_publish(session, expected_hash.to_owned()).await {
            Ok(artifact) => Ok(artifact),
            Err(e @ UploadException::SessionNotFound { .. }) => Err(e),
            Err(e) => {
                let Some(session) = self.status_repo.get(session_id).await? else {
                    return Err(e);
                };
                if session.is_completed {
                    // A concurrent finalize consumed the chunks first.
                    if let UploadException::MissingChunk { .. } = e {
                        return self.finalize_completed(session, expected_hash).await;
                    }
                    return Err(e);
                }
                if let Err(forget_error) = self.forget_lost_chunks(&session).await {
                    warn!("Failed to record lost chunks of session {session_id}: {forget_error}");
                }
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, session_id: Uuid) -> UploadResult<()> {
        // Status first, an in-flight finalize then fails to publish.
        let removed = self.status_repo.delete(session_id).await?;
        self.chunk_store.operate(ChunkOperateCommand::RemoveSessionDir { session_id }).await?;
        let Some(session) = removed else {
            return Ok(());
        };
        if let Some(artifact) = &session.artifact {
            self.assembly_service.discard(artifact, session_id).await?;
        }
        info!("Session {session_id} cancelled");
        Ok(())
    }

    async fn status(&self, session_id: Uuid) -> UploadResult<UploadSession> {
        self.load(session_id).await
    }
}
