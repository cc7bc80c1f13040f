use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use domain_upload::{
    command::{ChunkOperateCommand, ChunkReadCommand},
    exception::{UploadException, UploadResult},
    model::{
        entity::{ArtifactRecord, ArtifactRelease},
        vo::{mime::check_signature, AssembleRequest, AssembledArtifact, HashAlgorithm},
    },
    repository::ArtifactIndexRepo,
    service::{AssemblyService, ChunkStoreService},
};
use rand::{distributions::Alphanumeric, Rng};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use url::Url;
use uuid::Uuid;

/// Directory under the artifact root holding in-flight assemblies.
pub const STAGING_DIR: &str = ".staging";

/// Bytes of chunk 0 handed to the signature check.
const SNIFF_LEN: usize = 64;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Attempts of registering against a record released between the insert and the join.
const REGISTER_ATTEMPTS: usize = 3;

#[derive(TypedBuilder)]
pub struct AssemblyServiceImpl {
    chunk_store: Arc<dyn ChunkStoreService>,
    artifact_index: Arc<dyn ArtifactIndexRepo>,
    #[builder(default = "data/artifacts".into(), setter(into))]
    artifact_base: PathBuf,
    /// Artifact urls are this joined with the relative artifact path.
    public_base_url: Url,
}

/// `<stem>_<token>.<ext>` from the base name of a client file name.
fn unique_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    let stem = match clean(stem) {
        s if s.is_empty() => "upload".to_owned(),
        s => s,
    };
    let token: String =
        rand::thread_rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    match ext {
        Some(ext) => format!("{stem}_{token}.{}", clean(ext)),
        None => format!("{stem}_{token}"),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {path:?}: {e}");
        }
    }
}

/// Whole-file hash, rendered as uppercase hex.
async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_string().to_uppercase())
}

impl AssemblyServiceImpl {
    fn artifact_path(&self, relative: &str) -> PathBuf {
        self.artifact_base.join(relative)
    }

    fn staging_path(&self, session_id: Uuid) -> PathBuf {
        // Concurrent finalize calls of one session each get their own file.
        self.artifact_base
            .join(STAGING_DIR)
            .join(format!("{session_id}-{}", Uuid::new_v4().simple()))
    }

    /// Streams chunks in index order into `staging`, removing each one once written.
    async fn write_staging(
        &self,
        session_id: Uuid,
        total_chunks: u64,
        staging: &Path,
    ) -> UploadResult<u64> {
        let mut file = tokio::fs::File::create(staging).await?;
        let mut size = 0;
        for index in 0..total_chunks {
            let content = self
                .chunk_store
                .read(ChunkReadCommand::ReadChunk { session_id, index })
                .await?
                .ok_or(UploadException::MissingChunk { session_id, index })?;
            file.write_all(&content).await?;
            size += content.len() as u64;
            if let Err(e) = self
                .chunk_store
                .operate(ChunkOperateCommand::RemoveChunk { session_id, index })
                .await
            {
                warn!("Failed to remove consumed chunk {index} of session {session_id}: {e}");
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(size)
    }

    /// Builds a staged, hashed artifact. The staging file is gone on error.
    async fn stage(&self, session_id: Uuid, total_chunks: u64) -> UploadResult<(PathBuf, String, u64)> {
        let staging = self.staging_path(session_id);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = match self.write_staging(session_id, total_chunks, &staging).await {
            Ok(size) => size,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e);
            }
        };
        // Hashing starts only once the whole stream is on disk.
        match hash_file(&staging).await {
            Ok(hash) => Ok((staging, hash, size)),
            Err(e) => {
                remove_quietly(&staging).await;
                Err(e.into())
            }
        }
    }

    /// Moves the staged file to its date bucket.
    async fn publish(
        &self,
        staging: &Path,
        file_name: &str,
        hash: String,
        size: u64,
        session_id: Uuid,
    ) -> UploadResult<ArtifactRecord> {
        let now = Utc::now();
        let relative = format!("{}/{}", now.format("%Y-%m-%d"), unique_file_name(file_name));
        let url = self.public_base_url.join(&relative).map_err(anyhow::Error::from)?;
        let path = self.artifact_path(&relative);
        let moved = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(staging, &path).await
        };
        if let Err(e) = moved.await {
            remove_quietly(staging).await;
            return Err(e.into());
        }
        Ok(ArtifactRecord {
            hash,
            hash_algorithm: HashAlgorithm::Blake3,
            path: relative,
            url: url.to_string(),
            size,
            owner_session_id: session_id,
            created_at: now,
        })
    }

    async fn exists_on_disk(&self, relative: &str) -> UploadResult<bool> {
        Ok(tokio::fs::try_exists(self.artifact_path(relative)).await?)
    }

    /// Joins the stored artifact of `hash` as a referrer, if its file is still there.
    async fn join_existing(&self, hash: &str, session_id: Uuid) -> UploadResult<Existing> {
        let Some(existing) = self.artifact_index.get_by_hash(hash).await? else {
            return Ok(Existing::Absent);
        };
        if !self.exists_on_disk(&existing.path).await? {
            return Ok(Existing::Stale(existing));
        }
        Ok(match self.artifact_index.add_referrer(hash, session_id).await? {
            Some(joined) => Existing::Joined(joined),
            // Released by its last referrer in between.
            None => Existing::Absent,
        })
    }

    /// Registers a published record, or joins the record that holds its hash already.
    async fn register(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>> {
        for _ in 0..REGISTER_ATTEMPTS {
            let Some(winner) = self.artifact_index.insert_if_absent(record).await? else {
                return Ok(None);
            };
            if let Some(winner) =
                self.artifact_index.add_referrer(&winner.hash, record.owner_session_id).await?
            {
                return Ok(Some(winner));
            }
        }
        bail!("Dedup record of hash: {} keeps changing", record.hash)
    }
}

enum Existing {
    Absent,
    /// Registered, but its file is gone.
    Stale(ArtifactRecord),
    Joined(ArtifactRecord),
}

#[async_trait]
impl AssemblyService for AssemblyServiceImpl {
    #[tracing::instrument(skip_all, fields(session_id = %request.session_id))]
    async fn assemble(&self, request: AssembleRequest) -> UploadResult<AssembledArtifact> {
        let AssembleRequest {
            session_id,
            total_chunks,
            file_name,
            declared_mime_type,
            expected_hash,
        } = request;

        let head = self
            .chunk_store
            .read(ChunkReadCommand::ReadHead {
                session_id,
                index: 0,
                len: SNIFF_LEN,
            })
            .await?
            .ok_or(UploadException::MissingChunk {
                session_id,
                index: 0,
            })?;
        check_signature(&declared_mime_type, &head)?;

        let (staging, hash, size) = self.stage(session_id, total_chunks).await?;
        if let Err(e) =
            self.chunk_store.operate(ChunkOperateCommand::RemoveSessionDir { session_id }).await
        {
            warn!("Failed to remove chunk dir of session {session_id}: {e}");
        }

        if let Some(expected_hash) = expected_hash {
            if !HashAlgorithm::same_digest(&expected_hash, &hash) {
                remove_quietly(&staging).await;
                return Err(UploadException::IntegrityFailure {
                    session_id,
                    expected_hash: expected_hash.trim().to_uppercase(),
                    computed_hash: hash,
                });
            }
        }

        let existing = match self.join_existing(&hash, session_id).await {
            Ok(existing) => existing,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e);
            }
        };
        match existing {
            Existing::Joined(existing) => {
                remove_quietly(&staging).await;
                info!("Session {session_id} deduplicated onto {}", existing.path);
                return Ok(AssembledArtifact::from_record(&existing, true));
            }
            Existing::Stale(stale) => {
                warn!("Dedup entry {} points at a missing artifact, replacing it", stale.hash);
                let record = self.publish(&staging, &file_name, hash, size, session_id).await?;
                if let Err(e) = self.artifact_index.replace(&record).await {
                    remove_quietly(&self.artifact_path(&record.path)).await;
                    return Err(e.into());
                }
                info!("Session {session_id} assembled into {}", record.path);
                return Ok(AssembledArtifact::from_record(&record, false));
            }
            Existing::Absent => {}
        }

        let record = self.publish(&staging, &file_name, hash, size, session_id).await?;
        match self.register(&record).await {
            Ok(None) => {
                info!("Session {session_id} assembled into {}", record.path);
                Ok(AssembledArtifact::from_record(&record, false))
            }
            Ok(Some(winner)) => {
                // Lost a race on the same hash, keep the winner's file.
                remove_quietly(&self.artifact_path(&record.path)).await;
                info!("Session {session_id} deduplicated onto {}", winner.path);
                Ok(AssembledArtifact::from_record(&winner, true))
            }
            Err(e) => {
                remove_quietly(&self.artifact_path(&record.path)).await;
                Err(e.into())
            }
        }
    }

    async fn artifact_exists(&self, artifact: &AssembledArtifact) -> UploadResult<bool> {
        self.exists_on_disk(&artifact.path).await
    }

    async fn chunks_present(&self, session_id: Uuid, total_chunks: u64) -> UploadResult<bool> {
        for index in 0..total_chunks {
            if !self.chunk_store.exists(session_id, index).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn discard(&self, artifact: &AssembledArtifact, session_id: Uuid) -> UploadResult<()> {
        let path = match self.artifact_index.release(&artifact.content_hash, session_id).await? {
            ArtifactRelease::Released(record) => record.path,
            ArtifactRelease::Retained => {
                debug!("Artifact {} is still referred to by other sessions", artifact.path);
                return Ok(());
            }
            ArtifactRelease::Unregistered if artifact.is_duplicate => return Ok(()),
            ArtifactRelease::Unregistered => artifact.path.to_owned(),
        };
        remove_quietly(&self.artifact_path(&path)).await;
        info!("Discarded artifact {path} of session {session_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain_upload::{
        mock::MockArtifactIndexRepo,
        model::vo::ChunkPart,
    };

    use super::*;
    use crate::{LocalChunkStoreServiceImpl, MemoryArtifactIndexRepo};

    struct Fixture {
        _dir: tempfile::TempDir,
        chunk_store: Arc<LocalChunkStoreServiceImpl>,
        artifact_base: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let chunk_store =
                Arc::new(LocalChunkStoreServiceImpl::builder().base(dir.path().join("chunks")).build());
            let artifact_base = dir.path().join("artifacts");
            Self {
                _dir: dir,
                chunk_store,
                artifact_base,
            }
        }

        fn service(&self, index: Arc<dyn ArtifactIndexRepo>) -> AssemblyServiceImpl {
            AssemblyServiceImpl::builder()
                .chunk_store(self.chunk_store.clone())
                .artifact_index(index)
                .artifact_base(self.artifact_base.clone())
                .public_base_url(Url::parse("http://localhost:8080/files/").unwrap())
                .build()
        }

        async fn put(&self, session_id: Uuid, chunks: &[&[u8]]) {
            for (index, content) in chunks.iter().enumerate() {
                self.chunk_store
                    .operate(ChunkOperateCommand::WriteChunk(ChunkPart {
                        session_id,
                        content: content.to_vec(),
                        index: index as u64,
                    }))
                    .await
                    .unwrap();
            }
        }
    }

    fn request(session_id: Uuid, total_chunks: u64) -> AssembleRequest {
        AssembleRequest {
            session_id,
            total_chunks,
            file_name: "../notes/report.final.txt".to_owned(),
            declared_mime_type: "text/plain".to_owned(),
            expected_hash: None,
        }
    }

    #[test]
    fn unique_name_keeps_base_and_extension() {
        let name = unique_file_name("../../etc/my photo.png");
        assert!(name.starts_with("my_photo_"), "{name}");
        assert!(name.ends_with(".png"), "{name}");
        assert_ne!(unique_file_name("a.png"), unique_file_name("a.png"));
        assert!(unique_file_name("C:\\tmp\\README").starts_with("README_"));
        assert!(unique_file_name(".bashrc").starts_with("_bashrc_"));
    }

    #[tokio::test]
    async fn assembles_in_index_order_and_consumes_chunks() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"alpha ", b"beta ", b"gamma"]).await;

        let artifact = service.assemble(request(session_id, 3)).await.unwrap();

        let content = tokio::fs::read(fixture.artifact_base.join(&artifact.path)).await.unwrap();
        assert_eq!(content, b"alpha beta gamma");
        assert_eq!(artifact.content_hash, blake3::hash(b"alpha beta gamma").to_string().to_uppercase());
        assert_eq!(artifact.size, 16);
        assert!(!artifact.is_duplicate);
        let date = Utc::now().format("%Y-%m-%d").to_string();
        assert!(artifact.path.starts_with(&format!("{date}/report_final_")), "{}", artifact.path);
        assert!(artifact.path.ends_with(".txt"));
        assert_eq!(artifact.url, format!("http://localhost:8080/files/{}", artifact.path));
        assert!(!service.chunks_present(session_id, 1).await.unwrap());
        assert!(service.artifact_exists(&artifact).await.unwrap());
    }

    #[tokio::test]
    async fn missing_chunk_leaves_no_artifact() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"alpha ", b"beta "]).await;

        let err = service.assemble(request(session_id, 3)).await.unwrap_err();
        assert!(matches!(err, UploadException::MissingChunk { index: 2, .. }), "{err:?}");

        let mut staged = tokio::fs::read_dir(fixture.artifact_base.join(STAGING_DIR)).await.unwrap();
        assert!(staged.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identical_content_is_deduplicated() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fixture.put(a, &[b"same ", b"bytes"]).await;
        fixture.put(b, &[b"same by", b"tes"]).await;

        let first = service.assemble(request(a, 2)).await.unwrap();
        let second = service.assemble(request(b, 2)).await.unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.path, second.path);
        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
    }

    #[tokio::test]
    async fn stale_dedup_entry_is_replaced() {
        let fixture = Fixture::new();
        let index = Arc::new(MemoryArtifactIndexRepo::new());
        let service = fixture.service(index.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fixture.put(a, &[b"payload"]).await;
        let first = service.assemble(request(a, 1)).await.unwrap();
        tokio::fs::remove_file(fixture.artifact_base.join(&first.path)).await.unwrap();

        fixture.put(b, &[b"payload"]).await;
        let second = service.assemble(request(b, 1)).await.unwrap();
        assert!(!second.is_duplicate);
        assert_ne!(first.path, second.path);
        let record = index.get_by_hash(&second.content_hash).await.unwrap().unwrap();
        assert_eq!(record.owner_session_id, b);
    }

    #[tokio::test]
    async fn expected_hash_mismatch_reports_both() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"content"]).await;
        let mut req = request(session_id, 1);
        req.expected_hash = Some("deadbeef".to_owned());

        match service.assemble(req).await.unwrap_err() {
            UploadException::IntegrityFailure {
                expected_hash,
                computed_hash,
                ..
            } => {
                assert_eq!(expected_hash, "DEADBEEF");
                assert_eq!(computed_hash, blake3::hash(b"content").to_string().to_uppercase());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expected_hash_is_case_insensitive() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"content"]).await;
        let mut req = request(session_id, 1);
        req.expected_hash = Some(blake3::hash(b"content").to_string());
        service.assemble(req).await.unwrap();
    }

    #[tokio::test]
    async fn chunk_zero_is_revalidated() {
        let fixture = Fixture::new();
        let service = fixture.service(Arc::new(MemoryArtifactIndexRepo::new()));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"MZ\x90\x00 not a picture"]).await;
        let mut req = request(session_id, 1);
        req.declared_mime_type = "image/png".to_owned();

        let err = service.assemble(req).await.unwrap_err();
        assert_eq!(err.kind(), "TypeMismatch");
        // Nothing was consumed.
        assert!(service.chunks_present(session_id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn index_failure_removes_published_file() {
        let fixture = Fixture::new();
        let mut index = MockArtifactIndexRepo::new();
        index.expect_get_by_hash().returning(|_| Ok(None));
        index
            .expect_insert_if_absent()
            .returning(|_| Err(anyhow::anyhow!("index unavailable")));
        let service = fixture.service(Arc::new(index));
        let session_id = Uuid::new_v4();
        fixture.put(session_id, &[b"content"]).await;

        let err = service.assemble(request(session_id, 1)).await.unwrap_err();
        assert_eq!(err.kind(), "StorageFailure");
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut bucket = tokio::fs::read_dir(fixture.artifact_base.join(date)).await.unwrap();
        assert!(bucket.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn discard_only_touches_owned_artifacts() {
        let fixture = Fixture::new();
        let index = Arc::new(MemoryArtifactIndexRepo::new());
        let service = fixture.service(index.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fixture.put(a, &[b"shared"]).await;
        fixture.put(b, &[b"shared"]).await;
        let original = service.assemble(request(a, 1)).await.unwrap();
        let duplicate = service.assemble(request(b, 1)).await.unwrap();

        service.discard(&duplicate, b).await.unwrap();
        assert!(service.artifact_exists(&original).await.unwrap());

        service.discard(&original, a).await.unwrap();
        assert!(!service.artifact_exists(&original).await.unwrap());
        assert!(index.get_by_hash(&original.content_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_discard_keeps_shared_artifact() {
        let fixture = Fixture::new();
        let index = Arc::new(MemoryArtifactIndexRepo::new());
        let service = fixture.service(index.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fixture.put(a, &[b"shared"]).await;
        fixture.put(b, &[b"shared"]).await;
        let original = service.assemble(request(a, 1)).await.unwrap();
        let duplicate = service.assemble(request(b, 1)).await.unwrap();

        service.discard(&original, a).await.unwrap();
        assert!(service.artifact_exists(&duplicate).await.unwrap());
        assert!(index.get_by_hash(&duplicate.content_hash).await.unwrap().is_some());

        service.discard(&duplicate, b).await.unwrap();
        assert!(!service.artifact_exists(&duplicate).await.unwrap());
        assert!(index.get_by_hash(&duplicate.content_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn released_record_is_not_joined() {
        let fixture = Fixture::new();
        let index = Arc::new(MemoryArtifactIndexRepo::new());
        let service = fixture.service(index.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fixture.put(a, &[b"gone"]).await;
        let original = service.assemble(request(a, 1)).await.unwrap();
        service.discard(&original, a).await.unwrap();

        fixture.put(b, &[b"gone"]).await;
        let fresh = service.assemble(request(b, 1)).await.unwrap();
        assert!(!fresh.is_duplicate);
        assert!(service.artifact_exists(&fresh).await.unwrap());
        let record = index.get_by_hash(&fresh.content_hash).await.unwrap().unwrap();
        assert_eq!(record.owner_session_id, b);
    }
}
