use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_upload::{
    model::entity::{ArtifactRecord, ArtifactRelease, SessionPatch, UploadSession},
    repository::{ArtifactIndexRepo, StatusRepo},
};
use redis::RedisError;
use service_upload::{MemoryArtifactIndexRepo, MemoryStatusRepo};
use tracing::warn;
use uuid::Uuid;

/// Whether the error means the cache can't be reached, rather than a failed call.
fn is_unavailable(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| match cause.downcast_ref::<RedisError>() {
        Some(redis_error) => {
            redis_error.is_io_error()
                || redis_error.is_connection_dropped()
                || redis_error.is_connection_refusal()
                || redis_error.is_timeout()
        }
        None => cause.is::<std::io::Error>(),
    })
}

/// Latches onto the in-process store after the primary becomes unreachable.
struct Degradation {
    store: &'static str,
    degraded: AtomicBool,
}

impl Degradation {
    fn new(store: &'static str) -> Self {
        Self {
            store,
            degraded: AtomicBool::new(false),
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Other failures are handed back to the caller.
    fn degrade(&self, e: anyhow::Error) -> anyhow::Result<()> {
        if !is_unavailable(&e) {
            return Err(e);
        }
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!("{} cache unavailable, using in-process table from now on: {e:#}", self.store);
        }
        Ok(())
    }
}

/// Status store that never fails because of the cache.
pub struct FallbackStatusRepo {
    primary: Arc<dyn StatusRepo>,
    fallback: MemoryStatusRepo,
    degradation: Degradation,
}

impl FallbackStatusRepo {
    pub fn new(primary: Arc<dyn StatusRepo>) -> Self {
        Self {
            primary,
            fallback: MemoryStatusRepo::new(),
            degradation: Degradation::new("Status"),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_degraded()
    }
}

#[async_trait]
impl StatusRepo for FallbackStatusRepo {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        if !self.is_degraded() {
            match self.primary.get(id).await {
                Ok(session) => return Ok(session),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.get(id).await
    }

    async fn insert(&self, session: &UploadSession) -> anyhow::Result<()> {
        if !self.is_degraded() {
            match self.primary.insert(session).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.insert(session).await
    }

    async fn save(&self, id: Uuid, patch: &SessionPatch) -> anyhow::Result<Option<UploadSession>> {
        if !self.is_degraded() {
            match self.primary.save(id, patch).await {
                Ok(session) => return Ok(session),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.save(id, patch).await
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        if !self.is_degraded() {
            match self.primary.delete(id).await {
                Ok(session) => return Ok(session),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.delete(id).await
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let mut purged = self.fallback.purge_idle(cutoff).await?;
        if !self.is_degraded() {
            match self.primary.purge_idle(cutoff).await {
                Ok(ids) => purged.extend(ids),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        Ok(purged)
    }
}

/// Dedup index that never fails because of the cache.
pub struct FallbackArtifactIndexRepo {
    primary: Arc<dyn ArtifactIndexRepo>,
    fallback: MemoryArtifactIndexRepo,
    degradation: Degradation,
}

impl FallbackArtifactIndexRepo {
    pub fn new(primary: Arc<dyn ArtifactIndexRepo>) -> Self {
        Self {
            primary,
            fallback: MemoryArtifactIndexRepo::new(),
            degradation: Degradation::new("Dedup index"),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_degraded()
    }
}

#[async_trait]
impl ArtifactIndexRepo for FallbackArtifactIndexRepo {
    async fn get_by_hash(&self, hash: &str) -> anyhow::Result<Option<ArtifactRecord>> {
        if !self.is_degraded() {
            match self.primary.get_by_hash(hash).await {
                Ok(record) => return Ok(record),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.get_by_hash(hash).await
    }

    async fn insert_if_absent(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>> {
        if !self.is_degraded() {
            match self.primary.insert_if_absent(record).await {
                Ok(existing) => return Ok(existing),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.insert_if_absent(record).await
    }

    async fn replace(&self, record: &ArtifactRecord) -> anyhow::Result<()> {
        if !self.is_degraded() {
            match self.primary.replace(record).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.replace(record).await
    }

    async fn add_referrer(&self, hash: &str, session_id: Uuid) -> anyhow::Result<Option<ArtifactRecord>> {
        if !self.is_degraded() {
            match self.primary.add_referrer(hash, session_id).await {
                Ok(record) => return Ok(record),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.add_referrer(hash, session_id).await
    }

    async fn release(&self, hash: &str, session_id: Uuid) -> anyhow::Result<ArtifactRelease> {
        if !self.is_degraded() {
            match self.primary.release(hash, session_id).await {
                Ok(release) => return Ok(release),
                Err(e) => self.degradation.degrade(e)?,
            }
        }
        self.fallback.release(hash, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use domain_upload::{
        mock::{MockArtifactIndexRepo, MockStatusRepo},
        model::vo::{HashAlgorithm, InitUpload},
    };

    use super::*;

    fn refused() -> anyhow::Error {
        let io_error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        RedisError::from(io_error).into()
    }

    fn session() -> UploadSession {
        UploadSession::new(
            Uuid::new_v4(),
            InitUpload {
                file_name: "a.txt".to_owned(),
                file_size: 3,
                declared_mime_type: "text/plain".to_owned(),
                total_chunks: 3,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn failing_primary_switches_to_memory() {
        let mut primary = MockStatusRepo::new();
        primary.expect_insert().times(1).returning(|_| Err(refused()));
        primary.expect_get().never();
        primary.expect_save().never();
        let repo = FallbackStatusRepo::new(Arc::new(primary));
        let s = session();

        repo.insert(&s).await.unwrap();
        assert!(repo.is_degraded());
        let merged = repo.save(s.id, &SessionPatch::chunk_received(1, Utc::now())).await.unwrap();
        assert_eq!(merged.unwrap().received_count(), 1);
        assert_eq!(repo.get(s.id).await.unwrap().unwrap().received_count(), 1);
    }

    #[tokio::test]
    async fn healthy_primary_serves_everything() {
        let s = session();
        let stored = s.to_owned();
        let mut primary = MockStatusRepo::new();
        primary.expect_get().returning(move |_| Ok(Some(stored.to_owned())));
        let repo = FallbackStatusRepo::new(Arc::new(primary));

        assert_eq!(repo.get(s.id).await.unwrap(), Some(s));
        assert!(!repo.is_degraded());
    }

    #[tokio::test]
    async fn failed_call_keeps_the_primary() {
        let s = session();
        let stored = s.to_owned();
        let mut primary = MockStatusRepo::new();
        primary
            .expect_save()
            .times(1)
            .returning(|id, _| Err(anyhow::anyhow!("Failed lock retry for upload session: {id}")));
        primary.expect_get().times(1).returning(|_| {
            let malformed = RedisError::from((redis::ErrorKind::TypeError, "malformed record"));
            Err(malformed.into())
        });
        primary.expect_delete().times(1).returning(move |_| Ok(Some(stored.to_owned())));
        let repo = FallbackStatusRepo::new(Arc::new(primary));

        assert!(repo.save(s.id, &SessionPatch::chunk_received(0, Utc::now())).await.is_err());
        assert!(repo.get(s.id).await.is_err());
        assert!(!repo.is_degraded());
        assert_eq!(repo.delete(s.id).await.unwrap(), Some(s));
    }

    #[test]
    fn only_connectivity_errors_degrade() {
        assert!(is_unavailable(&refused()));
        assert!(is_unavailable(&refused().context("Failed to save upload status")));
        assert!(!is_unavailable(&anyhow::anyhow!("Failed lock retry")));
        let decode_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!is_unavailable(&anyhow::Error::from(decode_error)));
    }

    #[tokio::test]
    async fn index_failure_is_not_surfaced() {
        let mut primary = MockArtifactIndexRepo::new();
        primary.expect_get_by_hash().times(1).returning(|_| Err(refused()));
        let repo = FallbackArtifactIndexRepo::new(Arc::new(primary));
        let record = ArtifactRecord {
            hash: "AB".to_owned(),
            hash_algorithm: HashAlgorithm::Blake3,
            path: "2026-10-18/a_x.txt".to_owned(),
            url: "http://localhost:8080/files/2026-10-18/a_x.txt".to_owned(),
            size: 3,
            owner_session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        assert_eq!(repo.get_by_hash("ab").await.unwrap(), None);
        assert!(repo.is_degraded());
        assert_eq!(repo.insert_if_absent(&record).await.unwrap(), None);
        assert_eq!(repo.insert_if_absent(&record).await.unwrap(), Some(record.to_owned()));
    }
}
