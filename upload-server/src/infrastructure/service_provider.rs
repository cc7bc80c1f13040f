use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use domain_upload::{
    repository::{ArtifactIndexRepo, StatusRepo},
    service::{AssemblyService, BackgroundService, ChunkStoreService, RetentionService, UploadSessionService},
};
use redis::aio::ConnectionManager;
use service_upload::*;
use tracing::{info, warn};
use url::Url;

use super::{
    config::{RedisConfig, UploadConfig},
    repository::{FallbackArtifactIndexRepo, FallbackStatusRepo, RedisArtifactIndexRepo, RedisStatusRepo},
};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ServiceProvider {
    pub config: UploadConfig,
    pub status_repo: Arc<dyn StatusRepo>,
    pub artifact_index_repo: Arc<dyn ArtifactIndexRepo>,
    pub chunk_store_service: Arc<dyn ChunkStoreService>,
    pub assembly_service: Arc<dyn AssemblyService>,
    pub upload_session_service: Arc<dyn UploadSessionService>,
    pub retention_service: Arc<dyn RetentionService>,
    pub background_services: Vec<Arc<dyn BackgroundService>>,
}

async fn connect_redis(url: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(url)?;
    let mut connection = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, ConnectionManager::new(client))
        .await
        .context("Timed out connecting to redis")??;
    redis::cmd("PING").query_async::<_, String>(&mut connection).await?;
    Ok(connection)
}

/// Parses the base of artifact urls, as a directory so joins keep its last segment.
fn public_base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid public base url: {raw}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Redis backed stores behind fallbacks, or in-process tables when redis is off or down.
async fn build_repos(config: &RedisConfig) -> (Arc<dyn StatusRepo>, Arc<dyn ArtifactIndexRepo>) {
    let Some(url) = &config.url else {
        info!("No redis configured, upload status kept in process");
        return (Arc::new(MemoryStatusRepo::new()), Arc::new(MemoryArtifactIndexRepo::new()));
    };
    match connect_redis(url).await {
        Ok(connection) => {
            info!("Upload status kept in redis at {url}");
            let status = RedisStatusRepo::builder()
                .connection(connection.clone())
                .exp_msecs(config.exp_msecs)
                .lock_msecs(config.lock_msecs)
                .build();
            let index = RedisArtifactIndexRepo::builder().connection(connection).build();
            (
                Arc::new(FallbackStatusRepo::new(Arc::new(status))),
                Arc::new(FallbackArtifactIndexRepo::new(Arc::new(index))),
            )
        }
        Err(e) => {
            warn!("Redis at {url} unavailable, upload status kept in process: {e:#}");
            (Arc::new(MemoryStatusRepo::new()), Arc::new(MemoryArtifactIndexRepo::new()))
        }
    }
}

impl ServiceProvider {
    pub async fn build(config: UploadConfig) -> anyhow::Result<Self> {
        let public_base_url = public_base_url(&config.storage.public_base_url)?;
        let (status_repo, artifact_index_repo) = build_repos(&config.redis).await;

        let chunk_store_service: Arc<dyn ChunkStoreService> = Arc::new(
            LocalChunkStoreServiceImpl::builder().base(&config.storage.chunk_dir).build(),
        );
        let assembly_service: Arc<dyn AssemblyService> = Arc::new(
            AssemblyServiceImpl::builder()
                .chunk_store(chunk_store_service.clone())
                .artifact_index(artifact_index_repo.clone())
                .artifact_base(&config.storage.artifact_dir)
                .public_base_url(public_base_url)
                .build(),
        );
        let upload_session_service: Arc<dyn UploadSessionService> = Arc::new(
            UploadSessionServiceImpl::builder()
                .status_repo(status_repo.clone())
                .chunk_store(chunk_store_service.clone())
                .assembly_service(assembly_service.clone())
                .build(),
        );

        let retention = &config.retention;
        let retention_service: Arc<dyn RetentionService> = Arc::new(
            RetentionServiceImpl::builder()
                .chunk_base(&config.storage.chunk_dir)
                .artifact_base(&config.storage.artifact_dir)
                .status_repo(status_repo.clone())
                .chunk_max_age(Duration::from_secs(retention.chunk_max_age_secs))
                .artifact_max_age_days(retention.artifact_max_age_days)
                .session_max_idle(Duration::from_secs(retention.session_max_idle_secs))
                .build(),
        );
        let background_services: Vec<Arc<dyn BackgroundService>> = vec![
            Arc::new(
                ChunkSweeper::builder()
                    .retention_service(retention_service.clone())
                    .interval(Duration::from_secs(retention.chunk_sweep_interval_secs.max(1)))
                    .build(),
            ),
            Arc::new(
                ArtifactSweeper::builder()
                    .retention_service(retention_service.clone())
                    .interval(Duration::from_secs(retention.artifact_sweep_interval_secs.max(1)))
                    .build(),
            ),
        ];

        Ok(Self {
            config,
            status_repo,
            artifact_index_repo,
            chunk_store_service,
            assembly_service,
            upload_session_service,
            retention_service,
            background_services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_last_segment() {
        let url = public_base_url("https://files.example.com/u").unwrap();
        let joined = url.join("2026-10-18/a.txt").unwrap();
        assert_eq!(joined.as_str(), "https://files.example.com/u/2026-10-18/a.txt");
        let url = public_base_url("https://files.example.com/u/").unwrap();
        assert_eq!(url.as_str(), "https://files.example.com/u/");
        assert!(public_base_url("not a url").is_err());
    }
}
