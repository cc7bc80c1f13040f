use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use domain_upload::{
    model::vo::SweepReport,
    repository::StatusRepo,
    service::{BackgroundService, RetentionService},
};
use tokio::time::interval;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::assembly::STAGING_DIR;

const BUCKET_FORMAT: &str = "%Y-%m-%d";

#[derive(TypedBuilder)]
pub struct RetentionServiceImpl {
    #[builder(default = "data/chunks".into(), setter(into))]
    chunk_base: PathBuf,
    #[builder(default = "data/artifacts".into(), setter(into))]
    artifact_base: PathBuf,
    status_repo: Arc<dyn StatusRepo>,
    #[builder(default = Duration::from_secs(30 * 60))]
    chunk_max_age: Duration,
    #[builder(default = 30)]
    artifact_max_age_days: u64,
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    session_max_idle: Duration,
}

/// Lists a directory, an absent one is empty.
async fn entries(dir: &Path) -> std::io::Result<Vec<tokio::fs::DirEntry>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    let mut entries = vec![];
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(entry);
    }
    Ok(entries)
}

/// Removes files under `dir` last modified at or before `cutoff`.
async fn remove_files_older(dir: &Path, cutoff: SystemTime, report: &mut SweepReport) {
    let files = match entries(dir).await {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list {dir:?}: {e}");
            report.failed += 1;
            return;
        }
    };
    for file in files {
        let path = file.path();
        let modified = match file.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Failed to stat {path:?}: {e}");
                report.failed += 1;
                continue;
            }
        };
        if modified > cutoff {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove {path:?}: {e}");
                report.failed += 1;
            }
        }
    }
}

/// Removes `dir` if nothing is left inside.
async fn remove_dir_if_empty(dir: &Path) {
    match entries(dir).await {
        Ok(left) if left.is_empty() => {
            if let Err(e) = tokio::fs::remove_dir(dir).await {
                debug!("Kept {dir:?}: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to list {dir:?}: {e}"),
    }
}

impl RetentionServiceImpl {
    fn chunk_cutoff(&self) -> SystemTime {
        SystemTime::now().checked_sub(self.chunk_max_age).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Staging files left behind by an interrupted assembly.
    async fn sweep_staging(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let staging = self.artifact_base.join(STAGING_DIR);
        remove_files_older(&staging, self.chunk_cutoff(), &mut report).await;
        report
    }
}

#[async_trait]
impl RetentionService for RetentionServiceImpl {
    async fn sweep_chunks(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = self.chunk_cutoff();
        let session_dirs = match entries(&self.chunk_base).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Failed to list chunk dir {:?}: {e}", self.chunk_base);
                report.failed += 1;
                return report;
            }
        };
        for dir in session_dirs {
            if !dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let path = dir.path();
            remove_files_older(&path, cutoff, &mut report).await;
            remove_dir_if_empty(&path).await;
        }
        report += self.sweep_staging().await;
        report
    }

    async fn sweep_artifacts(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let today = Utc::now().date_naive();
        let buckets = match entries(&self.artifact_base).await {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!("Failed to list artifact dir {:?}: {e}", self.artifact_base);
                report.failed += 1;
                return report;
            }
        };
        for bucket in buckets {
            let path = bucket.path();
            let Some(date) = bucket
                .file_name()
                .to_str()
                .and_then(|name| NaiveDate::parse_from_str(name, BUCKET_FORMAT).ok())
            else {
                continue;
            };
            let age_days = (today - date).num_days();
            if age_days <= self.artifact_max_age_days as i64
                || !bucket.file_type().await.map(|t| t.is_dir()).unwrap_or(false)
            {
                continue;
            }
            // Every file of an expired bucket is past retention.
            remove_files_older(&path, SystemTime::now(), &mut report).await;
            remove_dir_if_empty(&path).await;
        }
        report
    }

    async fn sweep_sessions(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let idle = chrono::Duration::from_std(self.session_max_idle)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let purged = match self.status_repo.purge_idle(Utc::now() - idle).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!("Failed to purge idle sessions: {e}");
                report.failed += 1;
                return report;
            }
        };
        for session_id in purged {
            report.removed += 1;
            let dir = self.chunk_base.join(session_id.to_string());
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove chunks of idle session {session_id}: {e}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Periodic chunk, staging and idle session cleanup.
#[derive(TypedBuilder)]
pub struct ChunkSweeper {
    retention_service: Arc<dyn RetentionService>,
    #[builder(default = Duration::from_secs(5 * 60))]
    interval: Duration,
}

#[async_trait]
impl BackgroundService for ChunkSweeper {
    async fn run(&self) {
        let mut interval = interval(self.interval);
        loop {
            interval.tick().await;
            let chunks = self.retention_service.sweep_chunks().await;
            let sessions = self.retention_service.sweep_sessions().await;
            info!(
                "Chunk sweep removed {} files ({} failed), {} idle sessions ({} failed)",
                chunks.removed, chunks.failed, sessions.removed, sessions.failed
            );
        }
    }
}

/// Periodic removal of expired artifact date buckets.
#[derive(TypedBuilder)]
pub struct ArtifactSweeper {
    retention_service: Arc<dyn RetentionService>,
    #[builder(default = Duration::from_secs(60 * 60))]
    interval: Duration,
}

#[async_trait]
impl BackgroundService for ArtifactSweeper {
    async fn run(&self) {
        let mut interval = interval(self.interval);
        loop {
            interval.tick().await;
            let report = self.retention_service.sweep_artifacts().await;
            info!("Artifact sweep removed {} files ({} failed)", report.removed, report.failed);
        }
    }
}
