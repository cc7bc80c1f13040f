use async_trait::async_trait;

use crate::model::vo::SweepReport;

/// # Retention service
///
/// Best-effort cleanup, a failing file is logged and counted, never fatal to the pass.
#[async_trait]
pub trait RetentionService: Send + Sync {
    /// Remove chunk files older than the chunk retention, whatever their session state.
    async fn sweep_chunks(&self) -> SweepReport;

    /// Remove date buckets of artifacts older than the artifact retention.
    async fn sweep_artifacts(&self) -> SweepReport;

    /// Remove status records idle for longer than the session retention.
    async fn sweep_sessions(&self) -> SweepReport;
}
