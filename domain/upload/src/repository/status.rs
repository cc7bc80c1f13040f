use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::entity::{SessionPatch, UploadSession};

/// Upload status store.
///
/// Implementations own the received set, callers always go through
/// `get`/`save` and never keep a session around between calls.
#[async_trait]
pub trait StatusRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>>;

    async fn insert(&self, session: &UploadSession) -> anyhow::Result<()>;

    /// Read-merge-write of a partial update.
    ///
    /// Returns the merged session, or `None` when there is no record to merge
    /// into. A save never recreates a deleted record.
    async fn save(&self, id: Uuid, patch: &SessionPatch) -> anyhow::Result<Option<UploadSession>>;

    /// Removes the record, returning what was stored.
    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>>;

    /// Removes records idle since before `cutoff`, for stores without expiry.
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;
}
