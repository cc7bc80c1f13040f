use async_trait::async_trait;
use uuid::Uuid;

use crate::model::entity::{ArtifactRecord, ArtifactRelease};

/// Dedup index, content hash to stored artifact.
///
/// Lookups are advisory, two writers may race on the same hash. Each record
/// carries the sessions referring to it, and is unregistered once the last
/// one lets go.
#[async_trait]
pub trait ArtifactIndexRepo: Send + Sync {
    async fn get_by_hash(&self, hash: &str) -> anyhow::Result<Option<ArtifactRecord>>;

    /// Registers the record, referred to by its owner, unless the hash is taken.
    ///
    /// Returns the record that already held the hash.
    async fn insert_if_absent(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>>;

    /// Overwrites whatever is registered for the record's hash. Earlier
    /// referrers are dropped.
    async fn replace(&self, record: &ArtifactRecord) -> anyhow::Result<()>;

    /// Adds a referrer to the record of `hash`, `None` when nothing is registered.
    async fn add_referrer(&self, hash: &str, session_id: Uuid) -> anyhow::Result<Option<ArtifactRecord>>;

    /// Removes a referrer, unregistering the record when it was the last one.
    async fn release(&self, hash: &str, session_id: Uuid) -> anyhow::Result<ArtifactRelease>;
}
