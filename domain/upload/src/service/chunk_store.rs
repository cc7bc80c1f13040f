use async_trait::async_trait;
use uuid::Uuid;

use crate::command::*;

/// # Chunk store service.
///
/// Holds raw chunk bytes keyed by `(session_id, index)` until assembly consumes them.
#[async_trait]
pub trait ChunkStoreService: Send + Sync {
    async fn operate(&self, cmd: ChunkOperateCommand) -> anyhow::Result<()>;
    async fn read(&self, cmd: ChunkReadCommand) -> anyhow::Result<Option<Vec<u8>>>;
    async fn exists(&self, session_id: Uuid, index: u64) -> anyhow::Result<bool>;
}
