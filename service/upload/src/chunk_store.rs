use anyhow::anyhow;
use async_trait::async_trait;
use domain_upload::{
    command::{ChunkOperateCommand, ChunkReadCommand},
    service::ChunkStoreService,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::warn;
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(TypedBuilder, Clone)]
pub struct LocalChunkStoreServiceImpl {
    #[builder(default = "data/chunks".into(), setter(into))]
    base: PathBuf,
}

impl LocalChunkStoreServiceImpl {
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.base.join(session_id.to_string())
    }

    fn chunk_path(&self, session_id: Uuid, index: u64) -> PathBuf {
        self.session_dir(session_id).join(index.to_string())
    }
}

/// Writes next to the target and renames, so a reader never sees a half written chunk.
async fn create_parent_and_write(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().ok_or(anyhow!("path: {path:?} doesn't has parent."))?;
    tokio::fs::create_dir_all(parent).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(anyhow!("path: {path:?} doesn't has file name."))?;
    let temp = parent.join(format!(".{file_name}.{}", Uuid::new_v4().simple()));
    tokio::fs::write(&temp, content).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!("Failed to remove temp chunk {temp:?}: {e}");
        }
        return Err(e.into());
    }
    Ok(())
}

fn absent_as_none<T>(result: std::io::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ChunkStoreService for LocalChunkStoreServiceImpl {
    async fn operate(&self, cmd: ChunkOperateCommand) -> anyhow::Result<()> {
        use ChunkOperateCommand::*;
        match cmd {
            WriteChunk(part) => {
                let path = self.chunk_path(part.session_id, part.index);
                create_parent_and_write(&path, &part.content).await?;
            }
            RemoveChunk { session_id, index } => {
                let path = self.chunk_path(session_id, index);
                absent_as_none(tokio::fs::remove_file(path).await)?;
            }
            RemoveSessionDir { session_id } => {
                let dir = self.session_dir(session_id);
                absent_as_none(tokio::fs::remove_dir_all(dir).await)?;
            }
        };
        Ok(())
    }

    async fn read(&self, cmd: ChunkReadCommand) -> anyhow::Result<Option<Vec<u8>>> {
        use ChunkReadCommand::*;
        match cmd {
            ReadChunk { session_id, index } => {
                let path = self.chunk_path(session_id, index);
                absent_as_none(tokio::fs::read(path).await)
            }
            ReadHead {
                session_id,
                index,
                len,
            } => {
                let path = self.chunk_path(session_id, index);
                let Some(file) = absent_as_none(tokio::fs::File::open(path).await)? else {
                    return Ok(None);
                };
                let mut head = Vec::with_capacity(len);
                file.take(len as u64).read_to_end(&mut head).await?;
                Ok(Some(head))
            }
        }
    }

    async fn exists(&self, session_id: Uuid, index: u64) -> anyhow::Result<bool> {
        Ok(tokio::fs::try_exists(self.chunk_path(session_id, index)).await?)
    }
}
