use uuid::Uuid;

use crate::model::vo::ChunkPart;

#[derive(Debug)]
pub enum ChunkOperateCommand {
    /// Persist one received chunk, overwriting a previous write of the same index.
    WriteChunk(ChunkPart),
    /// Remove one consumed chunk.
    RemoveChunk { session_id: Uuid, index: u64 },
    /// Remove every chunk of a session and its directory.
    RemoveSessionDir { session_id: Uuid },
}

#[derive(Debug)]
pub enum ChunkReadCommand {
    /// `None` when the chunk is not stored.
    ReadChunk { session_id: Uuid, index: u64 },
    /// Leading bytes of a chunk, at most `len`.
    ReadHead { session_id: Uuid, index: u64, len: usize },
}
