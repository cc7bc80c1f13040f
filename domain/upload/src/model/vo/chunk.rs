use uuid::Uuid;

/// One chunk of an upload.
#[derive(Debug, Clone)]
pub struct ChunkPart {
    /// Upload session id.
    pub session_id: Uuid,
    /// Chunk content.
    pub content: Vec<u8>,
    /// Zero based index of the chunk.
    pub index: u64,
}
