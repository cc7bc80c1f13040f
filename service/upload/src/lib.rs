mod artifact_index;
mod assembly;
mod chunk_store;
mod retention;
mod session;
mod status;

#[rustfmt::skip]
pub use {
    artifact_index::MemoryArtifactIndexRepo,
    assembly::{AssemblyServiceImpl, STAGING_DIR},
    chunk_store::LocalChunkStoreServiceImpl,
    retention::{ArtifactSweeper, ChunkSweeper, RetentionServiceImpl},
    session::UploadSessionServiceImpl,
    status::MemoryStatusRepo,
};
