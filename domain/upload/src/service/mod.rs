mod assembly;
mod background;
mod chunk_store;
mod retention;
mod upload_session;

#[rustfmt::skip]
pub use {
    assembly::AssemblyService,
    background::BackgroundService,
    chunk_store::ChunkStoreService,
    retention::RetentionService,
    upload_session::UploadSessionService,
};
