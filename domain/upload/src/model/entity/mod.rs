mod artifact;
mod upload_session;

#[rustfmt::skip]
pub use {
    artifact::{ArtifactRecord, ArtifactRelease},
    upload_session::{SessionPatch, SessionState, UploadSession},
};
