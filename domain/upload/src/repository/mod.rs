mod artifact_index;
mod status;

#[rustfmt::skip]
pub use {
    artifact_index::ArtifactIndexRepo,
    status::StatusRepo,
};
