use uuid::Uuid;

pub type UploadResult<T> = Result<T, UploadException>;

#[derive(Debug, thiserror::Error)]
pub enum UploadException {
    #[error("The upload session with id: {session_id} can't be found.")]
    SessionNotFound { session_id: Uuid },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Chunk index: {index} is out of range for session: {session_id} with {total_chunks} chunks.")]
    ChunkIndexOutOfRange {
        session_id: Uuid,
        index: u64,
        total_chunks: u64,
    },

    #[error("The upload session with id: {session_id} is already completed.")]
    SessionCompleted { session_id: Uuid },

    #[error("The upload session with id: {session_id} is paused, resume it before sending chunks.")]
    SessionPaused { session_id: Uuid },

    #[error("Declared type: {declared} doesn't match detected type: {}.", detected.as_deref().unwrap_or("unknown"))]
    TypeMismatch {
        declared: String,
        detected: Option<String>,
    },

    #[error("The upload session with id: {session_id} is missing chunks: {missing:?}.")]
    IncompleteUpload { session_id: Uuid, missing: Vec<u64> },

    #[error("Chunk: {index} of session: {session_id} is missing from chunk storage.")]
    MissingChunk { session_id: Uuid, index: u64 },

    #[error(
        "Session: {session_id}'s completed hash: {computed_hash} is unmatched with provided hash: {expected_hash}."
    )]
    IntegrityFailure {
        session_id: Uuid,
        expected_hash: String,
        computed_hash: String,
    },

    #[error("The artifact: {path} of completed session: {session_id} is gone and its chunks were already consumed.")]
    ArtifactMissing { session_id: Uuid, path: String },

    #[error("Upload storage error: {source}")]
    StorageFailure {
        #[source]
        source: anyhow::Error,
    },
}

impl UploadException {
    /// Stable error kind, independent of the message wording.
    pub fn kind(&self) -> &'static str {
        use UploadException::*;
        match self {
            SessionNotFound { .. } => "NotFound",
            InvalidArgument { .. } | ChunkIndexOutOfRange { .. } => "InvalidArgument",
            SessionCompleted { .. } => "InvalidState",
            SessionPaused { .. } => "Conflict",
            TypeMismatch { .. } => "TypeMismatch",
            IncompleteUpload { .. } => "IncompleteUpload",
            MissingChunk { .. } => "MissingChunk",
            IntegrityFailure { .. } => "IntegrityFailure",
            ArtifactMissing { .. } => "ArtifactMissing",
            StorageFailure { .. } => "StorageFailure",
        }
    }

    /// Stable numeric code for the outer layers.
    pub fn status(&self) -> u16 {
        use UploadException::*;
        match self {
            SessionNotFound { .. } => 101,
            InvalidArgument { .. } => 102,
            ChunkIndexOutOfRange { .. } => 103,
            SessionCompleted { .. } => 104,
            SessionPaused { .. } => 105,
            TypeMismatch { .. } => 106,
            IncompleteUpload { .. } => 107,
            MissingChunk { .. } => 108,
            IntegrityFailure { .. } => 109,
            ArtifactMissing { .. } => 110,
            StorageFailure { .. } => 500,
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for UploadException {
    fn from(e: anyhow::Error) -> Self {
        UploadException::StorageFailure { source: e }
    }
}

impl From<std::io::Error> for UploadException {
    fn from(e: std::io::Error) -> Self {
        UploadException::StorageFailure { source: e.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_maps_to_conflict() {
        let e = UploadException::SessionPaused {
            session_id: Uuid::new_v4(),
        };
        assert_eq!(e.kind(), "Conflict");
        assert_eq!(e.status(), 105);
    }

    #[test]
    fn integrity_failure_reports_both_hashes() {
        let e = UploadException::IntegrityFailure {
            session_id: Uuid::nil(),
            expected_hash: "AAAA".to_owned(),
            computed_hash: "BBBB".to_owned(),
        };
        let message = e.to_string();
        assert!(message.contains("AAAA"));
        assert!(message.contains("BBBB"));
        assert_eq!(e.kind(), "IntegrityFailure");
    }

    #[test]
    fn io_errors_become_storage_failures() {
        let e: UploadException = std::io::Error::other("disk full").into();
        assert_eq!(e.kind(), "StorageFailure");
        assert_eq!(e.status(), 500);
    }
}
