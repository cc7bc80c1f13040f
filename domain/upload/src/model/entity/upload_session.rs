use std::collections::BTreeSet;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::vo::{AssembledArtifact, InitUpload};

/// Lifecycle state derived from the session flags.
///
/// A cancelled session has no state, its record is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Active,
    Paused,
    Completed,
}

/// One client-initiated chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    /// Normalized declared mime type, untrusted until chunk 0 is sniffed.
    pub declared_mime_type: String,
    pub total_chunks: u64,
    pub received_chunks: BTreeSet<u64>,
    pub is_paused: bool,
    pub is_completed: bool,
    /// Set together with `is_completed`.
    pub artifact: Option<AssembledArtifact>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(id: Uuid, init: InitUpload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            file_name: init.file_name,
            file_size: init.file_size,
            declared_mime_type: init.declared_mime_type,
            total_chunks: init.total_chunks,
            received_chunks: BTreeSet::new(),
            is_paused: false,
            is_completed: false,
            artifact: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_completed {
            SessionState::Completed
        } else if self.is_paused {
            SessionState::Paused
        } else {
            SessionState::Active
        }
    }

    pub fn contains_index(&self, index: u64) -> bool {
        index < self.total_chunks
    }

    pub fn received_count(&self) -> u64 {
        self.received_chunks.len() as u64
    }

    /// Indices not received yet, ascending.
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks).filter(|i| !self.received_chunks.contains(i)).collect()
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Merges a partial update.
    ///
    /// Chunks leave the received set only when lost before completion, a
    /// completed session has received all of them.
    pub fn apply(&mut self, patch: &SessionPatch) {
        let total = self.total_chunks;
        if !self.is_completed {
            for index in &patch.lost_chunks {
                self.received_chunks.remove(index);
            }
        }
        self.received_chunks.extend(patch.received_chunks.iter().filter(|i| **i < total));
        if let Some(artifact) = &patch.artifact {
            self.is_completed = true;
            self.is_paused = false;
            self.artifact = Some(artifact.to_owned());
            self.received_chunks = (0..total).collect();
        }
        if let Some(paused) = patch.is_paused {
            if !self.is_completed {
                self.is_paused = paused;
            }
        }
        if let Some(at) = patch.last_activity_at {
            self.last_activity_at = self.last_activity_at.max(at);
        }
    }

    /// Serializes the session for an external store.
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&SessionRecord::from_session(self))?)
    }

    /// Parses a session produced by [`UploadSession::encode`].
    pub fn decode(raw: &str) -> anyhow::Result<Self> {
        let record = serde_json::from_str::<SessionRecord>(raw)
            .context("Malformed upload session record")?;
        record.into_session()
    }
}

/// Partial update of a session, unspecified fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// Added to the received set.
    pub received_chunks: BTreeSet<u64>,
    /// Removed from the received set, before additions.
    pub lost_chunks: BTreeSet<u64>,
    pub is_paused: Option<bool>,
    /// Marks the session completed.
    pub artifact: Option<AssembledArtifact>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn chunk_received(index: u64, at: DateTime<Utc>) -> Self {
        Self {
            received_chunks: BTreeSet::from([index]),
            last_activity_at: Some(at),
            ..Default::default()
        }
    }

    /// Chunks consumed by an assembly that failed, to be sent again.
    pub fn chunks_lost(indices: BTreeSet<u64>, at: DateTime<Utc>) -> Self {
        Self {
            lost_chunks: indices,
            last_activity_at: Some(at),
            ..Default::default()
        }
    }

    pub fn paused(paused: bool, at: DateTime<Utc>) -> Self {
        Self {
            is_paused: Some(paused),
            last_activity_at: Some(at),
            ..Default::default()
        }
    }

    pub fn completed(artifact: AssembledArtifact, at: DateTime<Utc>) -> Self {
        Self {
            artifact: Some(artifact),
            last_activity_at: Some(at),
            ..Default::default()
        }
    }
}

/// Store-boundary form of [`UploadSession`].
///
/// `received_chunks` crosses the boundary as a sorted list without duplicates.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    id: Uuid,
    file_name: String,
    file_size: u64,
    declared_mime_type: String,
    total_chunks: u64,
    received_chunks: Vec<u64>,
    is_paused: bool,
    is_completed: bool,
    #[serde(default)]
    artifact: Option<AssembledArtifact>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    fn from_session(session: &UploadSession) -> Self {
        Self {
            id: session.id,
            file_name: session.file_name.to_owned(),
            file_size: session.file_size,
            declared_mime_type: session.declared_mime_type.to_owned(),
            total_chunks: session.total_chunks,
            // BTreeSet iterates in ascending order.
            received_chunks: session.received_chunks.iter().copied().collect(),
            is_paused: session.is_paused,
            is_completed: session.is_completed,
            artifact: session.artifact.to_owned(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
        }
    }

    fn into_session(self) -> anyhow::Result<UploadSession> {
        let SessionRecord {
            id,
            file_name,
            file_size,
            declared_mime_type,
            total_chunks,
            received_chunks,
            is_paused,
            is_completed,
            artifact,
            created_at,
            last_activity_at,
        } = self;

        if total_chunks == 0 {
            bail!("Upload session: {id} has no chunks");
        }
        if let Some(index) = received_chunks.iter().find(|i| **i >= total_chunks) {
            bail!("Upload session: {id} records chunk {index} beyond total {total_chunks}");
        }

        Ok(UploadSession {
            id,
            file_name,
            file_size,
            declared_mime_type,
            total_chunks,
            received_chunks: received_chunks.into_iter().collect(),
            is_paused,
            is_completed,
            artifact,
            created_at,
            last_activity_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::vo::HashAlgorithm;

    fn session(total_chunks: u64) -> UploadSession {
        UploadSession::new(
            Uuid::new_v4(),
            InitUpload {
                file_name: "movie.mp4".to_owned(),
                file_size: 1024,
                declared_mime_type: "video/mp4".to_owned(),
                total_chunks,
            },
            Utc::now(),
        )
    }

    fn artifact() -> AssembledArtifact {
        AssembledArtifact {
            path: "2026-10-18/movie_abc.mp4".to_owned(),
            url: "http://localhost/files/2026-10-18/movie_abc.mp4".to_owned(),
            content_hash: "AF13".to_owned(),
            hash_algorithm: HashAlgorithm::Blake3,
            size: 1024,
            is_duplicate: false,
        }
    }

    #[test]
    fn codec_keeps_received_set() {
        let mut s = session(10);
        s.received_chunks = BTreeSet::from([7, 0, 3, 9]);
        s.artifact = Some(artifact());
        let decoded = UploadSession::decode(&s.encode().unwrap()).unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn encoded_chunks_are_a_sorted_list() {
        let mut s = session(5);
        s.received_chunks = BTreeSet::from([4, 1, 2]);
        let value: serde_json::Value = serde_json::from_str(&s.encode().unwrap()).unwrap();
        assert_eq!(value["receivedChunks"], serde_json::json!([1, 2, 4]));
    }

    #[test]
    fn decode_collapses_unsorted_duplicates() {
        let s = session(5);
        let mut value: serde_json::Value = serde_json::from_str(&s.encode().unwrap()).unwrap();
        value["receivedChunks"] = serde_json::json!([3, 1, 3, 0, 1]);
        let decoded = UploadSession::decode(&value.to_string()).unwrap();
        assert_eq!(decoded.received_chunks, BTreeSet::from([0, 1, 3]));
    }

    #[test]
    fn decode_rejects_out_of_range_index() {
        let s = session(2);
        let mut value: serde_json::Value = serde_json::from_str(&s.encode().unwrap()).unwrap();
        value["receivedChunks"] = serde_json::json!([0, 2]);
        assert!(UploadSession::decode(&value.to_string()).is_err());
        assert!(UploadSession::decode("not json").is_err());
    }

    #[test]
    fn patch_adds_chunks_without_dropping() {
        let mut s = session(4);
        let now = Utc::now();
        s.apply(&SessionPatch::chunk_received(2, now));
        s.apply(&SessionPatch::chunk_received(0, now));
        s.apply(&SessionPatch::chunk_received(2, now));
        s.apply(&SessionPatch::paused(true, now));
        assert_eq!(s.received_chunks, BTreeSet::from([0, 2]));
        assert_eq!(s.missing_chunks(), vec![1, 3]);
        assert_eq!(s.state(), SessionState::Paused);
    }

    #[test]
    fn completion_dominates_pause() {
        let mut s = session(1);
        let now = Utc::now();
        s.apply(&SessionPatch::paused(true, now));
        s.apply(&SessionPatch::completed(artifact(), now));
        assert_eq!(s.state(), SessionState::Completed);
        s.apply(&SessionPatch::paused(true, now));
        assert_eq!(s.state(), SessionState::Completed);
        assert!(s.artifact.is_some());
    }

    #[test]
    fn lost_chunks_are_received_again() {
        let mut s = session(3);
        let now = Utc::now();
        for index in 0..3 {
            s.apply(&SessionPatch::chunk_received(index, now));
        }
        s.apply(&SessionPatch::chunks_lost(BTreeSet::from([0, 2]), now));
        assert_eq!(s.missing_chunks(), vec![0, 2]);
        s.apply(&SessionPatch::chunk_received(0, now));
        assert_eq!(s.missing_chunks(), vec![2]);
    }

    #[test]
    fn completed_session_keeps_every_chunk() {
        let mut s = session(3);
        let now = Utc::now();
        s.apply(&SessionPatch::chunks_lost(BTreeSet::from([1]), now));
        s.apply(&SessionPatch::completed(artifact(), now));
        assert!(s.is_fully_received());
        s.apply(&SessionPatch::chunks_lost(BTreeSet::from([0, 1]), now));
        assert!(s.is_fully_received());
    }

    #[test]
    fn activity_never_moves_backwards() {
        let mut s = session(1);
        let before = s.last_activity_at;
        s.apply(&SessionPatch::chunk_received(0, before - Duration::minutes(5)));
        assert_eq!(s.last_activity_at, before);
    }
}
