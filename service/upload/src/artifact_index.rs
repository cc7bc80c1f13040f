use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use domain_upload::{
    model::entity::{ArtifactRecord, ArtifactRelease},
    repository::ArtifactIndexRepo,
};
use uuid::Uuid;

struct IndexEntry {
    record: ArtifactRecord,
    referrers: BTreeSet<Uuid>,
}

impl IndexEntry {
    fn owned_by(record: &ArtifactRecord) -> Self {
        Self {
            record: record.to_owned(),
            referrers: BTreeSet::from([record.owner_session_id]),
        }
    }
}

/// In-process dedup index.
#[derive(Default)]
pub struct MemoryArtifactIndexRepo {
    records: DashMap<String, IndexEntry>,
}

impl MemoryArtifactIndexRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(hash: &str) -> String {
    hash.trim().to_uppercase()
}

#[async_trait]
impl ArtifactIndexRepo for MemoryArtifactIndexRepo {
    async fn get_by_hash(&self, hash: &str) -> anyhow::Result<Option<ArtifactRecord>> {
        Ok(self.records.get(&key(hash)).map(|e| e.record.to_owned()))
    }

    async fn insert_if_absent(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>> {
        Ok(match self.records.entry(key(&record.hash)) {
            Entry::Occupied(existing) => Some(existing.get().record.to_owned()),
            Entry::Vacant(vacant) => {
                vacant.insert(IndexEntry::owned_by(record));
                None
            }
        })
    }

    async fn replace(&self, record: &ArtifactRecord) -> anyhow::Result<()> {
        self.records.insert(key(&record.hash), IndexEntry::owned_by(record));
        Ok(())
    }

    async fn add_referrer(&self, hash: &str, session_id: Uuid) -> anyhow::Result<Option<ArtifactRecord>> {
        Ok(self.records.get_mut(&key(hash)).map(|mut entry| {
            entry.referrers.insert(session_id);
            entry.record.to_owned()
        }))
    }

    async fn release(&self, hash: &str, session_id: Uuid) -> anyhow::Result<ArtifactRelease> {
        let Entry::Occupied(mut entry) = self.records.entry(key(hash)) else {
            return Ok(ArtifactRelease::Unregistered);
        };
        if !entry.get_mut().referrers.remove(&session_id) || !entry.get().referrers.is_empty() {
            return Ok(ArtifactRelease::Retained);
        }
        Ok(ArtifactRelease::Released(entry.remove().record))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domain_upload::model::vo::HashAlgorithm;

    use super::*;

    fn record(hash: &str, path: &str) -> ArtifactRecord {
        ArtifactRecord {
            hash: hash.to_owned(),
            hash_algorithm: HashAlgorithm::Blake3,
            path: path.to_owned(),
            url: format!("http://localhost/{path}"),
            size: 3,
            owner_session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_writer_keeps_the_hash() {
        let repo = MemoryArtifactIndexRepo::new();
        let first = record("ABC", "2026-10-18/a_1.bin");
        let second = record("abc", "2026-10-18/a_2.bin");
        assert!(repo.insert_if_absent(&first).await.unwrap().is_none());
        assert_eq!(repo.insert_if_absent(&second).await.unwrap(), Some(first.clone()));
        assert_eq!(repo.get_by_hash("abc").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn last_referrer_unregisters() {
        let repo = MemoryArtifactIndexRepo::new();
        let owned = record("ABC", "2026-10-18/a_1.bin");
        let other = Uuid::new_v4();
        repo.insert_if_absent(&owned).await.unwrap();
        assert_eq!(repo.add_referrer("abc", other).await.unwrap(), Some(owned.clone()));

        let release = repo.release("ABC", owned.owner_session_id).await.unwrap();
        assert_eq!(release, ArtifactRelease::Retained);
        assert_eq!(repo.release("ABC", Uuid::new_v4()).await.unwrap(), ArtifactRelease::Retained);
        assert_eq!(repo.release("ABC", other).await.unwrap(), ArtifactRelease::Released(owned));
        assert!(repo.get_by_hash("ABC").await.unwrap().is_none());
        assert_eq!(repo.release("ABC", other).await.unwrap(), ArtifactRelease::Unregistered);
        assert!(repo.add_referrer("ABC", other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_resets_referrers() {
        let repo = MemoryArtifactIndexRepo::new();
        let old = record("ABC", "old");
        repo.insert_if_absent(&old).await.unwrap();
        let newer = record("ABC", "new");
        repo.replace(&newer).await.unwrap();
        assert_eq!(repo.get_by_hash("ABC").await.unwrap(), Some(newer.clone()));

        assert_eq!(repo.release("ABC", old.owner_session_id).await.unwrap(), ArtifactRelease::Retained);
        let release = repo.release("ABC", newer.owner_session_id).await.unwrap();
        assert_eq!(release, ArtifactRelease::Released(newer));
    }
}
