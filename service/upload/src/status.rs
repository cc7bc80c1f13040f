use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain_upload::{
    model::entity::{SessionPatch, UploadSession},
    repository::StatusRepo,
};
use uuid::Uuid;

/// In-process status table.
///
/// Records never expire on their own, they go away on delete or through
/// [`StatusRepo::purge_idle`].
#[derive(Default)]
pub struct MemoryStatusRepo {
    sessions: DashMap<Uuid, UploadSession>,
}

impl MemoryStatusRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl StatusRepo for MemoryStatusRepo {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        Ok(self.sessions.get(&id).map(|s| s.value().to_owned()))
    }

    async fn insert(&self, session: &UploadSession) -> anyhow::Result<()> {
        self.sessions.insert(session.id, session.to_owned());
        Ok(())
    }

    async fn save(&self, id: Uuid, patch: &SessionPatch) -> anyhow::Result<Option<UploadSession>> {
        // The entry guard serializes merges of the same id.
        Ok(self.sessions.get_mut(&id).map(|mut session| {
            session.apply(patch);
            session.to_owned()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        Ok(self.sessions.remove(&id).map(|(_, session)| session))
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.last_activity_at < cutoff)
            .map(|s| *s.key())
            .collect();
        Ok(idle
            .into_iter()
            .filter(|id| self.sessions.remove_if(id, |_, s| s.last_activity_at < cutoff).is_some())
            .collect())
    }
}
