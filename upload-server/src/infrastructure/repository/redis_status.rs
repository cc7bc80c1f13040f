use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_upload::{
    model::entity::{SessionPatch, UploadSession},
    repository::StatusRepo,
};
use redis::{aio::ConnectionManager, Cmd, Script};
use tracing::warn;
use typed_builder::TypedBuilder;
use uuid::Uuid;

const LOCK_RETRIES: usize = 5;
const LOCK_BACKOFF: Duration = Duration::from_millis(200);

/// Deletes the lock only if it still carries our token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

fn status_key(id: Uuid) -> String {
    format!("upload_status_{id}")
}

fn lock_key(id: Uuid) -> String {
    format!("upload_status_lock_{id}")
}

/// Status records in Redis, expiring `exp_msecs` after their last write.
#[derive(TypedBuilder)]
pub struct RedisStatusRepo {
    connection: ConnectionManager,
    #[builder(default = 24 * 60 * 60 * 1000)]
    exp_msecs: u64,
    #[builder(default = 5000)]
    lock_msecs: u64,
}

impl RedisStatusRepo {
    async fn lock(&self, conn: &mut ConnectionManager, id: Uuid, token: &str) -> anyhow::Result<()> {
        let mut remaining_retries = LOCK_RETRIES;
        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(lock_key(id))
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(self.lock_msecs)
                .query_async(conn)
                .await?;
            if acquired.is_some() {
                return Ok(());
            }
            remaining_retries -= 1;
            if remaining_retries == 0 {
                bail!("Failed lock retry for upload session: {id}");
            }
            tokio::time::sleep(LOCK_BACKOFF).await;
        }
    }

    async fn unlock(&self, conn: &mut ConnectionManager, id: Uuid, token: &str) {
        let released = Script::new(UNLOCK_SCRIPT)
            .key(lock_key(id))
            .arg(token)
            .invoke_async::<_, i64>(conn)
            .await;
        if let Err(e) = released {
            warn!("Failed to release status lock of session {id}, it expires on its own: {e}");
        }
    }

    async fn merge(
        &self,
        conn: &mut ConnectionManager,
        id: Uuid,
        patch: &SessionPatch,
    ) -> anyhow::Result<Option<UploadSession>> {
        let key = status_key(id);
        let raw: Option<String> = Cmd::get(&key).query_async(conn).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut session = UploadSession::decode(&raw)?;
        session.apply(patch);
        // XX: a record deleted meanwhile stays deleted.
        let written: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(session.encode()?)
            .arg("PX")
            .arg(self.exp_msecs)
            .arg("XX")
            .query_async(conn)
            .await?;
        Ok(written.map(|_| session))
    }
}

#[async_trait]
impl StatusRepo for RedisStatusRepo {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = Cmd::get(status_key(id)).query_async(&mut conn).await?;
        raw.map(|raw| UploadSession::decode(&raw)).transpose()
    }

    async fn insert(&self, session: &UploadSession) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(status_key(session.id))
            .arg(session.encode()?)
            .arg("PX")
            .arg(self.exp_msecs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn save(&self, id: Uuid, patch: &SessionPatch) -> anyhow::Result<Option<UploadSession>> {
        let mut conn = self.connection.clone();
        let token = Uuid::new_v4().to_string();
        self.lock(&mut conn, id, &token).await?;
        let merged = self.merge(&mut conn, id, patch).await;
        self.unlock(&mut conn, id, &token).await;
        merged
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<Option<UploadSession>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> =
            redis::cmd("GETDEL").arg(status_key(id)).query_async(&mut conn).await?;
        raw.map(|raw| UploadSession::decode(&raw)).transpose()
    }

    /// Records expire in Redis, nothing to purge.
    async fn purge_idle(&self, _cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        Ok(vec![])
    }
}
