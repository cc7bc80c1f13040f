use anyhow::bail;
use async_trait::async_trait;
use domain_upload::{
    model::entity::{ArtifactRecord, ArtifactRelease},
    repository::ArtifactIndexRepo,
};
use redis::{aio::ConnectionManager, Cmd, Script};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Sets the record and its owner as sole referrer, or returns the holder.
const INSERT_SCRIPT: &str = r#"
if redis.call("SET", KEYS[1], ARGV[1], "NX") then
    redis.call("DEL", KEYS[2])
    redis.call("SADD", KEYS[2], ARGV[2])
    return false
end
return redis.call("GET", KEYS[1])
"#;

const ADD_REFERRER_SCRIPT: &str = r#"
local raw = redis.call("GET", KEYS[1])
if raw then
    redis.call("SADD", KEYS[2], ARGV[1])
end
return raw
"#;

/// `{-1}` unregistered, `{1}` retained, `{0, record}` released.
const RELEASE_SCRIPT: &str = r#"
local raw = redis.call("GET", KEYS[1])
if not raw then
    return {-1, ""}
end
if redis.call("SREM", KEYS[2], ARGV[1]) == 0 or redis.call("SCARD", KEYS[2]) > 0 then
    return {1, ""}
end
redis.call("DEL", KEYS[1], KEYS[2])
return {0, raw}
"#;

fn artifact_key(hash: &str) -> String {
    format!("upload_artifact_{}", hash.trim().to_uppercase())
}

fn referrers_key(hash: &str) -> String {
    format!("upload_artifact_refs_{}", hash.trim().to_uppercase())
}

fn decode(raw: &str) -> anyhow::Result<ArtifactRecord> {
    Ok(serde_json::from_str::<ArtifactRecord>(raw)?)
}

/// Dedup records in Redis, kept until their last referrer lets go.
#[derive(TypedBuilder)]
pub struct RedisArtifactIndexRepo {
    connection: ConnectionManager,
}

#[async_trait]
impl ArtifactIndexRepo for RedisArtifactIndexRepo {
    async fn get_by_hash(&self, hash: &str) -> anyhow::Result<Option<ArtifactRecord>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = Cmd::get(artifact_key(hash)).query_async(&mut conn).await?;
        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn insert_if_absent(&self, record: &ArtifactRecord) -> anyhow::Result<Option<ArtifactRecord>> {
        let mut conn = self.connection.clone();
        let holder: Option<String> = Script::new(INSERT_SCRIPT)
            .key(artifact_key(&record.hash))
            .key(referrers_key(&record.hash))
            .arg(serde_json::to_string(record)?)
            .arg(record.owner_session_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        holder.map(|raw| decode(&raw)).transpose()
    }

    async fn replace(&self, record: &ArtifactRecord) -> anyhow::Result<()> {
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .set(artifact_key(&record.hash), serde_json::to_string(record)?)
            .del(referrers_key(&record.hash))
            .sadd(referrers_key(&record.hash), record.owner_session_id.to_string())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn add_referrer(&self, hash: &str, session_id: Uuid) -> anyhow::Result<Option<ArtifactRecord>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = Script::new(ADD_REFERRER_SCRIPT)
            .key(artifact_key(hash))
            .key(referrers_key(hash))
            .arg(session_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn release(&self, hash: &str, session_id: Uuid) -> anyhow::Result<ArtifactRelease> {
        let mut conn = self.connection.clone();
        let (status, raw): (i64, String) = Script::new(RELEASE_SCRIPT)
            .key(artifact_key(hash))
            .key(referrers_key(hash))
            .arg(session_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(match status {
            -1 => ArtifactRelease::Unregistered,
            1 => ArtifactRelease::Retained,
            0 => ArtifactRelease::Released(decode(&raw)?),
            other => bail!("Unexpected release status {other} for hash: {hash}"),
        })
    }
}
