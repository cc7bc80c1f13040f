mod fallback;
mod redis_artifact_index;
mod redis_status;

#[rustfmt::skip]
pub use {
    fallback::{FallbackArtifactIndexRepo, FallbackStatusRepo},
    redis_artifact_index::RedisArtifactIndexRepo,
    redis_status::RedisStatusRepo,
};
