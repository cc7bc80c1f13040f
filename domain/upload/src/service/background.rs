use async_trait::async_trait;

/// A long running task spawned next to request handling.
#[async_trait]
pub trait BackgroundService: Send + Sync {
    async fn run(&self);
}
