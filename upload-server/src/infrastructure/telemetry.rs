use anyhow::anyhow;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use super::config::TelemetryConfig;

/// Installs the global console subscriber.
pub fn initialize_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let level = config
        .level
        .parse::<LevelFilter>()
        .map_err(|e| anyhow!("Invalid log level: {}, {e}", config.level))?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(config.filter.as_str());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!("Cannot install logger: {e}"))
}
