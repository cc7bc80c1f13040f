use serde::Deserialize;

#[derive(Default, Clone, Deserialize, Debug)]
pub struct UploadConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Deserialize, Debug)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_chunk_dir")]
    pub chunk_dir: String,
    #[serde(default = "StorageConfig::default_artifact_dir")]
    pub artifact_dir: String,
    /// Artifact urls are this joined with the artifact path.
    #[serde(default = "StorageConfig::default_public_base_url")]
    pub public_base_url: String,
}

impl StorageConfig {
    fn default_chunk_dir() -> String {
        "data/chunks".to_string()
    }
    fn default_artifact_dir() -> String {
        "data/artifacts".to_string()
    }
    fn default_public_base_url() -> String {
        "http://localhost:8080/files/".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_dir: Self::default_chunk_dir(),
            artifact_dir: Self::default_artifact_dir(),
            public_base_url: Self::default_public_base_url(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RedisConfig {
    /// Without an url every store stays in process.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "RedisConfig::default_exp_msecs")]
    pub exp_msecs: u64,
    #[serde(default = "RedisConfig::default_lock_msecs")]
    pub lock_msecs: u64,
}

impl RedisConfig {
    fn default_exp_msecs() -> u64 {
        24 * 60 * 60 * 1000
    }
    fn default_lock_msecs() -> u64 {
        5000
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            exp_msecs: Self::default_exp_msecs(),
            lock_msecs: Self::default_lock_msecs(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RetentionConfig {
    #[serde(default = "RetentionConfig::default_chunk_max_age_secs")]
    pub chunk_max_age_secs: u64,
    #[serde(default = "RetentionConfig::default_chunk_sweep_interval_secs")]
    pub chunk_sweep_interval_secs: u64,
    #[serde(default = "RetentionConfig::default_artifact_max_age_days")]
    pub artifact_max_age_days: u64,
    #[serde(default = "RetentionConfig::default_artifact_sweep_interval_secs")]
    pub artifact_sweep_interval_secs: u64,
    #[serde(default = "RetentionConfig::default_session_max_idle_secs")]
    pub session_max_idle_secs: u64,
}

impl RetentionConfig {
    fn default_chunk_max_age_secs() -> u64 {
        30 * 60
    }
    fn default_chunk_sweep_interval_secs() -> u64 {
        5 * 60
    }
    fn default_artifact_max_age_days() -> u64 {
        30
    }
    fn default_artifact_sweep_interval_secs() -> u64 {
        60 * 60
    }
    fn default_session_max_idle_secs() -> u64 {
        24 * 60 * 60
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            chunk_max_age_secs: Self::default_chunk_max_age_secs(),
            chunk_sweep_interval_secs: Self::default_chunk_sweep_interval_secs(),
            artifact_max_age_days: Self::default_artifact_max_age_days(),
            artifact_sweep_interval_secs: Self::default_artifact_sweep_interval_secs(),
            session_max_idle_secs: Self::default_session_max_idle_secs(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct TelemetryConfig {
    #[serde(default = "TelemetryConfig::default_level")]
    pub level: String,
    /// Extra `EnvFilter` directives, e.g. `service_upload=debug`.
    #[serde(default)]
    pub filter: String,
}

impl TelemetryConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            filter: String::default(),
        }
    }
}

/// Layers `config.yaml`, yaml files given as arguments, then `UPLOAD__*` variables.
pub fn build_config() -> anyhow::Result<config::Config> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = config::Config::builder().add_source(
        config::File::with_name("config")
            .required(false)
            .format(config::FileFormat::Yaml),
    );
    for arg in args {
        if arg.ends_with("yaml") || arg.ends_with("yml") {
            config = config.add_source(
                config::File::from(std::path::Path::new(arg.as_str()))
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
    }
    config = config.add_source(
        config::Environment::with_prefix("UPLOAD")
            .separator("__")
            .try_parsing(true),
    );
    Ok(config.build()?)
}
