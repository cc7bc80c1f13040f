use std::sync::Arc;

use colored::Colorize;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::infrastructure::{
    config::{build_config, UploadConfig},
    telemetry::initialize_telemetry,
    ServiceProvider,
};

pub fn run() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(x) => x,
        Err(e) => {
            return eprintln!("{}: {}", "Cannot build runtime".red(), e);
        }
    };
    runtime.block_on(async_run());
}

pub async fn async_run() {
    let config = match build_config().and_then(|c| Ok(c.try_deserialize::<UploadConfig>()?)) {
        Ok(x) => x,
        Err(e) => {
            return eprintln!("{}: {}", "Cannot build config".red(), e);
        }
    };
    if let Err(e) = initialize_telemetry(&config.telemetry) {
        return eprintln!("{}: {}", "Cannot build logger".red(), e);
    };

    let service_provider = match ServiceProvider::build(config).await {
        Ok(x) => Arc::new(x),
        Err(e) => {
            return eprintln!("{}: {}", "Cannot build Service Provider".red(), e);
        }
    };
    info!(
        "Upload engine ready, chunks in {}, artifacts in {}",
        service_provider.config.storage.chunk_dir, service_provider.config.storage.artifact_dir
    );

    let handles = service_provider
        .background_services
        .iter()
        .cloned()
        .map(|x| tokio::spawn(async move { x.run().await }))
        .collect::<Vec<JoinHandle<()>>>();
    let aborts = handles.iter().map(|h| h.abort_handle()).collect::<Vec<_>>();

    tokio::select! {
        results = join_all(handles) => {
            for result in results {
                if let Err(e) = result {
                    error!("Background service stopped: {e}");
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping Services (ctrl-c handling).");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}
