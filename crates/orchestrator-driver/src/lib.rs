//! Cluster Driver agent. One process per cluster, speaking only to the API
//! Facade for writes (§3 data model "Mutated by ... Driver (via API)") and
//! to its cluster's backend (container scheduler or HPC gateway) to do the
//! actual work.

pub mod api_client;
pub mod backend;
pub mod execution_wrapper;
pub mod hpc;
pub mod k8s;
pub mod kv_watch;

use orchestrator_types::{Cluster, OrchestratorConfig};
use std::sync::Arc;
use std::time::Duration;
use storage::{SledStorage, StorageBackend};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Opens the embedded KV store at the path named by the config. Every
/// Driver process runs its own store instance; only the keys under its own
/// cluster's assignment prefix are ever consulted.
pub fn open_store(config: &OrchestratorConfig) -> Result<Arc<dyn StorageBackend>, DriverError> {
    let db = SledStorage::new(&config.kv.path)?;
    Ok(Arc::new(db))
}

/// Heartbeat loop: reports this cluster alive to the API Facade on a fixed
/// interval for as long as the process runs. A failed heartbeat is logged
/// and retried on the next tick rather than treated as fatal, since a
/// transient API outage should not take the Driver down with it.
pub async fn run_heartbeat_loop(api_base_url: String, cluster_uuid: String, interval: Duration) {
    let http = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let url = format!("{api_base_url}/clusters/health/{cluster_uuid}");
        if let Err(err) = http.post(&url).send().await {
            warn!(%err, cluster_uuid = %cluster_uuid, "heartbeat request failed");
        }
    }
}

/// Fetches this Driver's own cluster record so it can read `info` (the
/// opaque backend endpoint descriptor) before starting the watch loop.
pub async fn fetch_cluster(api_base_url: &str, cluster_uuid: &str) -> reqwest::Result<Cluster> {
    let http = reqwest::Client::new();
    http.get(format!("{api_base_url}/clusters/{cluster_uuid}")).send().await?.error_for_status()?.json().await
}
