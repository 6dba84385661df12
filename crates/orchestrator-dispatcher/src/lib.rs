//! Stateless logic over the KV store: CRUD for Clusters, Deployments,
//! Assignments, Bundles, Kernels, StoragePolicies, Monitoring;
//! log-append operations; derived queries for dashboards; the redeployment
//! decision on anomaly events.
//!
//! The Dispatcher never blocks a KV watcher: every operation here is a
//! handful of KV round-trips plus, at most, one outbound HTTP call to a
//! collaborator (telemetry handler, secure-storage gateway). It holds no
//! in-memory state of its own beyond the `reqwest::Client` connection pool.

mod clusters;
mod dashboards;
mod deployments;
mod error;
mod kernels;
mod logs;
mod monitoring;
mod notifications;
mod storage_policies;

pub use dashboards::{DeploymentOverviewRow, ServiceStatus};
pub use error::{DispatcherError, DispatcherResult};

use orchestrator_types::OrchestratorConfig;
use std::sync::Arc;
use storage::StorageBackend;

/// Entry point for all KV-store business logic. Cheap to clone: the store
/// handle and HTTP client are both internally `Arc`-backed.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) store: Arc<dyn StorageBackend>,
    pub(crate) http: reqwest::Client,
    pub(crate) config: OrchestratorConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn StorageBackend>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::Dispatcher;
    use std::sync::Arc;
    use storage::MemoryStorage;

    pub fn dispatcher() -> Dispatcher {
        let config_json = r#"{
            "kv": {"host":"localhost","port":2379,"path":"./test-kv"},
            "broker": {"address":"localhost","username":"guest","password":"guest","vhost":"/"},
            "telemetry_endpoint": "http://localhost:9000",
            "secure_storage_endpoint": "http://localhost:9001",
            "secure_storage_token": "token",
            "rot_client_config_path": "/etc/serrano/rot.json",
            "api_base_url": "http://localhost:8080",
            "shap_value_threshold": 0.5,
            "heartbeat_secs": 30
        }"#;
        let config: orchestrator_types::OrchestratorConfig = serde_json::from_str(config_json).unwrap();
        Dispatcher::new(Arc::new(MemoryStorage::new()), config)
    }
}
