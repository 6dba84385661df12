//! Manager: consumes Deployment/Kernel/StoragePolicy submissions written by
//! the API Facade, consults the ROT placement oracle, and materializes the
//! Assignments and Bundles the Cluster Driver watches (§4.4). Unlike the
//! Driver, the Manager is a trusted control-plane component with direct KV
//! credentials — it reuses [`orchestrator_dispatcher::Dispatcher`] for the
//! entity CRUD it shares with the API Facade, and writes Bundles/
//! Assignments/Monitoring directly since those are its own to mutate.

mod deployment_flow;
mod kernel_flow;
pub mod rot_client;
mod secure_storage;
mod storage_policy_flow;
mod watch;
mod yaml_transform;

pub use secure_storage::SecureStorageClient;

use orchestrator_dispatcher::Dispatcher;
use orchestrator_types::{keys, Deployment, Kernel, OrchestratorConfig, StoragePolicy};
use rot_client::RotClient;
use std::sync::Arc;
use std::time::Duration;
use storage::{SledStorage, StorageBackend};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("rot client error: {0}")]
    RotClient(#[from] rot_client::RotClientError),
}

/// Opens the embedded KV store the Manager watches directly.
pub fn open_store(config: &OrchestratorConfig) -> Result<Arc<dyn StorageBackend>, ManagerError> {
    let db = SledStorage::new(&config.kv.path)?;
    Ok(Arc::new(db))
}

pub struct Manager {
    dispatcher: Dispatcher,
    rot: RotClient,
    secure_storage: SecureStorageClient,
}

impl Manager {
    pub async fn new(store: Arc<dyn StorageBackend>, broker: Arc<dyn broker::BrokerClient>, config: OrchestratorConfig) -> Result<Self, ManagerError> {
        let rot = RotClient::load(&config.rot_client_config_path, broker, Duration::from_secs(config.poll_deadline_secs)).await?;
        let secure_storage = SecureStorageClient::new(config.secure_storage_endpoint.clone(), config.secure_storage_token.clone());
        let dispatcher = Dispatcher::new(store, config);
        Ok(Self { dispatcher, rot, secure_storage })
    }

    /// Runs all three prefix watches concurrently until the process is
    /// terminated. Each event is handled in its own spawned task so a slow
    /// ROT round-trip never backpressures the watch stream (§5).
    pub async fn run(self) {
        let manager = Arc::new(self);

        let deployments = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.watch_deployments().await })
        };
        let kernels = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.watch_kernels().await })
        };
        let storage_policies = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.watch_storage_policies().await })
        };

        let _ = tokio::join!(deployments, kernels, storage_policies);
    }

    async fn watch_deployments(&self) {
        let store = self.dispatcher.store().clone();
        let (existing, mut rx) = match watch::subscribe::<Deployment>(&store, keys::DEPLOYMENTS_PREFIX, |d| d.updated_by).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "failed to subscribe to deployments prefix");
                return;
            }
        };
        info!(count = existing.len(), "hydrated existing API-submitted deployments");
        for deployment in existing {
            deployment_flow::handle(&self.dispatcher, &self.rot, deployment).await;
        }
        while let Some(deployment) = rx.recv().await {
            deployment_flow::handle(&self.dispatcher, &self.rot, deployment).await;
        }
    }

    async fn watch_kernels(&self) {
        let store = self.dispatcher.store().clone();
        let (existing, mut rx) = match watch::subscribe::<Kernel>(&store, keys::KERNELS_PREFIX, |k| k.updated_by).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "failed to subscribe to kernels prefix");
                return;
            }
        };
        for kernel in existing {
            kernel_flow::handle(&self.dispatcher, &self.rot, kernel).await;
        }
        while let Some(kernel) = rx.recv().await {
            kernel_flow::handle(&self.dispatcher, &self.rot, kernel).await;
        }
    }

    async fn watch_storage_policies(&self) {
        let store = self.dispatcher.store().clone();
        let (existing, mut rx) = match watch::subscribe::<StoragePolicy>(&store, keys::STORAGE_POLICIES_PREFIX, |p| p.updated_by).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "failed to subscribe to storage_policies prefix");
                return;
            }
        };
        for policy in existing {
            storage_policy_flow::handle(&self.dispatcher, &self.rot, &self.secure_storage, policy).await;
        }
        while let Some(policy) = rx.recv().await {
            storage_policy_flow::handle(&self.dispatcher, &self.rot, &self.secure_storage, policy).await;
        }
    }
}
