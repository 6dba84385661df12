//! HPC gateway Driver variant (§4.6). Structurally mirrors [`crate::k8s`]:
//! same watch contract, same write-via-API rule, but bundles describe HPC
//! service submissions rather than k8s documents, and every bundle's work
//! runs through the HPC [`ExecutionWrapper`] pipeline rather than being
//! applied synchronously.

use crate::api_client::ApiClient;
use crate::backend::HpcGatewayBackend;
use crate::execution_wrapper::ExecutionWrapper;
use crate::kv_watch::{self, AssignmentEvent};
use broker::BrokerClient;
use orchestrator_types::{
    AssignmentStatus, Bundle, Kernel, KernelKind, LogData, LogKind, OrchestratorConfig,
};
use std::sync::Arc;
use storage::StorageBackend;
use tracing::warn;

pub struct HpcDriver {
    store: Arc<dyn StorageBackend>,
    api: ApiClient,
    backend: Arc<dyn HpcGatewayBackend>,
    broker: Arc<dyn BrokerClient>,
    config: OrchestratorConfig,
    cluster_uuid: String,
    gateway_endpoint: String,
}

impl HpcDriver {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        api: ApiClient,
        backend: Arc<dyn HpcGatewayBackend>,
        broker: Arc<dyn BrokerClient>,
        config: OrchestratorConfig,
        cluster_uuid: String,
        gateway_endpoint: String,
    ) -> Self {
        Self {
            store,
            api,
            backend,
            broker,
            config,
            cluster_uuid,
            gateway_endpoint,
        }
    }

    pub async fn run(&self) {
        let (existing, mut rx) = match kv_watch::subscribe(&self.store, &self.cluster_uuid).await {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, cluster_uuid = %self.cluster_uuid, "failed to subscribe to assignment prefix");
                return;
            }
        };

        for assignment in existing {
            self.handle_put(assignment).await;
        }

        while let Some(event) = rx.recv().await {
            match event {
                AssignmentEvent::Put(assignment) => self.handle_put(assignment).await,
                AssignmentEvent::Delete { assignment_uuid, .. } => self.handle_delete(&assignment_uuid).await,
            }
        }
    }

    async fn handle_put(&self, assignment: orchestrator_types::Assignment) {
        if assignment.status == AssignmentStatus::Deployed || assignment.status == AssignmentStatus::Failed {
            return;
        }

        for bundle_uuid in &assignment.bundles {
            let Some(bundle) = self.fetch_bundle(bundle_uuid).await else {
                warn!(bundle_uuid, "hpc bundle not found");
                continue;
            };
            let Some(kernel) = self.find_kernel_for_assignment(&assignment.uuid).await else {
                warn!(assignment_uuid = %assignment.uuid, "no kernel found for hpc assignment");
                continue;
            };

            self.spawn_execution(&assignment, &bundle, &kernel).await;
        }

        self.post_assignment_log(&assignment, AssignmentStatus::Deployed, "hpc jobs submitted").await;
    }

    async fn spawn_execution(&self, assignment: &orchestrator_types::Assignment, bundle: &Bundle, kernel: &Kernel) {
        if kernel.kind != KernelKind::Kernel {
            return;
        }

        let bucket_id = kernel.data_description.get("bucket_id").and_then(|v| v.as_str()).unwrap_or(&kernel.request_uuid).to_string();
        let arguments: Vec<String> = kernel
            .data_description
            .get("arguments")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let results_filename = kernel.data_description.get("results_filename").and_then(|v| v.as_str()).unwrap_or("results.tar.gz").to_string();

        let wrapper = ExecutionWrapper::new(kernel.request_uuid.clone(), bundle.uuid.clone(), self.api.clone(), self.broker.clone(), &self.config);
        let gateway = self.backend.clone();
        let gateway_endpoint = self.gateway_endpoint.clone();
        let service_descriptor = bundle.description.clone();
        let kernel_name = kernel.kernel_name.clone();

        tokio::spawn(async move {
            wrapper
                .run_hpc(gateway.as_ref(), &gateway_endpoint, &bucket_id, &arguments, &kernel_name, service_descriptor, &results_filename)
                .await;
        });
    }

    /// The source implementation does not act on a deleted HPC assignment:
    /// an in-flight job keeps running on the gateway to completion and its
    /// result is simply discarded by the time it lands, since the bundle it
    /// would update no longer exists. Kept as a no-op rather than invented
    /// cancellation semantics the gateway backend does not expose.
    async fn handle_delete(&self, assignment_uuid: &str) {
        warn!(assignment_uuid, "hpc assignment deleted while jobs may still be in flight; no cancellation is issued");
    }

    async fn fetch_bundle(&self, bundle_uuid: &str) -> Option<Bundle> {
        let key = orchestrator_types::keys::bundle_key(bundle_uuid);
        let bytes = self.store.get(&key).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    async fn find_kernel_for_assignment(&self, assignment_uuid: &str) -> Option<Kernel> {
        for key in self.store.list_keys(orchestrator_types::keys::KERNELS_PREFIX).await.ok()? {
            if let Ok(Some(bytes)) = self.store.get(&key).await {
                if let Ok(kernel) = serde_json::from_slice::<Kernel>(&bytes) {
                    if kernel.assignment_uuid.as_deref() == Some(assignment_uuid) {
                        return Some(kernel);
                    }
                }
            }
        }
        None
    }

    async fn post_assignment_log(&self, assignment: &orchestrator_types::Assignment, status: AssignmentStatus, event: &str) {
        let entry = LogData {
            uuid: assignment.uuid.clone(),
            kind: LogKind::Assignment,
            cluster_uuid: Some(self.cluster_uuid.clone()),
            status: status.into(),
            event: event.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(err) = self.api.post_logs(vec![entry]).await {
            warn!(%err, assignment_uuid = %assignment.uuid, "failed to post assignment log");
        }
    }
}
