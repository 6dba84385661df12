//! Container-scheduler Driver variant (§4.5). Watches the assignment prefix
//! scoped to one cluster, applies each bundle's k8s documents in the fixed
//! order the source system used (ConfigMaps and PersistentVolumes first,
//! PVCs next, Deployments last), and reports the resulting worker-node
//! placement back through the API Facade.

use crate::api_client::ApiClient;
use crate::backend::{BackendResourceRef, BackendResult, ContainerSchedulerBackend, DeploymentPlacement};
use crate::execution_wrapper::ExecutionWrapper;
use crate::kv_watch::{self, AssignmentEvent};
use broker::BrokerClient;
use orchestrator_types::{
    AssignmentKind, AssignmentMonitoringData, AssignmentStatus, Bundle, BundleStatus, Kernel,
    KernelKind, LogData, LogKind, OrchestratorConfig,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use storage::StorageBackend;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One of the k8s documents embedded in a Bundle's opaque `description`.
/// `kind` mirrors the document's own `kind` field in the source YAML
/// (`ConfigMap`, `PersistentVolume`, `PersistentVolumeClaim`, `Deployment`).
#[derive(Debug, Clone, serde::Deserialize)]
struct K8sDoc {
    kind: String,
    #[serde(flatten)]
    body: Value,
}

pub struct K8sDriver {
    store: Arc<dyn StorageBackend>,
    api: ApiClient,
    backend: Arc<dyn ContainerSchedulerBackend>,
    broker: Arc<dyn BrokerClient>,
    config: OrchestratorConfig,
    cluster_uuid: String,
    backend_endpoint: String,
    /// Caches the backend resource uid created for each bundle, so a
    /// termination can target it without re-rendering the bundle's
    /// description (which may already be gone by the time the delete event
    /// arrives).
    resources: Mutex<HashMap<String, Vec<BackendResourceRef>>>,
}

impl K8sDriver {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        api: ApiClient,
        backend: Arc<dyn ContainerSchedulerBackend>,
        broker: Arc<dyn BrokerClient>,
        config: OrchestratorConfig,
        cluster_uuid: String,
        backend_endpoint: String,
    ) -> Self {
        Self {
            store,
            api,
            backend,
            broker,
            config,
            cluster_uuid,
            backend_endpoint,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Hydrates from existing assignments, then services the watch stream
    /// until the channel closes (storage backend shutdown).
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

        match assignment.kind {
            AssignmentKind::Deployment => self.deploy_assignment(&assignment).await,
            AssignmentKind::FaaS => self.dispatch_faas_bundles(&assignment).await,
            AssignmentKind::Kernel => {
                info!(assignment_uuid = %assignment.uuid, "kernel-kind assignment observed by k8s driver, no-op");
            }
        }
    }

    async fn deploy_assignment(&self, assignment: &orchestrator_types::Assignment) {
        let mut succeeded = 0usize;
        for bundle_uuid in &assignment.bundles {
            if self.apply_bundle(assignment, bundle_uuid).await {
                succeeded += 1;
            }
        }

        let status = if succeeded == assignment.bundles.len() {
            AssignmentStatus::Deployed
        } else {
            AssignmentStatus::Failed
        };
        self.post_assignment_log(assignment, status, "bundle application complete").await;
    }

    async fn apply_bundle(&self, assignment: &orchestrator_types::Assignment, bundle_uuid: &str) -> bool {
        let bundle: Bundle = match self.fetch_bundle(bundle_uuid).await {
            Some(b) => b,
            None => {
                warn!(bundle_uuid, "bundle referenced by assignment not found");
                return false;
            }
        };

        let docs: Vec<K8sDoc> = match serde_json::from_value(bundle.description.clone()) {
            Ok(docs) => docs,
            Err(err) => {
                warn!(%err, bundle_uuid, "bundle description did not parse as a document list");
                self.post_bundle_log(bundle_uuid, BundleStatus::Failed, "malformed bundle description").await;
                return false;
            }
        };

        let mut refs = Vec::new();
        let mut worker_node = None;
        let mut ok = true;
        for doc in &docs {
            let result: BackendResult<Option<DeploymentPlacement>> = match doc.kind.as_str() {
                "ConfigMap" => self.backend.upsert_config_map(&self.backend_endpoint, &doc.body).await.map(|_| None),
                "PersistentVolume" => self.backend.upsert_persistent_volume(&self.backend_endpoint, &doc.body).await.map(|_| None),
                "PersistentVolumeClaim" => self.backend.create_pvc_if_absent(&self.backend_endpoint, &doc.body).await.map(|_| None),
                "Deployment" => self.backend.upsert_deployment(&self.backend_endpoint, &doc.body).await.map(Some),
                other => {
                    warn!(kind = other, bundle_uuid, "unrecognized document kind, skipping");
                    Ok(None)
                }
            };

            match result {
                Ok(Some(placement)) => {
                    worker_node = placement.worker_node.clone();
                    refs.push(BackendResourceRef { doc_kind: doc.kind.clone(), backend_uid: placement.backend_uid });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, bundle_uuid, kind = %doc.kind, "document apply failed");
                    ok = false;
                    break;
                }
            }
        }

        if ok {
            self.resources.lock().await.insert(bundle_uuid.to_string(), refs);
            self.post_bundle_log(bundle_uuid, BundleStatus::Successful, "bundle applied").await;
            self.report_worker_node_placement(assignment, bundle_uuid, worker_node).await;
        } else {
            self.post_bundle_log(bundle_uuid, BundleStatus::Failed, "bundle apply failed").await;
        }
        ok
    }

    /// Dispatches a FaaS-kind assignment's bundles to the FaaS ExecutionWrapper
    /// pipeline, one spawned task per bundle so a slow kernel call does not
    /// block the watch loop (§5).
    async fn dispatch_faas_bundles(&self, assignment: &orchestrator_types::Assignment) {
        for bundle_uuid in &assignment.bundles {
            let Some(bundle) = self.fetch_bundle(bundle_uuid).await else {
                warn!(bundle_uuid, "faas bundle not found");
                continue;
            };
            let Some(kernel) = self.find_kernel_for_assignment(&assignment.uuid).await else {
                warn!(assignment_uuid = %assignment.uuid, "no kernel found for faas assignment");
                continue;
            };
            if kernel.kind != KernelKind::FaaS {
                continue;
            }

            let wrapper = ExecutionWrapper::new(kernel.request_uuid.clone(), bundle.uuid.clone(), self.api.clone(), self.broker.clone(), &self.config);
            let http = reqwest::Client::new();
            let faas_endpoint = kernel.data_description.get("faas_endpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let data_description = kernel.data_description.clone();

            tokio::spawn(async move {
                wrapper.run_faas(&http, &faas_endpoint, &data_description).await;
            });
        }
        self.post_assignment_log(assignment, AssignmentStatus::Deployed, "faas bundles dispatched").await;
    }

    async fn handle_delete(&self, assignment_uuid: &str) {
        let refs = self.resources.lock().await.remove(assignment_uuid);
        let Some(refs) = refs else {
            return;
        };
        for r in refs {
            if r.doc_kind != "Deployment" {
                continue;
            }
            if let Err(err) = self.backend.delete_deployment(&self.backend_endpoint, &r.backend_uid, 5).await {
                warn!(%err, backend_uid = %r.backend_uid, "failed to terminate backend deployment");
            }
        }
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

    async fn report_worker_node_placement(&self, assignment: &orchestrator_types::Assignment, bundle_uuid: &str, worker_node: Option<String>) {
        let data = AssignmentMonitoringData {
            deployment_uuid: assignment.deployment_uuid.clone(),
            cluster_uuid: self.cluster_uuid.clone(),
            assignment_uuid: assignment.uuid.clone(),
            k8s_params: serde_json::json!({ "bundle_uuid": bundle_uuid }),
            worker_node,
        };
        if let Err(err) = self.api.put_monitoring(data).await {
            warn!(%err, assignment_uuid = %assignment.uuid, "failed to report worker node placement");
        }
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

    async fn post_bundle_log(&self, bundle_uuid: &str, status: BundleStatus, event: &str) {
        let entry = LogData {
            uuid: bundle_uuid.to_string(),
            kind: LogKind::Bundle,
            cluster_uuid: Some(self.cluster_uuid.clone()),
            status: status.into(),
            event: event.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(err) = self.api.post_logs(vec![entry]).await {
            warn!(%err, bundle_uuid, "failed to post bundle log");
        }
    }
}
