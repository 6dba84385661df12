//! Kernel and FaaS event handling (§4.4 "Flow for a FaaS event"). The
//! source spec names this the "FaaS event" flow; it is the same code path
//! for both `KernelKind::Kernel` (HPC on-demand kernel) and
//! `KernelKind::FaaS` requests, since the ROT plugin (`OnDemandKernel`) and
//! the materialized shape (one Bundle, one Assignment) are identical for
//! both — only the Driver that later picks up the Assignment treats the
//! two kinds differently (§4.5/§4.6).

use crate::rot_client::RotClient;
use orchestrator_dispatcher::Dispatcher;
use orchestrator_types::{
    keys, Assignment, AssignmentKind, Bundle, Kernel, KernelStatus, LogEntry, UpdatedBy,
};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct OnDemandKernelResult {
    cluster_uuid: String,
    #[serde(default)]
    deployment_mode: Option<String>,
}

pub async fn handle(dispatcher: &Dispatcher, rot: &RotClient, mut kernel: Kernel) {
    let request_uuid = kernel.request_uuid.clone();

    let active_clusters = match dispatcher.get_clusters(Some("10m")).await {
        Ok(clusters) => clusters,
        Err(err) => {
            warn!(%request_uuid, %err, "failed to fetch active clusters");
            return;
        }
    };
    if active_clusters.is_empty() {
        return;
    }

    let active_cluster_uuids: Vec<String> = active_clusters.iter().map(|c| c.cluster_uuid.clone()).collect();
    let payload = serde_json::json!({
        "kind": kernel.kind,
        "kernel_name": kernel.kernel_name,
        "request_uuid": request_uuid,
        "active_clusters": active_cluster_uuids,
        "deployment_objectives": Vec::<serde_json::Value>::new(),
        "data_description": kernel.data_description,
    });

    let response = match rot.submit("OnDemandKernel", payload).await {
        Ok(response) => response,
        Err(err) => {
            fail(dispatcher, kernel, format!("ROT scheduling request failed: {err}")).await;
            return;
        }
    };

    let result: OnDemandKernelResult = match serde_json::from_value(response.result) {
        Ok(result) => result,
        Err(err) => {
            fail(dispatcher, kernel, format!("malformed ROT response: {err}")).await;
            return;
        }
    };

    let bundle = Bundle::new(kernel.data_description.clone());
    if let Err(err) = dispatcher.store().put(&keys::bundle_key(&bundle.uuid), serde_json::to_vec(&bundle).unwrap()).await {
        warn!(%request_uuid, %err, "failed to persist bundle");
        fail(dispatcher, kernel, format!("bundle persistence failed: {err}")).await;
        return;
    }

    let assignment = Assignment::new(AssignmentKind::Kernel, result.cluster_uuid.clone(), request_uuid.clone(), vec![bundle.uuid]);
    if let Err(err) = dispatcher.store().put(&keys::assignment_key(&result.cluster_uuid, &assignment.uuid), serde_json::to_vec(&assignment).unwrap()).await {
        warn!(%request_uuid, %err, "failed to persist assignment");
        fail(dispatcher, kernel, format!("assignment persistence failed: {err}")).await;
        return;
    }

    kernel.status = KernelStatus::Assigned;
    kernel.updated_by = UpdatedBy::Manager;
    kernel.assignment_uuid = Some(assignment.uuid);
    let mode = result.deployment_mode.unwrap_or_else(|| "default".to_string());
    kernel.logs.push(LogEntry::now(format!("assigned to cluster {} in mode {mode}", result.cluster_uuid)));
    let _ = dispatcher.update_kernel(kernel).await;
}

async fn fail(dispatcher: &Dispatcher, mut kernel: Kernel, event: String) {
    warn!(request_uuid = %kernel.request_uuid, %event, "kernel flow failed");
    kernel.status = KernelStatus::Failed;
    kernel.updated_by = UpdatedBy::Manager;
    kernel.logs.push(LogEntry::now(event));
    let _ = dispatcher.update_kernel(kernel).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::MemoryBroker;
    use orchestrator_types::{ClusterType, KernelKind};
    use std::sync::Arc;
    use std::time::Duration;
    use storage::MemoryStorage;

    fn test_config() -> orchestrator_types::OrchestratorConfig {
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
        serde_json::from_str(config_json).unwrap()
    }

    #[tokio::test]
    async fn no_active_clusters_leaves_kernel_submitted() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStorage::new()), test_config());
        let broker: Arc<dyn broker::BrokerClient> = Arc::new(MemoryBroker::new());
        let rot = RotClient::load_for_test(broker, Duration::from_millis(50));

        let kernel = Kernel::new("req-1".into(), KernelKind::FaaS, "fft".into(), serde_json::json!({}));
        dispatcher.create_kernel(kernel.clone()).await.unwrap();
        handle(&dispatcher, &rot, kernel).await;

        let stored = dispatcher.get_kernel("req-1").await.unwrap().unwrap();
        assert_eq!(stored.status, KernelStatus::Submitted);
    }

    #[tokio::test]
    async fn rot_timeout_flips_kernel_to_failed() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStorage::new()), test_config());
        dispatcher.set_cluster(orchestrator_types::Cluster::new("c1".into(), ClusterType::K8s, serde_json::json!({}))).await.unwrap();
        let clusters = dispatcher.get_clusters(None).await.unwrap();
        dispatcher.heartbeat(&clusters[0].cluster_uuid).await.unwrap();

        let broker: Arc<dyn broker::BrokerClient> = Arc::new(MemoryBroker::new());
        let rot = RotClient::load_for_test(broker, Duration::from_millis(20));

        let kernel = Kernel::new("req-2".into(), KernelKind::FaaS, "fft".into(), serde_json::json!({}));
        dispatcher.create_kernel(kernel.clone()).await.unwrap();
        handle(&dispatcher, &rot, kernel).await;

        let stored = dispatcher.get_kernel("req-2").await.unwrap().unwrap();
        assert_eq!(stored.status, KernelStatus::Failed);
    }
}
