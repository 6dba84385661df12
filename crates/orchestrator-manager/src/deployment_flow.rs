//! Deployment event handling (§4.4 "Flow for a Deployment event").

use crate::rot_client::{RotClient, RotClientError};
use crate::yaml_transform::{self, SchedulingInstruction, YamlDoc};
use orchestrator_dispatcher::Dispatcher;
use orchestrator_types::{
    keys, Assignment, AssignmentKind, AssignmentStatus, Bundle, Deployment, DeploymentStatus,
    LogEntry, Monitoring, UpdatedBy,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct RotAssignment {
    cluster_uuid: String,
    deployments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SimpleMatchResult {
    assignments: Vec<RotAssignment>,
    #[serde(default)]
    instructions: HashMap<String, Vec<SchedulingInstruction>>,
}

pub async fn handle(dispatcher: &Dispatcher, rot: &RotClient, mut deployment: Deployment) {
    let deployment_uuid = deployment.deployment_uuid.clone();

    let active_clusters = match dispatcher.get_clusters(Some("10m")).await {
        Ok(clusters) => clusters,
        Err(err) => {
            warn!(%deployment_uuid, %err, "failed to fetch active clusters");
            return;
        }
    };
    if active_clusters.is_empty() {
        info!(%deployment_uuid, "no active clusters, dropping deployment request until an operator re-puts it");
        return;
    }

    deployment.logs.push(LogEntry::now("Request ROT scheduling"));
    deployment.status = DeploymentStatus::Pending;
    if let Err(err) = dispatcher.update_deployment(deployment.clone()).await {
        warn!(%deployment_uuid, %err, "failed to persist PENDING status");
        return;
    }

    let docs = match yaml_transform::parse_documents(&deployment.deployment_description) {
        Ok(docs) => docs,
        Err(err) => {
            fail(dispatcher, deployment, format!("deployment description parse error: {err}")).await;
            return;
        }
    };

    let active_cluster_uuids: Vec<String> = active_clusters.iter().map(|c| c.cluster_uuid.clone()).collect();
    let payload = serde_json::json!({
        "kind": "Deployment",
        "application_description": yaml_transform::application_descriptions(&docs),
        "deployment_objectives": deployment.deployment_objectives,
        "active_clusters": active_cluster_uuids,
    });

    let response = match rot.submit("SimpleMatch", payload).await {
        Ok(response) => response,
        Err(err) => {
            fail(dispatcher, deployment, rot_error_event(&err)).await;
            return;
        }
    };

    let result: SimpleMatchResult = match serde_json::from_value(response.result) {
        Ok(result) => result,
        Err(err) => {
            fail(dispatcher, deployment, format!("malformed ROT response: {err}")).await;
            return;
        }
    };

    materialize(dispatcher, deployment, docs, result).await;
}

async fn materialize(dispatcher: &Dispatcher, mut deployment: Deployment, docs: Vec<YamlDoc>, result: SimpleMatchResult) {
    let deployment_uuid = deployment.deployment_uuid.clone();
    let groups = yaml_transform::group_by_group_id(&docs);

    let mut clusters = Vec::new();
    let mut assignments = Vec::new();

    for rot_assignment in &result.assignments {
        let mut bundle_uuids = Vec::new();

        for (group_id, group_docs) in &groups {
            let belongs_to_this_cluster = group_docs
                .iter()
                .any(|d| d.kind == "Deployment" && d.name.as_deref().map(|n| rot_assignment.deployments.iter().any(|dep| dep == n)).unwrap_or(false));
            if !belongs_to_this_cluster {
                continue;
            }

            let mut transformed = group_docs.clone();
            for doc in &mut transformed {
                let instructions = doc
                    .name
                    .as_deref()
                    .and_then(|name| result.instructions.get(name))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                yaml_transform::transform_deployment_doc(doc, &rot_assignment.cluster_uuid, &deployment_uuid, group_id, instructions);
            }

            let description = serde_json::Value::Array(transformed.into_iter().map(|d| d.body).collect());
            let bundle = Bundle::new(description);
            if let Err(err) = dispatcher.store().put(&keys::bundle_key(&bundle.uuid), serde_json::to_vec(&bundle).unwrap()).await {
                warn!(%deployment_uuid, %err, "failed to persist bundle");
                continue;
            }
            bundle_uuids.push(bundle.uuid);
        }

        if bundle_uuids.is_empty() {
            continue;
        }

        let assignment = Assignment::new(AssignmentKind::Deployment, rot_assignment.cluster_uuid.clone(), deployment_uuid.clone(), bundle_uuids);
        if let Err(err) = dispatcher.store().put(&keys::assignment_key(&rot_assignment.cluster_uuid, &assignment.uuid), serde_json::to_vec(&assignment).unwrap()).await {
            warn!(%deployment_uuid, %err, "failed to persist assignment");
            continue;
        }

        if !clusters.contains(&rot_assignment.cluster_uuid) {
            clusters.push(rot_assignment.cluster_uuid.clone());
        }
        assignments.push(assignment);
    }

    if assignments.is_empty() {
        fail(dispatcher, deployment, "ROT response produced no deployable assignment".to_string()).await;
        return;
    }

    // Write order matters (§5): Monitoring before the Deployment flips to
    // ASSIGNED; Bundles (already persisted above) before Assignments (also
    // already persisted above, ahead of the Deployment write that makes
    // them reachable via `deployment.assignments`).
    let monitoring = Monitoring::new(deployment_uuid.clone(), clusters);
    if let Err(err) = dispatcher.store().put(&keys::monitoring_key(&deployment_uuid), serde_json::to_vec(&monitoring).unwrap()).await {
        warn!(%deployment_uuid, %err, "failed to persist monitoring entity");
    }

    deployment.status = DeploymentStatus::Assigned;
    deployment.updated_by = UpdatedBy::Manager;
    deployment.assignments = assignments.iter().map(|a| a.uuid.clone()).collect();
    deployment.assignments_status = assignments.iter().map(|_| AssignmentStatus::Created).collect();
    deployment.logs.push(LogEntry::now("assignments created"));
    let _ = dispatcher.update_deployment(deployment).await;
}

fn rot_error_event(err: &RotClientError) -> String {
    format!("ROT scheduling request failed: {err}")
}

async fn fail(dispatcher: &Dispatcher, mut deployment: Deployment, event: String) {
    warn!(deployment_uuid = %deployment.deployment_uuid, %event, "deployment flow failed");
    deployment.status = DeploymentStatus::Failed;
    deployment.updated_by = UpdatedBy::Manager;
    deployment.logs.push(LogEntry::now(event));
    let _ = dispatcher.update_deployment(deployment).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::MemoryBroker;
    use orchestrator_types::ClusterType;
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
    async fn drops_request_when_no_active_clusters() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStorage::new()), test_config());
        let broker: Arc<dyn broker::BrokerClient> = Arc::new(MemoryBroker::new());
        let rot = crate::rot_client::RotClient::load_for_test(broker, Duration::from_millis(50));

        let deployment = dispatcher.create_deployment("dep-1".into(), "kind: Deployment".into()).await.unwrap();
        handle(&dispatcher, &rot, deployment).await;

        let stored = dispatcher.get_deployment("dep-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Submitted);
    }

    #[tokio::test]
    async fn materializes_bundle_and_assignment_for_a_single_cluster() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStorage::new()), test_config());
        dispatcher.set_cluster(orchestrator_types::Cluster::new("c1".into(), ClusterType::K8s, serde_json::json!({}))).await.unwrap();
        let clusters = dispatcher.get_clusters(None).await.unwrap();
        dispatcher.heartbeat(&clusters[0].cluster_uuid).await.unwrap();

        let deployment = dispatcher
            .create_deployment(
                "dep-1".into(),
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: svc\n  labels:\n    group_id: a\nspec:\n  replicas: 1\n  template:\n    metadata: {}\n    spec:\n      containers:\n        - name: main\n".into(),
            )
            .await
            .unwrap();

        let result = SimpleMatchResult {
            assignments: vec![RotAssignment { cluster_uuid: clusters[0].cluster_uuid.clone(), deployments: vec!["svc".into()] }],
            instructions: HashMap::new(),
        };
        let docs = yaml_transform::parse_documents(&deployment.deployment_description).unwrap();
        materialize(&dispatcher, deployment, docs, result).await;

        let stored = dispatcher.get_deployment("dep-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Assigned);
        assert_eq!(stored.assignments.len(), 1);

        let assignment = dispatcher.get_assignment_by_uuid(&stored.assignments[0]).await.unwrap().unwrap();
        assert_eq!(assignment.bundles.len(), 1);
        assert_eq!(assignment.cluster_uuid, clusters[0].cluster_uuid);
    }
}
