use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::{keys, DeploymentObjective, LogEntry, Monitoring, NotificationEvent, UpdatedBy, WorkerNodeAssignment};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

impl Dispatcher {
    /// Entry point for the anomaly topic. For every worker node whose SHAP value
    /// clears `config.shap_value_threshold`, finds every bundle known to have
    /// landed there, and redeploys a deployment only once *every bundle of
    /// every one of its assignments* is implicated — an anomaly that only
    /// reaches a subset of an assignment's bundles leaves the deployment
    /// alone, matching the source dispatcher's `len(affected_bundles) ==
    /// len(current_assignment["bundles"])` full-coverage rule.
    pub async fn handle_notification_evt(&self, event: NotificationEvent) -> DispatcherResult<()> {
        let affected_nodes = self.extract_root_cause_worker_nodes(&event);
        if affected_nodes.is_empty() {
            return Ok(());
        }

        let monitorings = self.get_deployments_monitoring_data().await?;
        let mut candidates: HashMap<String, HashMap<String, HashSet<String>>> = HashMap::new();
        for monitoring in &monitorings {
            let implicated = self.implicated_bundles_by_assignment(monitoring, &affected_nodes);
            if !implicated.is_empty() {
                candidates.insert(monitoring.deployment_uuid.clone(), implicated);
            }
        }

        for (deployment_uuid, implicated_bundles) in candidates {
            let Some(deployment) = self.get_deployment(&deployment_uuid).await? else {
                continue;
            };
            if deployment.assignments.is_empty() {
                continue;
            }
            if !self.every_assignment_fully_implicated(&deployment.assignments, &implicated_bundles).await? {
                continue;
            }

            info!(%deployment_uuid, "every bundle of every assignment implicated by anomaly, triggering redeployment");
            if let Err(err) = self
                .trigger_assignment_redeployment(&deployment_uuid, affected_nodes.iter().cloned().collect())
                .await
            {
                warn!(%deployment_uuid, %err, "redeployment trigger failed");
            }
        }
        Ok(())
    }

    /// True only when every assignment in `assignment_uuids` both has a
    /// known (non-empty) bundle list and has every one of those bundles
    /// present in its implicated set. An assignment this dispatcher cannot
    /// look up is treated as not fully covered, consistent with the general
    /// policy of tolerating missing entities rather than acting on them.
    async fn every_assignment_fully_implicated(
        &self,
        assignment_uuids: &[String],
        implicated_bundles: &HashMap<String, HashSet<String>>,
    ) -> DispatcherResult<bool> {
        for assignment_uuid in assignment_uuids {
            let Some(assignment) = self.get_assignment_by_uuid(assignment_uuid).await? else {
                return Ok(false);
            };
            if assignment.bundles.is_empty() {
                return Ok(false);
            }
            let implicated = implicated_bundles.get(assignment_uuid);
            let fully_covered = implicated.is_some_and(|bundles| assignment.bundles.iter().all(|b| bundles.contains(b)));
            if !fully_covered {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Worker nodes named by a SHAP key (`<metric>_<worker_node>`) whose
    /// value meets or exceeds the configured threshold.
    fn extract_root_cause_worker_nodes(&self, event: &NotificationEvent) -> HashSet<String> {
        let mut nodes = HashSet::new();
        for anomaly in &event.anomalies {
            for (key, value) in &anomaly.analysis.shap_values {
                if *value < self.config.shap_value_threshold {
                    continue;
                }
                if let Some((_, worker_node)) = key.split_once('_') {
                    nodes.insert(worker_node.to_string());
                }
            }
        }
        nodes
    }

    /// Bundle uuids whose reported placement lands on one of the affected
    /// worker nodes, grouped by the assignment they belong to.
    fn implicated_bundles_by_assignment(&self, monitoring: &Monitoring, affected_nodes: &HashSet<String>) -> HashMap<String, HashSet<String>> {
        let mut by_assignment: HashMap<String, HashSet<String>> = HashMap::new();
        for (node, placements) in &monitoring.worker_nodes {
            if !affected_nodes.contains(node) {
                continue;
            }
            for placement in placements {
                by_assignment.entry(placement.assignment_uuid.clone()).or_default().insert(placement.bundle_uuid.clone());
            }
        }
        by_assignment
    }

    /// Tears the deployment's assignments down, then resubmits it to the
    /// Manager with a fresh [`DeploymentObjective`] recording the root cause,
    /// so the placement algorithm can route around the affected nodes.
    pub(crate) async fn trigger_assignment_redeployment(
        &self,
        deployment_uuid: &str,
        affected_worker_nodes: Vec<String>,
    ) -> DispatcherResult<()> {
        let Some(deployment) = self.get_deployment(deployment_uuid).await? else {
            return Ok(());
        };
        let description = deployment.deployment_description.clone();
        let mut objectives = deployment.deployment_objectives.clone();
        objectives.push(DeploymentObjective {
            affected_cluster_uuid: None,
            affected_worker_nodes,
            affected_deployments: vec![deployment_uuid.to_string()],
        });

        self.delete_deployment(deployment_uuid).await?;

        let mut redeployed = orchestrator_types::Deployment::new(deployment_uuid.to_string(), description);
        redeployed.deployment_objectives = objectives;
        redeployed.updated_by = UpdatedBy::Api;
        redeployed.logs.push(LogEntry::now("Trigger Redeployment"));
        self.update_deployment(redeployed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::{Anomaly, AnomalyAnalysis, Assignment, AssignmentKind};

    async fn put_assignment(d: &Dispatcher, cluster_uuid: &str, deployment_uuid: &str, bundles: Vec<String>) -> Assignment {
        let assignment = Assignment::new(AssignmentKind::Deployment, cluster_uuid.to_string(), deployment_uuid.to_string(), bundles);
        d.store
            .put(&keys::assignment_key(cluster_uuid, &assignment.uuid), serde_json::to_vec(&assignment).unwrap())
            .await
            .unwrap();
        assignment
    }

    fn anomaly_event(node: &str, value: f64) -> NotificationEvent {
        NotificationEvent {
            method: "isolation_forest".into(),
            model: "v1".into(),
            interval: serde_json::json!({}),
            anomalies: vec![Anomaly {
                analysis: AnomalyAnalysis {
                    shap_values: HashMap::from([(format!("cpu_{node}"), value)]),
                },
            }],
        }
    }

    #[tokio::test]
    async fn redeploys_only_when_every_assignment_is_implicated() {
        let d = dispatcher();
        let deployment = d.create_deployment("dep-1".into(), "kind: Deployment".into()).await.unwrap();

        let a1 = put_assignment(&d, "c1", &deployment.deployment_uuid, vec!["b1".into()]).await;
        let a2 = put_assignment(&d, "c1", &deployment.deployment_uuid, vec!["b2".into()]).await;
        let mut deployment = deployment;
        deployment.assignments = vec![a1.uuid.clone(), a2.uuid.clone()];
        d.update_deployment(deployment.clone()).await.unwrap();

        let mut monitoring = orchestrator_types::Monitoring::new(deployment.deployment_uuid.clone(), vec!["c1".into()]);
        monitoring.worker_nodes.insert(
            "node-1".into(),
            vec![WorkerNodeAssignment {
                cluster_uuid: "c1".into(),
                deployment_uuid: deployment.deployment_uuid.clone(),
                assignment_uuid: a1.uuid.clone(),
                bundle_uuid: "b1".into(),
            }],
        );
        d.store
            .put(&keys::monitoring_key(&deployment.deployment_uuid), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        d.handle_notification_evt(anomaly_event("node-1", 0.9)).await.unwrap();

        // Only a1 was implicated, not a2: the deployment must still exist unredeployed.
        let deployment = d.get_deployment(&deployment.deployment_uuid).await.unwrap().unwrap();
        assert!(deployment.deployment_objectives.is_empty());
    }

    #[tokio::test]
    async fn no_redeployment_when_only_a_subset_of_an_assignments_bundles_is_affected() {
        let d = dispatcher();
        let deployment = d.create_deployment("dep-3".into(), "kind: Deployment".into()).await.unwrap();

        // a1 spans two bundles landed on two different worker nodes.
        let a1 = put_assignment(&d, "c1", &deployment.deployment_uuid, vec!["b1".into(), "b2".into()]).await;
        let mut deployment = deployment;
        deployment.assignments = vec![a1.uuid.clone()];
        d.update_deployment(deployment.clone()).await.unwrap();

        let mut monitoring = orchestrator_types::Monitoring::new(deployment.deployment_uuid.clone(), vec!["c1".into()]);
        monitoring.worker_nodes.insert(
            "node-1".into(),
            vec![WorkerNodeAssignment {
                cluster_uuid: "c1".into(),
                deployment_uuid: deployment.deployment_uuid.clone(),
                assignment_uuid: a1.uuid.clone(),
                bundle_uuid: "b1".into(),
            }],
        );
        monitoring.worker_nodes.insert(
            "node-2".into(),
            vec![WorkerNodeAssignment {
                cluster_uuid: "c1".into(),
                deployment_uuid: deployment.deployment_uuid.clone(),
                assignment_uuid: a1.uuid.clone(),
                bundle_uuid: "b2".into(),
            }],
        );
        d.store
            .put(&keys::monitoring_key(&deployment.deployment_uuid), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        // Only node-1 is anomalous, so only b1 of a1's two bundles is implicated.
        d.handle_notification_evt(anomaly_event("node-1", 0.9)).await.unwrap();

        let deployment = d.get_deployment(&deployment.deployment_uuid).await.unwrap().unwrap();
        assert!(deployment.deployment_objectives.is_empty());
    }

    #[tokio::test]
    async fn redeploys_when_all_assignments_implicated() {
        let d = dispatcher();
        let deployment = d.create_deployment("dep-2".into(), "kind: Deployment".into()).await.unwrap();

        let a1 = put_assignment(&d, "c1", &deployment.deployment_uuid, vec!["b1".into()]).await;
        let mut deployment = deployment;
        deployment.assignments = vec![a1.uuid.clone()];
        d.update_deployment(deployment.clone()).await.unwrap();

        let mut monitoring = orchestrator_types::Monitoring::new(deployment.deployment_uuid.clone(), vec!["c1".into()]);
        monitoring.worker_nodes.insert(
            "node-1".into(),
            vec![WorkerNodeAssignment {
                cluster_uuid: "c1".into(),
                deployment_uuid: deployment.deployment_uuid.clone(),
                assignment_uuid: a1.uuid.clone(),
                bundle_uuid: "b1".into(),
            }],
        );
        d.store
            .put(&keys::monitoring_key(&deployment.deployment_uuid), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        d.handle_notification_evt(anomaly_event("node-1", 0.95)).await.unwrap();

        let redeployed = d.get_deployment(&deployment.deployment_uuid).await.unwrap().unwrap();
        assert_eq!(redeployed.deployment_objectives.len(), 1);
        assert_eq!(redeployed.deployment_objectives[0].affected_worker_nodes, vec!["node-1".to_string()]);
    }
}
