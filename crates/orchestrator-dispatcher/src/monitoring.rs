use crate::error::{DispatcherError, DispatcherResult};
use crate::Dispatcher;
use orchestrator_types::{keys, AssignmentMonitoringData, Monitoring, UpdatedBy, WorkerNodeAssignment};

impl Dispatcher {
    /// Merges a single Driver-reported assignment placement into the
    /// deployment's Monitoring entity, rejecting reports from a cluster the
    /// entity doesn't list.
    pub async fn put_assignment_monitoring_data(&self, data: AssignmentMonitoringData) -> DispatcherResult<()> {
        let key = keys::monitoring_key(&data.deployment_uuid);
        let Some(bytes) = self.store.get(&key).await? else {
            return Err(DispatcherError::NotFound(format!("monitoring for {}", data.deployment_uuid)));
        };
        let mut monitoring: Monitoring = serde_json::from_slice(&bytes)?;

        if !monitoring.clusters.contains(&data.cluster_uuid) {
            return Err(DispatcherError::InvalidActiveFilter(format!(
                "cluster {} is not part of deployment {}",
                data.cluster_uuid, data.deployment_uuid
            )));
        }

        if let Some(worker_node) = data.worker_node {
            monitoring
                .worker_nodes
                .entry(worker_node)
                .or_default()
                .push(WorkerNodeAssignment {
                    cluster_uuid: data.cluster_uuid,
                    deployment_uuid: data.deployment_uuid.clone(),
                    assignment_uuid: data.assignment_uuid,
                    bundle_uuid: data
                        .k8s_params
                        .get("bundle_uuid")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
        }

        monitoring.updated_by = UpdatedBy::Driver;
        monitoring.updated_at = chrono::Utc::now().timestamp();
        self.store.put(&key, serde_json::to_vec(&monitoring)?).await?;
        Ok(())
    }

    /// Creates (if absent) and publishes the deployment's Monitoring entity
    /// to the telemetry handler once every assignment has reached DEPLOYED
    /// (called from [`Dispatcher::update_deployment_status`]).
    pub async fn enable_deployment_monitoring(&self, deployment_uuid: &str) -> DispatcherResult<()> {
        let Some(deployment) = self.get_deployment(deployment_uuid).await? else {
            return Ok(());
        };

        let key = keys::monitoring_key(deployment_uuid);
        let monitoring = match self.store.get(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                let mut clusters = Vec::new();
                for assignment_uuid in &deployment.assignments {
                    if let Some(assignment) = self.get_assignment_by_uuid(assignment_uuid).await? {
                        if !clusters.contains(&assignment.cluster_uuid) {
                            clusters.push(assignment.cluster_uuid);
                        }
                    }
                }
                Monitoring::new(deployment_uuid.to_string(), clusters)
            }
        };
        self.store.put(&key, serde_json::to_vec(&monitoring)?).await?;

        let url = format!("{}/deployments/{}/monitoring", self.config.telemetry_endpoint, deployment_uuid);
        self.http.put(url).json(&monitoring).send().await?;
        Ok(())
    }

    pub async fn get_deployments_monitoring_data(&self) -> DispatcherResult<Vec<Monitoring>> {
        let keys = self.store.list_keys(keys::MONITORING_PREFIX).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.store.get(&key).await? {
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Raw passthrough to the singleton `/telemetry_entities` record the
    /// telemetry handler itself maintains.
    pub async fn get_telemetry_entities(&self) -> DispatcherResult<serde_json::Value> {
        match self.store.get(keys::TELEMETRY_ENTITIES_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(serde_json::json!({})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;

    #[tokio::test]
    async fn rejects_report_from_cluster_outside_the_deployment() {
        let d = dispatcher();
        let monitoring = Monitoring::new("dep-1".into(), vec!["c1".into()]);
        d.store
            .put(&keys::monitoring_key("dep-1"), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        let report = AssignmentMonitoringData {
            deployment_uuid: "dep-1".into(),
            cluster_uuid: "c2".into(),
            assignment_uuid: "a1".into(),
            k8s_params: serde_json::json!({}),
            worker_node: Some("node-1".into()),
        };
        let err = d.put_assignment_monitoring_data(report).await.unwrap_err();
        assert!(matches!(err, DispatcherError::InvalidActiveFilter(_)));
    }

    #[tokio::test]
    async fn merges_worker_node_assignment_into_existing_entry() {
        let d = dispatcher();
        let monitoring = Monitoring::new("dep-1".into(), vec!["c1".into()]);
        d.store
            .put(&keys::monitoring_key("dep-1"), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        let report = AssignmentMonitoringData {
            deployment_uuid: "dep-1".into(),
            cluster_uuid: "c1".into(),
            assignment_uuid: "a1".into(),
            k8s_params: serde_json::json!({"bundle_uuid": "b1"}),
            worker_node: Some("node-1".into()),
        };
        d.put_assignment_monitoring_data(report).await.unwrap();

        let bytes = d.store.get(&keys::monitoring_key("dep-1")).await.unwrap().unwrap();
        let monitoring: Monitoring = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(monitoring.worker_nodes["node-1"].len(), 1);
        assert_eq!(monitoring.worker_nodes["node-1"][0].bundle_uuid, "b1");
    }
}
