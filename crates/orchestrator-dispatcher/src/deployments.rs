use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::{keys, Assignment, Deployment, LogEntry};
use tracing::warn;

impl Dispatcher {
    /// Stamps a uuid, status=SUBMITTED, empty assignments, updated_by=API,
    /// and appends a "description received" log.
    pub async fn create_deployment(&self, deployment_uuid: String, deployment_description: String) -> DispatcherResult<Deployment> {
        let deployment = Deployment::new(deployment_uuid, deployment_description);
        let key = keys::deployment_key(&deployment.deployment_uuid);
        self.store.put(&key, serde_json::to_vec(&deployment)?).await?;
        Ok(deployment)
    }

    pub async fn get_deployment(&self, deployment_uuid: &str) -> DispatcherResult<Option<Deployment>> {
        match self.store.get(&keys::deployment_key(deployment_uuid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrites the stored value, preserving append-only logs: callers
    /// that want to append pass in a `deployment` whose `logs` already
    /// includes prior entries (read-modify-write at the call site).
    pub async fn update_deployment(&self, deployment: Deployment) -> DispatcherResult<Deployment> {
        let key = keys::deployment_key(&deployment.deployment_uuid);
        self.store.put(&key, serde_json::to_vec(&deployment)?).await?;
        Ok(deployment)
    }

    /// Locates an assignment by uuid alone by range-scanning the
    /// `/assignments/` prefix across all clusters (the Deployment only
    /// remembers the assignment uuid, not which cluster it landed on).
    pub(crate) async fn find_assignment_key(&self, assignment_uuid: &str) -> DispatcherResult<Option<String>> {
        let suffix = format!("/assignment/{assignment_uuid}");
        let keys = self.store.list_keys(keys::ASSIGNMENTS_PREFIX).await?;
        Ok(keys.into_iter().find(|k| k.ends_with(&suffix)))
    }

    pub async fn get_assignment_by_uuid(&self, assignment_uuid: &str) -> DispatcherResult<Option<Assignment>> {
        let Some(key) = self.find_assignment_key(assignment_uuid).await? else {
            return Ok(None);
        };
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_assignment(&self, cluster_uuid: &str, assignment_uuid: &str) -> DispatcherResult<Option<Assignment>> {
        match self.store.get(&keys::assignment_key(cluster_uuid, assignment_uuid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_bundle(&self, bundle_uuid: &str) -> DispatcherResult<Option<orchestrator_types::Bundle>> {
        match self.store.get(&keys::bundle_key(bundle_uuid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Cascades: for each assignment, delete its bundles and the
    /// assignment key; delete the deployment; delete monitoring; call the
    /// telemetry handler to drop its record. Best-effort and idempotent —
    /// a missing assignment or bundle is simply skipped. Calling this on a
    /// deployment that no longer exists is not an error.
    pub async fn delete_deployment(&self, deployment_uuid: &str) -> DispatcherResult<bool> {
        let Some(deployment) = self.get_deployment(deployment_uuid).await? else {
            return Ok(false);
        };

        for assignment_uuid in &deployment.assignments {
            if let Ok(Some(assignment)) = self.get_assignment_by_uuid(assignment_uuid).await {
                for bundle_uuid in &assignment.bundles {
                    if let Err(err) = self.store.delete(&keys::bundle_key(bundle_uuid)).await {
                        warn!(%bundle_uuid, %err, "failed to delete bundle during cascade");
                    }
                }
                let assignment_key = keys::assignment_key(&assignment.cluster_uuid, assignment_uuid);
                if let Err(err) = self.store.delete(&assignment_key).await {
                    warn!(%assignment_uuid, %err, "failed to delete assignment during cascade");
                }
            }
        }

        self.store.delete(&keys::deployment_key(deployment_uuid)).await?;
        self.store.delete(&keys::monitoring_key(deployment_uuid)).await?;

        if let Err(err) = self.drop_telemetry_record(deployment_uuid).await {
            warn!(%deployment_uuid, %err, "telemetry handler drop failed during cascade delete");
        }

        Ok(true)
    }

    async fn drop_telemetry_record(&self, deployment_uuid: &str) -> DispatcherResult<()> {
        let url = format!("{}/deployments/{}", self.config.telemetry_endpoint, deployment_uuid);
        self.http.delete(url).send().await?;
        Ok(())
    }

    /// Appends a log entry to a deployment without disturbing its status.
    pub(crate) async fn append_deployment_log(&self, mut deployment: Deployment, event: impl Into<String>) -> DispatcherResult<Deployment> {
        deployment.logs.push(LogEntry::now(event));
        deployment.updated_at = chrono::Utc::now().timestamp();
        self.update_deployment(deployment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::{AssignmentKind, Bundle};

    #[tokio::test]
    async fn delete_deployment_removes_every_descendant_key() {
        let d = dispatcher();
        let deployment = d
            .create_deployment("dep-1".into(), "apiVersion: v1\nkind: Deployment".into())
            .await
            .unwrap();

        let bundle = Bundle::new(serde_json::json!({"kind": "Deployment"}));
        d.store
            .put(&keys::bundle_key(&bundle.uuid), serde_json::to_vec(&bundle).unwrap())
            .await
            .unwrap();

        let assignment = Assignment::new(AssignmentKind::Deployment, "c1".into(), deployment.deployment_uuid.clone(), vec![bundle.uuid.clone()]);
        d.store
            .put(&keys::assignment_key("c1", &assignment.uuid), serde_json::to_vec(&assignment).unwrap())
            .await
            .unwrap();

        let mut deployment = deployment;
        deployment.assignments.push(assignment.uuid.clone());
        deployment.assignments_status.push(orchestrator_types::AssignmentStatus::Created);
        d.update_deployment(deployment.clone()).await.unwrap();

        let monitoring = orchestrator_types::Monitoring::new(deployment.deployment_uuid.clone(), vec!["c1".into()]);
        d.store
            .put(&keys::monitoring_key(&deployment.deployment_uuid), serde_json::to_vec(&monitoring).unwrap())
            .await
            .unwrap();

        let deleted = d.delete_deployment(&deployment.deployment_uuid).await.unwrap();
        assert!(deleted);

        assert!(d.get_deployment(&deployment.deployment_uuid).await.unwrap().is_none());
        assert!(d.get_bundle(&bundle.uuid).await.unwrap().is_none());
        assert!(d.get_assignment("c1", &assignment.uuid).await.unwrap().is_none());
        assert!(d
            .store
            .get(&keys::monitoring_key(&deployment.deployment_uuid))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_deployment_is_idempotent() {
        let d = dispatcher();
        assert!(!d.delete_deployment("missing").await.unwrap());
    }
}
