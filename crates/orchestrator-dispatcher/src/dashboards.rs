use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::keys;
use serde::Serialize;

/// One row of `GET /dashboards/deployments/{uuid}/services`:
/// per-assignment, per-bundle status joined from the Assignment and Bundle
/// entities.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub cluster_uuid: String,
    pub assignment_uuid: String,
    pub assignment_status: orchestrator_types::AssignmentStatus,
    pub bundle_uuid: String,
    pub bundle_status: orchestrator_types::BundleStatus,
}

impl Dispatcher {
    pub async fn get_deployment_logs(&self, deployment_uuid: &str) -> DispatcherResult<Vec<orchestrator_types::LogEntry>> {
        Ok(self
            .get_deployment(deployment_uuid)
            .await?
            .map(|d| d.logs)
            .unwrap_or_default())
    }

    /// Flattens every assignment of a deployment into its bundles, joining
    /// in each bundle's current status.
    pub async fn get_deployment_services(&self, deployment_uuid: &str) -> DispatcherResult<Vec<ServiceStatus>> {
        let Some(deployment) = self.get_deployment(deployment_uuid).await? else {
            return Ok(Vec::new());
        };

        let mut services = Vec::new();
        for assignment_uuid in &deployment.assignments {
            let Some(assignment) = self.get_assignment_by_uuid(assignment_uuid).await? else {
                continue;
            };
            for bundle_uuid in &assignment.bundles {
                let Some(bundle) = self.get_bundle(bundle_uuid).await? else {
                    continue;
                };
                services.push(ServiceStatus {
                    cluster_uuid: assignment.cluster_uuid.clone(),
                    assignment_uuid: assignment.uuid.clone(),
                    assignment_status: assignment.status,
                    bundle_uuid: bundle.uuid.clone(),
                    bundle_status: bundle.status,
                });
            }
        }
        Ok(services)
    }

    /// Always returns an empty object. Kernel-scoped log retrieval was never
    /// wired up to the stored log entries; kept as a stable empty response
    /// rather than silently growing new behavior callers don't expect.
    pub async fn get_kernel_logs(&self, _request_uuid: &str) -> DispatcherResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }

    pub async fn get_faas_logs(&self, request_uuid: &str) -> DispatcherResult<Vec<orchestrator_types::LogEntry>> {
        Ok(self.get_kernel(request_uuid).await?.map(|k| k.logs).unwrap_or_default())
    }

    /// Denormalized view backing the Grafana "clusters overview" panel:
    /// every cluster plus whether its health key is still fresh.
    pub async fn grafana_clusters_overview(&self) -> DispatcherResult<Vec<orchestrator_types::Cluster>> {
        self.get_clusters(None).await
    }

    /// Denormalized view backing the Grafana "deployments overview" panel:
    /// every deployment's current status alongside its service count.
    pub async fn grafana_deployments_overview(&self) -> DispatcherResult<Vec<DeploymentOverviewRow>> {
        let keys = self.store.list_keys(keys::DEPLOYMENTS_PREFIX).await?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let deployment: orchestrator_types::Deployment = serde_json::from_slice(&bytes)?;
            rows.push(DeploymentOverviewRow {
                deployment_uuid: deployment.deployment_uuid,
                status: deployment.status,
                assignment_count: deployment.assignments.len(),
            });
        }
        Ok(rows)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOverviewRow {
    pub deployment_uuid: String,
    pub status: orchestrator_types::DeploymentStatus,
    pub assignment_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::{Assignment, AssignmentKind, Bundle};

    #[tokio::test]
    async fn get_kernel_logs_always_returns_empty_object() {
        let d = dispatcher();
        let kernel = orchestrator_types::Kernel::new("req-1".into(), orchestrator_types::KernelKind::FaaS, "fft".into(), serde_json::json!({}));
        d.create_kernel(kernel).await.unwrap();

        let logs = d.get_kernel_logs("req-1").await.unwrap();
        assert_eq!(logs, serde_json::json!({}));
    }

    #[tokio::test]
    async fn deployment_services_joins_assignment_and_bundle() {
        let d = dispatcher();
        let deployment = d.create_deployment("dep-1".into(), "kind: Deployment".into()).await.unwrap();

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
        d.update_deployment(deployment.clone()).await.unwrap();

        let services = d.get_deployment_services(&deployment.deployment_uuid).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].bundle_uuid, bundle.uuid);
        assert_eq!(services[0].cluster_uuid, "c1");
    }
}
