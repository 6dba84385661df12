use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::{
    keys, AssignmentStatus, BundleStatus, DeploymentStatus, Kernel, KernelStatus, LogData, LogEntry, LogKind,
    UpdatedBy,
};
use tracing::warn;

impl Dispatcher {
    /// Applies a batch of driver-originated log entries submitted via
    /// `POST /logs`. A failure on one entry is logged and does not abort
    /// the rest of the batch.
    pub async fn add_entities_logs(&self, batch: Vec<LogData>) -> DispatcherResult<()> {
        for entry in batch {
            if let Err(err) = self.add_entity_log(entry).await {
                warn!(%err, "failed to apply log entry");
            }
        }
        Ok(())
    }

    async fn add_entity_log(&self, entry: LogData) -> DispatcherResult<()> {
        match entry.kind {
            LogKind::Deployment => self.apply_deployment_log(entry).await,
            LogKind::Assignment => self.apply_assignment_log(entry).await,
            LogKind::Bundle => self.apply_bundle_log(entry).await,
            LogKind::FaaS => self.apply_faas_log(entry).await,
        }
    }

    async fn apply_deployment_log(&self, entry: LogData) -> DispatcherResult<()> {
        let Some(mut deployment) = self.get_deployment(&entry.uuid).await? else {
            return Ok(());
        };
        if let Ok(status) = DeploymentStatus::try_from(entry.status) {
            deployment.status = status;
        }
        deployment.logs.push(LogEntry {
            timestamp: entry.timestamp,
            event: entry.event,
        });
        deployment.updated_by = UpdatedBy::Driver;
        deployment.updated_at = chrono::Utc::now().timestamp();
        self.update_deployment(deployment).await?;
        Ok(())
    }

    async fn apply_assignment_log(&self, entry: LogData) -> DispatcherResult<()> {
        let assignment = match &entry.cluster_uuid {
            Some(cluster_uuid) => self.get_assignment(cluster_uuid, &entry.uuid).await?,
            None => self.get_assignment_by_uuid(&entry.uuid).await?,
        };
        let Some(mut assignment) = assignment else {
            return Ok(());
        };

        let new_status = AssignmentStatus::try_from(entry.status).ok();
        if let Some(status) = new_status {
            assignment.status = status;
        }
        assignment.logs.push(LogEntry {
            timestamp: entry.timestamp,
            event: entry.event,
        });
        assignment.updated_by = UpdatedBy::Driver;
        assignment.updated_at = chrono::Utc::now().timestamp();

        let assignment_uuid = assignment.uuid.clone();
        let deployment_uuid = assignment.deployment_uuid.clone();
        let cluster_uuid = assignment.cluster_uuid.clone();
        self.store
            .put(&keys::assignment_key(&cluster_uuid, &assignment_uuid), serde_json::to_vec(&assignment)?)
            .await?;

        if matches!(new_status, Some(AssignmentStatus::Failed) | Some(AssignmentStatus::Deployed)) {
            let status = new_status.unwrap();
            match self.find_kernel_by_assignment(&assignment_uuid).await? {
                Some(kernel) => self.update_kernel_request_status(&kernel.request_uuid, status).await?,
                None => self.update_deployment_status(&deployment_uuid, &assignment_uuid, status).await?,
            }
        }
        Ok(())
    }

    async fn apply_bundle_log(&self, entry: LogData) -> DispatcherResult<()> {
        let Some(mut bundle) = self.get_bundle(&entry.uuid).await? else {
            return Ok(());
        };
        if let Ok(status) = BundleStatus::try_from(entry.status) {
            bundle.status = status;
        }
        bundle.logs.push(LogEntry {
            timestamp: entry.timestamp,
            event: entry.event,
        });
        bundle.updated_by = UpdatedBy::Driver;
        bundle.updated_at = chrono::Utc::now().timestamp();
        self.store.put(&keys::bundle_key(&entry.uuid), serde_json::to_vec(&bundle)?).await?;
        Ok(())
    }

    async fn apply_faas_log(&self, entry: LogData) -> DispatcherResult<()> {
        let Some(mut kernel) = self.get_kernel(&entry.uuid).await? else {
            return Ok(());
        };
        if let Ok(status) = KernelStatus::try_from(entry.status) {
            kernel.status = status;
        }
        kernel.logs.push(LogEntry {
            timestamp: entry.timestamp,
            event: entry.event,
        });
        kernel.updated_by = UpdatedBy::Driver;
        kernel.updated_at = chrono::Utc::now().timestamp();
        self.update_kernel(kernel.clone()).await?;
        if let Err(err) = self.emit_faas_counter_delta(&kernel, entry.status).await {
            warn!(%err, request_uuid = %kernel.request_uuid, "telemetry counter delta failed");
        }
        Ok(())
    }

    /// `+1` on IN_DEPLOYMENT, `-1` on FINISHED/FAILED, `0` otherwise, with
    /// `kernel_mode` drawn from the kernel's data description.
    async fn emit_faas_counter_delta(&self, kernel: &Kernel, raw_status: i32) -> DispatcherResult<()> {
        let delta: i32 = match KernelStatus::try_from(raw_status) {
            Ok(KernelStatus::InDeployment) => 1,
            Ok(KernelStatus::Finished) | Ok(KernelStatus::Failed) => -1,
            _ => 0,
        };
        let kernel_mode = kernel
            .data_description
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("FaaS")
            .to_string();

        let url = format!("{}/counters", self.config.telemetry_endpoint);
        self.http
            .put(url)
            .json(&serde_json::json!({
                "request_uuid": kernel.request_uuid,
                "delta": delta,
                "kernel_mode": kernel_mode,
            }))
            .send()
            .await?;
        Ok(())
    }

    /// `POST /metric_logs` passthrough: forwards the batch to the telemetry
    /// handler verbatim, with no KV mutation (§4.3).
    pub async fn forward_metric_logs(&self, logs: Vec<serde_json::Value>) -> DispatcherResult<()> {
        let url = format!("{}/metric_logs", self.config.telemetry_endpoint);
        self.http.post(url).json(&serde_json::json!({ "logs": logs })).send().await?;
        Ok(())
    }

    async fn find_kernel_by_assignment(&self, assignment_uuid: &str) -> DispatcherResult<Option<Kernel>> {
        for key in self.store.list_keys(keys::KERNELS_PREFIX).await? {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let kernel: Kernel = serde_json::from_slice(&bytes)?;
            if kernel.assignment_uuid.as_deref() == Some(assignment_uuid) {
                return Ok(Some(kernel));
            }
        }
        Ok(None)
    }

    /// Writes the new `assignments_status[i]`. Flips the Deployment to
    /// FAILED on any assignment failure; flips to DEPLOYED (and enables
    /// monitoring) only once every assignment has reached DEPLOYED.
    pub(crate) async fn update_deployment_status(
        &self,
        deployment_uuid: &str,
        assignment_uuid: &str,
        assignment_status: AssignmentStatus,
    ) -> DispatcherResult<()> {
        let Some(mut deployment) = self.get_deployment(deployment_uuid).await? else {
            return Ok(());
        };
        let Some(idx) = deployment.assignments.iter().position(|a| a == assignment_uuid) else {
            return Ok(());
        };
        deployment.assignments_status[idx] = assignment_status;

        let mut became_deployed = false;
        match assignment_status {
            AssignmentStatus::Failed => {
                deployment.status = DeploymentStatus::Failed;
                deployment.logs.push(LogEntry::now(format!("assignment {assignment_uuid} failed")));
            }
            AssignmentStatus::Deployed
                if deployment.assignments_status.iter().all(|s| *s == AssignmentStatus::Deployed) =>
            {
                deployment.status = DeploymentStatus::Deployed;
                deployment.logs.push(LogEntry::now("all assignments deployed"));
                became_deployed = true;
            }
            _ => {}
        }
        deployment.updated_at = chrono::Utc::now().timestamp();
        let deployment_uuid = deployment.deployment_uuid.clone();
        self.update_deployment(deployment).await?;

        if became_deployed {
            self.enable_deployment_monitoring(&deployment_uuid).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::{Assignment, AssignmentKind};

    async fn seed_deployment_with_assignment(d: &Dispatcher) -> (String, String) {
        let deployment = d.create_deployment("dep-1".into(), "kind: Deployment".into()).await.unwrap();
        let assignment = Assignment::new(AssignmentKind::Deployment, "c1".into(), deployment.deployment_uuid.clone(), vec![]);
        d.store
            .put(&keys::assignment_key("c1", &assignment.uuid), serde_json::to_vec(&assignment).unwrap())
            .await
            .unwrap();

        let mut deployment = deployment;
        deployment.assignments.push(assignment.uuid.clone());
        deployment.assignments_status.push(AssignmentStatus::Created);
        d.update_deployment(deployment.clone()).await.unwrap();
        (deployment.deployment_uuid, assignment.uuid)
    }

    #[tokio::test]
    async fn single_failed_assignment_fails_the_deployment() {
        let d = dispatcher();
        let (deployment_uuid, assignment_uuid) = seed_deployment_with_assignment(&d).await;

        d.update_deployment_status(&deployment_uuid, &assignment_uuid, AssignmentStatus::Failed)
            .await
            .unwrap();

        let deployment = d.get_deployment(&deployment_uuid).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(deployment.assignments_status[0], AssignmentStatus::Failed);
    }

    #[tokio::test]
    async fn deployment_deploys_only_once_every_assignment_is_deployed() {
        let d = dispatcher();
        let deployment = d.create_deployment("dep-2".into(), "kind: Deployment".into()).await.unwrap();

        let a1 = Assignment::new(AssignmentKind::Deployment, "c1".into(), deployment.deployment_uuid.clone(), vec![]);
        let a2 = Assignment::new(AssignmentKind::Deployment, "c2".into(), deployment.deployment_uuid.clone(), vec![]);
        for (cluster, a) in [("c1", &a1), ("c2", &a2)] {
            d.store
                .put(&keys::assignment_key(cluster, &a.uuid), serde_json::to_vec(a).unwrap())
                .await
                .unwrap();
        }

        let mut deployment = deployment;
        deployment.assignments = vec![a1.uuid.clone(), a2.uuid.clone()];
        deployment.assignments_status = vec![AssignmentStatus::Created, AssignmentStatus::Created];
        d.update_deployment(deployment.clone()).await.unwrap();

        d.update_deployment_status(&deployment.deployment_uuid, &a1.uuid, AssignmentStatus::Deployed)
            .await
            .unwrap();
        let mid = d.get_deployment(&deployment.deployment_uuid).await.unwrap().unwrap();
        assert_eq!(mid.status, DeploymentStatus::Submitted);

        d.update_deployment_status(&deployment.deployment_uuid, &a2.uuid, AssignmentStatus::Deployed)
            .await
            .unwrap();
        let done = d.get_deployment(&deployment.deployment_uuid).await.unwrap().unwrap();
        assert_eq!(done.status, DeploymentStatus::Deployed);
    }
}
