use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::{keys, AssignmentStatus, Kernel, KernelStatus, LogEntry};

impl Dispatcher {
    pub async fn create_kernel(&self, kernel: Kernel) -> DispatcherResult<Kernel> {
        let key = keys::kernel_key(&kernel.request_uuid);
        self.store.put(&key, serde_json::to_vec(&kernel)?).await?;
        Ok(kernel)
    }

    pub async fn get_kernel(&self, request_uuid: &str) -> DispatcherResult<Option<Kernel>> {
        match self.store.get(&keys::kernel_key(request_uuid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn update_kernel(&self, kernel: Kernel) -> DispatcherResult<Kernel> {
        let key = keys::kernel_key(&kernel.request_uuid);
        self.store.put(&key, serde_json::to_vec(&kernel)?).await?;
        Ok(kernel)
    }

    /// Parallel to `update_deployment_status` but for the Kernel/FaaS
    /// lineage: an Assignment transitioning to FAILED or DEPLOYED flips the
    /// owning Kernel request's terminal status.
    pub(crate) async fn update_kernel_request_status(&self, request_uuid: &str, assignment_status: AssignmentStatus) -> DispatcherResult<()> {
        let Some(mut kernel) = self.get_kernel(request_uuid).await? else {
            return Ok(());
        };

        kernel.status = match assignment_status {
            AssignmentStatus::Failed => KernelStatus::Failed,
            AssignmentStatus::Deployed => KernelStatus::Deployed,
            _ => kernel.status,
        };
        kernel.logs.push(LogEntry::now(format!("assignment status {assignment_status:?}")));
        kernel.updated_at = chrono::Utc::now().timestamp();
        self.update_kernel(kernel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::KernelKind;

    #[tokio::test]
    async fn update_kernel_request_status_flips_to_failed() {
        let d = dispatcher();
        let kernel = Kernel::new("req-1".into(), KernelKind::FaaS, "fft".into(), serde_json::json!({}));
        d.create_kernel(kernel).await.unwrap();

        d.update_kernel_request_status("req-1", AssignmentStatus::Failed).await.unwrap();

        let kernel = d.get_kernel("req-1").await.unwrap().unwrap();
        assert_eq!(kernel.status, KernelStatus::Failed);
    }

    #[tokio::test]
    async fn update_kernel_request_status_on_missing_kernel_is_noop() {
        let d = dispatcher();
        d.update_kernel_request_status("missing", AssignmentStatus::Deployed).await.unwrap();
    }
}
