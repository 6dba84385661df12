//! Backend client traits. Both the container scheduler and the HPC gateway
//! are external collaborators (§1 "out of scope"); only their interfaces
//! are specified here. The `Reqwest*` implementations speak a generic REST
//! shape against whatever endpoint a [`Cluster`](orchestrator_types::Cluster)'s
//! opaque `info` blob names, which is exactly as much as the Driver is
//! meant to know about a backend.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend rejected the resource: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Identifies one backend resource created for a bundle, so termination can
/// find it again without re-deriving it from the (possibly already-deleted)
/// bundle description.
#[derive(Debug, Clone)]
pub struct BackendResourceRef {
    pub doc_kind: String,
    pub backend_uid: String,
}

/// Result of upserting a Deployment document: the backend's assigned
/// resource uid, plus the worker node the scheduler landed it on, if the
/// backend's apply response names one yet. A fresh Deployment may still be
/// pending scheduling when the apply call returns, in which case the
/// backend reports no node and the Driver simply has nothing to tell
/// monitoring about for this bundle.
#[derive(Debug, Clone)]
pub struct DeploymentPlacement {
    pub backend_uid: String,
    pub worker_node: Option<String>,
}

#[async_trait]
pub trait ContainerSchedulerBackend: Send + Sync {
    async fn upsert_config_map(&self, endpoint: &str, doc: &Value) -> BackendResult<()>;
    async fn upsert_persistent_volume(&self, endpoint: &str, doc: &Value) -> BackendResult<()>;
    async fn create_pvc_if_absent(&self, endpoint: &str, doc: &Value) -> BackendResult<()>;
    /// Upserts a namespaced Deployment document, returning the backend's
    /// assigned resource uid and, once scheduled, the worker node it landed
    /// on, so termination can target the resource precisely and monitoring
    /// can learn where the bundle runs.
    async fn upsert_deployment(&self, endpoint: &str, doc: &Value) -> BackendResult<DeploymentPlacement>;
    async fn delete_deployment(&self, endpoint: &str, backend_uid: &str, grace_period_secs: u64) -> BackendResult<()>;
}

/// Generic REST-backed container scheduler client. The exact resource
/// paths (`/configmaps`, `/deployments`, ...) are a reasonable stand-in for
/// whatever dashboard/API the cluster's scheduler exposes; this crate does
/// not assume a specific scheduler product.
pub struct ReqwestContainerScheduler {
    http: reqwest::Client,
}

impl ReqwestContainerScheduler {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for ReqwestContainerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerSchedulerBackend for ReqwestContainerScheduler {
    async fn upsert_config_map(&self, endpoint: &str, doc: &Value) -> BackendResult<()> {
        self.http.put(format!("{endpoint}/configmaps")).json(doc).send().await?.error_for_status()?;
        Ok(())
    }

    async fn upsert_persistent_volume(&self, endpoint: &str, doc: &Value) -> BackendResult<()> {
        self.http.put(format!("{endpoint}/persistentvolumes")).json(doc).send().await?.error_for_status()?;
        Ok(())
    }

    async fn create_pvc_if_absent(&self, endpoint: &str, doc: &Value) -> BackendResult<()> {
        let resp = self.http.post(format!("{endpoint}/persistentvolumeclaims")).json(doc).send().await?;
        if resp.status().as_u16() == 409 {
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn upsert_deployment(&self, endpoint: &str, doc: &Value) -> BackendResult<DeploymentPlacement> {
        let resp = self.http.put(format!("{endpoint}/deployments")).json(doc).send().await?.error_for_status()?;
        let body: Value = resp.json().await?;
        let backend_uid = body
            .get("uid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Rejected("deployment apply response carried no uid".into()))?;
        // The node the pod landed on; present once the scheduler has bound
        // it, absent while the Deployment is still pending placement.
        let worker_node = body
            .get("node_name")
            .or_else(|| body.pointer("/status/node_name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(DeploymentPlacement { backend_uid, worker_node })
    }

    async fn delete_deployment(&self, endpoint: &str, backend_uid: &str, grace_period_secs: u64) -> BackendResult<()> {
        self.http
            .delete(format!("{endpoint}/deployments/{backend_uid}"))
            .query(&[("propagation", "Foreground"), ("graceSeconds", &grace_period_secs.to_string())])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
pub trait HpcGatewayBackend: Send + Sync {
    async fn stage_in(&self, endpoint: &str, bucket_id: &str, object_name: &str) -> BackendResult<String>;
    async fn poll_s3_data(&self, endpoint: &str, transfer_id: &str) -> BackendResult<String>;
    async fn submit_job(&self, endpoint: &str, descriptor: &Value) -> BackendResult<String>;
    async fn poll_job(&self, endpoint: &str, job_id: &str) -> BackendResult<String>;
    async fn stage_out(&self, endpoint: &str, job_id: &str, results_filename: &str) -> BackendResult<String>;
    async fn poll_s3_result(&self, endpoint: &str, transfer_id: &str) -> BackendResult<String>;
}

pub struct ReqwestHpcGateway {
    http: reqwest::Client,
}

impl ReqwestHpcGateway {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for ReqwestHpcGateway {
    fn default() -> Self {
        Self::new()
    }
}

async fn transfer_id(resp: reqwest::Response) -> BackendResult<String> {
    let body: Value = resp.json().await?;
    Ok(body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string())
}

async fn status_of(resp: reqwest::Response) -> BackendResult<String> {
    let body: Value = resp.json().await?;
    Ok(body.get("status").and_then(|v| v.as_str()).unwrap_or("unknown").to_string())
}

#[async_trait]
impl HpcGatewayBackend for ReqwestHpcGateway {
    async fn stage_in(&self, endpoint: &str, bucket_id: &str, object_name: &str) -> BackendResult<String> {
        let resp = self
            .http
            .post(format!("{endpoint}/s3_data"))
            .json(&serde_json::json!({"bucket_id": bucket_id, "object_name": object_name, "direction": "to_hpc"}))
            .send()
            .await?
            .error_for_status()?;
        transfer_id(resp).await
    }

    async fn poll_s3_data(&self, endpoint: &str, transfer_id: &str) -> BackendResult<String> {
        let resp = self.http.get(format!("{endpoint}/s3_data/{transfer_id}")).send().await?.error_for_status()?;
        status_of(resp).await
    }

    async fn submit_job(&self, endpoint: &str, descriptor: &Value) -> BackendResult<String> {
        let resp = self.http.post(format!("{endpoint}/job")).json(descriptor).send().await?.error_for_status()?;
        transfer_id(resp).await
    }

    async fn poll_job(&self, endpoint: &str, job_id: &str) -> BackendResult<String> {
        let resp = self.http.get(format!("{endpoint}/job/{job_id}")).send().await?.error_for_status()?;
        status_of(resp).await
    }

    async fn stage_out(&self, endpoint: &str, job_id: &str, results_filename: &str) -> BackendResult<String> {
        let resp = self
            .http
            .post(format!("{endpoint}/s3_result"))
            .json(&serde_json::json!({"job_id": job_id, "filename": results_filename}))
            .send()
            .await?
            .error_for_status()?;
        transfer_id(resp).await
    }

    async fn poll_s3_result(&self, endpoint: &str, transfer_id: &str) -> BackendResult<String> {
        let resp = self.http.get(format!("{endpoint}/s3_result/{transfer_id}")).send().await?.error_for_status()?;
        status_of(resp).await
    }
}
