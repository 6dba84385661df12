//! Thin HTTP client the Driver uses to mutate entities. Per the data
//! model's `Mutated by` column, the Driver never writes the KV store
//! directly — every status flip and log append goes through the API
//! Facade as `updated_by=Orchestration.Driver`, so the Driver process can
//! run at the edge of an untrusted cluster network without KV credentials.

use orchestrator_types::{AssignmentMonitoringData, LogData, Monitoring};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type ApiClientResult<T> = Result<T, ApiClientError>;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn post_logs(&self, logs: Vec<LogData>) -> ApiClientResult<()> {
        self.http
            .post(format!("{}/logs", self.base_url))
            .json(&serde_json::json!({ "logs": logs }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn post_metric_logs(&self, logs: Vec<serde_json::Value>) -> ApiClientResult<()> {
        self.http
            .post(format!("{}/metric_logs", self.base_url))
            .json(&serde_json::json!({ "logs": logs }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn put_monitoring(&self, data: AssignmentMonitoringData) -> ApiClientResult<()> {
        self.http
            .put(format!("{}/monitoring", self.base_url))
            .json(&data)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Crash-recovery hydration: fetch every Monitoring entry that already
    /// lists this cluster, so a restarted Driver can rebuild its
    /// backend-resource cache before the first watch event arrives.
    pub async fn get_monitoring_for_cluster(&self, cluster_uuid: &str) -> ApiClientResult<Vec<Monitoring>> {
        let resp = self
            .http
            .get(format!("{}/monitoring", self.base_url))
            .query(&[("cluster_uuid", cluster_uuid)])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}
