//! HTTP client for the secure-storage policy gateway (§4.4 "Flow for a
//! StoragePolicy event"). A POST registers a brand-new policy; a PUT
//! updates one that already has a `cc_policy_id`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecureStorageError {
    #[error("secure-storage gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("secure-storage gateway returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Clone)]
pub struct SecureStorageClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl SecureStorageClient {
    pub fn new(endpoint: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            token,
        }
    }

    /// Registers or updates a policy, formatted as
    /// `{name, description, backends?, edge_devices?, redundancy?}`. Returns
    /// `Ok(())` on a 200/201 response.
    pub async fn submit_policy(&self, cc_policy_id: i64, request: &Value) -> Result<(), SecureStorageError> {
        let response = if cc_policy_id == 0 {
            self.http.post(format!("{}/policies", self.endpoint)).bearer_auth(&self.token).json(request).send().await?
        } else {
            self.http.put(format!("{}/policies/{cc_policy_id}", self.endpoint)).bearer_auth(&self.token).json(request).send().await?
        };

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SecureStorageError::Status(status))
        }
    }

    /// Looks up the gateway-assigned `cc_policy_id` for a policy by name,
    /// once it has accepted the submission above.
    pub async fn fetch_cc_policy_id(&self, name: &str) -> Result<i64, SecureStorageError> {
        let response = self
            .http
            .get(format!("{}/policies", self.endpoint))
            .bearer_auth(&self.token)
            .query(&[("name", name)])
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body.get("cc_policy_id").and_then(|v| v.as_i64()).unwrap_or(0))
    }
}
