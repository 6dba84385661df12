//! Per-job lifecycle worker (§4.7). One [`ExecutionWrapper`] is spawned per
//! in-flight FaaS/HPC job; it owns its job context end to end and shares no
//! mutable state with any other wrapper. Three "signals" from the source
//! system map onto this task's observable effects: `jobSubmitted` and
//! `updateLogStatus` become `POST /logs` calls through the [`ApiClient`],
//! and `resultsReady` becomes a publish on the broker.

use crate::backend::HpcGatewayBackend;
use crate::api_client::ApiClient;
use broker::{BrokerClient, BrokerClientExt, Delivery};
use orchestrator_types::{BundleStatus, KernelStatus, LogData, LogKind, OrchestratorConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),
    #[error("faas endpoint error: {0}")]
    Faas(#[from] reqwest::Error),
    #[error("polling deadline exceeded after {0:?}")]
    Deadline(Duration),
}

pub struct ExecutionWrapper {
    pub request_uuid: String,
    pub bundle_uuid: String,
    pub api: ApiClient,
    pub broker: Arc<dyn BrokerClient>,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
}

impl ExecutionWrapper {
    pub fn new(request_uuid: String, bundle_uuid: String, api: ApiClient, broker: Arc<dyn BrokerClient>, config: &OrchestratorConfig) -> Self {
        Self {
            request_uuid,
            bundle_uuid,
            api,
            broker,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_deadline: Duration::from_secs(config.poll_deadline_secs),
        }
    }

    async fn log_bundle(&self, status: BundleStatus, event: impl Into<String>) {
        let entry = LogData {
            uuid: self.bundle_uuid.clone(),
            kind: LogKind::Bundle,
            cluster_uuid: None,
            status: status.into(),
            event: event.into(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(err) = self.api.post_logs(vec![entry]).await {
            warn!(%err, bundle_uuid = %self.bundle_uuid, "failed to post bundle log");
        }
    }

    async fn log_faas(&self, status: KernelStatus, event: impl Into<String>) {
        let entry = LogData {
            uuid: self.request_uuid.clone(),
            kind: LogKind::FaaS,
            cluster_uuid: None,
            status: status.into(),
            event: event.into(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(err) = self.api.post_logs(vec![entry]).await {
            warn!(%err, request_uuid = %self.request_uuid, "failed to post faas log");
        }
    }

    /// Polls `poll` until it returns one of `terminal_ok`/`terminal_fail`, at
    /// `self.poll_interval` cadence, bounded by `self.poll_deadline`. A
    /// deadline overrun is treated the same as an explicit failure status by
    /// the caller — it is a new requirement not present in the source,
    /// which polled forever.
    async fn poll_until<F, Fut>(&self, mut poll: F, terminal_ok: &[&str], terminal_fail: &[&str]) -> Result<bool, WrapperError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<String, crate::backend::BackendError>>,
    {
        let start = Instant::now();
        loop {
            let status = poll().await?;
            if terminal_ok.contains(&status.as_str()) {
                return Ok(true);
            }
            if terminal_fail.contains(&status.as_str()) {
                return Ok(false);
            }
            if start.elapsed() > self.poll_deadline {
                return Err(WrapperError::Deadline(self.poll_deadline));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// HPC pipeline: stage in, submit, wait, stage out, notify. Aborts on
    /// the first failing step and publishes `status: 0` to the broker.
    pub async fn run_hpc(
        &self,
        gateway: &dyn HpcGatewayBackend,
        gateway_endpoint: &str,
        bucket_id: &str,
        arguments: &[String],
        kernel_name: &str,
        service_descriptor: Value,
        results_filename: &str,
    ) {
        self.log_bundle(BundleStatus::HpcDataToGatewayRequested, "staging input data to HPC gateway").await;
        let deployed_at = chrono::Utc::now();
        let stage_in_started = Instant::now();

        let stage_in_ok = self.stage_in_all(gateway, gateway_endpoint, bucket_id, arguments).await;
        if !stage_in_ok {
            self.log_bundle(BundleStatus::HpcDataToGatewayFailed, "stage-in failed").await;
            self.notify_failure(bucket_id).await;
            return;
        }
        self.log_bundle(BundleStatus::HpcDataToGatewayCompleted, "input data staged").await;
        let move_data_to_hpc_secs = stage_in_started.elapsed().as_secs_f64();

        self.log_bundle(BundleStatus::HpcExecutionRequesting, "submitting HPC job").await;
        let job_started = Instant::now();
        let job_id = match gateway.submit_job(gateway_endpoint, &service_descriptor).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "HPC job submission failed");
                self.log_bundle(BundleStatus::HpcExecutionFailed, format!("submit failed: {err}")).await;
                self.notify_failure(bucket_id).await;
                return;
            }
        };
        self.log_bundle(BundleStatus::HpcExecutionSubmitted, format!("job {job_id} submitted")).await;

        let job_ok = match self
            .poll_until(|| gateway.poll_job(gateway_endpoint, &job_id), &["completed"], &["failed"])
            .await
        {
            Ok(ok) => ok,
            Err(err) => {
                warn!(%err, %job_id, "HPC job polling aborted");
                false
            }
        };
        if !job_ok {
            self.log_bundle(BundleStatus::HpcExecutionFailed, format!("job {job_id} did not complete")).await;
            self.notify_failure(bucket_id).await;
            return;
        }
        let hpc_job_execution_secs = job_started.elapsed().as_secs_f64();

        let stage_out_started = Instant::now();
        let stage_out_ok = self.stage_out(gateway, gateway_endpoint, &job_id, results_filename).await;
        if !stage_out_ok {
            self.log_bundle(BundleStatus::HpcResultsTransferFailed, "result stage-out failed").await;
            self.notify_failure(bucket_id).await;
            return;
        }
        self.log_bundle(BundleStatus::HpcResultsTransferCompleted, "results staged out").await;
        let move_results_from_hpc_secs = stage_out_started.elapsed().as_secs_f64();

        self.notify_success(bucket_id, Some(job_id)).await;

        let completed_at = chrono::Utc::now();
        let input_total_size_mb = arguments.len() as f64;
        let metrics = serde_json::json!({
            "deployed_at": deployed_at,
            "completed_at": completed_at,
            "metrics": {
                "move_data_to_hpc_secs": move_data_to_hpc_secs,
                "hpc_job_execution_secs": hpc_job_execution_secs,
                "move_results_from_hpc_secs": move_results_from_hpc_secs,
            },
            "kernel_mode": "HPC",
            "input_total_size_MB": input_total_size_mb,
        });
        if let Err(err) = self.api.post_metric_logs(vec![metrics]).await {
            warn!(%err, kernel_name, "failed to post HPC kernel metrics");
        }
    }

    async fn stage_in_all(&self, gateway: &dyn HpcGatewayBackend, endpoint: &str, bucket_id: &str, arguments: &[String]) -> bool {
        for object_name in arguments {
            let transfer_id = match gateway.stage_in(endpoint, bucket_id, object_name).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(%err, object_name, "stage-in request failed");
                    return false;
                }
            };
            match self.poll_until(|| gateway.poll_s3_data(endpoint, &transfer_id), &["completed"], &["failed"]).await {
                Ok(true) => {}
                Ok(false) | Err(_) => return false,
            }
        }
        true
    }

    async fn stage_out(&self, gateway: &dyn HpcGatewayBackend, endpoint: &str, job_id: &str, results_filename: &str) -> bool {
        let transfer_id = match gateway.stage_out(endpoint, job_id, results_filename).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "stage-out request failed");
                return false;
            }
        };
        matches!(self.poll_until(|| gateway.poll_s3_result(endpoint, &transfer_id), &["completed"], &["failed"]).await, Ok(true))
    }

    async fn notify_success(&self, bucket_id: &str, hpc_gateway_id: Option<String>) {
        let envelope = serde_json::json!({
            "request_uuid": self.request_uuid,
            "bucket_id": bucket_id,
            "hpc_gateway_id": hpc_gateway_id,
            "status": 1,
        });
        if let Err(err) = self
            .broker
            .publish_json(&format!("watch_kernels_results_{}", self.request_uuid), &envelope, Delivery::Persistent)
            .await
        {
            warn!(%err, request_uuid = %self.request_uuid, "failed to publish HPC result envelope");
        }
    }

    async fn notify_failure(&self, bucket_id: &str) {
        let envelope = serde_json::json!({
            "request_uuid": self.request_uuid,
            "bucket_id": bucket_id,
            "hpc_gateway_id": Value::Null,
            "status": 0,
        });
        if let Err(err) = self
            .broker
            .publish_json(&format!("watch_kernels_results_{}", self.request_uuid), &envelope, Delivery::Persistent)
            .await
        {
            warn!(%err, request_uuid = %self.request_uuid, "failed to publish HPC failure envelope");
        }
    }

    /// FaaS pipeline: POST the data description to the kernel's FaaS
    /// endpoint. A 2xx body is scanned for vAccel timing lines; anything
    /// else fails the kernel and publishes a null result to both result
    /// queues so any SDK consumer waiting on either unblocks.
    pub async fn run_faas(&self, http: &reqwest::Client, faas_endpoint: &str, data_description: &Value) {
        self.log_faas(KernelStatus::InDeployment, "submitting to FaaS endpoint").await;

        let response = match http.post(faas_endpoint).json(data_description).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%err, faas_endpoint, "FaaS endpoint request failed");
                self.fail_faas().await;
                return;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), faas_endpoint, "FaaS endpoint returned non-2xx");
            self.fail_faas().await;
            return;
        }

        let body = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "failed to read FaaS response body");
                self.fail_faas().await;
                return;
            }
        };

        match parse_vaccel_metrics(&body) {
            Some(metrics) => {
                self.log_faas(KernelStatus::Finished, "FaaS kernel finished").await;
                if let Err(err) = self.api.post_metric_logs(vec![metrics]).await {
                    warn!(%err, request_uuid = %self.request_uuid, "failed to post vAccel metrics");
                }
            }
            None => {
                warn!(request_uuid = %self.request_uuid, "FaaS response did not carry vAccel metrics");
                self.log_faas(KernelStatus::Finished, "FaaS kernel finished (no metrics parsed)").await;
            }
        }
    }

    async fn fail_faas(&self) {
        self.log_faas(KernelStatus::Failed, "FaaS endpoint invocation failed").await;
        for queue in [format!("kernels_results_{}", self.request_uuid), self.request_uuid.clone()] {
            let envelope = serde_json::json!({ "uuid": self.request_uuid, "data": Value::Null });
            if let Err(err) = self.broker.publish_json(&queue, &envelope, Delivery::Persistent).await {
                warn!(%err, queue, "failed to publish FaaS failure envelope");
            }
        }
    }
}

const VACCEL_METRIC_KEYS: &[&str] = &[
    "load_vaccel_libs_ms",
    "load_model_libs_ms",
    "read_input_from_backend_ms",
    "parse_model_ms",
    "parse_input_ms",
    "setup_vaccel_args_ms",
    "run_kernel_ms",
    "output_ms",
    "push_output_to_backend_ms",
    "total_ms",
];

/// Parses the ten `"<label>: <N> ms"` lines that follow the literal marker
/// line `"Load vAccel libraries"` in a FaaS kernel's stdout capture.
fn parse_vaccel_metrics(body: &str) -> Option<Value> {
    let marker_idx = body.find("Load vAccel libraries")?;
    let after_marker = &body[marker_idx..];

    let mut values = Vec::with_capacity(VACCEL_METRIC_KEYS.len());
    for line in after_marker.lines().skip(1) {
        let Some(ms_idx) = line.rfind("ms") else { continue };
        let digits: String = line[..ms_idx].chars().rev().take_while(|c| c.is_ascii_digit()).collect::<String>().chars().rev().collect();
        if let Ok(n) = digits.parse::<i64>() {
            values.push(n);
            if values.len() == VACCEL_METRIC_KEYS.len() {
                break;
            }
        }
    }

    if values.len() != VACCEL_METRIC_KEYS.len() {
        return None;
    }

    let mut map = serde_json::Map::new();
    for (key, value) in VACCEL_METRIC_KEYS.iter().zip(values) {
        map.insert((*key).to_string(), Value::from(value));
    }
    Some(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ten_vaccel_timing_lines() {
        let body = "some preamble\nLoad vAccel libraries\nload_vaccel_libs: 12 ms\nload_model_libs: 34 ms\nread_input_from_backend: 5 ms\nparse_model: 6 ms\nparse_input: 7 ms\nsetup_vaccel_args: 8 ms\nrun_kernel: 900 ms\noutput: 3 ms\npush_output_to_backend: 2 ms\ntotal: 977 ms\n";
        let metrics = parse_vaccel_metrics(body).expect("metrics should parse");
        assert_eq!(metrics["load_vaccel_libs_ms"], 12);
        assert_eq!(metrics["total_ms"], 977);
    }

    #[test]
    fn missing_marker_yields_no_metrics() {
        assert!(parse_vaccel_metrics("no marker here").is_none());
    }
}
