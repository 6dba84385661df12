//! Shared configuration shape. Each service reads a JSON config file and
//! layers environment overrides on top of it using the `config` crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub host: String,
    pub port: u16,
    /// Filesystem path for the embedded KV store (sled) backend.
    #[serde(default = "default_kv_path")]
    pub path: String,
}

fn default_kv_path() -> String {
    "./orchestrator-kv".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub kv: KvConfig,
    pub broker: BrokerConfig,
    pub telemetry_endpoint: String,
    pub secure_storage_endpoint: String,
    pub secure_storage_token: String,
    pub rot_client_config_path: String,
    pub api_base_url: String,
    pub shap_value_threshold: f64,
    pub heartbeat_secs: u64,
    /// Upper bound on an ExecutionWrapper polling loop before it gives up
    /// No orchestration primitive names this; added so a stuck poll loop
    /// has a concrete timeout instead of running forever.
    #[serde(default = "default_poll_deadline_secs")]
    pub poll_deadline_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// API Facade HTTP listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Broker topic the Notification Engine subscribes for anomaly events.
    #[serde(default = "default_anomaly_topic")]
    pub anomaly_topic: String,
}

fn default_poll_deadline_secs() -> u64 {
    900
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_anomaly_topic() -> String {
    "ede_anomalies".to_string()
}

impl OrchestratorConfig {
    /// Loads `{base}.json` plus any `ORCHESTRATOR_*` environment overrides,
    /// mirroring the teacher's layered `config` crate usage.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}
