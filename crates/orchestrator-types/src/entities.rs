//! Entity payloads stored under the KV key layout in [`crate::keys`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::{
    AssignmentStatus, BundleStatus, DeploymentStatus, KernelStatus, StoragePolicyStatus,
};

/// Write-discrimination token carried on every entity, so a watcher can tell
/// whether its own last write produced the change it just observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatedBy {
    #[serde(rename = "Orchestration.API")]
    Api,
    #[serde(rename = "Orchestration.Manager")]
    Manager,
    #[serde(rename = "Orchestration.Driver")]
    Driver,
}

impl std::fmt::Display for UpdatedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdatedBy::Api => "Orchestration.API",
            UpdatedBy::Manager => "Orchestration.Manager",
            UpdatedBy::Driver => "Orchestration.Driver",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    K8s,
    Hpc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub event: String,
}

impl LogEntry {
    pub fn now(event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            event: event.into(),
        }
    }
}

/// An execution backend of type k8s or hpc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    /// Opaque, driver-specific connection info (endpoint, credentials, ...).
    pub info: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cluster {
    pub fn new(name: String, cluster_type: ClusterType, info: Value) -> Self {
        let now = Utc::now().timestamp();
        Self {
            cluster_uuid: Uuid::new_v4().to_string(),
            name,
            cluster_type,
            info,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An extra objective describing a failed placement, attached when a
/// Deployment is reopened to the Manager after a redeployment decision
/// (attached when a deployment is reopened to the Manager after a
/// redeployment decision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentObjective {
    pub affected_cluster_uuid: Option<String>,
    pub affected_worker_nodes: Vec<String>,
    pub affected_deployments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_uuid: String,
    /// Raw multi-document YAML the caller submitted, kept opaque: only the
    /// Manager needs to parse it.
    pub deployment_description: String,
    pub deployment_objectives: Vec<DeploymentObjective>,
    pub status: DeploymentStatus,
    pub assignments: Vec<String>,
    pub assignments_status: Vec<AssignmentStatus>,
    pub updated_by: UpdatedBy,
    pub logs: Vec<LogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Deployment {
    pub fn new(deployment_uuid: String, deployment_description: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            deployment_uuid,
            deployment_description,
            deployment_objectives: Vec::new(),
            status: DeploymentStatus::Submitted,
            assignments: Vec::new(),
            assignments_status: Vec::new(),
            updated_by: UpdatedBy::Api,
            logs: vec![LogEntry::now("description received")],
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentKind {
    Deployment,
    Kernel,
    FaaS,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub uuid: String,
    pub kind: AssignmentKind,
    pub cluster_uuid: String,
    pub deployment_uuid: String,
    pub bundles: Vec<String>,
    pub status: AssignmentStatus,
    pub updated_by: UpdatedBy,
    pub logs: Vec<LogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Assignment {
    pub fn new(kind: AssignmentKind, cluster_uuid: String, deployment_uuid: String, bundles: Vec<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            uuid: Uuid::new_v4().to_string(),
            kind,
            cluster_uuid,
            deployment_uuid,
            bundles,
            status: AssignmentStatus::Created,
            updated_by: UpdatedBy::Manager,
            logs: vec![LogEntry::now("Assignment created.")],
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub uuid: String,
    /// Opaque backend description: k8s YAML documents or an HPC service
    /// descriptor, kept as an opaque JSON tree.
    pub description: Value,
    pub status: BundleStatus,
    pub updated_by: UpdatedBy,
    pub logs: Vec<LogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Bundle {
    pub fn new(description: Value) -> Self {
        let now = Utc::now().timestamp();
        Self {
            uuid: Uuid::new_v4().to_string(),
            description,
            status: BundleStatus::Created,
            updated_by: UpdatedBy::Manager,
            logs: vec![LogEntry::now("Bundle created.")],
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    Kernel,
    FaaS,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kernel {
    pub request_uuid: String,
    pub kind: KernelKind,
    pub kernel_name: String,
    pub data_description: Value,
    pub status: KernelStatus,
    pub assignment_uuid: Option<String>,
    pub updated_by: UpdatedBy,
    pub logs: Vec<LogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Kernel {
    pub fn new(request_uuid: String, kind: KernelKind, kernel_name: String, data_description: Value) -> Self {
        let now = Utc::now().timestamp();
        Self {
            request_uuid,
            kind,
            kernel_name,
            data_description,
            status: KernelStatus::Submitted,
            assignment_uuid: None,
            updated_by: UpdatedBy::Api,
            logs: vec![LogEntry::now("description received")],
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePolicy {
    pub policy_uuid: String,
    pub name: String,
    pub policy_parameters: Value,
    pub decision: Value,
    pub cc_policy_id: i64,
    pub status: StoragePolicyStatus,
    pub updated_by: UpdatedBy,
    pub logs: Vec<LogEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoragePolicy {
    pub fn new(policy_uuid: String, name: String, policy_parameters: Value) -> Self {
        let now = Utc::now().timestamp();
        Self {
            policy_uuid,
            name,
            policy_parameters,
            decision: serde_json::json!({}),
            cc_policy_id: 0,
            status: StoragePolicyStatus::Submitted,
            updated_by: UpdatedBy::Api,
            logs: vec![LogEntry::now("description received")],
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-deployment record tracking which clusters, and which worker nodes
/// within those clusters, host which assignment-scoped backend resources.
///
/// `worker_nodes` is filled in by the Driver when it posts per-assignment
/// monitoring data, once the backend reports which node a bundle landed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitoring {
    pub deployment_uuid: String,
    pub clusters: Vec<String>,
    pub worker_nodes: std::collections::HashMap<String, Vec<WorkerNodeAssignment>>,
    pub updated_by: UpdatedBy,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNodeAssignment {
    pub cluster_uuid: String,
    pub deployment_uuid: String,
    pub assignment_uuid: String,
    pub bundle_uuid: String,
}

impl Monitoring {
    pub fn new(deployment_uuid: String, clusters: Vec<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            deployment_uuid,
            clusters,
            worker_nodes: std::collections::HashMap::new(),
            updated_by: UpdatedBy::Manager,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Batch entry for `POST /logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogData {
    pub uuid: String,
    pub kind: LogKind,
    pub cluster_uuid: Option<String>,
    pub status: i32,
    pub event: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    Deployment,
    Assignment,
    Bundle,
    FaaS,
}

/// `PUT /monitoring` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentMonitoringData {
    pub deployment_uuid: String,
    pub cluster_uuid: String,
    pub assignment_uuid: String,
    pub k8s_params: Value,
    #[serde(default)]
    pub worker_node: Option<String>,
}

/// Anomaly notification event delivered over the anomaly topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub method: String,
    pub model: String,
    pub interval: Value,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub analysis: AnomalyAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAnalysis {
    /// Key format `<metric>_<worker_node>`.
    pub shap_values: std::collections::HashMap<String, f64>,
}
