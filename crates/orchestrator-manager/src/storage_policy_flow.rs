//! StoragePolicy event handling (§4.4 "Flow for a StoragePolicy event").
//! Unlike the Deployment and Kernel flows, this one proceeds even with no
//! active clusters (§4.4 step 1's "not StoragePolicy" carve-out): a storage
//! policy is backend-agnostic.

use crate::rot_client::RotClient;
use crate::secure_storage::SecureStorageClient;
use orchestrator_dispatcher::Dispatcher;
use orchestrator_types::{LogEntry, StoragePolicy, StoragePolicyStatus, UpdatedBy};
use serde_json::Value;
use tracing::warn;

pub async fn handle(dispatcher: &Dispatcher, rot: &RotClient, secure_storage: &SecureStorageClient, mut policy: StoragePolicy) {
    let policy_uuid = policy.policy_uuid.clone();

    let payload = serde_json::json!({
        "kind": "StoragePolicy",
        "policy_parameters": policy.policy_parameters,
    });

    let response = match rot.submit("StoragePolicy", payload).await {
        Ok(response) => response,
        Err(err) => {
            fail(dispatcher, policy, format!("ROT scheduling request failed: {err}")).await;
            return;
        }
    };

    policy.decision = response.result.clone();

    let request = format_gateway_request(&policy.name, &response.result);
    if let Err(err) = secure_storage.submit_policy(policy.cc_policy_id, &request).await {
        fail(dispatcher, policy, format!("secure-storage gateway rejected policy: {err}")).await;
        return;
    }

    let cc_policy_id = match secure_storage.fetch_cc_policy_id(&policy.name).await {
        Ok(id) => id,
        Err(err) => {
            warn!(%policy_uuid, %err, "failed to look up cc_policy_id after successful submission");
            policy.cc_policy_id
        }
    };

    policy.cc_policy_id = cc_policy_id;
    policy.status = StoragePolicyStatus::Created;
    policy.updated_by = UpdatedBy::Manager;
    policy.logs.push(LogEntry::now("storage policy created"));
    let _ = dispatcher.update_storage_policy(policy).await;
}

fn format_gateway_request(name: &str, decision: &Value) -> Value {
    let mut request = serde_json::json!({
        "name": name,
        "description": decision.get("description").cloned().unwrap_or(Value::Null),
    });
    for field in ["backends", "edge_devices", "redundancy"] {
        if let Some(value) = decision.get(field) {
            request[field] = value.clone();
        }
    }
    request
}

async fn fail(dispatcher: &Dispatcher, mut policy: StoragePolicy, event: String) {
    warn!(policy_uuid = %policy.policy_uuid, %event, "storage policy flow failed");
    policy.status = StoragePolicyStatus::Failed;
    policy.updated_by = UpdatedBy::Manager;
    policy.logs.push(LogEntry::now(event));
    let _ = dispatcher.update_storage_policy(policy).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::MemoryBroker;
    use std::sync::Arc;
    use std::time::Duration;
    use storage::MemoryStorage;

    fn test_config() -> orchestrator_types::OrchestratorConfig {
        let config_json = r#"{
            "kv": {"host":"localhost","port":2379,"path":"./test-kv"},
            "broker": {"address":"localhost","username":"guest","password":"guest","vhost":"/"},
            "telemetry_endpoint": "http://localhost:9000",
            "secure_storage_endpoint": "http://localhost:9001",
            "secure_storage_token": "token",
            "rot_client_config_path": "/etc/serrano/rot.json",
            "api_base_url": "http://localhost:8080",
            "shap_value_threshold": 0.5,
            "heartbeat_secs": 30
        }"#;
        serde_json::from_str(config_json).unwrap()
    }

    #[tokio::test]
    async fn rot_timeout_flips_policy_to_failed() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStorage::new()), test_config());
        let broker: Arc<dyn broker::BrokerClient> = Arc::new(MemoryBroker::new());
        let rot = RotClient::load_for_test(broker, Duration::from_millis(20));
        let secure_storage = SecureStorageClient::new("http://localhost:0".into(), "token".into());

        let policy = StoragePolicy::new("p1".into(), "redundant-3x".into(), serde_json::json!({}));
        dispatcher.create_storage_policy(policy.clone()).await.unwrap();
        handle(&dispatcher, &rot, &secure_storage, policy).await;

        let stored = dispatcher.get_storage_policy("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, StoragePolicyStatus::Failed);
    }

    #[test]
    fn gateway_request_carries_optional_fields_when_present() {
        let decision = serde_json::json!({"description": "3x redundant", "backends": ["s3"]});
        let request = format_gateway_request("redundant-3x", &decision);
        assert_eq!(request["name"], "redundant-3x");
        assert_eq!(request["backends"], serde_json::json!(["s3"]));
        assert!(request.get("edge_devices").is_none());
    }
}
