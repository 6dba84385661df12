//! Notification Engine (§4.8): the thinnest component in the system. It
//! subscribes to the external anomaly topic on the message broker, decodes
//! each message, normalizes its timestamp, and POSTs it to the API Facade's
//! `/ede_notification` endpoint, which hands it to
//! `Dispatcher::handle_notification_evt` for the redeployment decision.
//!
//! This component holds no KV credentials and makes no placement decisions
//! itself — it is a decode-and-forward bridge, mirroring how the Cluster
//! Driver never writes KV directly but always goes through the API.

use orchestrator_types::NotificationEvent;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("broker error: {0}")]
    Broker(#[from] broker::BrokerError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Wire shape of anomaly messages as they arrive on the broker topic. The
/// timestamp on `interval` is observed in the source as either a unix
/// second count or an RFC3339 string depending on which detector emitted
/// it; `normalize` below collapses both to unix seconds so the Dispatcher
/// only ever has to deal with one shape.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct RawNotificationEvent {
    method: String,
    model: String,
    interval: serde_json::Value,
    anomalies: Vec<orchestrator_types::Anomaly>,
}

impl RawNotificationEvent {
    fn normalize(self) -> NotificationEvent {
        let interval = normalize_interval(self.interval);
        NotificationEvent {
            method: self.method,
            model: self.model,
            interval,
            anomalies: self.anomalies,
        }
    }
}

fn normalize_interval(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match chrono::DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => serde_json::json!(dt.timestamp()),
            Err(_) => serde_json::Value::String(s),
        },
        other => other,
    }
}

/// HTTP client the engine uses to hand a decoded event to the API Facade.
/// Kept separate from `orchestrator-driver::ApiClient` since this component
/// only ever calls the one endpoint.
#[derive(Clone)]
pub struct ApiForwarder {
    http: reqwest::Client,
    base_url: String,
}

impl ApiForwarder {
    pub fn new(base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }

    pub async fn post_notification(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.http
            .post(format!("{}/ede_notification", self.base_url))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Runs forever: drains the broker subscription for `topic`, normalizing
/// and forwarding each message to the API. A message that fails to decode
/// or forward is logged and dropped rather than crashing the loop — the
/// next anomaly on the topic is unrelated and should not be held up by one
/// bad payload (§7 "transient collaborator failure").
pub async fn run(broker: Arc<dyn broker::BrokerClient>, topic: String, api: ApiForwarder) -> Result<(), NotifyError> {
    let mut rx = broker.subscribe(&topic).await?;
    info!(%topic, "notification engine subscribed to anomaly topic");
    while let Some(body) = rx.recv().await {
        match serde_json::from_slice::<RawNotificationEvent>(&body) {
            Ok(raw) => {
                let event = raw.normalize();
                if let Err(err) = api.post_notification(&event).await {
                    warn!(%err, "failed to forward anomaly event to api facade");
                }
            }
            Err(err) => {
                warn!(%err, "failed to decode anomaly event, dropping");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::{BrokerClient, BrokerClientExt, Delivery, MemoryBroker};
    use orchestrator_types::{Anomaly, AnomalyAnalysis};
    use std::collections::HashMap;

    #[test]
    fn normalizes_rfc3339_interval_to_unix_seconds() {
        let value = serde_json::json!("2024-01-01T00:00:00Z");
        let normalized = normalize_interval(value);
        assert_eq!(normalized, serde_json::json!(1704067200));
    }

    #[test]
    fn leaves_numeric_interval_untouched() {
        let value = serde_json::json!(1704067200);
        assert_eq!(normalize_interval(value.clone()), value);
    }

    #[tokio::test]
    async fn decodes_and_normalizes_a_published_message() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let raw = RawNotificationEvent {
            method: "isolation_forest".into(),
            model: "v1".into(),
            interval: serde_json::json!("2024-01-01T00:00:00Z"),
            anomalies: vec![Anomaly { analysis: AnomalyAnalysis { shap_values: HashMap::from([("cpu_node-1".to_string(), 0.9)]) } }],
        };

        let mut rx = broker.subscribe("ede_anomalies").await.unwrap();
        broker.publish_json("ede_anomalies", &raw, Delivery::Transient).await.unwrap();
        let body = rx.recv().await.unwrap();
        let decoded: RawNotificationEvent = serde_json::from_slice(&body).unwrap();
        let event = decoded.normalize();
        assert_eq!(event.interval, serde_json::json!(1704067200));
        assert_eq!(event.anomalies.len(), 1);
    }
}
