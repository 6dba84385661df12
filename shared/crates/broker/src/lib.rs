//! Publish/subscribe client for the message broker (§2, §6 "Broker
//! envelopes"). The broker is an external collaborator: this crate only
//! speaks its bit-level interface — publish a JSON payload to a named
//! queue or topic, and subscribe to receive a stream of JSON payloads.
//!
//! Two implementations are provided: [`LapinBroker`], a real AMQP/RabbitMQ
//! client (the `vhost` field on [`BrokerConfig`](orchestrator_types::config::BrokerConfig)
//! is the giveaway that the source system sits on RabbitMQ), and
//! [`MemoryBroker`], an in-process implementation for tests and for
//! collapsing the whole control plane into a single process in development.

use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Delivery mode requested on publish. Non-persistent messages are fine for
/// fan-out where a missed delivery is harmless; persistent delivery is used
/// for the per-request result queues an SDK consumer waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Transient,
    Persistent,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publishes an already-serialized JSON payload. Kept non-generic (a
    /// `serde_json::Value` in, not `impl Serialize`) so the trait stays
    /// object-safe and every service can hold a single `Arc<dyn BrokerClient>`.
    async fn publish_value(&self, queue: &str, payload: serde_json::Value, delivery: Delivery) -> BrokerResult<()>;

    /// Subscribes to a named queue/topic, returning a channel of raw
    /// message bodies. Used by the Notification Engine to watch the
    /// configured anomaly topic.
    async fn subscribe(&self, topic: &str) -> BrokerResult<mpsc::Receiver<Vec<u8>>>;
}

/// Convenience extension so callers can publish any `Serialize` value
/// without hand-rolling the `serde_json::to_value` call at every site.
#[async_trait]
pub trait BrokerClientExt: BrokerClient {
    async fn publish_json<T: Serialize + Sync>(&self, queue: &str, payload: &T, delivery: Delivery) -> BrokerResult<()> {
        let value = serde_json::to_value(payload)?;
        self.publish_value(queue, value, delivery).await
    }
}

impl<C: BrokerClient + ?Sized> BrokerClientExt for C {}

/// Real AMQP-backed broker client.
#[derive(Clone)]
pub struct LapinBroker {
    connection: Arc<Connection>,
}

impl LapinBroker {
    pub async fn connect(uri: &str) -> BrokerResult<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        Ok(Self {
            connection: Arc::new(connection),
        })
    }
}

#[async_trait]
impl BrokerClient for LapinBroker {
    async fn publish_value(&self, queue: &str, payload: serde_json::Value, delivery: Delivery) -> BrokerResult<()> {
        let channel = self.connection.create_channel().await?;
        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;

        let body = serde_json::to_vec(&payload)?;
        let props = match delivery {
            Delivery::Persistent => BasicProperties::default().with_delivery_mode(2),
            Delivery::Transient => BasicProperties::default(),
        };
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                props,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BrokerResult<mpsc::Receiver<Vec<u8>>> {
        let channel = self.connection.create_channel().await?;
        channel
            .queue_declare(topic, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        let mut consumer = channel
            .basic_consume(
                topic,
                "orchestrator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let body = delivery.data.clone();
                        if let Err(err) = delivery.ack(lapin::options::BasicAckOptions::default()).await {
                            warn!(%err, "failed to ack broker message");
                        }
                        if tx.send(body).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "broker consumer error");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// In-process broker used by tests and single-binary development wiring.
/// Every `publish_json` call fans out to every subscriber currently
/// registered on that queue name; there is no persistence across restarts.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn publish_value(&self, queue: &str, payload: serde_json::Value, _delivery: Delivery) -> BrokerResult<()> {
        let body = serde_json::to_vec(&payload)?;
        let mut subs = self.subscribers.lock().await;
        if let Some(senders) = subs.get_mut(queue) {
            senders.retain(|tx| tx.try_send(body.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BrokerResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(256);
        let mut subs = self.subscribers.lock().await;
        subs.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_broker_delivers_published_payload_to_subscriber() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("watch_kernels_results_r1").await.unwrap();

        broker
            .publish_value(
                "watch_kernels_results_r1",
                serde_json::json!({"request_uuid": "r1", "status": 1}),
                Delivery::Persistent,
            )
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&msg).unwrap();
        assert_eq!(value["request_uuid"], "r1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let broker = MemoryBroker::new();
        broker.publish_value("orphan_queue", serde_json::json!({}), Delivery::Transient).await.unwrap();
    }
}
