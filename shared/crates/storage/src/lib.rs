// Shared Storage Layer
// Watchable key-value coordination store shared by the orchestrator control plane.

//! # Storage
//!
//! A `StorageBackend` abstracts over the watchable, strongly consistent
//! key-value coordination medium the control plane needs: prefix watch,
//! prefix range-read, put, delete. Two backends are provided: an in-memory
//! one for tests and single-process wiring, and a `sled`-backed one for a real
//! embedded deployment. Neither backend requires an external etcd/Consul
//! cluster; `sled` gives linearizable single-node durability and a native
//! prefix-watch primitive that maps directly onto the KV contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// An event observed on a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } => key,
            WatchEvent::Delete { key } => key,
        }
    }
}

/// Depth of the bounded queue a watch delivers into. A watcher that falls
/// behind this far is expected to fall back to a full prefix re-scan rather
/// than assume it saw every event.
pub const WATCH_QUEUE_DEPTH: usize = 1024;

/// Storage backend trait: the sole durable coordination medium between the
/// API, Manager and Driver.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Returns a bounded-capacity receiver of every future put/delete whose
    /// key starts with `prefix`. Does not replay existing keys; callers
    /// that need crash-recovery hydration should `list_keys` first and then
    /// call `watch_prefix` (a short race between the two is acceptable: a
    /// write landing in the gap is re-observed on the watch).
    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StorageError>;
}

#[derive(Clone)]
struct PrefixWatcher {
    prefix: String,
    sender: mpsc::Sender<WatchEvent>,
}

/// In-memory storage implementation, used for tests and for collapsing all
/// three services into a single process in development.
#[derive(Clone)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    watchers: Arc<RwLock<Vec<PrefixWatcher>>>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            data: Arc::new(RwLock::new(HashMap::new())),
            watchers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    async fn notify(&self, event: WatchEvent) {
        let mut watchers = self.watchers.write().await;
        watchers.retain(|w| {
            if !event.key().starts_with(&w.prefix) {
                return true;
            }
            match w.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(prefix = %w.prefix, "watch queue full, dropping watcher; caller must re-scan");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        {
            let mut data = self.data.write().await;
            data.insert(key.to_string(), value.clone());
        }
        self.notify(WatchEvent::Put {
            key: key.to_string(),
            value,
        })
        .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        {
            let mut data = self.data.write().await;
            data.remove(key);
        }
        self.notify(WatchEvent::Delete {
            key: key.to_string(),
        })
        .await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let keys: Vec<String> = data.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        Ok(keys)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StorageError> {
        let (tx, rx) = mpsc::channel(WATCH_QUEUE_DEPTH);
        let mut watchers = self.watchers.write().await;
        watchers.push(PrefixWatcher {
            prefix: prefix.to_string(),
            sender: tx,
        });
        Ok(rx)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Sled-based persistent storage. `sled::Db::watch_prefix` is a native,
/// linearizable prefix watch, so it maps onto the KV contract directly
/// instead of needing a polling shim.
#[derive(Clone)]
pub struct SledStorage {
    db: sled::Db,
}

impl std::fmt::Debug for SledStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStorage").finish()
    }
}

impl SledStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(SledStorage { db })
    }
}

#[async_trait::async_trait]
impl StorageBackend for SledStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(result.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let exists = self
            .db
            .contains_key(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(exists)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for result in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = result.map_err(|e| StorageError::DatabaseError(e.to_string()))?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            keys.push(key_str);
        }
        Ok(keys)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StorageError> {
        let mut subscriber = self.db.watch_prefix(prefix.as_bytes());
        let (tx, rx) = mpsc::channel(WATCH_QUEUE_DEPTH);

        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = (&mut subscriber).next().await {
                let translated = match event {
                    sled::Event::Insert { key, value } => WatchEvent::Put {
                        key: String::from_utf8_lossy(&key).to_string(),
                        value: value.to_vec(),
                    },
                    sled::Event::Remove { key } => WatchEvent::Delete {
                        key: String::from_utf8_lossy(&key).to_string(),
                    },
                };
                if tx.send(translated).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Generic storage manager layering JSON (de)serialization over a backend.
pub struct StorageManager<T: StorageBackend> {
    backend: T,
}

impl<T: StorageBackend> StorageManager<T> {
    pub fn new(backend: T) -> Self {
        StorageManager { backend }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub async fn store_json<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StorageError> {
        let json = serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.backend.put(key, json).await
    }

    pub async fn load_json<V: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<V>, StorageError> {
        match self.backend.get(key).await? {
            Some(data) => {
                let value =
                    serde_json::from_slice(&data).map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.exists(key).await
    }

    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.backend.list_keys(prefix).await
    }

    pub async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StorageError> {
        self.backend.watch_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.put("test_key", b"test_value".to_vec()).await.unwrap();
        let value = storage.get("test_key").await.unwrap().unwrap();
        assert_eq!(value, b"test_value");

        assert!(storage.exists("test_key").await.unwrap());
        assert!(!storage.exists("nonexistent").await.unwrap());

        storage.delete("test_key").await.unwrap();
        assert!(!storage.exists("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_manager() {
        let storage = MemoryStorage::new();
        let manager = StorageManager::new(storage);

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct TestData {
            id: Uuid,
            name: String,
        }

        let test_data = TestData {
            id: Uuid::new_v4(),
            name: "test".to_string(),
        };

        manager.store_json("test_json", &test_data).await.unwrap();

        let loaded: TestData = manager.load_json("test_json").await.unwrap().unwrap();
        assert_eq!(loaded, test_data);
    }

    #[tokio::test]
    async fn watch_prefix_only_sees_matching_keys() {
        let storage = MemoryStorage::new();
        let mut rx = storage.watch_prefix("/deployments/").await.unwrap();

        storage.put("/deployments/deployment/d1", b"one".to_vec()).await.unwrap();
        storage.put("/clusters/cluster/c1", b"ignored".to_vec()).await.unwrap();
        storage.delete("/deployments/deployment/d1").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first, WatchEvent::Put {
            key: "/deployments/deployment/d1".to_string(),
            value: b"one".to_vec(),
        });

        let second = rx.recv().await.unwrap();
        assert_eq!(second, WatchEvent::Delete {
            key: "/deployments/deployment/d1".to_string(),
        });
    }
}
