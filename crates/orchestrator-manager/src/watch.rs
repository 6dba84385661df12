//! Generic prefix-watch subscription shared by the Deployment, Kernel, and
//! StoragePolicy flows. Mirrors `orchestrator-driver::kv_watch`'s
//! hydrate-then-watch contract (list the prefix, then start the watch, so a
//! write landing in the gap is re-observed rather than lost) generalized
//! over entity type and filtered to a single `updated_by` origin.

use orchestrator_types::UpdatedBy;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use storage::{StorageBackend, StorageError, WatchEvent};
use tokio::sync::mpsc;

/// Hydrates every entity already on `prefix` whose `updated_by` matches
/// `Orchestration.API`, then returns a channel of future put events passing
/// the same filter. Deletes under these prefixes are never emitted: this
/// spec has no delete-triggered behavior for the Manager (deployment
/// deletion is the API Facade's cascade, not something the Manager reacts
/// to directly).
pub async fn subscribe<T>(
    store: &Arc<dyn StorageBackend>,
    prefix: &str,
    updated_by: impl Fn(&T) -> UpdatedBy,
) -> Result<(Vec<T>, mpsc::Receiver<T>), StorageError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut existing = Vec::new();
    for key in store.list_keys(prefix).await? {
        if let Some(bytes) = store.get(&key).await? {
            if let Ok(item) = serde_json::from_slice::<T>(&bytes) {
                if updated_by(&item) == UpdatedBy::Api {
                    existing.push(item);
                }
            }
        }
    }

    let mut raw_rx = store.watch_prefix(prefix).await?;
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            if let WatchEvent::Put { value, .. } = event {
                if let Ok(item) = serde_json::from_slice::<T>(&value) {
                    if updated_by(&item) == UpdatedBy::Api {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok((existing, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_types::{keys, Deployment};
    use storage::MemoryStorage;

    #[tokio::test]
    async fn hydrates_existing_then_filters_by_updated_by() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let mut from_api = Deployment::new("dep-api".into(), "kind: Deployment".into());
        from_api.updated_by = UpdatedBy::Api;
        let mut from_manager = Deployment::new("dep-manager".into(), "kind: Deployment".into());
        from_manager.updated_by = UpdatedBy::Manager;

        store.put(&keys::deployment_key(&from_api.deployment_uuid), serde_json::to_vec(&from_api).unwrap()).await.unwrap();
        store.put(&keys::deployment_key(&from_manager.deployment_uuid), serde_json::to_vec(&from_manager).unwrap()).await.unwrap();

        let (existing, _rx) = subscribe::<Deployment>(&store, keys::DEPLOYMENTS_PREFIX, |d| d.updated_by).await.unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].deployment_uuid, "dep-api");
    }

    #[tokio::test]
    async fn future_puts_are_filtered_the_same_way() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let (_existing, mut rx) = subscribe::<Deployment>(&store, keys::DEPLOYMENTS_PREFIX, |d| d.updated_by).await.unwrap();

        let mut from_manager = Deployment::new("dep-1".into(), "kind: Deployment".into());
        from_manager.updated_by = UpdatedBy::Manager;
        store.put(&keys::deployment_key(&from_manager.deployment_uuid), serde_json::to_vec(&from_manager).unwrap()).await.unwrap();

        let mut from_api = Deployment::new("dep-2".into(), "kind: Deployment".into());
        from_api.updated_by = UpdatedBy::Api;
        store.put(&keys::deployment_key(&from_api.deployment_uuid), serde_json::to_vec(&from_api).unwrap()).await.unwrap();

        let observed = rx.recv().await.unwrap();
        assert_eq!(observed.deployment_uuid, "dep-2");
    }
}
