//! Watches the `/assignments/{cluster_uuid}/assignment/` prefix for this
//! Driver's cluster. Mirrors [`storage::StorageBackend::watch_prefix`]'s
//! crash-recovery contract: list the prefix first, then start the watch —
//! a write landing in the gap between the two calls is simply re-observed
//! on the watch, so no event is lost, at most double-delivered.

use orchestrator_types::{keys, Assignment};
use std::sync::Arc;
use storage::{StorageBackend, StorageError, WatchEvent};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum AssignmentEvent {
    Put(Assignment),
    Delete { cluster_uuid: String, assignment_uuid: String },
}

/// Returns every assignment already on this cluster's prefix (for boot-time
/// hydration) plus a receiver of future put/delete events.
pub async fn subscribe(
    store: &Arc<dyn StorageBackend>,
    cluster_uuid: &str,
) -> Result<(Vec<Assignment>, mpsc::Receiver<AssignmentEvent>), StorageError> {
    let prefix = keys::assignment_cluster_prefix(cluster_uuid);

    let mut existing = Vec::new();
    for key in store.list_keys(&prefix).await? {
        if let Some(bytes) = store.get(&key).await? {
            if let Ok(assignment) = serde_json::from_slice::<Assignment>(&bytes) {
                existing.push(assignment);
            }
        }
    }

    let mut raw_rx = store.watch_prefix(&prefix).await?;
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            let translated = match event {
                WatchEvent::Put { value, .. } => {
                    match serde_json::from_slice::<Assignment>(&value) {
                        Ok(assignment) => Some(AssignmentEvent::Put(assignment)),
                        Err(_) => None,
                    }
                }
                WatchEvent::Delete { key } => keys::cluster_uuid_from_assignment_key(&key).map(|cluster_uuid| {
                    AssignmentEvent::Delete {
                        cluster_uuid: cluster_uuid.to_string(),
                        assignment_uuid: keys::last_segment(&key).to_string(),
                    }
                }),
            };
            if let Some(event) = translated {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    });

    Ok((existing, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_types::AssignmentKind;
    use storage::MemoryStorage;

    fn sample_assignment(cluster_uuid: &str) -> Assignment {
        Assignment::new(AssignmentKind::Deployment, cluster_uuid.to_string(), "dep-1".into(), vec!["b1".into()])
    }

    #[tokio::test]
    async fn hydrates_existing_assignments_before_watching() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let a = sample_assignment("c1");
        store
            .put(&keys::assignment_key("c1", &a.uuid), serde_json::to_vec(&a).unwrap())
            .await
            .unwrap();

        let (existing, _rx) = subscribe(&store, "c1").await.unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].uuid, a.uuid);
    }

    #[tokio::test]
    async fn only_sees_events_for_its_own_cluster() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let (_existing, mut rx) = subscribe(&store, "c1").await.unwrap();

        let other = sample_assignment("c2");
        store
            .put(&keys::assignment_key("c2", &other.uuid), serde_json::to_vec(&other).unwrap())
            .await
            .unwrap();

        let mine = sample_assignment("c1");
        store
            .put(&keys::assignment_key("c1", &mine.uuid), serde_json::to_vec(&mine).unwrap())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            AssignmentEvent::Put(a) => assert_eq!(a.uuid, mine.uuid),
            _ => panic!("expected put"),
        }
    }
}
