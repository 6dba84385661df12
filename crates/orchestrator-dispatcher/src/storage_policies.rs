use crate::error::DispatcherResult;
use crate::Dispatcher;
use orchestrator_types::{keys, StoragePolicy};

impl Dispatcher {
    /// `decision={}`, `cc_policy_id=0`, `status=SUBMITTED`.
    pub async fn create_storage_policy(&self, policy: StoragePolicy) -> DispatcherResult<StoragePolicy> {
        let key = keys::storage_policy_key(&policy.policy_uuid);
        self.store.put(&key, serde_json::to_vec(&policy)?).await?;
        Ok(policy)
    }

    pub async fn get_storage_policy(&self, policy_uuid: &str) -> DispatcherResult<Option<StoragePolicy>> {
        match self.store.get(&keys::storage_policy_key(policy_uuid)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Preserves `cc_policy_id` and `logs` from the stored value even when
    /// the caller's update payload omits or zeroes them.
    pub async fn update_storage_policy(&self, mut incoming: StoragePolicy) -> DispatcherResult<StoragePolicy> {
        if let Some(existing) = self.get_storage_policy(&incoming.policy_uuid).await? {
            if incoming.cc_policy_id == 0 {
                incoming.cc_policy_id = existing.cc_policy_id;
            }
            let mut logs = existing.logs;
            logs.extend(incoming.logs);
            incoming.logs = logs;
        }
        let key = keys::storage_policy_key(&incoming.policy_uuid);
        self.store.put(&key, serde_json::to_vec(&incoming)?).await?;
        Ok(incoming)
    }

    pub async fn delete_storage_policy(&self, policy_uuid: &str) -> DispatcherResult<bool> {
        if self.get_storage_policy(policy_uuid).await?.is_none() {
            return Ok(false);
        }
        self.store.delete(&keys::storage_policy_key(policy_uuid)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;

    #[tokio::test]
    async fn update_preserves_cc_policy_id_and_logs() {
        let d = dispatcher();
        let mut policy = StoragePolicy::new("p1".into(), "redundant-3x".into(), serde_json::json!({}));
        policy.cc_policy_id = 42;
        d.create_storage_policy(policy.clone()).await.unwrap();

        let mut update = policy.clone();
        update.cc_policy_id = 0;
        update.logs = vec![orchestrator_types::LogEntry::now("redundancy updated")];

        let result = d.update_storage_policy(update).await.unwrap();
        assert_eq!(result.cc_policy_id, 42);
        assert_eq!(result.logs.len(), 2);
    }
}
