use crate::error::{DispatcherError, DispatcherResult};
use crate::Dispatcher;
use chrono::Utc;
use orchestrator_types::{keys, Cluster};

impl Dispatcher {
    /// Upserts a cluster by `cluster_uuid`: safe to call on create or update.
    pub async fn set_cluster(&self, cluster: Cluster) -> DispatcherResult<Cluster> {
        let key = keys::cluster_key(&cluster.cluster_uuid);
        let bytes = serde_json::to_vec(&cluster)?;
        self.store.put(&key, bytes).await?;
        Ok(cluster)
    }

    pub async fn get_cluster(&self, cluster_uuid: &str) -> DispatcherResult<Option<Cluster>> {
        let key = keys::cluster_key(cluster_uuid);
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes the cluster and its health key. Idempotent: deleting an
    /// absent cluster is not an error.
    pub async fn delete_cluster(&self, cluster_uuid: &str) -> DispatcherResult<()> {
        self.store.delete(&keys::cluster_key(cluster_uuid)).await?;
        self.store.delete(&keys::cluster_health_key(cluster_uuid)).await?;
        Ok(())
    }

    /// Upserts the health key with the current wall-clock second.
    pub async fn heartbeat(&self, cluster_uuid: &str) -> DispatcherResult<i64> {
        let now = Utc::now().timestamp();
        self.store
            .put(&keys::cluster_health_key(cluster_uuid), now.to_string().into_bytes())
            .await?;
        Ok(now)
    }

    async fn cluster_health(&self, cluster_uuid: &str) -> DispatcherResult<Option<i64>> {
        match self.store.get(&keys::cluster_health_key(cluster_uuid)).await? {
            Some(bytes) => {
                let s = String::from_utf8_lossy(&bytes);
                Ok(s.parse::<i64>().ok())
            }
            None => Ok(None),
        }
    }

    /// Returns all clusters, or, when `active` is set (grammar
    /// `<int><m|h|d>`), only those whose health timestamp is within that
    /// window of now.
    pub async fn get_clusters(&self, active: Option<&str>) -> DispatcherResult<Vec<Cluster>> {
        let max_age_secs = match active {
            Some(filter) => Some(parse_active_filter(filter)?),
            None => None,
        };

        let keys = self.store.list_keys(keys::CLUSTERS_PREFIX).await?;
        let mut clusters = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let cluster: Cluster = serde_json::from_slice(&bytes)?;

            if let Some(max_age) = max_age_secs {
                let now = Utc::now().timestamp();
                let within = match self.cluster_health(&cluster.cluster_uuid).await? {
                    Some(health) => now - health <= max_age,
                    None => false,
                };
                if !within {
                    continue;
                }
            }
            clusters.push(cluster);
        }
        Ok(clusters)
    }
}

/// Parses the `<int><m|h|d>` grammar used by `active=` filters into seconds.
fn parse_active_filter(filter: &str) -> DispatcherResult<i64> {
    let unit = filter
        .chars()
        .last()
        .ok_or_else(|| DispatcherError::InvalidActiveFilter(filter.to_string()))?;
    let unit_secs: i64 = match unit {
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return Err(DispatcherError::InvalidActiveFilter(filter.to_string())),
    };
    let magnitude: i64 = filter[..filter.len() - 1]
        .parse()
        .map_err(|_| DispatcherError::InvalidActiveFilter(filter.to_string()))?;
    Ok(magnitude * unit_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::dispatcher;
    use orchestrator_types::ClusterType;

    #[tokio::test]
    async fn staleness_filter_excludes_old_clusters() {
        let d = dispatcher();
        let c1 = Cluster::new("c1".into(), ClusterType::K8s, serde_json::json!({}));
        let c2 = Cluster::new("c2".into(), ClusterType::Hpc, serde_json::json!({}));
        d.set_cluster(c1.clone()).await.unwrap();
        d.set_cluster(c2.clone()).await.unwrap();

        d.heartbeat(&c1.cluster_uuid).await.unwrap();
        let stale_ts = Utc::now().timestamp() - 600;
        d.store
            .put(&keys::cluster_health_key(&c2.cluster_uuid), stale_ts.to_string().into_bytes())
            .await
            .unwrap();

        let active = d.get_clusters(Some("5m")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].cluster_uuid, c1.cluster_uuid);
    }

    #[tokio::test]
    async fn delete_cluster_is_idempotent() {
        let d = dispatcher();
        d.delete_cluster("does-not-exist").await.unwrap();
        d.delete_cluster("does-not-exist").await.unwrap();
    }
}
