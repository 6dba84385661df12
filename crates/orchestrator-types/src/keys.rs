//! KV key layout. Keys, not payloads, encode the primary indexes.

pub const CLUSTERS_PREFIX: &str = "/clusters/cluster/";
pub const HEALTH_PREFIX: &str = "/health/clusters/";
pub const DEPLOYMENTS_PREFIX: &str = "/deployments/deployment/";
pub const ASSIGNMENTS_PREFIX: &str = "/assignments/";
pub const BUNDLES_PREFIX: &str = "/bundles/bundle/";
pub const KERNELS_PREFIX: &str = "/kernels/kernel/";
pub const STORAGE_POLICIES_PREFIX: &str = "/storage_policies/policy/";
pub const MONITORING_PREFIX: &str = "/monitoring/";
pub const TELEMETRY_ENTITIES_KEY: &str = "/telemetry_entities";

pub fn cluster_key(cluster_uuid: &str) -> String {
    format!("{CLUSTERS_PREFIX}{cluster_uuid}")
}

pub fn cluster_health_key(cluster_uuid: &str) -> String {
    format!("{HEALTH_PREFIX}{cluster_uuid}")
}

pub fn deployment_key(deployment_uuid: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}{deployment_uuid}")
}

/// Prefix watched by a cluster Driver for assignments scheduled onto it.
pub fn assignment_cluster_prefix(cluster_uuid: &str) -> String {
    format!("{ASSIGNMENTS_PREFIX}{cluster_uuid}/assignment/")
}

pub fn assignment_key(cluster_uuid: &str, assignment_uuid: &str) -> String {
    format!("{ASSIGNMENTS_PREFIX}{cluster_uuid}/assignment/{assignment_uuid}")
}

pub fn bundle_key(bundle_uuid: &str) -> String {
    format!("{BUNDLES_PREFIX}{bundle_uuid}")
}

pub fn kernel_key(request_uuid: &str) -> String {
    format!("{KERNELS_PREFIX}{request_uuid}")
}

pub fn storage_policy_key(policy_uuid: &str) -> String {
    format!("{STORAGE_POLICIES_PREFIX}{policy_uuid}")
}

pub fn monitoring_key(deployment_uuid: &str) -> String {
    format!("{MONITORING_PREFIX}{deployment_uuid}")
}

/// Extracts the trailing uuid segment of a key built from one of the prefixes above.
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Extracts the `cluster_uuid` from an assignment key of the form
/// `/assignments/{cluster_uuid}/assignment/{assignment_uuid}`.
pub fn cluster_uuid_from_assignment_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(ASSIGNMENTS_PREFIX)?;
    let (cluster_uuid, _) = rest.split_once('/')?;
    Some(cluster_uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_key_roundtrip() {
        let key = assignment_key("c1", "a1");
        assert_eq!(key, "/assignments/c1/assignment/a1");
        assert_eq!(cluster_uuid_from_assignment_key(&key), Some("c1"));
        assert_eq!(last_segment(&key), "a1");
    }

    #[test]
    fn cluster_prefix_matches_key() {
        let prefix = assignment_cluster_prefix("c1");
        let key = assignment_key("c1", "a1");
        assert!(key.starts_with(&prefix));
    }
}
