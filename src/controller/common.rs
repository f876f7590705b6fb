//! Shared controller helpers.
//!
//! Pod naming, timestamp handling, and finalizer mutations used across the
//! reconciler, split-brain detector and upgrade orchestrator.

use std::time::Duration;

use jiff::Timestamp;
use kube::ResourceExt;

use crate::crd::Neo4jCluster;
use crate::resources::common::headless_service_name;

/// Finalizer guarding cleanup of a Neo4jCluster.
pub const FINALIZER: &str = "neo4joperator.smoketurner.com/finalizer";

/// Cluster annotation requesting a rolling restart; its value is folded into
/// the derived configuration.
pub const RESTART_REQUESTED_ANNOTATION: &str = "neo4joperator.smoketurner.com/restart-requested-at";

/// Cluster annotation resuming a paused upgrade. Any new value is a new request.
pub const UPGRADE_RESUME_ANNOTATION: &str = "neo4joperator.smoketurner.com/upgrade-resume";

/// Cluster annotation aborting the active upgrade. Any new value is a new request.
pub const UPGRADE_ABORT_ANNOTATION: &str = "neo4joperator.smoketurner.com/upgrade-abort";

/// Add the finalizer to an object. Returns whether it was added.
pub fn add_finalizer(cluster: &mut Neo4jCluster) -> bool {
    let finalizers = cluster.finalizers_mut();
    if finalizers.iter().any(|f| f == FINALIZER) {
        return false;
    }
    finalizers.push(FINALIZER.to_string());
    true
}

/// Remove the finalizer from an object. Returns whether it was present.
pub fn remove_finalizer(cluster: &mut Neo4jCluster) -> bool {
    let finalizers = cluster.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != FINALIZER);
    finalizers.len() != before
}

pub fn has_finalizer(cluster: &Neo4jCluster) -> bool {
    cluster.finalizers().iter().any(|f| f == FINALIZER)
}

/// Extract pod name from an address (e.g., "pod-0.service.ns:7687" -> "pod-0").
pub fn extract_pod_name(address: &str) -> String {
    address
        .split(':')
        .next()
        .and_then(|h| h.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// StatefulSet ordinal from a pod name ("graph-2" -> 2).
pub fn extract_ordinal(pod_name: &str) -> Option<i32> {
    pod_name.rsplit_once('-')?.1.parse().ok()
}

/// Pod name for a server ordinal.
pub fn pod_name(cluster_name: &str, ordinal: i32) -> String {
    format!("{cluster_name}-{ordinal}")
}

/// Stable DNS name of a server pod.
pub fn pod_host(cluster: &Neo4jCluster, pod: &str) -> String {
    format!(
        "{}.{}.{}.svc.cluster.local",
        pod,
        headless_service_name(cluster),
        cluster.namespace().unwrap_or_else(|| "default".to_string())
    )
}

/// Parse an RFC 3339 timestamp persisted in status.
pub fn parse_timestamp(value: Option<&str>) -> Option<Timestamp> {
    value.and_then(|v| v.parse::<Timestamp>().ok())
}

/// Time from `since` to `now`, zero if `since` is in the future.
pub fn elapsed(since: Timestamp, now: Timestamp) -> Duration {
    let secs = now.as_second().saturating_sub(since.as_second());
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}
