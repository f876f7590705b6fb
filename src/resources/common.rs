//! Common resource generation utilities.
//!
//! Names, labels and owner references shared by every child resource of a
//! Neo4jCluster.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::Neo4jCluster;

/// Label selecting the pods of one cluster
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Standard labels applied to all managed resources
pub fn standard_labels(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), cluster.name_any());
    labels.insert(MANAGED_BY_LABEL.to_string(), "neo4j-operator".to_string());
    labels.insert(COMPONENT_LABEL.to_string(), "neo4j".to_string());

    // Merge user-defined labels
    for (key, value) in &cluster.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// User-defined annotations, passed through unchanged
pub fn standard_annotations(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    cluster.spec.annotations.clone()
}

/// Labels that select exactly the server pods of a cluster.
///
/// Kept independent of user labels so the StatefulSet selector never changes.
pub fn pod_selector_labels(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), cluster.name_any());
    labels.insert(MANAGED_BY_LABEL.to_string(), "neo4j-operator".to_string());
    labels
}

/// Create owner reference for a Neo4jCluster
pub fn owner_reference(cluster: &Neo4jCluster) -> OwnerReference {
    OwnerReference {
        api_version: Neo4jCluster::api_version(&()).to_string(),
        kind: Neo4jCluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn headless_service_name(cluster: &Neo4jCluster) -> String {
    format!("{}-headless", cluster.name_any())
}

/// The client Service shares the cluster's name.
pub fn client_service_name(cluster: &Neo4jCluster) -> String {
    cluster.name_any()
}

pub fn config_map_name(cluster: &Neo4jCluster) -> String {
    format!("{}-config", cluster.name_any())
}

/// Annotations as an optional map, omitted when empty.
pub fn non_empty(annotations: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    }
}
