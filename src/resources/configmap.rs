//! ConfigMap carrying the derived server configuration.
//!
//! One key per rendered file: `neo4j.conf` with the shared settings and
//! `server-<i>.conf` with each server's mode constraint. The pod startup
//! script concatenates the shared file with its own server file.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::controller::topology::TargetManifest;
use crate::crd::Neo4jCluster;
use crate::resources::CONFIG_HASH_ANNOTATION;
use crate::resources::common::{
    config_map_name, non_empty, owner_reference, standard_annotations, standard_labels,
};

/// Generate the configuration ConfigMap for a manifest.
pub fn generate_configmap(cluster: &Neo4jCluster, manifest: &TargetManifest) -> ConfigMap {
    let mut annotations = standard_annotations(cluster);
    annotations.insert(
        CONFIG_HASH_ANNOTATION.to_string(),
        manifest.config_hash.clone(),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(cluster)),
            annotations: non_empty(annotations),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(manifest.config_files.clone()),
        ..Default::default()
    }
}
