//! Resource generation module.
//!
//! Contains utilities for generating Kubernetes resources owned by Neo4jCluster.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | ConfigMap | Shared and per-server neo4j.conf fragments |
//! | StatefulSet | Stable pod identity for servers |
//! | Headless Service | Discovery (publishNotReadyAddresses) |
//! | Client Service | Bolt and HTTP access |

pub mod common;
pub mod configmap;
pub mod services;
pub mod statefulset;

/// Annotation holding the configuration digest, set on the ConfigMap and on
/// the pod template. A pod whose value differs from the current digest runs
/// stale configuration.
pub const CONFIG_HASH_ANNOTATION: &str = "neo4joperator.smoketurner.com/config-hash";

// Re-export commonly used items from common
pub use common::{owner_reference, pod_selector_labels, standard_labels};
