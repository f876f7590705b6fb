//! Custom Resource Definitions (CRDs) for neo4j-operator.
//!
//! - `Neo4jCluster`: Deploy and manage a Neo4j cluster, including rolling upgrades

mod neo4j_cluster;

pub use neo4j_cluster::*;
