//! Controller module for neo4j-operator.
//!
//! Contains the reconciliation loop and the consistency engine it drives:
//!
//! - `topology` / `validation`: role hints, quorum, derived configuration
//! - `drift`: debounced configuration apply and rollout
//! - `split_brain`: membership classification and minority repair
//! - `upgrade` / `upgrade_state_machine`: rolling upgrades
//! - `cluster_state_machine`: the cluster lifecycle phase

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;

// Consistency engine
pub mod drift;
pub mod split_brain;
pub mod topology;
pub mod validation;

// Rolling upgrades
pub mod upgrade;
pub mod upgrade_state_machine;

// Neo4jCluster controller
pub mod cluster_state_machine;
pub mod reconciler;
