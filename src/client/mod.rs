//! Clients for the two external systems the operator talks to.
//!
//! ## Architecture
//!
//! - `store`: the Kubernetes side, behind the `ClusterStore` trait
//! - `retry`: read-modify-write with retry on version conflict
//! - `admin`: per-server Neo4j administrative queries, behind `MembershipProbe`
//! - `types`: observed pod state and parsed query results

pub mod admin;
pub mod retry;
pub mod store;
pub mod types;

pub use admin::{Credentials, HttpAdminClient, MembershipProbe, ProbeTarget};
pub use retry::{
    RetryPolicy, WriteTarget, modify_with_retry, update_metadata_with_retry,
    update_status_with_retry,
};
pub use store::{ClusterStore, EventRecord, EventSeverity, KubeStore};
pub use types::{HostedDatabase, MembershipView, ServerPod};
