//! Read-modify-write with retry on version conflict.
//!
//! Every write to the cluster object goes through here: fetch the freshest
//! copy, re-apply the caller's mutation, write with that copy's version.
//! A conflict is never terminal; only exhausting the attempt budget is.

use std::time::Duration;

use tracing::debug;

use crate::client::store::ClusterStore;
use crate::controller::error::{Error, Result};
use crate::crd::Neo4jCluster;

/// Which part of the object the mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    /// Metadata and spec, via a full replace.
    Object,
    /// The status subresource.
    Status,
}

/// Bounded exponential backoff between conflicting attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Apply `mutate` to the latest copy of the cluster and persist it.
///
/// `mutate` returns whether it changed anything; unchanged objects are not
/// written. Returns the stored object, or `None` if the cluster was deleted
/// in the meantime.
pub async fn modify_with_retry<F>(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    target: WriteTarget,
    policy: RetryPolicy,
    mut mutate: F,
) -> Result<Option<Neo4jCluster>>
where
    F: FnMut(&mut Neo4jCluster) -> bool + Send,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let Some(mut latest) = store.get_cluster(namespace, name).await? else {
            return Ok(None);
        };

        if !mutate(&mut latest) {
            return Ok(Some(latest));
        }

        let written = match target {
            WriteTarget::Object => store.replace_cluster(&latest).await,
            WriteTarget::Status => store.replace_status(&latest).await,
        };

        match written {
            Ok(stored) => return Ok(Some(stored)),
            Err(e) if e.is_conflict() => {
                debug!(
                    name = %name,
                    namespace = %namespace,
                    attempt,
                    ?target,
                    "Version conflict, re-reading before retry"
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::ConflictRetriesExhausted {
        name: format!("{namespace}/{name}"),
        attempts,
    })
}

/// Read-modify-write of the status subresource.
pub async fn update_status_with_retry<F>(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    policy: RetryPolicy,
    mutate: F,
) -> Result<Option<Neo4jCluster>>
where
    F: FnMut(&mut Neo4jCluster) -> bool + Send,
{
    modify_with_retry(store, namespace, name, WriteTarget::Status, policy, mutate).await
}

/// Read-modify-write of metadata (finalizers, annotations).
pub async fn update_metadata_with_retry<F>(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    policy: RetryPolicy,
    mutate: F,
) -> Result<Option<Neo4jCluster>>
where
    F: FnMut(&mut Neo4jCluster) -> bool + Send,
{
    modify_with_retry(store, namespace, name, WriteTarget::Object, policy, mutate).await
}
