//! Shared context for the controller.
//!
//! The Context holds everything a reconcile pass talks to: the cluster
//! state store, the per-server membership probe, the operator configuration,
//! uninstall hooks, and the clock. All of it is injected, so the reconciler
//! runs unchanged against the real API server or an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::client::{ClusterStore, EventRecord, MembershipProbe};
use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::crd::Neo4jCluster;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "neo4j-operator";

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// External uninstall step run before the finalizer is released.
///
/// Hooks must be idempotent: a failed deletion pass runs every hook again.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    /// Name used in logs and events.
    fn name(&self) -> &str;

    async fn cleanup(&self, cluster: &Neo4jCluster) -> Result<()>;
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub probe: Arc<dyn MembershipProbe>,
    pub config: OperatorConfig,
    pub cleanup_hooks: Vec<Arc<dyn CleanupHook>>,
    pub clock: Arc<dyn Clock>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context on the system clock with no cleanup hooks
    pub fn new(
        store: Arc<dyn ClusterStore>,
        probe: Arc<dyn MembershipProbe>,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            probe,
            config,
            cleanup_hooks: Vec::new(),
            clock: Arc::new(SystemClock),
            health_state,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cleanup_hook(mut self, hook: Arc<dyn CleanupHook>) -> Self {
        self.cleanup_hooks.push(hook);
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &Neo4jCluster,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.publish(cluster, EventRecord::normal(reason, action, note))
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &Neo4jCluster,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.publish(cluster, EventRecord::warning(reason, action, note))
            .await;
    }

    pub async fn publish(&self, cluster: &Neo4jCluster, event: EventRecord) {
        self.store.publish_event(cluster, event).await;
    }
}
