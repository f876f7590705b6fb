//! In-memory fakes for driving the reconciler in functional tests.
//!
//! - `MockStore`: a versioned object store. Every write bumps the
//!   resourceVersion and stale writes fail with a conflict, like the API
//!   server. Conflicts can also be injected to simulate concurrent writers.
//! - `ScriptedProbe`: answers membership queries from scripted peer groups.
//! - `ManualClock`: time only moves when a test advances it.
//!
//! Pods are not created by a StatefulSet controller; `Harness::settle`
//! recreates missing pods from the last applied manifest instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use neo4j_operator::client::{
    ClusterStore, EventRecord, HostedDatabase, MembershipProbe, MembershipView, ProbeTarget,
    ServerPod,
};
use neo4j_operator::config::OperatorConfig;
use neo4j_operator::controller::common::add_finalizer;
use neo4j_operator::controller::context::{CleanupHook, Clock, Context};
use neo4j_operator::controller::error::{Error, Result};
use neo4j_operator::controller::reconciler::reconcile_cluster;
use neo4j_operator::controller::topology::TargetManifest;
use neo4j_operator::controller::status::get_condition;
use neo4j_operator::crd::{
    ClusterPhase, Condition, ConditionType, Neo4jCluster, Neo4jClusterSpec, Neo4jClusterStatus,
};

pub const NAMESPACE: &str = "default";
pub const NAME: &str = "graph";

/// Start of every test timeline.
pub fn epoch() -> Timestamp {
    Timestamp::from_second(1_800_000_000).unwrap()
}

pub fn pod_name(ordinal: i32) -> String {
    format!("{NAME}-{ordinal}")
}

/// A cluster object as a user would submit it.
pub fn new_cluster(spec: Neo4jClusterSpec) -> Neo4jCluster {
    let mut cluster = Neo4jCluster::new(NAME, spec);
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some("uid-graph".to_string());
    cluster.metadata.generation = Some(1);
    cluster
}

/// Spec with a parseable version tag.
pub fn spec_with_tag(servers: i32, tag: &str) -> Neo4jClusterSpec {
    let mut spec = Neo4jClusterSpec {
        servers,
        ..Default::default()
    };
    spec.image.tag = tag.to_string();
    spec
}

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = now.checked_add(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
struct StoreState {
    cluster: Option<Neo4jCluster>,
    resource_version: u64,
    pods: Vec<ServerPod>,
    secrets: BTreeMap<(String, String), String>,
    injected_conflicts: u32,
    conflicts_served: u32,
    status_writes: u32,
    applied: Vec<TargetManifest>,
    deleted_pods: Vec<String>,
    events: Vec<EventRecord>,
}

impl StoreState {
    fn bump(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Consume an injected conflict; a concurrent writer moves the version.
    fn take_injected_conflict(&mut self) -> bool {
        if self.injected_conflicts == 0 {
            return false;
        }
        self.injected_conflicts -= 1;
        self.conflicts_served += 1;
        let rv = self.bump();
        if let Some(stored) = self.cluster.as_mut() {
            stored.metadata.resource_version = Some(rv);
        }
        true
    }

    fn check_version(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster> {
        let Some(stored) = self.cluster.as_ref() else {
            return Err(Error::Transient("cluster does not exist".into()));
        };
        if stored.metadata.resource_version != cluster.metadata.resource_version {
            return Err(Error::Conflict(format!("{NAMESPACE}/{NAME}")));
        }
        Ok(stored.clone())
    }
}

#[derive(Default)]
pub struct MockStore {
    state: Mutex<StoreState>,
}

impl MockStore {
    pub fn with_cluster(cluster: Neo4jCluster) -> Self {
        let store = Self::default();
        store.put(cluster);
        store
    }

    /// Store an object as-is, assigning a fresh resourceVersion.
    pub fn put(&self, mut cluster: Neo4jCluster) {
        let mut state = self.state.lock().unwrap();
        cluster.metadata.resource_version = Some(state.bump());
        state.cluster = Some(cluster);
    }

    /// Edit the stored object like a user would; spec edits bump the generation.
    pub fn edit(&self, mutate: impl FnOnce(&mut Neo4jCluster)) {
        let mut state = self.state.lock().unwrap();
        let rv = state.bump();
        let cluster = state.cluster.as_mut().unwrap();
        let before = serde_json::to_value(&cluster.spec).unwrap();
        mutate(cluster);
        if serde_json::to_value(&cluster.spec).unwrap() != before {
            cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
        }
        cluster.metadata.resource_version = Some(rv);
    }

    pub fn cluster(&self) -> Option<Neo4jCluster> {
        self.state.lock().unwrap().cluster.clone()
    }

    pub fn inject_conflicts(&self, count: u32) {
        self.state.lock().unwrap().injected_conflicts = count;
    }

    pub fn conflicts_served(&self) -> u32 {
        self.state.lock().unwrap().conflicts_served
    }

    pub fn status_writes(&self) -> u32 {
        self.state.lock().unwrap().status_writes
    }

    pub fn set_secret(&self, name: &str, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert((name.to_string(), key.to_string()), value.to_string());
    }

    pub fn applied(&self) -> Vec<TargetManifest> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn last_applied(&self) -> Option<TargetManifest> {
        self.state.lock().unwrap().applied.last().cloned()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    pub fn pods(&self) -> Vec<ServerPod> {
        self.state.lock().unwrap().pods.clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn event_count(&self, reason: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }

    /// Recreate every missing pod from the last applied manifest, ready.
    pub fn settle(&self, now: Timestamp) {
        let mut state = self.state.lock().unwrap();
        let Some(manifest) = state.applied.last().cloned() else {
            return;
        };
        for ordinal in 0..manifest.replicas {
            if state.pods.iter().any(|p| p.ordinal == ordinal) {
                continue;
            }
            let name = pod_name(ordinal);
            state.pods.push(ServerPod {
                host: format!("{name}.{NAME}-headless.{NAMESPACE}.svc.cluster.local"),
                name,
                ordinal,
                ready: true,
                ready_since: Some(now),
                image: Some(manifest.image.clone()),
                config_hash: Some(manifest.config_hash.clone()),
                terminating: false,
            });
        }
        state.pods.sort_by_key(|p| p.ordinal);
    }
}

#[async_trait]
impl ClusterStore for MockStore {
    async fn get_cluster(&self, _namespace: &str, _name: &str) -> Result<Option<Neo4jCluster>> {
        Ok(self.state.lock().unwrap().cluster.clone())
    }

    async fn replace_cluster(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster> {
        let mut state = self.state.lock().unwrap();
        if state.take_injected_conflict() {
            return Err(Error::Conflict(format!("{NAMESPACE}/{NAME}")));
        }
        let stored = state.check_version(cluster)?;

        let mut next = cluster.clone();
        next.status = stored.status;
        next.metadata.resource_version = Some(state.bump());

        // The API server drops an object once its last finalizer is gone.
        if next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty() {
            state.cluster = None;
        } else {
            state.cluster = Some(next.clone());
        }
        Ok(next)
    }

    async fn replace_status(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster> {
        let mut state = self.state.lock().unwrap();
        if state.take_injected_conflict() {
            return Err(Error::Conflict(format!("{NAMESPACE}/{NAME}")));
        }
        let mut next = state.check_version(cluster)?;
        next.status = cluster.status.clone();
        next.metadata.resource_version = Some(state.bump());
        state.status_writes += 1;
        state.cluster = Some(next.clone());
        Ok(next)
    }

    async fn apply_manifest(&self, _cluster: &Neo4jCluster, manifest: &TargetManifest) -> Result<()> {
        self.state.lock().unwrap().applied.push(manifest.clone());
        Ok(())
    }

    async fn list_server_pods(&self, _cluster: &Neo4jCluster) -> Result<Vec<ServerPod>> {
        Ok(self.state.lock().unwrap().pods.clone())
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pods.retain(|p| p.name != name);
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn read_secret(&self, _namespace: &str, name: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(&(name.to_string(), key.to_string()))
            .cloned())
    }

    async fn publish_event(&self, _cluster: &Neo4jCluster, event: EventRecord) {
        self.state.lock().unwrap().events.push(event);
    }
}

// ============================================================================
// Membership probe
// ============================================================================

/// Answers `server_view` from peer groups: a pod sees the members of the
/// group it belongs to. One group covering every pod is a healthy cluster.
#[derive(Default)]
pub struct ScriptedProbe {
    groups: Mutex<Vec<BTreeSet<String>>>,
    unreachable: Mutex<BTreeSet<String>>,
    hosted: Mutex<BTreeMap<String, Vec<HostedDatabase>>>,
    queries: AtomicUsize,
}

impl ScriptedProbe {
    pub fn agreeing(servers: i32) -> Self {
        let probe = Self::default();
        probe.agree(servers);
        probe
    }

    /// Every server sees every other server.
    pub fn agree(&self, servers: i32) {
        *self.groups.lock().unwrap() = vec![(0..servers).map(pod_name).collect()];
    }

    /// Partition the servers into groups of ordinals.
    pub fn partition(&self, groups: &[&[i32]]) {
        *self.groups.lock().unwrap() = groups
            .iter()
            .map(|g| g.iter().copied().map(pod_name).collect())
            .collect();
    }

    pub fn set_unreachable(&self, ordinal: i32) {
        self.unreachable.lock().unwrap().insert(pod_name(ordinal));
    }

    pub fn host_primary(&self, ordinal: i32, database: &str) {
        self.hosted.lock().unwrap().insert(
            pod_name(ordinal),
            vec![HostedDatabase {
                name: database.to_string(),
                role: "primary".to_string(),
                status: "online".to_string(),
            }],
        );
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipProbe for ScriptedProbe {
    async fn server_view(&self, target: &ProbeTarget) -> Result<MembershipView> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(&target.pod) {
            return Err(Error::AdminQuery {
                pod: target.pod.clone(),
                message: "connection refused".into(),
            });
        }
        let peers = self
            .groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.contains(&target.pod))
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([target.pod.clone()]));
        Ok(MembershipView {
            pod: target.pod.clone(),
            peers,
            observed_at: epoch(),
        })
    }

    async fn hosted_databases(&self, target: &ProbeTarget) -> Result<Vec<HostedDatabase>> {
        Ok(self
            .hosted
            .lock()
            .unwrap()
            .get(&target.pod)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Cleanup hooks
// ============================================================================

/// Cleanup hook that fails until told otherwise.
pub struct RecordingHook {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl RecordingHook {
    pub fn new(fail: bool) -> Self {
        Self {
            fail: AtomicBool::new(fail),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CleanupHook for RecordingHook {
    fn name(&self) -> &str {
        "backup-catalog"
    }

    async fn cleanup(&self, _cluster: &Neo4jCluster) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transient("catalog unreachable".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        conflict_retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<MockStore>,
    pub probe: Arc<ScriptedProbe>,
    pub clock: Arc<ManualClock>,
    pub ctx: Context,
}

impl Harness {
    pub fn new(cluster: Neo4jCluster) -> Self {
        let servers = cluster.spec.servers;
        Self::with_context(cluster, ScriptedProbe::agreeing(servers), |ctx| ctx)
    }

    pub fn with_context(
        cluster: Neo4jCluster,
        probe: ScriptedProbe,
        customize: impl FnOnce(Context) -> Context,
    ) -> Self {
        let store = Arc::new(MockStore::with_cluster(cluster));
        let probe = Arc::new(probe);
        let clock = Arc::new(ManualClock::new(epoch()));
        let ctx = Context::new(store.clone(), probe.clone(), test_config(), None)
            .with_clock(clock.clone());
        Self {
            store,
            probe,
            clock,
            ctx: customize(ctx),
        }
    }

    /// A cluster that already carries the finalizer.
    pub fn admitted(spec: Neo4jClusterSpec) -> Self {
        let mut cluster = new_cluster(spec);
        add_finalizer(&mut cluster);
        Self::new(cluster)
    }

    pub async fn reconcile(&self) -> Result<Option<Duration>> {
        reconcile_cluster(&self.ctx, NAMESPACE, NAME).await
    }

    pub fn settle(&self) {
        self.store.settle(self.clock.now());
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn cluster(&self) -> Neo4jCluster {
        self.store.cluster().expect("cluster exists")
    }

    pub fn status(&self) -> Neo4jClusterStatus {
        self.cluster().status.unwrap_or_default()
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<Condition> {
        get_condition(&self.status().conditions, condition_type).cloned()
    }

    /// Run passes, recreating pods in between, until the cluster is Running.
    pub async fn converge(&self) {
        for _ in 0..10 {
            self.reconcile().await.unwrap();
            self.settle();
            if self.status().phase == ClusterPhase::Running {
                return;
            }
        }
        panic!("cluster did not converge: {:?}", self.status().phase);
    }

    pub fn set_annotation(&self, key: &str, value: &str) {
        self.store.edit(|c| {
            c.annotations_mut().insert(key.to_string(), value.to_string());
        });
    }

    pub fn request_deletion(&self) {
        self.store.edit(|c| {
            let at = epoch();
            c.metadata.deletion_timestamp = Some(Time(
                k8s_openapi::chrono::DateTime::from_timestamp(
                    at.as_second(),
                    at.subsec_nanosecond() as u32,
                )
                .unwrap(),
            ));
        });
    }
}
