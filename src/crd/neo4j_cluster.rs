//! Neo4jCluster Custom Resource Definition.
//!
//! Defines the Neo4jCluster CRD for deploying clustered (or standalone)
//! Neo4j servers on Kubernetes. The spec is user-authored; the status is
//! written exclusively by the operator.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Neo4jCluster is a custom resource for deploying Neo4j clusters.
///
/// Example:
/// ```yaml
/// apiVersion: neo4joperator.smoketurner.com/v1alpha1
/// kind: Neo4jCluster
/// metadata:
///   name: graph
/// spec:
///   servers: 3
///   serverRoleHints:
///     - serverIndex: 0
///       modeConstraint: PRIMARY
///     - serverIndex: 1
///       modeConstraint: SECONDARY
///   image:
///     tag: "5.26.0-enterprise"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "neo4joperator.smoketurner.com",
    version = "v1alpha1",
    kind = "Neo4jCluster",
    plural = "neo4jclusters",
    shortname = "n4c",
    status = "Neo4jClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Servers", "type":"integer", "jsonPath":".spec.servers"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.replicas.ready"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Membership", "type":"string", "jsonPath":".status.membership.health"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jClusterSpec {
    // === Topology ===
    /// Number of Neo4j servers. 1 runs a standalone server, 2 or more form a cluster.
    #[serde(default = "default_servers")]
    pub servers: i32,

    /// Mode constraint inherited by every server without a role hint.
    #[serde(default)]
    pub mode_constraint: ModeConstraint,

    /// Per-server mode constraints, overriding the global constraint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_role_hints: Vec<ServerRoleHint>,

    // === Image ===
    /// Neo4j container image. The tag is the version reference used for upgrades.
    #[serde(default)]
    pub image: ImageSpec,

    /// Credentials used for administrative queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,

    /// Additional neo4j.conf settings applied to every server.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Rolling upgrade behaviour.
    #[serde(default)]
    pub upgrade_strategy: UpgradeStrategySpec,

    /// Per-cluster overrides for split-brain and drift timing.
    #[serde(default)]
    pub consistency: ConsistencySpec,

    // === Storage & resources ===
    #[serde(default)]
    pub storage: StorageSpec,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations to apply to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for Neo4jClusterSpec {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            mode_constraint: ModeConstraint::default(),
            server_role_hints: Vec::new(),
            image: ImageSpec::default(),
            auth: None,
            config: BTreeMap::new(),
            upgrade_strategy: UpgradeStrategySpec::default(),
            consistency: ConsistencySpec::default(),
            storage: StorageSpec::default(),
            resources: ResourceRequirementsSpec::default(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_servers() -> i32 {
    3
}

/// Which database roles a server may host.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModeConstraint {
    /// Primaries and secondaries.
    #[default]
    None,
    /// Primaries only.
    Primary,
    /// Secondaries only.
    Secondary,
}

impl std::fmt::Display for ModeConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeConstraint::None => write!(f, "NONE"),
            ModeConstraint::Primary => write!(f, "PRIMARY"),
            ModeConstraint::Secondary => write!(f, "SECONDARY"),
        }
    }
}

impl std::str::FromStr for ModeConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(ModeConstraint::None),
            "PRIMARY" => Ok(ModeConstraint::Primary),
            "SECONDARY" => Ok(ModeConstraint::Secondary),
            other => Err(format!(
                "unknown mode constraint {other:?} (expected NONE, PRIMARY or SECONDARY)"
            )),
        }
    }
}

impl ModeConstraint {
    /// Whether a server with this constraint may host primaries.
    pub fn allows_primary(self) -> bool {
        !matches!(self, ModeConstraint::Secondary)
    }
}

/// Mode constraint for a single server.
///
/// The constraint is kept as a raw string so that unknown values reach
/// topology validation and get reported together with every other violation.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerRoleHint {
    /// Zero-based server ordinal.
    pub server_index: i32,
    /// NONE, PRIMARY or SECONDARY.
    pub mode_constraint: String,
}

impl ServerRoleHint {
    pub fn new(server_index: i32, mode: ModeConstraint) -> Self {
        Self {
            server_index,
            mode_constraint: mode.to_string(),
        }
    }
}

/// Container image specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Container image repository (default: neo4j).
    #[serde(default = "default_image_repository")]
    pub repository: String,

    /// Image tag, which is also the version reference (default: 5.26.0-enterprise).
    #[serde(default = "default_image_tag")]
    pub tag: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default = "default_image_pull_policy")]
    pub pull_policy: String,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
            pull_policy: default_image_pull_policy(),
        }
    }
}

impl ImageSpec {
    /// Full image reference for a given version tag.
    pub fn reference_for(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}

fn default_image_repository() -> String {
    "neo4j".to_string()
}

fn default_image_tag() -> String {
    "5.26.0-enterprise".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Reference to a Secret containing the neo4j user's password.
    pub secret_ref: SecretKeyRef,
}

/// Reference to a key within a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret.
    pub name: String,

    /// Key within the Secret containing the password (default: password).
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// Order in which server classes are upgraded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum UpgradeOrder {
    #[default]
    SecondariesFirst,
    PrimariesFirst,
}

/// Rolling upgrade directives.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStrategySpec {
    /// Require a healthy cluster before the first server is restarted (default: true).
    #[serde(default = "default_true")]
    pub pre_upgrade_health_check: bool,

    /// Require a healthy cluster before the upgrade is marked completed (default: true).
    #[serde(default = "default_true")]
    pub post_upgrade_health_check: bool,

    /// Pause instead of failing on a timeout or health-gate failure (default: true).
    #[serde(default = "default_true")]
    pub auto_pause: bool,

    /// Maximum servers restarted at the same time (default: 1).
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: i32,

    /// Time a single server may take to come back and rejoin (default: 600).
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    #[serde(default)]
    pub order: UpgradeOrder,
}

impl Default for UpgradeStrategySpec {
    fn default() -> Self {
        Self {
            pre_upgrade_health_check: true,
            post_upgrade_health_check: true,
            auto_pause: true,
            max_unavailable: default_max_unavailable(),
            step_timeout_seconds: default_step_timeout(),
            order: UpgradeOrder::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_unavailable() -> i32 {
    1
}

fn default_step_timeout() -> u64 {
    600
}

/// Per-cluster overrides of the operator-wide consistency tunables.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_brain_grace_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_cooldown_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_debounce_seconds: Option<u64>,
}

/// Persistent storage for each server.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name. Uses the cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Size of the data volume (default: 10Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            storage_class_name: None,
            size: default_storage_size(),
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

/// Resource requests and limits for Neo4j pods.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_memory")]
    pub memory: String,
}

impl Default for ResourceRequirementsSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
        }
    }
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_memory() -> String {
    "2Gi".to_string()
}

// ============================================================================
// Status
// ============================================================================

/// Status of a Neo4jCluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jClusterStatus {
    /// Current phase of the cluster lifecycle.
    #[serde(default)]
    pub phase: ClusterPhase,

    #[serde(default)]
    pub replicas: ReplicaStatus,

    /// Version every server runs outside of an upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_status: Option<UpgradeStatus>,

    /// Configuration drift bookkeeping.
    #[serde(default)]
    pub configuration: ConfigurationStatus,

    /// Result of the latest membership detection pass.
    #[serde(default)]
    pub membership: MembershipStatus,

    /// Effective mode constraint per server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerStatus>,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
}

/// Ready versus declared server pods.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ReplicaStatus {
    pub ready: i32,
    pub total: i32,
}

/// Effective constraint of one server.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub ordinal: i32,
    pub mode_constraint: ModeConstraint,
}

/// Client-facing endpoints.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Endpoints {
    pub bolt: String,
    pub http: String,
}

/// Drift manager state, persisted so that debounce windows survive restarts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_hash: Option<String>,

    /// Start of the current debounce window (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_at: Option<String>,
}

/// Health classification of a membership detection pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MembershipHealth {
    /// Fewer pods ready than declared servers.
    #[default]
    Unformed,
    /// Views disagree but the grace period has not elapsed.
    Converging,
    /// Views disagree past the grace period.
    Split,
    /// All servers agree on a complete membership.
    Healthy,
}

impl std::fmt::Display for MembershipHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipHealth::Unformed => write!(f, "Unformed"),
            MembershipHealth::Converging => write!(f, "Converging"),
            MembershipHealth::Split => write!(f, "Split"),
            MembershipHealth::Healthy => write!(f, "Healthy"),
        }
    }
}

/// Persisted split-brain detector state.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MembershipStatus {
    #[serde(default)]
    pub health: MembershipHealth,

    /// Digest of the ready pod set and equivalence classes of the last pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// When the fingerprint last changed (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_since: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_repair_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_repaired_pods: Vec<String>,
}

/// ClusterPhase represents the current lifecycle phase of a Neo4jCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// Initial state, waiting for reconciliation.
    #[default]
    Pending,
    /// Child resources applied, pods starting.
    Creating,
    /// All pods ready, servers still discovering each other.
    Forming,
    /// Cluster is fully operational.
    Running,
    /// Cluster is operational but some servers are unavailable.
    Degraded,
    /// Servers disagree on cluster membership.
    SplitBrain,
    /// A rolling upgrade is active.
    Upgrading,
    /// Spec is invalid and requires intervention.
    Failed,
    /// Cluster is being deleted.
    Deleting,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::Creating => write!(f, "Creating"),
            ClusterPhase::Forming => write!(f, "Forming"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::Degraded => write!(f, "Degraded"),
            ClusterPhase::SplitBrain => write!(f, "SplitBrain"),
            ClusterPhase::Upgrading => write!(f, "Upgrading"),
            ClusterPhase::Failed => write!(f, "Failed"),
            ClusterPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

// ============================================================================
// Upgrade status
// ============================================================================

/// Phase of a rolling upgrade.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum UpgradePhase {
    /// Waiting for the pre-upgrade health gate.
    #[default]
    Pending,
    /// Servers are being restarted on the target version.
    InProgress,
    /// Halted after a timeout or failed gate; waits for resume or abort.
    Paused,
    /// All servers run the target version.
    Completed,
    /// Aborted or failed without auto-pause.
    Failed,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradePhase::Pending => write!(f, "Pending"),
            UpgradePhase::InProgress => write!(f, "InProgress"),
            UpgradePhase::Paused => write!(f, "Paused"),
            UpgradePhase::Completed => write!(f, "Completed"),
            UpgradePhase::Failed => write!(f, "Failed"),
        }
    }
}

impl UpgradePhase {
    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradePhase::Completed | UpgradePhase::Failed)
    }

    /// Whether pods of this cluster are owned by the upgrade and must not be
    /// restarted by anything else.
    pub fn holds_pods(&self) -> bool {
        matches!(self, UpgradePhase::InProgress | UpgradePhase::Paused)
    }
}

/// Server class used for upgrade ordering.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ServerClass {
    Primary,
    Secondary,
}

impl std::fmt::Display for ServerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerClass::Primary => write!(f, "primary"),
            ServerClass::Secondary => write!(f, "secondary"),
        }
    }
}

/// Per-class upgrade counters, recomputed from live pods on every pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgress {
    pub total: i32,
    pub upgraded: i32,
    pub in_progress: i32,
    pub pending: i32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct UpgradeProgress {
    pub primaries: NodeProgress,
    pub secondaries: NodeProgress,
}

/// One entry of the frozen upgrade order.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedServer {
    pub ordinal: i32,
    pub class: ServerClass,
}

/// A server whose pod was restarted and has not yet rejoined.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InFlightServer {
    pub ordinal: i32,
    pub started_at: String,
}

/// Rolling upgrade status, owned by the upgrade orchestrator.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStatus {
    #[serde(default)]
    pub phase: UpgradePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,

    pub target_version: String,

    #[serde(default)]
    pub progress: UpgradeProgress,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<PlannedServer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_flight: Vec<InFlightServer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// When every server was first seen upgraded and the post-upgrade gate
    /// started waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_check_since: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_resume_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_abort_token: Option<String>,
}

// ============================================================================
// Conditions
// ============================================================================

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Ready, ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new(
            ConditionType::Progressing,
            progressing,
            reason,
            message,
            generation,
        )
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Degraded, degraded, reason, message, generation)
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Types of conditions for Neo4jCluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// Cluster is fully operational and healthy.
    Ready,
    /// Reconciliation is moving the cluster toward its desired state.
    Progressing,
    /// Cluster is in a degraded state.
    Degraded,
    /// Servers disagree on cluster membership.
    SplitBrainDetected,
    /// A configuration change is waiting for its debounce window.
    ConfigurationPending,
    /// The pre-upgrade health gate is holding an upgrade.
    UpgradeBlocked,
    /// Servers run different images outside of an active upgrade.
    VersionSkew,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::Progressing => write!(f, "Progressing"),
            ConditionType::Degraded => write!(f, "Degraded"),
            ConditionType::SplitBrainDetected => write!(f, "SplitBrainDetected"),
            ConditionType::ConfigurationPending => write!(f, "ConfigurationPending"),
            ConditionType::UpgradeBlocked => write!(f, "UpgradeBlocked"),
            ConditionType::VersionSkew => write!(f, "VersionSkew"),
        }
    }
}

/// Bolt port served by every Neo4j server.
pub const BOLT_PORT: i32 = 7687;

/// HTTP port, also used for administrative queries.
pub const HTTP_PORT: i32 = 7474;

/// Cluster port, carrying discovery and intra-cluster transactions.
pub const CLUSTER_PORT: i32 = 6000;

/// Raft consensus port.
pub const RAFT_PORT: i32 = 7000;
