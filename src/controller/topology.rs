//! Topology scheduler.
//!
//! Pure functions, no I/O. Turns (server count, role hints, global mode
//! constraint) into a validated per-server topology, and renders the
//! configuration payload the servers boot with. Rendering is deterministic:
//! every map is a `BTreeMap` and every list is sorted, so identical inputs
//! always hash identically. The drift manager depends on that; a single
//! unstable byte would restart the cluster on every reconcile.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::controller::common::pod_name;
use crate::crd::{CLUSTER_PORT, ModeConstraint, ServerRoleHint, ServerStatus};

/// neo4j.conf key holding a server's mode constraint.
pub const MODE_CONSTRAINT_KEY: &str = "initial.server.mode_constraint";
/// neo4j.conf key holding the cluster-formation quorum.
pub const QUORUM_KEY: &str = "dbms.cluster.minimum_initial_system_primaries_count";
pub const ENDPOINTS_KEY: &str = "dbms.cluster.endpoints";
pub const RESOLVER_KEY: &str = "dbms.cluster.discovery.resolver_type";
pub const DISCOVERY_VERSION_KEY: &str = "dbms.cluster.discovery.version";

/// Keys the operator owns; user config may not set them.
pub const RESERVED_KEYS: &[&str] = &[
    MODE_CONSTRAINT_KEY,
    QUORUM_KEY,
    ENDPOINTS_KEY,
    RESOLVER_KEY,
    DISCOVERY_VERSION_KEY,
    "server.default_advertised_address",
    "server.cluster.advertised_address",
    "server.cluster.raft.advertised_address",
];

/// Shared configuration file name.
pub const SHARED_CONFIG_FILE: &str = "neo4j.conf";

/// Per-server configuration file name.
pub fn server_config_file(ordinal: i32) -> String {
    format!("server-{ordinal}.conf")
}

/// Deployment kind, resolved once per reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentRef {
    /// Two or more servers forming a cluster.
    Cluster { servers: i32, quorum: i32 },
    /// A single server without discovery.
    Standalone,
}

impl DeploymentRef {
    pub fn servers(&self) -> i32 {
        match self {
            DeploymentRef::Cluster { servers, .. } => *servers,
            DeploymentRef::Standalone => 1,
        }
    }
}

/// Validated topology, consumed by the resource builders and the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTopology {
    pub deployment: DeploymentRef,
    /// Effective constraint per ordinal.
    pub constraints: Vec<ModeConstraint>,
}

impl ValidatedTopology {
    pub fn servers(&self) -> i32 {
        self.deployment.servers()
    }

    pub fn constraint_of(&self, ordinal: i32) -> ModeConstraint {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.constraints.get(i))
            .copied()
            .unwrap_or_default()
    }

    pub fn server_statuses(&self) -> Vec<ServerStatus> {
        self.constraints
            .iter()
            .zip(0..)
            .map(|(mode, ordinal)| ServerStatus {
                ordinal,
                mode_constraint: *mode,
            })
            .collect()
    }
}

/// Validate role hints and compute effective constraints.
///
/// Collects every violation instead of stopping at the first.
pub fn validate_role_hints(
    servers: i32,
    global: ModeConstraint,
    hints: &[ServerRoleHint],
) -> Result<Vec<ModeConstraint>, Vec<String>> {
    let mut violations = Vec::new();
    let mut seen = BTreeSet::new();
    let mut parsed = Vec::with_capacity(hints.len());

    for (i, hint) in hints.iter().enumerate() {
        let idx = hint.server_index;
        if idx < 0 || idx >= servers {
            violations.push(format!(
                "serverRoleHints[{i}]: serverIndex {idx} is outside [0, {}]",
                servers - 1
            ));
        } else if !seen.insert(idx) {
            violations.push(format!(
                "serverRoleHints[{i}]: serverIndex {idx} is repeated"
            ));
        }

        match hint.mode_constraint.parse::<ModeConstraint>() {
            Ok(mode) => parsed.push((idx, mode)),
            Err(e) => violations.push(format!("serverRoleHints[{i}]: {e}")),
        }
    }

    let constraints = effective_constraints(servers, global, &parsed);
    if servers > 0 && !constraints.iter().any(|c| c.allows_primary()) {
        violations.push(format!(
            "all {servers} servers are constrained to SECONDARY; at least one must be able to host primaries"
        ));
    }

    if violations.is_empty() {
        Ok(constraints)
    } else {
        Err(violations)
    }
}

/// Effective constraint per server: an explicit hint wins, otherwise the
/// global constraint applies. Out-of-range hints are ignored; for repeated
/// indices the first hint wins.
pub fn effective_constraints(
    servers: i32,
    global: ModeConstraint,
    hints: &[(i32, ModeConstraint)],
) -> Vec<ModeConstraint> {
    (0..servers.max(0))
        .map(|ordinal| {
            hints
                .iter()
                .find(|(idx, _)| *idx == ordinal)
                .map_or(global, |(_, mode)| *mode)
        })
        .collect()
}

/// Servers required before the system database forms: a majority of the
/// cluster, bounded by how many servers may host primaries.
pub fn formation_quorum(servers: i32, primary_eligible: i32) -> i32 {
    (servers / 2 + 1).min(primary_eligible).max(1)
}

/// Resolve the deployment kind for a validated constraint list.
pub fn resolve_deployment(constraints: &[ModeConstraint]) -> DeploymentRef {
    let servers = i32::try_from(constraints.len()).unwrap_or(i32::MAX);
    if servers <= 1 {
        return DeploymentRef::Standalone;
    }
    let eligible = i32::try_from(constraints.iter().filter(|c| c.allows_primary()).count())
        .unwrap_or(i32::MAX);
    DeploymentRef::Cluster {
        servers,
        quorum: formation_quorum(servers, eligible),
    }
}

/// Rendered configuration files plus their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedConfig {
    pub files: BTreeMap<String, String>,
    pub hash: String,
}

/// Inputs to configuration rendering that are not part of the topology.
#[derive(Debug, Clone, Copy)]
pub struct RenderInputs<'a> {
    pub cluster_name: &'a str,
    pub namespace: &'a str,
    pub user_config: &'a BTreeMap<String, String>,
    pub restart_trigger: Option<&'a str>,
}

/// Render the configuration for every server.
pub fn derive_config(topology: &ValidatedTopology, inputs: RenderInputs<'_>) -> DerivedConfig {
    let mut shared: BTreeMap<String, String> = inputs.user_config.clone();

    match topology.deployment {
        DeploymentRef::Cluster { servers, quorum } => {
            let endpoints = (0..servers)
                .map(|i| {
                    format!(
                        "{}.{}-headless.{}.svc.cluster.local:{}",
                        pod_name(inputs.cluster_name, i),
                        inputs.cluster_name,
                        inputs.namespace,
                        CLUSTER_PORT
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            shared.insert(ENDPOINTS_KEY.to_string(), endpoints);
            shared.insert(RESOLVER_KEY.to_string(), "LIST".to_string());
            shared.insert(DISCOVERY_VERSION_KEY.to_string(), "V2_ONLY".to_string());
            shared.insert(QUORUM_KEY.to_string(), quorum.to_string());
        }
        DeploymentRef::Standalone => {}
    }

    let mut files = BTreeMap::new();
    files.insert(
        SHARED_CONFIG_FILE.to_string(),
        render_properties(&shared, inputs.restart_trigger),
    );
    for (ordinal, mode) in (0..).zip(topology.constraints.iter()) {
        let mut per_server = BTreeMap::new();
        per_server.insert(MODE_CONSTRAINT_KEY.to_string(), mode.to_string());
        files.insert(
            server_config_file(ordinal),
            render_properties(&per_server, None),
        );
    }

    let hash = config_hash(&files);
    DerivedConfig { files, hash }
}

fn render_properties(settings: &BTreeMap<String, String>, restart_trigger: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(trigger) = restart_trigger {
        let _ = writeln!(out, "# restart-requested-at={trigger}");
    }
    for (key, value) in settings {
        let _ = writeln!(out, "{key}={value}");
    }
    out
}

/// SHA-256 over file names and contents in key order.
pub fn config_hash(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Everything the resource builders need for one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetManifest {
    pub deployment: DeploymentRef,
    pub replicas: i32,
    /// Full image reference for the StatefulSet template.
    pub image: String,
    pub config_files: BTreeMap<String, String>,
    pub config_hash: String,
}

impl TargetManifest {
    pub fn new(topology: &ValidatedTopology, image: String, config: DerivedConfig) -> Self {
        Self {
            deployment: topology.deployment,
            replicas: topology.servers(),
            image,
            config_files: config.files,
            config_hash: config.hash,
        }
    }
}
