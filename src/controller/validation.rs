//! Spec validation.
//!
//! Every rule runs and every violation is reported, so a user fixing a spec
//! sees the whole list at once instead of one error per edit.

use std::sync::LazyLock;

use kube::ResourceExt;
use semver::Version;

use crate::controller::error::{Error, Result};
use crate::controller::topology::{
    RESERVED_KEYS, ValidatedTopology, resolve_deployment, validate_role_hints,
};
use crate::crd::{Neo4jCluster, Neo4jClusterSpec};

/// Maximum name length to leave room for the `-headless` suffix.
pub const MAX_NAME_LENGTH: usize = 53;

pub const MAX_SERVERS: i32 = 64;

/// Validate a cluster and resolve its topology.
///
/// `running_version` is the version the cluster currently runs, used to
/// reject downgrades.
pub fn validate_cluster(
    cluster: &Neo4jCluster,
    running_version: Option<&str>,
) -> Result<ValidatedTopology> {
    let mut violations = Vec::new();

    let name = cluster.name_any();
    if name.len() > MAX_NAME_LENGTH {
        violations.push(format!(
            "name '{name}' exceeds maximum length of {MAX_NAME_LENGTH} characters"
        ));
    }

    match validate_spec(&cluster.spec, running_version) {
        Ok(topology) if violations.is_empty() => Ok(topology),
        Ok(_) => Err(Error::Validation(violations)),
        Err(Error::Validation(more)) => {
            violations.extend(more);
            Err(Error::Validation(violations))
        }
        Err(e) => Err(e),
    }
}

/// Validate a spec and resolve its topology.
pub fn validate_spec(
    spec: &Neo4jClusterSpec,
    running_version: Option<&str>,
) -> Result<ValidatedTopology> {
    let mut violations = Vec::new();

    if spec.servers < 1 {
        violations.push(format!("servers must be at least 1, got {}", spec.servers));
    } else if spec.servers > MAX_SERVERS {
        violations.push(format!(
            "servers {} exceeds maximum {MAX_SERVERS}",
            spec.servers
        ));
    }

    let constraints = match validate_role_hints(
        spec.servers.clamp(0, MAX_SERVERS),
        spec.mode_constraint,
        &spec.server_role_hints,
    ) {
        Ok(constraints) => Some(constraints),
        Err(hint_violations) => {
            violations.extend(hint_violations);
            None
        }
    };

    if spec.upgrade_strategy.max_unavailable < 1 {
        violations.push(format!(
            "upgradeStrategy.maxUnavailable must be at least 1, got {}",
            spec.upgrade_strategy.max_unavailable
        ));
    }
    if spec.upgrade_strategy.step_timeout_seconds == 0 {
        violations.push("upgradeStrategy.stepTimeoutSeconds must be positive".to_string());
    }

    for key in spec.config.keys() {
        if !is_valid_config_key(key) {
            violations.push(format!(
                "config key '{key}' must match ^[a-z][a-z0-9_.]*$"
            ));
        } else if RESERVED_KEYS.contains(&key.as_str()) {
            violations.push(format!("config key '{key}' is managed by the operator"));
        }
    }

    if spec.image.tag.is_empty() {
        violations.push("image.tag must not be empty".to_string());
    } else if let Some(running) = running_version
        && is_downgrade(running, &spec.image.tag)
    {
        violations.push(format!(
            "downgrade from {running} to {} is not supported",
            spec.image.tag
        ));
    }

    if !is_valid_storage_size(&spec.storage.size) {
        violations.push(format!(
            "invalid storage size '{}'. Expected <number><unit> where unit is Ki, Mi, Gi, Ti, Pi, or Ei (e.g., 10Gi)",
            spec.storage.size
        ));
    }
    if !is_valid_cpu(&spec.resources.cpu) {
        violations.push(format!(
            "invalid CPU '{}'. Expected <number>m or <decimal> (e.g., 500m, 1)",
            spec.resources.cpu
        ));
    }
    if !is_valid_memory(&spec.resources.memory) {
        violations.push(format!(
            "invalid memory '{}'. Expected <number><unit> where unit is Ki, Mi, Gi, or Ti (e.g., 2Gi)",
            spec.resources.memory
        ));
    }

    if let Some(auth) = &spec.auth
        && (auth.secret_ref.name.is_empty() || auth.secret_ref.key.is_empty())
    {
        violations.push("auth.secretRef requires both name and key".to_string());
    }

    match constraints {
        Some(constraints) if violations.is_empty() => Ok(ValidatedTopology {
            deployment: resolve_deployment(&constraints),
            constraints,
        }),
        _ => Err(Error::Validation(violations)),
    }
}

fn is_valid_config_key(key: &str) -> bool {
    static KEY_RE: LazyLock<Option<regex::Regex>> =
        LazyLock::new(|| regex::Regex::new(r"^[a-z][a-z0-9_.]*$").ok());
    KEY_RE.as_ref().is_some_and(|re| re.is_match(key))
}

fn is_valid_storage_size(size: &str) -> bool {
    static STORAGE_RE: LazyLock<Option<regex::Regex>> =
        LazyLock::new(|| regex::Regex::new(r"^([0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei)?$").ok());
    STORAGE_RE.as_ref().is_some_and(|re| re.is_match(size))
}

fn is_valid_cpu(cpu: &str) -> bool {
    static CPU_RE: LazyLock<Option<regex::Regex>> =
        LazyLock::new(|| regex::Regex::new(r"^([0-9]+m?|[0-9]*\.[0-9]+)$").ok());
    CPU_RE.as_ref().is_some_and(|re| re.is_match(cpu))
}

fn is_valid_memory(memory: &str) -> bool {
    static MEMORY_RE: LazyLock<Option<regex::Regex>> =
        LazyLock::new(|| regex::Regex::new(r"^([0-9]+)(Ki|Mi|Gi|Ti)?$").ok());
    MEMORY_RE.as_ref().is_some_and(|re| re.is_match(memory))
}

/// Semver part of an image tag ("5.26-enterprise" -> 5.26.0).
pub fn extract_version(tag: &str) -> Option<Version> {
    let version_part = tag.split('-').next().unwrap_or(tag);
    let normalized = match version_part.matches('.').count() {
        0 => format!("{version_part}.0.0"),
        1 => format!("{version_part}.0"),
        _ => version_part.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Whether moving from `old_tag` to `new_tag` lowers the version.
///
/// Unparseable tags are never treated as a downgrade.
pub fn is_downgrade(old_tag: &str, new_tag: &str) -> bool {
    match (extract_version(old_tag), extract_version(new_tag)) {
        (Some(old), Some(new)) => new < old,
        _ => false,
    }
}
