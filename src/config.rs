//! Operator-wide configuration.
//!
//! Every tunable is read from a `NEO4J_OPERATOR_*` environment variable with
//! a typed default. The three consistency tunables can additionally be
//! overridden per cluster through `spec.consistency`.

use std::time::Duration;

use thiserror::Error;

use crate::client::RetryPolicy;
use crate::crd::ConsistencySpec;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Runtime settings for the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Periodic resync for healthy clusters.
    pub resync_interval: Duration,
    /// Deadline for each Kubernetes API call.
    pub api_timeout: Duration,
    /// Deadline for each per-pod admin query.
    pub probe_timeout: Duration,
    /// Maximum concurrent admin queries within one detection pass.
    pub probe_concurrency: usize,
    pub split_brain_grace: Duration,
    pub repair_cooldown: Duration,
    pub config_debounce: Duration,
    /// Attempts for read-modify-write before giving up.
    pub conflict_retry_attempts: u32,
    pub conflict_retry_base_delay: Duration,
    /// Clusters reconciled in parallel.
    pub worker_concurrency: u16,
    pub health_port: u16,
    /// Time given to in-flight passes after a shutdown signal.
    pub shutdown_grace: Duration,
    pub leader_election: LeaderElectionConfig,
}

/// Lease used to elect the single active replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    /// Namespace holding the Lease, normally the operator's own.
    pub lease_namespace: String,
    /// Holder identity; the hostname when `POD_NAME` is unset.
    pub holder_id: Option<String>,
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            lease_name: "neo4j-operator-leader".to_string(),
            lease_namespace: "default".to_string(),
            holder_id: None,
            lease_ttl: Duration::from_secs(15),
            renew_interval: Duration::from_secs(5),
        }
    }
}

impl LeaderElectionConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            lease_name: lookup("NEO4J_OPERATOR_LEASE_NAME").unwrap_or(defaults.lease_name),
            lease_namespace: lookup("POD_NAMESPACE").unwrap_or(defaults.lease_namespace),
            holder_id: lookup("POD_NAME").filter(|name| !name.is_empty()),
            lease_ttl: secs(lookup, "NEO4J_OPERATOR_LEASE_TTL_SECONDS", defaults.lease_ttl)?,
            renew_interval: secs(
                lookup,
                "NEO4J_OPERATOR_LEASE_RENEW_SECONDS",
                defaults.renew_interval,
            )?,
        };
        if config.renew_interval.is_zero() || config.renew_interval >= config.lease_ttl {
            return Err(ConfigError {
                key: "NEO4J_OPERATOR_LEASE_RENEW_SECONDS".to_string(),
                value: config.renew_interval.as_secs().to_string(),
                reason: format!(
                    "must be positive and shorter than the {}s lease",
                    config.lease_ttl.as_secs()
                ),
            });
        }
        Ok(config)
    }

    /// Identity written into the Lease.
    pub fn holder_id(&self) -> String {
        self.holder_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "neo4j-operator".to_string())
        })
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(45),
            api_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            probe_concurrency: 8,
            split_brain_grace: Duration::from_secs(180),
            repair_cooldown: Duration::from_secs(300),
            config_debounce: Duration::from_secs(120),
            conflict_retry_attempts: 5,
            conflict_retry_base_delay: Duration::from_millis(100),
            worker_concurrency: 4,
            health_port: 8080,
            shutdown_grace: Duration::from_secs(5),
            leader_election: LeaderElectionConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            resync_interval: secs(&lookup, "NEO4J_OPERATOR_RESYNC_SECONDS", defaults.resync_interval)?,
            api_timeout: secs(&lookup, "NEO4J_OPERATOR_API_TIMEOUT_SECONDS", defaults.api_timeout)?,
            probe_timeout: secs(
                &lookup,
                "NEO4J_OPERATOR_PROBE_TIMEOUT_SECONDS",
                defaults.probe_timeout,
            )?,
            probe_concurrency: parse(
                &lookup,
                "NEO4J_OPERATOR_PROBE_CONCURRENCY",
                defaults.probe_concurrency,
            )?
            .max(1),
            split_brain_grace: secs(
                &lookup,
                "NEO4J_OPERATOR_SPLIT_BRAIN_GRACE_SECONDS",
                defaults.split_brain_grace,
            )?,
            repair_cooldown: secs(
                &lookup,
                "NEO4J_OPERATOR_REPAIR_COOLDOWN_SECONDS",
                defaults.repair_cooldown,
            )?,
            config_debounce: secs(
                &lookup,
                "NEO4J_OPERATOR_CONFIG_DEBOUNCE_SECONDS",
                defaults.config_debounce,
            )?,
            conflict_retry_attempts: parse(
                &lookup,
                "NEO4J_OPERATOR_CONFLICT_RETRY_ATTEMPTS",
                defaults.conflict_retry_attempts,
            )?
            .max(1),
            conflict_retry_base_delay: Duration::from_millis(parse(
                &lookup,
                "NEO4J_OPERATOR_CONFLICT_RETRY_BASE_DELAY_MS",
                100u64,
            )?),
            worker_concurrency: parse(
                &lookup,
                "NEO4J_OPERATOR_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?
            .max(1),
            health_port: parse(&lookup, "NEO4J_OPERATOR_HEALTH_PORT", defaults.health_port)?,
            shutdown_grace: secs(
                &lookup,
                "NEO4J_OPERATOR_SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace,
            )?,
            leader_election: LeaderElectionConfig::from_lookup(&lookup)?,
        })
    }

    /// Backoff for read-modify-write of the cluster object.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.conflict_retry_attempts,
            base_delay: self.conflict_retry_base_delay,
            ..RetryPolicy::default()
        }
    }

    /// Consistency tunables for one cluster, honouring its spec overrides.
    pub fn tunables_for(&self, overrides: &ConsistencySpec) -> ConsistencyTunables {
        ConsistencyTunables {
            split_brain_grace: overrides
                .split_brain_grace_seconds
                .map_or(self.split_brain_grace, Duration::from_secs),
            repair_cooldown: overrides
                .repair_cooldown_seconds
                .map_or(self.repair_cooldown, Duration::from_secs),
            config_debounce: overrides
                .config_debounce_seconds
                .map_or(self.config_debounce, Duration::from_secs),
        }
    }
}

/// Resolved per-cluster timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsistencyTunables {
    pub split_brain_grace: Duration,
    pub repair_cooldown: Duration,
    pub config_debounce: Duration,
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}
