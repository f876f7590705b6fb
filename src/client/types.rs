//! Types for live cluster state.
//!
//! These types represent what the operator observes about running servers:
//! pod state from the Kubernetes API and the parsed output of the Neo4j
//! administrative queries (`SHOW SERVERS`, `SHOW DATABASES`) issued over the
//! HTTP transactional endpoint.

use std::collections::BTreeSet;

use jiff::Timestamp;
use serde::Deserialize;
use thiserror::Error;

use crate::controller::common::extract_pod_name;

/// Errors that can occur when parsing admin query responses.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Query returned errors: {0}")]
    QueryFailed(String),
    #[error("Query returned no result set")]
    NoResult,
    #[error("Missing column: {0}")]
    MissingColumn(String),
}

/// A server pod as observed through the Kubernetes API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPod {
    /// Pod name, also the server identity (e.g. "graph-1").
    pub name: String,
    /// StatefulSet ordinal parsed from the name.
    pub ordinal: i32,
    /// Pod condition Ready=True.
    pub ready: bool,
    /// Last transition time of the Ready condition.
    pub ready_since: Option<Timestamp>,
    /// Image of the neo4j container.
    pub image: Option<String>,
    /// Value of the config-hash annotation the pod was created with.
    pub config_hash: Option<String>,
    /// Deletion timestamp is set.
    pub terminating: bool,
    /// Stable DNS name via the headless service.
    pub host: String,
}

impl ServerPod {
    /// Ready and not on its way out.
    pub fn is_serving(&self) -> bool {
        self.ready && !self.terminating
    }
}

/// One server's independent view of cluster membership.
///
/// Created fresh on every detection pass and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    /// Pod that answered.
    pub pod: String,
    /// Pods this server reports as available members, itself included.
    pub peers: BTreeSet<String>,
    pub observed_at: Timestamp,
}

/// A database hosted on a server, from `SHOW DATABASES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedDatabase {
    pub name: String,
    pub role: String,
    pub status: String,
}

impl HostedDatabase {
    pub fn is_primary(&self) -> bool {
        self.role.eq_ignore_ascii_case("primary")
    }
}

/// Response envelope of `POST /db/{db}/tx/commit`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
    #[serde(default)]
    pub errors: Vec<QueryError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<QueryRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRow {
    pub row: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryError {
    pub code: String,
    pub message: String,
}

impl QueryResponse {
    /// First result set, or the reported errors.
    pub fn into_result(self) -> Result<QueryResult, ParseError> {
        if !self.errors.is_empty() {
            let joined = self
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ParseError::QueryFailed(joined));
        }
        self.results.into_iter().next().ok_or(ParseError::NoResult)
    }
}

impl QueryResult {
    fn column(&self, name: &str) -> Result<usize, ParseError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ParseError::MissingColumn(name.to_string()))
    }

    /// String values of one column, row by row. Non-string cells become "".
    pub fn strings(&self, name: &str) -> Result<Vec<String>, ParseError> {
        let idx = self.column(name)?;
        Ok(self
            .data
            .iter()
            .map(|r| {
                r.row
                    .get(idx)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect())
    }
}

/// Build a membership view from a `SHOW SERVERS YIELD address, health` result.
///
/// Only servers reported as `Available` count as peers. The answering pod is
/// always a member of its own view.
pub fn parse_server_view(
    pod: &str,
    result: &QueryResult,
    observed_at: Timestamp,
) -> Result<MembershipView, ParseError> {
    let addresses = result.strings("address")?;
    let health = result.strings("health")?;

    let mut peers: BTreeSet<String> = addresses
        .iter()
        .zip(health.iter())
        .filter(|(_, h)| h.eq_ignore_ascii_case("available"))
        .map(|(a, _)| extract_pod_name(a))
        .filter(|p| p != "unknown")
        .collect();
    peers.insert(pod.to_string());

    Ok(MembershipView {
        pod: pod.to_string(),
        peers,
        observed_at,
    })
}

/// Databases hosted by `pod`, from a `SHOW DATABASES YIELD name, address, role, currentStatus` result.
pub fn parse_hosted_databases(
    pod: &str,
    result: &QueryResult,
) -> Result<Vec<HostedDatabase>, ParseError> {
    let names = result.strings("name")?;
    let addresses = result.strings("address")?;
    let roles = result.strings("role")?;
    let statuses = result.strings("currentStatus")?;

    Ok(names
        .into_iter()
        .zip(addresses)
        .zip(roles.into_iter().zip(statuses))
        .filter(|((_, address), _)| extract_pod_name(address) == pod)
        .map(|((name, _), (role, status))| HostedDatabase { name, role, status })
        .collect())
}
