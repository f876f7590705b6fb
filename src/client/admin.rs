//! Administrative queries against individual Neo4j servers.
//!
//! Each server is queried on its own HTTP endpoint so the answer reflects
//! that server's independent view of the cluster, never a routed one.

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use tracing::debug;

use crate::client::types::{
    HostedDatabase, MembershipView, QueryResponse, parse_hosted_databases, parse_server_view,
};
use crate::controller::error::{Error, Result};
use crate::crd::HTTP_PORT;

const SHOW_SERVERS: &str = "SHOW SERVERS YIELD name, address, state, health";
const SHOW_DATABASES: &str = "SHOW DATABASES YIELD name, address, role, currentStatus";

/// Basic-auth credentials for the `neo4j` user.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single server to query.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub pod: String,
    pub host: String,
    pub credentials: Option<Credentials>,
}

/// The administrative interface the consistency engine depends on.
#[async_trait]
pub trait MembershipProbe: Send + Sync {
    /// Cluster members as seen by this server.
    async fn server_view(&self, target: &ProbeTarget) -> Result<MembershipView>;

    /// Databases and roles currently hosted by this server.
    async fn hosted_databases(&self, target: &ProbeTarget) -> Result<Vec<HostedDatabase>>;
}

/// `MembershipProbe` over the Neo4j HTTP transactional API.
#[derive(Clone)]
pub struct HttpAdminClient {
    http: reqwest::Client,
    port: i32,
}

impl HttpAdminClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Transient(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            port: HTTP_PORT,
        })
    }

    async fn run(&self, target: &ProbeTarget, statement: &str) -> Result<QueryResponse> {
        let url = format!("http://{}:{}/db/system/tx/commit", target.host, self.port);
        debug!(pod = %target.pod, statement, "Running admin query");

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "statements": [{ "statement": statement }]
            }));
        if let Some(creds) = &target.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let failed = |e: reqwest::Error| Error::AdminQuery {
            pod: target.pod.clone(),
            message: e.to_string(),
        };

        request
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?
            .json::<QueryResponse>()
            .await
            .map_err(failed)
    }
}

#[async_trait]
impl MembershipProbe for HttpAdminClient {
    async fn server_view(&self, target: &ProbeTarget) -> Result<MembershipView> {
        let result = self
            .run(target, SHOW_SERVERS)
            .await?
            .into_result()
            .map_err(|e| Error::AdminQuery {
                pod: target.pod.clone(),
                message: e.to_string(),
            })?;
        parse_server_view(&target.pod, &result, Timestamp::now()).map_err(|e| Error::AdminQuery {
            pod: target.pod.clone(),
            message: e.to_string(),
        })
    }

    async fn hosted_databases(&self, target: &ProbeTarget) -> Result<Vec<HostedDatabase>> {
        let result = self
            .run(target, SHOW_DATABASES)
            .await?
            .into_result()
            .map_err(|e| Error::AdminQuery {
                pod: target.pod.clone(),
                message: e.to_string(),
            })?;
        parse_hosted_databases(&target.pod, &result).map_err(|e| Error::AdminQuery {
            pod: target.pod.clone(),
            message: e.to_string(),
        })
    }
}
