//! Cluster state store client.
//!
//! The reconciler only talks to Kubernetes through the `ClusterStore` trait,
//! which keeps every reconcile a function of (object snapshot, injected
//! clients) and lets tests substitute an in-memory store. `KubeStore` is the
//! production implementation on top of `kube::Api`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::client::types::ServerPod;
use crate::controller::common::{extract_ordinal, pod_host};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::controller::topology::TargetManifest;
use crate::crd::Neo4jCluster;
use crate::resources::{
    CONFIG_HASH_ANNOTATION, common, configmap, pod_selector_labels, services, statefulset,
};

/// Severity of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// A structured event about a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub severity: EventSeverity,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

impl EventRecord {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }
}

/// Versioned object store consumed by the reconciler.
///
/// Writes of the cluster object carry the `resourceVersion` of the snapshot
/// they were derived from and fail with [`Error::Conflict`] when it is stale.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch the latest cluster object; `None` if it no longer exists.
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Neo4jCluster>>;

    /// Replace metadata/spec of the cluster object.
    async fn replace_cluster(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster>;

    /// Replace the status subresource of the cluster object.
    async fn replace_status(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster>;

    /// Apply every child resource described by the manifest.
    async fn apply_manifest(&self, cluster: &Neo4jCluster, manifest: &TargetManifest)
    -> Result<()>;

    /// Server pods of the cluster, sorted by ordinal.
    async fn list_server_pods(&self, cluster: &Neo4jCluster) -> Result<Vec<ServerPod>>;

    /// Delete a pod. Succeeds if it is already gone.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Read one key of a Secret; `None` if the secret or key is missing.
    async fn read_secret(&self, namespace: &str, name: &str, key: &str)
    -> Result<Option<String>>;

    /// Publish an event. Failures are logged, never returned.
    async fn publish_event(&self, cluster: &Neo4jCluster, event: EventRecord);
}

/// `ClusterStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
    timeout: Duration,
}

impl KubeStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            timeout,
        }
    }

    /// Run one API call under the configured deadline.
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(kube::Error::Api(ae))) if ae.code == 409 => {
                Err(Error::Conflict(operation.to_string()))
            }
            Ok(Err(e)) => Err(Error::Kube(e)),
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                after: self.timeout,
            }),
        }
    }

    async fn apply<K>(&self, api: &Api<K>, name: &str, object: &K) -> Result<()>
    where
        K: Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
    {
        self.call(
            &format!("apply {name}"),
            api.patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            ),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Neo4jCluster>> {
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), namespace);
        self.call(&format!("get {namespace}/{name}"), api.get_opt(name))
            .await
    }

    async fn replace_cluster(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), &namespace);
        self.call(
            &format!("replace {namespace}/{name}"),
            api.replace(&name, &PostParams::default(), cluster),
        )
        .await
    }

    async fn replace_status(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), &namespace);
        let body = serde_json::to_vec(cluster)?;
        self.call(
            &format!("replace status {namespace}/{name}"),
            api.replace_status(&name, &PostParams::default(), body),
        )
        .await
    }

    async fn apply_manifest(
        &self,
        cluster: &Neo4jCluster,
        manifest: &TargetManifest,
    ) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();

        let cm_api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        let config = configmap::generate_configmap(cluster, manifest);
        self.apply(&cm_api, &common::config_map_name(cluster), &config)
            .await?;

        let svc_api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let headless = services::generate_headless_service(cluster);
        self.apply(&svc_api, &common::headless_service_name(cluster), &headless)
            .await?;
        let client_svc = services::generate_client_service(cluster);
        self.apply(&svc_api, &common::client_service_name(cluster), &client_svc)
            .await?;

        let sts_api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
        let sts = statefulset::generate_statefulset(cluster, manifest);
        self.apply(&sts_api, &name, &sts).await?;

        debug!(name = %name, hash = %manifest.config_hash, "Applied child resources");
        Ok(())
    }

    async fn list_server_pods(&self, cluster: &Neo4jCluster) -> Result<Vec<ServerPod>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let selector = pod_selector_labels(cluster)
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods = self
            .call(
                &format!("list pods {namespace}/{}", cluster.name_any()),
                api.list(&ListParams::default().labels(&selector)),
            )
            .await?;

        let mut servers: Vec<ServerPod> = pods
            .items
            .iter()
            .filter_map(|pod| server_pod_from(cluster, pod))
            .collect();
        servers.sort_by_key(|p| p.ordinal);
        Ok(servers)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match self
            .call(
                &format!("delete pod {namespace}/{name}"),
                api.delete(name, &DeleteParams::default()),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = self
            .call(&format!("get secret {namespace}/{name}"), api.get_opt(name))
            .await?
        else {
            warn!(secret = %name, "Auth secret not found");
            return Ok(None);
        };

        let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) else {
            warn!(secret = %name, key = %key, "Password key not found in secret");
            return Ok(None);
        };
        String::from_utf8(bytes.0.clone())
            .map(Some)
            .map_err(|e| Error::Validation(vec![format!("secret {name}/{key} is not UTF-8: {e}")]))
    }

    async fn publish_event(&self, cluster: &Neo4jCluster, event: EventRecord) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let object_ref = cluster.object_ref(&());
        let type_ = match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: event.note,
                    action: event.action,
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}

/// Convert a pod into the server view the engine reasons about.
fn server_pod_from(cluster: &Neo4jCluster, pod: &Pod) -> Option<ServerPod> {
    let name = pod.metadata.name.clone()?;
    let ordinal = extract_ordinal(&name)?;

    let ready_condition = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"));
    let ready = ready_condition.is_some_and(|c| c.status == "True");
    let ready_since = ready_condition
        .and_then(|c| c.last_transition_time.as_ref())
        .and_then(|t| {
            jiff::Timestamp::new(t.0.timestamp(), t.0.timestamp_subsec_nanos() as i32).ok()
        });

    let image = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.iter().find(|c| c.name == statefulset::CONTAINER_NAME))
        .and_then(|c| c.image.clone());

    Some(ServerPod {
        host: pod_host(cluster, &name),
        name,
        ordinal,
        ready,
        ready_since,
        image,
        config_hash: pod.annotations().get(CONFIG_HASH_ANNOTATION).cloned(),
        terminating: pod.metadata.deletion_timestamp.is_some(),
    })
}
