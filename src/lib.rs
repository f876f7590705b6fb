//! neo4j-operator library crate
//!
//! This module exports the controller, CRD definitions, resource generators,
//! and the reconciliation and consistency engine they drive.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use client::{HttpAdminClient, KubeStore};
use controller::context::Context;
use controller::error::Result;
use controller::reconciler::{error_policy, reconcile};
use crd::Neo4jCluster;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Change key for a cluster object: its generation plus its annotations.
///
/// Status writes are filtered out, but a restart, resume, or abort
/// annotation (which does not bump the generation) still triggers a pass.
pub fn spec_or_annotation_change(cluster: &Neo4jCluster) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    cluster.meta().generation.hash(&mut hasher);
    cluster.annotations().hash(&mut hasher);
    Some(hasher.finish())
}

/// Create a filtered stream for the cluster resource.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates
fn create_filtered_stream(
    api: Api<Neo4jCluster>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<Neo4jCluster>,
    impl Stream<Item = std::result::Result<Neo4jCluster, watcher::Error>>,
) {
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(spec_or_annotation_change);
    (reader, stream)
}

/// Run the operator controller (cluster-wide).
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) -> Result<()> {
    run_controller_scoped(client, config, health_state, None).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
pub async fn run_controller_scoped(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) -> Result<()> {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        scope = scope_msg,
        workers = config.worker_concurrency,
        "Starting controller for Neo4jCluster resources"
    );

    let store = Arc::new(KubeStore::new(client.clone(), config.api_timeout));
    let probe = Arc::new(HttpAdminClient::new(config.probe_timeout)?);
    let concurrency = config.worker_concurrency;

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(store, probe, config, health_state));

    let clusters: Api<Neo4jCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // Services and ConfigMaps only need to be noticed, so watch metadata.
    Controller::for_stream(cluster_stream, reader)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(name = %obj.name, "Reconciled");
                }
                Err(e) => {
                    // Watch events for a just-deleted cluster still trigger a pass.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!(error = ?e, "Object no longer exists");
                    } else {
                        error!(error = ?e, "Reconciliation error");
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
    Ok(())
}
