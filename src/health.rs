//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Clusters by lifecycle phase
    pub clusters_total: Family<PhaseLabels, Gauge>,
    /// Declared servers per cluster
    pub cluster_servers_desired: Family<ReconcileLabels, Gauge>,
    /// Ready servers per cluster
    pub cluster_servers_ready: Family<ReconcileLabels, Gauge>,
    /// Passes that newly classified a cluster as split
    pub split_brain_detections_total: Family<ReconcileLabels, Counter>,
    /// Minority restarts issued to repair a split
    pub split_brain_repairs_total: Family<ReconcileLabels, Counter>,
    /// Configuration hashes applied
    pub config_applies_total: Family<ReconcileLabels, Counter>,
    /// Debounce windows opened or restarted
    pub config_debounces_total: Family<ReconcileLabels, Counter>,
    /// Last known phase of every cluster, used to derive `clusters_total`
    phases: Mutex<HashMap<ReconcileLabels, String>>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn labels(namespace: &str, name: &str) -> ReconcileLabels {
    ReconcileLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "neo4joperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let clusters_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "neo4joperator_clusters_total",
            "Total number of Neo4jCluster resources by phase",
            clusters_total.clone(),
        );

        let cluster_servers_desired = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "neo4joperator_cluster_servers_desired",
            "Declared number of servers for each cluster",
            cluster_servers_desired.clone(),
        );

        let cluster_servers_ready = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "neo4joperator_cluster_servers_ready",
            "Number of ready servers for each cluster",
            cluster_servers_ready.clone(),
        );

        let split_brain_detections_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_split_brain_detections",
            "Number of times a cluster was newly classified as split",
            split_brain_detections_total.clone(),
        );

        let split_brain_repairs_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_split_brain_repairs",
            "Number of minority restarts issued to repair a split",
            split_brain_repairs_total.clone(),
        );

        let config_applies_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_config_applies",
            "Number of configuration hashes applied",
            config_applies_total.clone(),
        );

        let config_debounces_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4joperator_config_debounces",
            "Number of configuration debounce windows opened",
            config_debounces_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters_total,
            cluster_servers_desired,
            cluster_servers_ready,
            split_brain_detections_total,
            split_brain_repairs_total,
            config_applies_total,
            config_debounces_total,
            phases: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = labels(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    pub fn record_split_brain(&self, namespace: &str, name: &str) {
        self.split_brain_detections_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    pub fn record_repair(&self, namespace: &str, name: &str) {
        self.split_brain_repairs_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    pub fn record_config_apply(&self, namespace: &str, name: &str) {
        self.config_applies_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    pub fn record_config_debounce(&self, namespace: &str, name: &str) {
        self.config_debounces_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    /// Record the phase of one cluster and refresh the per-phase totals.
    ///
    /// `None` forgets the cluster, e.g. once it is deleted.
    pub fn set_cluster_phase(&self, namespace: &str, name: &str, phase: Option<&str>) {
        let Ok(mut phases) = self.phases.lock() else {
            tracing::error!("Phase metrics lock poisoned");
            return;
        };
        match phase {
            Some(p) => {
                phases.insert(labels(namespace, name), p.to_string());
            }
            None => {
                phases.remove(&labels(namespace, name));
            }
        }

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for p in phases.values() {
            *counts.entry(p.as_str()).or_default() += 1;
        }
        self.clusters_total.clear();
        for (p, count) in counts {
            self.clusters_total
                .get_or_create(&PhaseLabels {
                    phase: p.to_string(),
                })
                .set(count);
        }
    }

    /// Update server count metrics
    pub fn set_cluster_servers(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = labels(namespace, name);
        self.cluster_servers_desired
            .get_or_create(&labels)
            .set(desired);
        self.cluster_servers_ready.get_or_create(&labels).set(ready);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Remember when a reconcile last succeeded.
    pub fn mark_reconciled(&self, epoch_secs: u64) {
        self.last_reconcile.store(epoch_secs, Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0 on `port` and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
