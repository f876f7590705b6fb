//! Reconciliation loop for Neo4jCluster.
//!
//! One pass, in order:
//!
//! 1. fetch the object; gone means already deleted
//! 2. deletion: run cleanup hooks, release the finalizer
//! 3. no finalizer: add it and requeue immediately
//! 4. validate and resolve the topology
//! 5. observe pods and classify membership
//! 6. evaluate configuration drift
//! 7. advance the rolling upgrade
//! 8. apply child resources unless the drift manager holds them back
//! 9. restarts: upgrade steps, configuration rollout, split-brain repair
//! 10. write status last, against a fresh read
//!
//! Every long wait is a requeue; nothing sleeps across passes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::client::{
    Credentials, HostedDatabase, ServerPod, update_metadata_with_retry, update_status_with_retry,
};
use crate::controller::{
    cluster_state_machine::{ClusterStateMachine, PhaseContext, TransitionResult, determine_phase},
    common::{
        RESTART_REQUESTED_ANNOTATION, UPGRADE_ABORT_ANNOTATION, UPGRADE_RESUME_ANNOTATION,
        add_finalizer, has_finalizer, remove_finalizer,
    },
    context::Context,
    drift::{self, DriftDecision},
    error::{Error, Result},
    split_brain::{self, Classification, DetectorSettings, RepairDecision},
    status::ConditionBuilder,
    topology::{RenderInputs, TargetManifest, ValidatedTopology, derive_config},
    upgrade::{self, AnnotationTokens, UpgradeObservation, UpgradeRequest, UpgradeStep},
    validation::validate_cluster,
};
use crate::crd::{
    BOLT_PORT, ClusterPhase, ConditionType, ConfigurationStatus, Endpoints, HTTP_PORT,
    MembershipHealth, MembershipStatus, Neo4jCluster, Neo4jClusterStatus, ReplicaStatus,
    UpgradePhase, UpgradeStatus,
};

/// Requeue used right after the finalizer is added.
const IMMEDIATE: Duration = Duration::ZERO;

/// Requeue while the cluster is moving towards its desired state.
const PROGRESS_REQUEUE: Duration = Duration::from_secs(10);

/// Admin username when the auth secret holds only a password.
const DEFAULT_USERNAME: &str = "neo4j";

/// Reconcile a Neo4jCluster
///
/// Adapts the controller runtime to [`reconcile_cluster`] and records
/// reconcile metrics.
pub async fn reconcile(obj: Arc<Neo4jCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    let span = info_span!("reconcile", name = %name, namespace = %namespace);
    let requeue = reconcile_cluster(&ctx, &namespace, &name)
        .instrument(span)
        .await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        health_state.mark_reconciled(u64::try_from(ctx.now().as_second()).unwrap_or(0));
    }

    Ok(requeue.map_or_else(Action::await_change, Action::requeue))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Neo4jCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// One reconcile pass for the cluster `namespace/name`.
///
/// Returns when to run again; `None` waits for the next watch event.
pub async fn reconcile_cluster(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Option<Duration>> {
    let Some(cluster) = ctx.store.get_cluster(namespace, name).await? else {
        debug!("Cluster no longer exists");
        if let Some(ref health_state) = ctx.health_state {
            health_state.metrics.set_cluster_phase(namespace, name, None);
        }
        return Ok(None);
    };

    if cluster.metadata.deletion_timestamp.is_some() {
        return handle_deletion(ctx, &cluster, namespace, name).await;
    }

    // Two-phase creation: nothing is created before the finalizer is visible.
    if !has_finalizer(&cluster) {
        info!("Adding finalizer");
        update_metadata_with_retry(
            ctx.store.as_ref(),
            namespace,
            name,
            ctx.config.retry_policy(),
            add_finalizer,
        )
        .await?;
        return Ok(Some(IMMEDIATE));
    }

    let now = ctx.now();
    let status = cluster.status.clone().unwrap_or_default();
    let running_version = status.version.as_deref();

    let topology = match validate_cluster(&cluster, running_version) {
        Ok(topology) => topology,
        Err(e @ Error::Validation(_)) => {
            return Err(record_validation_failure(ctx, &cluster, &status, e, now).await?);
        }
        Err(e) => return Err(e),
    };

    let pass = Pass {
        ctx,
        cluster: &cluster,
        namespace,
        name,
        status: &status,
        topology: &topology,
        now,
    };
    pass.run().await
}

/// State shared by the steps of one pass.
struct Pass<'a> {
    ctx: &'a Context,
    cluster: &'a Neo4jCluster,
    namespace: &'a str,
    name: &'a str,
    status: &'a Neo4jClusterStatus,
    topology: &'a ValidatedTopology,
    now: Timestamp,
}

impl Pass<'_> {
    async fn run(&self) -> Result<Option<Duration>> {
        let ctx = self.ctx;
        let cluster = self.cluster;
        let spec = &cluster.spec;
        let tunables = ctx.config.tunables_for(&spec.consistency);
        let annotation = |key: &str| cluster.annotations().get(key).map(String::as_str);

        // Observe
        let pods = ctx.store.list_server_pods(cluster).await?;
        let credentials = self.read_credentials().await?;
        let classification = split_brain::detect(
            ctx.probe.as_ref(),
            self.topology.deployment,
            &pods,
            credentials.as_ref(),
            &self.status.membership,
            self.now,
            DetectorSettings {
                probe_timeout: ctx.config.probe_timeout,
                concurrency: ctx.config.probe_concurrency,
                grace: tunables.split_brain_grace,
            },
        )
        .await;

        // Configuration drift
        let derived = derive_config(
            self.topology,
            RenderInputs {
                cluster_name: self.name,
                namespace: self.namespace,
                user_config: &spec.config,
                restart_trigger: annotation(RESTART_REQUESTED_ANNOTATION),
            },
        );
        let (drift, configuration) = drift::evaluate(
            &self.status.configuration,
            &derived.hash,
            self.now,
            tunables.config_debounce,
        );
        self.report_drift(&drift).await;

        // Rolling upgrade
        let tokens = AnnotationTokens {
            resume: annotation(UPGRADE_RESUME_ANNOTATION),
            abort: annotation(UPGRADE_ABORT_ANNOTATION),
        };
        let step = self
            .advance_upgrade(
                &pods,
                &classification,
                credentials.as_ref(),
                tokens,
                &drift,
            )
            .await;
        let upgrade_status = step.as_ref().map(|s| &s.status);

        // Apply
        let tag = upgrade::effective_tag(
            &spec.image.tag,
            self.status.version.as_deref(),
            upgrade_status,
            &spec.image,
            &pods,
        );
        let manifest = TargetManifest::new(self.topology, spec.image.reference_for(&tag), derived);
        if drift.permits_apply() {
            ctx.store.apply_manifest(cluster, &manifest).await?;
        } else {
            debug!("Configuration change pending, child resources left unchanged");
        }

        // Restarts
        if let Some(step) = &step {
            for pod in &step.restart {
                info!(pod = %pod, target = %step.status.target_version, "Restarting server for upgrade");
                ctx.store.delete_pod(self.namespace, pod).await?;
            }
            for event in &step.events {
                ctx.publish(cluster, event.clone()).await;
            }
        }

        let upgrade_holds_pods = upgrade_status.is_some_and(|u| u.phase.holds_pods());
        let repair = split_brain::plan_repair(
            &classification,
            &self.status.membership,
            upgrade_status,
            self.now,
            tunables.repair_cooldown,
        );
        let membership = self.repair_split_brain(&classification, &repair).await?;

        if drift.permits_apply()
            && !upgrade_holds_pods
            && classification.health != MembershipHealth::Split
            && let Some(applied) = configuration.last_applied_hash.as_deref()
            && let Some(pod) =
                drift::next_config_restart(&pods, self.topology.servers(), applied, &manifest.image)
        {
            info!(pod = %pod.name, "Restarting server to pick up configuration");
            ctx.store.delete_pod(self.namespace, &pod.name).await?;
            ctx.publish_normal_event(
                cluster,
                "ConfigurationRollout",
                "Restart",
                format!("Restarted {} to apply configuration", pod.name),
            )
            .await;
        }

        let skewed = if upgrade_holds_pods {
            Vec::new()
        } else {
            drift::version_skew(&pods, self.topology.servers(), &manifest.image)
        };
        if !skewed.is_empty() {
            debug!(pods = ?skewed, image = %manifest.image, "Servers run a different image");
        }

        // Status
        let outcome = Outcome {
            pods: &pods,
            classification: &classification,
            membership,
            configuration,
            drift: &drift,
            step: step.as_ref(),
            repair: &repair,
            skewed: &skewed,
            image: &manifest.image,
        };
        let (next_status, phase) = self.build_status(&outcome).await;
        update_status_with_retry(
            ctx.store.as_ref(),
            self.namespace,
            self.name,
            ctx.config.retry_policy(),
            |latest| {
                if latest.status.as_ref() == Some(&next_status) {
                    return false;
                }
                latest.status = Some(next_status.clone());
                true
            },
        )
        .await?;

        Ok(Some(self.requeue_after(phase, &drift, upgrade_status)))
    }

    async fn read_credentials(&self) -> Result<Option<Credentials>> {
        let Some(auth) = &self.cluster.spec.auth else {
            return Ok(None);
        };
        let secret = &auth.secret_ref;
        let value = self
            .ctx
            .store
            .read_secret(self.namespace, &secret.name, &secret.key)
            .await?;
        Ok(match value {
            Some(value) => {
                // NEO4J_AUTH style "user/password" or a bare password
                let (username, password) = value
                    .split_once('/')
                    .unwrap_or((DEFAULT_USERNAME, value.as_str()));
                Some(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            None => {
                warn!(
                    secret = %secret.name,
                    key = %secret.key,
                    "Auth secret or key missing, querying servers without credentials"
                );
                None
            }
        })
    }

    async fn report_drift(&self, drift: &DriftDecision) {
        let metrics = self.ctx.health_state.as_ref().map(|h| &h.metrics);
        match drift {
            DriftDecision::Debounce {
                hash,
                remaining,
                opened: true,
            } => {
                info!(hash = %short(hash), remaining = ?remaining, "Configuration change detected, debouncing");
                if let Some(m) = metrics {
                    m.record_config_debounce(self.namespace, self.name);
                }
                self.ctx
                    .publish_normal_event(
                        self.cluster,
                        "ConfigurationDriftDetected",
                        "Debounce",
                        format!(
                            "Configuration {} will be applied in {}s unless it changes again",
                            short(hash),
                            remaining.as_secs()
                        ),
                    )
                    .await;
            }
            DriftDecision::Apply { hash } => {
                info!(hash = %short(hash), "Applying configuration");
                if let Some(m) = metrics {
                    m.record_config_apply(self.namespace, self.name);
                }
                self.ctx
                    .publish_normal_event(
                        self.cluster,
                        "ConfigurationApplied",
                        "Apply",
                        format!("Applied configuration {}", short(hash)),
                    )
                    .await;
            }
            DriftDecision::Debounce { .. } | DriftDecision::NoOp => {}
        }
    }

    async fn advance_upgrade(
        &self,
        pods: &[ServerPod],
        classification: &Classification,
        credentials: Option<&Credentials>,
        tokens: AnnotationTokens<'_>,
        drift: &DriftDecision,
    ) -> Option<UpgradeStep> {
        let spec = &self.cluster.spec;
        let request = upgrade::resolve_request(
            &spec.image.tag,
            self.status.version.as_deref(),
            self.status.upgrade_status.as_ref(),
            tokens,
        );
        let current = match request {
            UpgradeRequest::Idle => return None,
            UpgradeRequest::Cancel => {
                info!("Declared version reverted before the upgrade started, cancelling");
                self.ctx
                    .publish_normal_event(
                        self.cluster,
                        "UpgradeCancelled",
                        "Upgrade",
                        "Declared version reverted to the running version",
                    )
                    .await;
                return None;
            }
            UpgradeRequest::Start(status) => {
                info!(
                    from = ?status.previous_version,
                    to = %status.target_version,
                    "Version change detected, upgrade pending"
                );
                status
            }
            UpgradeRequest::Continue {
                status,
                retarget_deferred,
            } => {
                if retarget_deferred {
                    warn!(
                        current = %status.target_version,
                        declared = %spec.image.tag,
                        "Declared version changed during an active upgrade; finish or abort it first"
                    );
                }
                status
            }
        };

        let hosted = if needs_plan(&current, classification, spec.upgrade_strategy.pre_upgrade_health_check) {
            self.hosted_databases(pods, credentials).await
        } else {
            BTreeMap::new()
        };

        Some(upgrade::advance(
            &current,
            &UpgradeObservation {
                cluster_name: self.name,
                strategy: &spec.upgrade_strategy,
                image: &spec.image,
                topology: self.topology,
                pods,
                classification,
                hosted: &hosted,
                tokens,
                config_settled: drift.permits_apply(),
                manifest_applied: drift.permits_apply(),
                now: self.now,
            },
        ))
    }

    async fn hosted_databases(
        &self,
        pods: &[ServerPod],
        credentials: Option<&Credentials>,
    ) -> BTreeMap<String, Vec<HostedDatabase>> {
        let probe = self.ctx.probe.as_ref();
        split_brain::probe_all(
            split_brain::probe_targets(pods, credentials),
            self.ctx.config.probe_timeout,
            self.ctx.config.probe_concurrency,
            |target| async move { probe.hosted_databases(&target).await },
        )
        .await
    }

    /// Execute a repair decision and return the membership status to persist.
    async fn repair_split_brain(
        &self,
        classification: &Classification,
        repair: &RepairDecision,
    ) -> Result<MembershipStatus> {
        let previous = &self.status.membership;
        let mut membership = classification.to_status(previous);
        let newly_split = classification.health == MembershipHealth::Split
            && previous.health != MembershipHealth::Split;
        let metrics = self.ctx.health_state.as_ref().map(|h| &h.metrics);

        if newly_split {
            warn!(snapshot = %classification.snapshot(), "Split brain detected");
            if let Some(m) = metrics {
                m.record_split_brain(self.namespace, self.name);
            }
        }

        match repair {
            RepairDecision::Restart { pods } => {
                self.ctx
                    .publish_warning_event(
                        self.cluster,
                        "SplitBrainDetected",
                        "Detect",
                        format!("Membership disagrees: {}", classification.snapshot()),
                    )
                    .await;
                for pod in pods {
                    info!(pod = %pod, "Restarting minority server to repair partition");
                    self.ctx.store.delete_pod(self.namespace, pod).await?;
                }
                if let Some(m) = metrics {
                    m.record_repair(self.namespace, self.name);
                }
                self.ctx
                    .publish_normal_event(
                        self.cluster,
                        "SplitBrainRepaired",
                        "Repair",
                        format!("Restarted {} to rejoin the majority", pods.join(",")),
                    )
                    .await;
                membership.last_repair_time = Some(self.now.to_string());
                membership.last_repaired_pods = pods.clone();
            }
            RepairDecision::UpgradeActive if newly_split => {
                self.ctx
                    .publish_warning_event(
                        self.cluster,
                        "SplitBrainDetected",
                        "Detect",
                        format!(
                            "Membership disagrees: {}; repair deferred while an upgrade holds the servers",
                            classification.snapshot()
                        ),
                    )
                    .await;
            }
            RepairDecision::CoolingDown { remaining } => {
                debug!(remaining = ?remaining, "Split persists, repair cooling down");
                if newly_split {
                    self.ctx
                        .publish_warning_event(
                            self.cluster,
                            "SplitBrainDetected",
                            "Detect",
                            format!(
                                "Membership disagrees: {}; next repair in {}s",
                                classification.snapshot(),
                                remaining.as_secs()
                            ),
                        )
                        .await;
                }
            }
            RepairDecision::UpgradeActive | RepairDecision::NotNeeded => {}
        }
        Ok(membership)
    }

    async fn build_status(&self, outcome: &Outcome<'_>) -> (Neo4jClusterStatus, ClusterPhase) {
        let servers = self.topology.servers();
        let ready = outcome
            .pods
            .iter()
            .filter(|p| p.ordinal < servers && p.is_serving())
            .count();
        let ready = i32::try_from(ready).unwrap_or(i32::MAX);
        let upgrade_status = outcome.step.map(|s| s.status.clone());
        let upgrade_holds_pods = upgrade_status.as_ref().is_some_and(|u| u.phase.holds_pods());

        let current_phase = self.status.phase;
        let (phase, event) = determine_phase(
            current_phase,
            &PhaseContext {
                ready_replicas: ready,
                desired_replicas: servers,
                membership: outcome.classification.health,
                upgrade_active: upgrade_holds_pods,
                validation_failed: false,
                deleting: false,
            },
        );
        match ClusterStateMachine::new().transition(current_phase, phase, event) {
            TransitionResult::Success { from, to, description, .. } => {
                info!(from = %from, to = %to, event = %event, "{description}");
                self.publish_phase_event(to, ready, servers).await;
            }
            TransitionResult::InvalidTransition { from, to, event } => {
                warn!(from = %from, to = %to, event = %event, "Unexpected phase transition");
            }
            TransitionResult::Unchanged => {}
        }

        let mut version = self.status.version.clone();
        if version.is_none() {
            version = Some(self.cluster.spec.image.tag.clone());
        }
        if let Some(step) = outcome.step
            && step.completed()
        {
            version = Some(step.status.target_version.clone());
        }

        let conditions = self.conditions(outcome, phase, ready, servers);

        if let Some(ref health_state) = self.ctx.health_state {
            let metrics = &health_state.metrics;
            metrics.set_cluster_phase(self.namespace, self.name, Some(&phase.to_string()));
            metrics.set_cluster_servers(self.namespace, self.name, servers.into(), ready.into());
        }

        let status = Neo4jClusterStatus {
            phase,
            replicas: ReplicaStatus {
                ready,
                total: servers,
            },
            version,
            upgrade_status,
            configuration: outcome.configuration.clone(),
            membership: outcome.membership.clone(),
            servers: self.topology.server_statuses(),
            observed_generation: self.cluster.metadata.generation,
            conditions,
            endpoints: Some(endpoints(self.name, self.namespace)),
        };
        (status, phase)
    }

    fn conditions(
        &self,
        outcome: &Outcome<'_>,
        phase: ClusterPhase,
        ready: i32,
        servers: i32,
    ) -> Vec<crate::crd::Condition> {
        let classification = outcome.classification;
        let mut builder = ConditionBuilder::new(
            &self.status.conditions,
            self.cluster.metadata.generation,
            self.now,
        );

        let servers_ready = format!("{ready}/{servers} servers ready");
        builder.ready(
            phase == ClusterPhase::Running,
            &phase.to_string(),
            &format!("{servers_ready}, membership {}", classification.health),
        );
        let progressing = matches!(
            phase,
            ClusterPhase::Creating | ClusterPhase::Forming | ClusterPhase::Upgrading
        ) || !outcome.drift.permits_apply();
        builder.progressing(progressing, &phase.to_string(), &servers_ready);
        builder.degraded(
            matches!(phase, ClusterPhase::Degraded | ClusterPhase::SplitBrain),
            &phase.to_string(),
            &servers_ready,
        );

        match outcome.repair {
            RepairDecision::Restart { pods } => builder.set(
                ConditionType::SplitBrainDetected,
                true,
                "MinorityRestarted",
                &format!(
                    "Membership {}; restarted {} to repair the partition",
                    classification.snapshot(),
                    pods.join(",")
                ),
            ),
            RepairDecision::UpgradeActive => builder.set(
                ConditionType::SplitBrainDetected,
                true,
                "RepairDeferred",
                &format!(
                    "Membership {}; repair waits for the upgrade to finish or be aborted",
                    classification.snapshot()
                ),
            ),
            RepairDecision::CoolingDown { remaining } => builder.set(
                ConditionType::SplitBrainDetected,
                true,
                "RepairCoolingDown",
                &format!(
                    "Membership {}; last repair restarted {}, next attempt in {}s",
                    classification.snapshot(),
                    outcome.membership.last_repaired_pods.join(","),
                    remaining.as_secs()
                ),
            ),
            RepairDecision::NotNeeded => builder.set(
                ConditionType::SplitBrainDetected,
                false,
                &classification.health.to_string(),
                "",
            ),
        };

        match outcome.drift {
            DriftDecision::Debounce {
                hash, remaining, ..
            } => builder.set(
                ConditionType::ConfigurationPending,
                true,
                "Debouncing",
                &format!(
                    "Configuration {} applies in {}s unless it changes again",
                    short(hash),
                    remaining.as_secs()
                ),
            ),
            _ => builder.set(ConditionType::ConfigurationPending, false, "Applied", ""),
        };

        match outcome.step.and_then(|s| s.blocked.as_deref()) {
            Some(message) => builder.set(ConditionType::UpgradeBlocked, true, "HealthGate", message),
            None => builder.set(ConditionType::UpgradeBlocked, false, "NotBlocked", ""),
        };

        if outcome.skewed.is_empty() {
            builder.set(ConditionType::VersionSkew, false, "Uniform", "");
        } else {
            builder.set(
                ConditionType::VersionSkew,
                true,
                "MixedImages",
                &format!(
                    "{} not on {}; configuration restarts skip them until an upgrade moves them",
                    outcome.skewed.join(","),
                    outcome.image
                ),
            );
        }

        builder.build()
    }

    async fn publish_phase_event(&self, phase: ClusterPhase, ready: i32, servers: i32) {
        match phase {
            ClusterPhase::Running => {
                self.ctx
                    .publish_normal_event(
                        self.cluster,
                        "ClusterReady",
                        "Reconciling",
                        format!("All {servers} servers ready and in agreement"),
                    )
                    .await;
            }
            ClusterPhase::Degraded => {
                self.ctx
                    .publish_warning_event(
                        self.cluster,
                        "ClusterDegraded",
                        "Reconciling",
                        format!("{ready}/{servers} servers ready"),
                    )
                    .await;
            }
            _ => {}
        }
    }

    fn requeue_after(
        &self,
        phase: ClusterPhase,
        drift: &DriftDecision,
        upgrade: Option<&UpgradeStatus>,
    ) -> Duration {
        let mut requeue = self.ctx.config.resync_interval;
        if phase != ClusterPhase::Running || upgrade.is_some_and(|u| !u.phase.is_terminal()) {
            requeue = requeue.min(PROGRESS_REQUEUE);
        }
        if let DriftDecision::Debounce { remaining, .. } = drift {
            requeue = requeue.min((*remaining).max(Duration::from_secs(1)));
        }
        requeue
    }
}

/// Everything a pass produced that feeds the status.
struct Outcome<'a> {
    pods: &'a [ServerPod],
    classification: &'a Classification,
    membership: MembershipStatus,
    configuration: ConfigurationStatus,
    drift: &'a DriftDecision,
    step: Option<&'a UpgradeStep>,
    repair: &'a RepairDecision,
    /// Servers left on another image; configuration restarts skip them.
    skewed: &'a [String],
    image: &'a str,
}

/// Hosted databases decide server classes; they are only needed on the pass
/// that may freeze the plan.
fn needs_plan(current: &UpgradeStatus, classification: &Classification, pre_gate: bool) -> bool {
    current.phase == UpgradePhase::Pending
        && current.plan.is_empty()
        && (!pre_gate || classification.health == MembershipHealth::Healthy)
}

fn endpoints(name: &str, namespace: &str) -> Endpoints {
    let host = format!("{name}.{namespace}.svc.cluster.local");
    Endpoints {
        bolt: format!("neo4j://{host}:{BOLT_PORT}"),
        http: format!("http://{host}:{HTTP_PORT}"),
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Report an invalid spec on the status and return the error for requeue.
async fn record_validation_failure(
    ctx: &Context,
    cluster: &Neo4jCluster,
    status: &Neo4jClusterStatus,
    error: Error,
    now: Timestamp,
) -> Result<Error> {
    let message = error.violations().join("; ");
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();
    error!(violations = %message, "Validation failed");

    let (phase, event) = determine_phase(
        status.phase,
        &PhaseContext {
            ready_replicas: status.replicas.ready,
            desired_replicas: status.replicas.total,
            membership: status.membership.health,
            upgrade_active: false,
            validation_failed: true,
            deleting: false,
        },
    );
    if let TransitionResult::InvalidTransition { from, to, event } =
        ClusterStateMachine::new().transition(status.phase, phase, event)
    {
        warn!(from = %from, to = %to, event = %event, "Unexpected phase transition");
    }

    let already_reported = status.phase == ClusterPhase::Failed
        && crate::controller::status::get_condition(&status.conditions, ConditionType::Ready)
            .is_some_and(|c| c.message == message);
    if !already_reported {
        ctx.publish_warning_event(cluster, "ValidationFailed", "Validating", message.clone())
            .await;
    }

    let mut builder = ConditionBuilder::new(&status.conditions, cluster.metadata.generation, now);
    builder
        .ready(false, "ValidationFailed", &message)
        .progressing(false, "ValidationFailed", "Spec must be corrected")
        .degraded(true, "ValidationFailed", &message);
    let conditions = builder.build();
    let generation = cluster.metadata.generation;

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .set_cluster_phase(&namespace, &name, Some(&phase.to_string()));
    }

    update_status_with_retry(
        ctx.store.as_ref(),
        &namespace,
        &name,
        ctx.config.retry_policy(),
        |latest| {
            let mut next = latest.status.clone().unwrap_or_default();
            next.phase = phase;
            next.conditions = conditions.clone();
            next.observed_generation = generation;
            if latest.status.as_ref() == Some(&next) {
                return false;
            }
            latest.status = Some(next);
            true
        },
    )
    .await?;
    Ok(error)
}

/// Handle deletion: run cleanup hooks, then release the finalizer.
async fn handle_deletion(
    ctx: &Context,
    cluster: &Neo4jCluster,
    namespace: &str,
    name: &str,
) -> Result<Option<Duration>> {
    if !has_finalizer(cluster) {
        return Ok(None);
    }
    info!("Cluster is being deleted, running cleanup");

    let current = cluster.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if current != ClusterPhase::Deleting {
        let (phase, event) = determine_phase(
            current,
            &PhaseContext {
                ready_replicas: 0,
                desired_replicas: 0,
                membership: MembershipHealth::Unformed,
                upgrade_active: false,
                validation_failed: false,
                deleting: true,
            },
        );
        if let TransitionResult::InvalidTransition { from, to, event } =
            ClusterStateMachine::new().transition(current, phase, event)
        {
            warn!(from = %from, to = %to, event = %event, "Unexpected phase transition");
        }
        update_status_with_retry(
            ctx.store.as_ref(),
            namespace,
            name,
            ctx.config.retry_policy(),
            |latest| {
                let mut next = latest.status.clone().unwrap_or_default();
                if next.phase == phase {
                    return false;
                }
                next.phase = phase;
                latest.status = Some(next);
                true
            },
        )
        .await?;
    }

    for hook in &ctx.cleanup_hooks {
        info!(hook = hook.name(), "Running cleanup hook");
        if let Err(e) = hook.cleanup(cluster).await {
            ctx.publish_warning_event(
                cluster,
                "CleanupFailed",
                "Deleting",
                format!("Cleanup hook {} failed: {e}", hook.name()),
            )
            .await;
            return Err(e);
        }
    }

    ctx.publish_normal_event(cluster, "Deleted", "Deleting", "Cleanup complete, releasing finalizer")
        .await;
    update_metadata_with_retry(
        ctx.store.as_ref(),
        namespace,
        name,
        ctx.config.retry_policy(),
        remove_finalizer,
    )
    .await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.set_cluster_phase(namespace, name, None);
    }
    Ok(None)
}
