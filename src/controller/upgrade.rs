//! Rolling upgrade orchestrator.
//!
//! Each reconcile pass calls [`advance`] once with the persisted
//! `UpgradeStatus` and a fresh observation of the live pods. Progress is
//! always recomputed from what the pods actually run; nothing is remembered
//! in memory between passes, so a restarted operator resumes where the
//! status says it was.
//!
//! A server counts as upgraded when its pod runs the target image, is ready,
//! and belongs to the majority membership class. A server is unavailable
//! while it is in flight, missing, not ready, or running the target image
//! without having rejoined. New restarts only start while the cluster is
//! `Healthy` and fewer than `maxUnavailable` servers are unavailable.

use std::collections::BTreeMap;
use std::time::Duration;

use jiff::Timestamp;
use tracing::{debug, info};

use crate::client::{EventRecord, HostedDatabase, ServerPod};
use crate::controller::common::{elapsed, parse_timestamp, pod_name};
use crate::controller::split_brain::Classification;
use crate::controller::topology::ValidatedTopology;
use crate::controller::upgrade_state_machine::{
    UpgradeEvent, UpgradeStateMachine, UpgradeTransition, UpgradeTransitionContext,
    determine_upgrade_event,
};
use crate::crd::{
    ImageSpec, InFlightServer, MembershipHealth, ModeConstraint, NodeProgress, PlannedServer,
    ServerClass, UpgradeOrder, UpgradePhase, UpgradeProgress, UpgradeStatus, UpgradeStrategySpec,
};

/// What to do with the upgrade record given the declared version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeRequest {
    /// No upgrade record.
    Idle,
    /// A new upgrade towards the declared version.
    Start(UpgradeStatus),
    /// Keep driving the existing record. `retarget_deferred` is set when the
    /// declared version moved while pods are held by the upgrade.
    Continue {
        status: UpgradeStatus,
        retarget_deferred: bool,
    },
    /// The declared version was reverted before any pod was touched.
    Cancel,
}

/// Compare the declared tag with the running version and the current record.
pub fn resolve_request(
    spec_tag: &str,
    running_version: Option<&str>,
    current: Option<&UpgradeStatus>,
    tokens: AnnotationTokens<'_>,
) -> UpgradeRequest {
    // Nothing runs yet; the first rollout uses the declared tag directly.
    let Some(running) = running_version else {
        return current.map_or(UpgradeRequest::Idle, |u| UpgradeRequest::Continue {
            status: u.clone(),
            retarget_deferred: false,
        });
    };

    match current {
        Some(u) if u.target_version == spec_tag => UpgradeRequest::Continue {
            status: u.clone(),
            retarget_deferred: false,
        },
        Some(u) if u.phase.holds_pods() => UpgradeRequest::Continue {
            status: u.clone(),
            retarget_deferred: true,
        },
        Some(u) if running == spec_tag && u.phase == UpgradePhase::Pending => {
            UpgradeRequest::Cancel
        }
        Some(u) if running == spec_tag => UpgradeRequest::Continue {
            status: u.clone(),
            retarget_deferred: false,
        },
        None if running == spec_tag => UpgradeRequest::Idle,
        _ => UpgradeRequest::Start(UpgradeStatus {
            phase: UpgradePhase::Pending,
            previous_version: Some(running.to_string()),
            target_version: spec_tag.to_string(),
            // tokens present before the upgrade existed are not requests for it
            handled_resume_token: tokens.resume.map(str::to_string),
            handled_abort_token: tokens.abort.map(str::to_string),
            ..Default::default()
        }),
    }
}

/// Version tag the StatefulSet template should carry.
///
/// A failed or aborted upgrade that already moved servers to the target keeps
/// the target in the template, so a recreated pod never goes back to the
/// older version.
pub fn effective_tag(
    spec_tag: &str,
    running_version: Option<&str>,
    upgrade: Option<&UpgradeStatus>,
    image: &ImageSpec,
    pods: &[ServerPod],
) -> String {
    match upgrade {
        Some(u)
            if matches!(
                u.phase,
                UpgradePhase::InProgress | UpgradePhase::Paused | UpgradePhase::Completed
            ) =>
        {
            u.target_version.clone()
        }
        Some(u) if u.phase == UpgradePhase::Failed && runs_tag(pods, image, &u.target_version) => {
            u.target_version.clone()
        }
        _ => running_version.unwrap_or(spec_tag).to_string(),
    }
}

fn runs_tag(pods: &[ServerPod], image: &ImageSpec, tag: &str) -> bool {
    let reference = image.reference_for(tag);
    pods.iter().any(|p| p.image.as_deref() == Some(reference.as_str()))
}

/// Resume and abort annotation values on the cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationTokens<'a> {
    pub resume: Option<&'a str>,
    pub abort: Option<&'a str>,
}

fn is_new_token(token: Option<&str>, handled: Option<&str>) -> bool {
    token.is_some_and(|t| !t.is_empty() && Some(t) != handled)
}

/// Everything `advance` observes in one pass.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeObservation<'a> {
    pub cluster_name: &'a str,
    pub strategy: &'a UpgradeStrategySpec,
    pub image: &'a ImageSpec,
    pub topology: &'a ValidatedTopology,
    pub pods: &'a [ServerPod],
    pub classification: &'a Classification,
    /// Hosted databases per pod; only consulted when the plan is built.
    pub hosted: &'a BTreeMap<String, Vec<HostedDatabase>>,
    pub tokens: AnnotationTokens<'a>,
    /// No configuration change is waiting in a debounce window.
    pub config_settled: bool,
    /// Child resources were applied in this pass.
    pub manifest_applied: bool,
    pub now: Timestamp,
}

/// Outcome of one orchestrator pass.
#[derive(Debug, Clone)]
pub struct UpgradeStep {
    pub status: UpgradeStatus,
    /// Pods to delete so they come back on the target image.
    pub restart: Vec<String>,
    pub events: Vec<EventRecord>,
    pub transition: Option<UpgradeTransition>,
    /// Why the pre-upgrade gate is holding the upgrade.
    pub blocked: Option<String>,
}

impl UpgradeStep {
    fn unchanged(status: &UpgradeStatus) -> Self {
        Self {
            status: status.clone(),
            restart: Vec::new(),
            events: Vec::new(),
            transition: None,
            blocked: None,
        }
    }

    pub fn completed(&self) -> bool {
        self.transition
            .as_ref()
            .is_some_and(|t| t.to == UpgradePhase::Completed)
    }
}

/// Class of every server, decided when the plan is built.
///
/// Primary-class servers host a primary database or are constrained to
/// PRIMARY.
pub fn build_plan(
    cluster_name: &str,
    topology: &ValidatedTopology,
    hosted: &BTreeMap<String, Vec<HostedDatabase>>,
    order: UpgradeOrder,
) -> Vec<PlannedServer> {
    let classified: Vec<PlannedServer> = (0..topology.servers())
        .rev()
        .map(|ordinal| {
            let hosts_primary = hosted
                .get(&pod_name(cluster_name, ordinal))
                .is_some_and(|dbs| dbs.iter().any(HostedDatabase::is_primary));
            let class = if hosts_primary || topology.constraint_of(ordinal) == ModeConstraint::Primary
            {
                ServerClass::Primary
            } else {
                ServerClass::Secondary
            };
            PlannedServer { ordinal, class }
        })
        .collect();

    let (first, second) = match order {
        UpgradeOrder::SecondariesFirst => (ServerClass::Secondary, ServerClass::Primary),
        UpgradeOrder::PrimariesFirst => (ServerClass::Primary, ServerClass::Secondary),
    };
    classified
        .iter()
        .filter(|s| s.class == first)
        .chain(classified.iter().filter(|s| s.class == second))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
struct ServerState {
    planned: PlannedServer,
    pod: String,
    upgraded: bool,
    unavailable: bool,
}

fn observe_servers(
    plan: &[PlannedServer],
    in_flight: &[InFlightServer],
    obs: &UpgradeObservation<'_>,
    target_image: &str,
) -> Vec<ServerState> {
    plan.iter()
        .map(|planned| {
            let name = pod_name(obs.cluster_name, planned.ordinal);
            let pod = obs.pods.iter().find(|p| p.ordinal == planned.ordinal);
            let on_target = pod.is_some_and(|p| p.image.as_deref() == Some(target_image));
            let serving = pod.is_some_and(ServerPod::is_serving);
            let upgraded = on_target && serving && obs.classification.in_majority(&name);
            let flying = in_flight.iter().any(|f| f.ordinal == planned.ordinal);
            ServerState {
                planned: planned.clone(),
                pod: name,
                upgraded,
                unavailable: !upgraded && (flying || !serving || on_target),
            }
        })
        .collect()
}

fn progress(states: &[ServerState]) -> UpgradeProgress {
    let count = |class: ServerClass| {
        let of_class = || states.iter().filter(move |s| s.planned.class == class);
        let n = |it: usize| i32::try_from(it).unwrap_or(i32::MAX);
        let total = n(of_class().count());
        let upgraded = n(of_class().filter(|s| s.upgraded).count());
        let in_progress = n(of_class().filter(|s| s.unavailable).count());
        NodeProgress {
            total,
            upgraded,
            in_progress,
            pending: total - upgraded - in_progress,
        }
    };
    UpgradeProgress {
        primaries: count(ServerClass::Primary),
        secondaries: count(ServerClass::Secondary),
    }
}

/// Drive the upgrade one pass forward.
pub fn advance(current: &UpgradeStatus, obs: &UpgradeObservation<'_>) -> UpgradeStep {
    if current.phase.is_terminal() {
        return UpgradeStep::unchanged(current);
    }

    let now = obs.now;
    let now_str = now.to_string();
    let step_timeout = Duration::from_secs(obs.strategy.step_timeout_seconds);
    let target_image = obs.image.reference_for(&current.target_version);
    let mut status = current.clone();
    let mut events = Vec::new();

    let plan = if status.plan.is_empty() {
        build_plan(
            obs.cluster_name,
            obs.topology,
            obs.hosted,
            obs.strategy.order,
        )
    } else {
        status.plan.clone()
    };

    let mut states = observe_servers(&plan, &status.in_flight, obs, &target_image);

    // In flight: restarted by us and not back yet, or observed restarting.
    if status.phase.holds_pods() {
        let mut in_flight: Vec<InFlightServer> = status
            .in_flight
            .iter()
            .filter(|f| states.iter().any(|s| s.planned.ordinal == f.ordinal && !s.upgraded))
            .cloned()
            .collect();
        for s in states.iter().filter(|s| s.unavailable) {
            if !in_flight.iter().any(|f| f.ordinal == s.planned.ordinal) {
                in_flight.push(InFlightServer {
                    ordinal: s.planned.ordinal,
                    started_at: now_str.clone(),
                });
            }
        }
        status.in_flight = in_flight;
    }

    let upgraded = states.iter().filter(|s| s.upgraded).count();
    let step_timed_out = status.phase == UpgradePhase::InProgress
        && status.in_flight.iter().any(|f| {
            parse_timestamp(Some(&f.started_at)).is_some_and(|t| elapsed(t, now) >= step_timeout)
        });

    let health = obs.classification.health;
    let all_upgraded = upgraded == plan.len() && status.in_flight.is_empty();
    let post_gate_passed =
        !obs.strategy.post_upgrade_health_check || health == MembershipHealth::Healthy;
    if status.phase == UpgradePhase::InProgress && all_upgraded && !post_gate_passed {
        if status.post_check_since.is_none() {
            status.post_check_since = Some(now_str.clone());
        }
    } else {
        status.post_check_since = None;
    }
    let post_gate_timed_out = parse_timestamp(status.post_check_since.as_deref())
        .is_some_and(|t| elapsed(t, now) >= step_timeout);

    let ctx = UpgradeTransitionContext {
        cluster_healthy: health == MembershipHealth::Healthy,
        cluster_split: health == MembershipHealth::Split,
        pre_gate_enabled: obs.strategy.pre_upgrade_health_check,
        post_gate_enabled: obs.strategy.post_upgrade_health_check,
        auto_pause: obs.strategy.auto_pause,
        config_settled: obs.config_settled,
        total_servers: i32::try_from(plan.len()).unwrap_or(i32::MAX),
        upgraded_servers: i32::try_from(upgraded).unwrap_or(i32::MAX),
        in_flight: i32::try_from(status.in_flight.len()).unwrap_or(i32::MAX),
        step_timed_out,
        post_gate_timed_out,
        resume_requested: is_new_token(
            obs.tokens.resume,
            status.handled_resume_token.as_deref(),
        ),
        abort_requested: is_new_token(obs.tokens.abort, status.handled_abort_token.as_deref()),
    };

    let transition = determine_upgrade_event(status.phase, &ctx)
        .and_then(|event| UpgradeStateMachine::new().transition(status.phase, event, &ctx));

    let mut blocked = None;
    match &transition {
        Some(t) => {
            info!(
                from = %t.from,
                to = %t.to,
                event = %t.event,
                target = %status.target_version,
                "Upgrade phase transition"
            );
            status.phase = t.to;
            match t.event {
                UpgradeEvent::PreChecksPassed => {
                    status.plan = plan.clone();
                    status.start_time = Some(now_str.clone());
                    status.last_error = None;
                    events.push(EventRecord::normal(
                        "UpgradeStarted",
                        "Upgrade",
                        format!(
                            "Upgrading {} servers to {}",
                            plan.len(),
                            status.target_version
                        ),
                    ));
                }
                UpgradeEvent::AllServersUpgraded => {
                    status.completion_time = Some(now_str.clone());
                    status.in_flight.clear();
                    status.post_check_since = None;
                    status.last_error = None;
                    events.push(EventRecord::normal(
                        "UpgradeCompleted",
                        "Upgrade",
                        format!("All servers run {}", status.target_version),
                    ));
                }
                UpgradeEvent::StepTimedOut | UpgradeEvent::HealthGateFailed => {
                    let message = if t.event == UpgradeEvent::StepTimedOut {
                        let stuck: Vec<String> = status
                            .in_flight
                            .iter()
                            .map(|f| pod_name(obs.cluster_name, f.ordinal))
                            .collect();
                        format!(
                            "{} did not rejoin within {}s",
                            stuck.join(","),
                            step_timeout.as_secs()
                        )
                    } else {
                        format!("health gate failed: membership is {health}")
                    };
                    status.last_error = Some(message.clone());
                    // only a resume issued after the pause counts
                    status.handled_resume_token = obs.tokens.resume.map(str::to_string);
                    if t.to == UpgradePhase::Failed {
                        status.completion_time = Some(now_str.clone());
                    }
                    let reason = if t.to == UpgradePhase::Paused {
                        "UpgradePaused"
                    } else {
                        "UpgradeFailed"
                    };
                    events.push(EventRecord::warning(reason, "Upgrade", message));
                }
                UpgradeEvent::Resumed => {
                    status.handled_resume_token = obs.tokens.resume.map(str::to_string);
                    status.last_error = None;
                    for f in &mut status.in_flight {
                        f.started_at = now_str.clone();
                    }
                    events.push(EventRecord::normal(
                        "UpgradeResumed",
                        "Upgrade",
                        format!("Resumed upgrade to {}", status.target_version),
                    ));
                }
                UpgradeEvent::Aborted => {
                    status.handled_abort_token = obs.tokens.abort.map(str::to_string);
                    status.last_error = Some("aborted by request".to_string());
                    status.completion_time = Some(now_str.clone());
                    status.in_flight.clear();
                    events.push(EventRecord::warning(
                        "UpgradeAborted",
                        "Upgrade",
                        format!("Upgrade to {} aborted", status.target_version),
                    ));
                }
            }
        }
        None if status.phase == UpgradePhase::Pending => {
            let message = if obs.config_settled {
                format!("pre-upgrade health check failed: membership is {health}")
            } else {
                "waiting for a pending configuration change to be applied".to_string()
            };
            if status.last_error.as_deref() != Some(message.as_str()) {
                events.push(EventRecord::warning(
                    "UpgradeBlocked",
                    "Upgrade",
                    message.clone(),
                ));
            }
            status.last_error = Some(message.clone());
            blocked = Some(message);
        }
        None => {}
    }

    // Restarts only happen in passes that neither changed the phase nor
    // skipped the manifest, so the template already carries the target image.
    let mut restart = Vec::new();
    if current.phase == UpgradePhase::InProgress
        && transition.is_none()
        && obs.manifest_applied
        && health == MembershipHealth::Healthy
    {
        let unavailable = states.iter().filter(|s| s.unavailable).count();
        let budget = usize::try_from(obs.strategy.max_unavailable)
            .unwrap_or(1)
            .saturating_sub(unavailable);
        for s in states
            .iter_mut()
            .filter(|s| !s.upgraded && !s.unavailable)
            .take(budget)
        {
            debug!(pod = %s.pod, class = %s.planned.class, "Restarting server on target image");
            s.unavailable = true;
            status.in_flight.push(InFlightServer {
                ordinal: s.planned.ordinal,
                started_at: now_str.clone(),
            });
            events.push(EventRecord::normal(
                "UpgradeStepStarted",
                "Upgrade",
                format!("Restarting {} on {}", s.pod, status.target_version),
            ));
            restart.push(s.pod.clone());
        }
    }

    status.progress = progress(&states);

    UpgradeStep {
        status,
        restart,
        events,
        transition,
        blocked,
    }
}
