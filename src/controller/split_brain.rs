//! Split-brain detector.
//!
//! Each ready server is asked for its own view of cluster membership. Views
//! are grouped into equivalence classes by mutual agreement and the pass is
//! classified as `Unformed`, `Converging`, `Split` or `Healthy`.
//!
//! ## Hysteresis
//!
//! A disagreement only becomes `Split` once the same disagreement (same
//! fingerprint of ready pods and classes) has persisted for the grace period
//! and no pod has changed readiness within it. The fingerprint and the time
//! it was first seen are the only state carried across passes; they live in
//! `status.membership`.
//!
//! ## Failure semantics
//!
//! A pod whose query fails or times out is "unknown". Unknown pods are
//! excluded from classification and are never evidence of a partition.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use jiff::Timestamp;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::client::{Credentials, MembershipProbe, MembershipView, ProbeTarget, ServerPod};
use crate::controller::common::{elapsed, extract_ordinal, parse_timestamp};
use crate::controller::error::Result;
use crate::controller::topology::DeploymentRef;
use crate::crd::{MembershipHealth, MembershipStatus, UpgradeStatus};

/// Timing and fan-out of a detection pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub probe_timeout: Duration,
    pub concurrency: usize,
    pub grace: Duration,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub health: MembershipHealth,
    /// Equivalence classes, largest first, ties by lowest ordinal.
    pub classes: Vec<Vec<String>>,
    /// Ready pods whose view could not be obtained.
    pub unknown: Vec<String>,
    pub fingerprint: String,
    /// When this fingerprint was first observed.
    pub observed_since: Timestamp,
}

impl Classification {
    /// The class the cluster converges on.
    pub fn majority(&self) -> Option<&[String]> {
        self.classes.first().map(Vec::as_slice)
    }

    /// Pods outside the majority class.
    pub fn minority_pods(&self) -> Vec<String> {
        self.classes.iter().skip(1).flatten().cloned().collect()
    }

    /// Whether `pod` belongs to the majority class.
    pub fn in_majority(&self, pod: &str) -> bool {
        self.majority().is_some_and(|m| m.iter().any(|p| p == pod))
    }

    /// Human-readable membership snapshot for events and conditions.
    pub fn snapshot(&self) -> String {
        let mut out = self
            .classes
            .iter()
            .map(|c| format!("[{}]", c.join(",")))
            .collect::<Vec<_>>()
            .join(" ");
        if !self.unknown.is_empty() {
            out.push_str(&format!(" unknown=[{}]", self.unknown.join(",")));
        }
        out
    }

    /// Membership status to persist, keeping repair bookkeeping.
    pub fn to_status(&self, previous: &MembershipStatus) -> MembershipStatus {
        MembershipStatus {
            health: self.health,
            fingerprint: Some(self.fingerprint.clone()),
            observed_since: Some(self.observed_since.to_string()),
            last_repair_time: previous.last_repair_time.clone(),
            last_repaired_pods: previous.last_repaired_pods.clone(),
        }
    }
}

/// Group pods with known views into classes of mutual agreement.
///
/// A class is a set of pods that report the same peer set (counting only
/// pods with a known view) and that all appear in it, so every member agrees
/// with every other member. Agreement is not transitive: a pod whose view
/// differs from its neighbours' forms its own class even if it is linked to
/// both of them.
pub fn equivalence_classes(views: &BTreeMap<String, MembershipView>) -> Vec<Vec<String>> {
    let mut by_view: BTreeMap<BTreeSet<&str>, Vec<&str>> = BTreeMap::new();
    for (pod, view) in views {
        let peers: BTreeSet<&str> = view
            .peers
            .iter()
            .map(String::as_str)
            .filter(|peer| views.contains_key(*peer))
            .collect();
        by_view.entry(peers).or_default().push(pod.as_str());
    }

    let mut classes = Vec::new();
    for (peers, members) in by_view {
        if members.iter().all(|m| peers.contains(m)) {
            classes.push(members.iter().map(|m| m.to_string()).collect::<Vec<_>>());
        } else {
            classes.extend(members.iter().map(|m| vec![m.to_string()]));
        }
    }
    for class in &mut classes {
        class.sort_by_key(|p| ordinal_key(p));
    }

    classes.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| lowest_ordinal(a).cmp(&lowest_ordinal(b)))
    });
    classes
}

/// Whether every known view lists every ready pod.
fn views_complete(views: &BTreeMap<String, MembershipView>, ready: &[&ServerPod]) -> bool {
    views
        .values()
        .all(|v| ready.iter().all(|p| v.peers.contains(&p.name)))
}

fn ordinal_key(pod: &str) -> (i32, String) {
    (extract_ordinal(pod).unwrap_or(i32::MAX), pod.to_string())
}

fn lowest_ordinal(class: &[String]) -> (i32, String) {
    class
        .iter()
        .map(|p| ordinal_key(p))
        .min()
        .unwrap_or((i32::MAX, String::new()))
}

/// Digest of the ready pod set and the class layout.
pub fn fingerprint(ready: &[&ServerPod], classes: &[Vec<String>], unknown: &[String]) -> String {
    let mut hasher = Sha256::new();
    for pod in ready {
        hasher.update(pod.name.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"|");
    for class in classes {
        hasher.update(class.join(",").as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"|");
    hasher.update(unknown.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

/// Inputs to a classification.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub deployment: DeploymentRef,
    pub pods: &'a [ServerPod],
    pub views: &'a BTreeMap<String, MembershipView>,
    pub previous: &'a MembershipStatus,
    pub now: Timestamp,
    pub grace: Duration,
}

/// Classify a detection pass. Pure.
pub fn classify(input: ClassifyInput<'_>) -> Classification {
    let expected = input.deployment.servers();
    let ready: Vec<&ServerPod> = input
        .pods
        .iter()
        .filter(|p| p.ordinal < expected && p.is_serving())
        .collect();
    let ready_count = i32::try_from(ready.len()).unwrap_or(i32::MAX);

    let known: BTreeMap<String, MembershipView> = ready
        .iter()
        .filter_map(|p| input.views.get(&p.name).map(|v| (p.name.clone(), v.clone())))
        .collect();
    let (classes, unknown) = match input.deployment {
        // A standalone server is never queried; it agrees with itself.
        DeploymentRef::Standalone if ready.is_empty() => (Vec::new(), Vec::new()),
        DeploymentRef::Standalone => (
            vec![ready.iter().map(|p| p.name.clone()).collect()],
            Vec::new(),
        ),
        DeploymentRef::Cluster { .. } => (
            equivalence_classes(&known),
            ready
                .iter()
                .filter(|p| !known.contains_key(&p.name))
                .map(|p| p.name.clone())
                .collect(),
        ),
    };

    let fp = fingerprint(&ready, &classes, &unknown);
    let observed_since = match (
        input.previous.fingerprint.as_deref(),
        parse_timestamp(input.previous.observed_since.as_deref()),
    ) {
        (Some(prev), Some(since)) if prev == fp => since,
        _ => input.now,
    };

    let health = match input.deployment {
        DeploymentRef::Standalone => {
            if ready_count >= 1 {
                MembershipHealth::Healthy
            } else {
                MembershipHealth::Unformed
            }
        }
        DeploymentRef::Cluster { servers, .. } if ready_count < servers => {
            MembershipHealth::Unformed
        }
        DeploymentRef::Cluster { servers, .. } => {
            let covers_all = classes.len() == 1
                && unknown.is_empty()
                && views_complete(&known, &ready)
                && classes
                    .first()
                    .is_some_and(|c| i32::try_from(c.len()).unwrap_or(0) == servers);

            if covers_all {
                MembershipHealth::Healthy
            } else if classes.len() > 1 {
                let last_readiness_change = ready.iter().filter_map(|p| p.ready_since).max();
                let reference = last_readiness_change
                    .map_or(observed_since, |t| t.max(observed_since));
                if elapsed(reference, input.now) >= input.grace {
                    MembershipHealth::Split
                } else {
                    MembershipHealth::Converging
                }
            } else {
                MembershipHealth::Converging
            }
        }
    };

    Classification {
        health,
        classes,
        unknown,
        fingerprint: fp,
        observed_since,
    }
}

/// Whether and how to repair after a classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairDecision {
    /// Nothing to repair.
    NotNeeded,
    /// Pods are held by a rolling upgrade.
    UpgradeActive,
    /// The previous repair is too recent.
    CoolingDown { remaining: Duration },
    /// Restart these minority pods.
    Restart { pods: Vec<String> },
}

/// Decide on a repair for a `Split` classification.
pub fn plan_repair(
    classification: &Classification,
    membership: &MembershipStatus,
    upgrade: Option<&UpgradeStatus>,
    now: Timestamp,
    cooldown: Duration,
) -> RepairDecision {
    if classification.health != MembershipHealth::Split {
        return RepairDecision::NotNeeded;
    }
    if upgrade.is_some_and(|u| u.phase.holds_pods()) {
        return RepairDecision::UpgradeActive;
    }
    if let Some(last) = parse_timestamp(membership.last_repair_time.as_deref()) {
        let since = elapsed(last, now);
        if since < cooldown {
            return RepairDecision::CoolingDown {
                remaining: cooldown.saturating_sub(since),
            };
        }
    }
    let pods = classification.minority_pods();
    if pods.is_empty() {
        RepairDecision::NotNeeded
    } else {
        RepairDecision::Restart { pods }
    }
}

/// Run `query` against every target with bounded concurrency and a
/// per-query deadline. Failed or timed-out targets are left out.
pub async fn probe_all<T, F, Fut>(
    targets: Vec<ProbeTarget>,
    timeout: Duration,
    concurrency: usize,
    query: F,
) -> BTreeMap<String, T>
where
    F: Fn(ProbeTarget) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    futures::stream::iter(targets)
        .map(|target| {
            let pod = target.pod.clone();
            let fut = query(target);
            async move { (pod, tokio::time::timeout(timeout, fut).await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(|(pod, outcome)| match outcome {
            Ok(Ok(value)) => Some((pod, value)),
            Ok(Err(e)) => {
                warn!(pod = %pod, error = %e, "Admin query failed, treating pod as unknown");
                None
            }
            Err(_) => {
                warn!(pod = %pod, ?timeout, "Admin query timed out, treating pod as unknown");
                None
            }
        })
        .collect()
}

/// Probe targets for the serving pods of a cluster.
pub fn probe_targets(pods: &[ServerPod], credentials: Option<&Credentials>) -> Vec<ProbeTarget> {
    pods.iter()
        .filter(|p| p.is_serving())
        .map(|p| ProbeTarget {
            pod: p.name.clone(),
            host: p.host.clone(),
            credentials: credentials.cloned(),
        })
        .collect()
}

/// Run one detection pass against the live pods.
pub async fn detect(
    probe: &dyn MembershipProbe,
    deployment: DeploymentRef,
    pods: &[ServerPod],
    credentials: Option<&Credentials>,
    previous: &MembershipStatus,
    now: Timestamp,
    settings: DetectorSettings,
) -> Classification {
    let views = match deployment {
        DeploymentRef::Standalone => BTreeMap::new(),
        DeploymentRef::Cluster { .. } => {
            probe_all(
                probe_targets(pods, credentials),
                settings.probe_timeout,
                settings.concurrency,
                |target| async move { probe.server_view(&target).await },
            )
            .await
        }
    };

    let classification = classify(ClassifyInput {
        deployment,
        pods,
        views: &views,
        previous,
        now,
        grace: settings.grace,
    });
    debug!(
        health = %classification.health,
        snapshot = %classification.snapshot(),
        "Membership classified"
    );
    classification
}
