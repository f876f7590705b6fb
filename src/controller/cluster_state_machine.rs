//! Finite state machine for Neo4jCluster lifecycle phases.
//!
//! The reconciler computes the phase a pass observed with
//! [`determine_phase`] and checks the move against the transition table.
//! The phase is always derived from live state, so an unexpected transition
//! is logged and still recorded rather than rejected.
//!
//! ## Typical flow
//!
//! Pending → Creating → Forming → Running
//!
//! Running ⇄ Degraded, Running → SplitBrain → Degraded → Running,
//! Running → Upgrading → Running. Any phase → Failed on invalid spec and
//! → Deleting once deletion is requested.

use std::fmt;

use crate::crd::{ClusterPhase, MembershipHealth};

/// Observation that moves the cluster between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Child resources applied, pods not all ready.
    ResourcesApplied,
    /// All pods ready, membership still forming.
    PodsReady,
    /// All pods ready and membership healthy.
    MembershipHealthy,
    /// Some declared servers are not ready.
    ReplicasDegraded,
    /// Membership split past the grace period.
    SplitDetected,
    /// A rolling upgrade holds the pods.
    UpgradeActive,
    /// The spec failed validation.
    ValidationFailed,
    /// Deletion timestamp is set.
    DeletionRequested,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::ResourcesApplied => write!(f, "ResourcesApplied"),
            ClusterEvent::PodsReady => write!(f, "PodsReady"),
            ClusterEvent::MembershipHealthy => write!(f, "MembershipHealthy"),
            ClusterEvent::ReplicasDegraded => write!(f, "ReplicasDegraded"),
            ClusterEvent::SplitDetected => write!(f, "SplitDetected"),
            ClusterEvent::UpgradeActive => write!(f, "UpgradeActive"),
            ClusterEvent::ValidationFailed => write!(f, "ValidationFailed"),
            ClusterEvent::DeletionRequested => write!(f, "DeletionRequested"),
        }
    }
}

/// What one reconcile pass observed.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext {
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub membership: MembershipHealth,
    /// An upgrade is InProgress or Paused.
    pub upgrade_active: bool,
    pub validation_failed: bool,
    pub deleting: bool,
}

impl PhaseContext {
    pub fn all_replicas_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }
}

/// A state transition definition.
#[derive(Debug)]
pub struct Transition {
    pub from: ClusterPhase,
    pub to: ClusterPhase,
    pub event: ClusterEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of checking a phase change against the table.
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Phase did not change.
    Unchanged,
    Success {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    },
    /// The table has no such transition.
    InvalidTransition {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
    },
}

/// Transition table for the cluster lifecycle.
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    pub fn new() -> Self {
        use ClusterEvent as E;
        use ClusterPhase as P;

        let mut transitions = vec![
            // Initial creation
            Transition::new(P::Pending, P::Creating, E::ResourcesApplied, "Child resources applied"),
            Transition::new(P::Pending, P::Forming, E::PodsReady, "Pods already ready"),
            Transition::new(P::Pending, P::Running, E::MembershipHealthy, "Adopted a healthy cluster"),
            Transition::new(P::Creating, P::Forming, E::PodsReady, "All pods ready, forming membership"),
            Transition::new(P::Creating, P::Running, E::MembershipHealthy, "Cluster formed"),
            Transition::new(P::Forming, P::Running, E::MembershipHealthy, "Cluster formed"),
            Transition::new(P::Forming, P::Degraded, E::ReplicasDegraded, "Pod lost while forming"),
            Transition::new(P::Pending, P::SplitBrain, E::SplitDetected, "Adopted a split cluster"),
            Transition::new(P::Creating, P::SplitBrain, E::SplitDetected, "Formed into a split"),
            Transition::new(P::Forming, P::SplitBrain, E::SplitDetected, "Formed into a split"),
            // Version changed before the cluster settled
            Transition::new(P::Pending, P::Upgrading, E::UpgradeActive, "Rolling upgrade started"),
            Transition::new(P::Creating, P::Upgrading, E::UpgradeActive, "Rolling upgrade started"),
            Transition::new(P::Forming, P::Upgrading, E::UpgradeActive, "Rolling upgrade started"),
            // Steady state
            Transition::new(P::Running, P::Degraded, E::ReplicasDegraded, "Servers unavailable"),
            Transition::new(P::Running, P::Forming, E::PodsReady, "Membership re-forming"),
            Transition::new(P::Running, P::SplitBrain, E::SplitDetected, "Membership split"),
            Transition::new(P::Running, P::Upgrading, E::UpgradeActive, "Rolling upgrade started"),
            Transition::new(P::Degraded, P::Running, E::MembershipHealthy, "Fully recovered"),
            Transition::new(P::Degraded, P::Forming, E::PodsReady, "Pods back, membership re-forming"),
            Transition::new(P::Degraded, P::SplitBrain, E::SplitDetected, "Membership split"),
            Transition::new(P::Degraded, P::Upgrading, E::UpgradeActive, "Paused upgrade observed"),
            // Split-brain repair
            Transition::new(P::SplitBrain, P::Degraded, E::ReplicasDegraded, "Minority restarting"),
            Transition::new(P::SplitBrain, P::Forming, E::PodsReady, "Minority rejoining"),
            Transition::new(P::SplitBrain, P::Running, E::MembershipHealthy, "Partition healed"),
            Transition::new(P::SplitBrain, P::Upgrading, E::UpgradeActive, "Upgrade holds pods"),
            // Upgrade
            Transition::new(P::Upgrading, P::Running, E::MembershipHealthy, "Upgrade finished"),
            Transition::new(P::Upgrading, P::Degraded, E::ReplicasDegraded, "Upgrade ended degraded"),
            Transition::new(P::Upgrading, P::Forming, E::PodsReady, "Upgrade ended while forming"),
            Transition::new(P::Upgrading, P::SplitBrain, E::SplitDetected, "Upgrade ended split"),
            // Recovery from an invalid spec
            Transition::new(P::Failed, P::Creating, E::ResourcesApplied, "Spec corrected"),
            Transition::new(P::Failed, P::Forming, E::PodsReady, "Spec corrected"),
            Transition::new(P::Failed, P::Running, E::MembershipHealthy, "Spec corrected"),
            Transition::new(P::Failed, P::Degraded, E::ReplicasDegraded, "Spec corrected"),
            Transition::new(P::Failed, P::Upgrading, E::UpgradeActive, "Spec corrected"),
            Transition::new(P::Failed, P::SplitBrain, E::SplitDetected, "Spec corrected"),
        ];

        for from in [
            P::Pending,
            P::Creating,
            P::Forming,
            P::Running,
            P::Degraded,
            P::SplitBrain,
            P::Upgrading,
        ] {
            transitions.push(Transition::new(
                from,
                P::Failed,
                E::ValidationFailed,
                "Spec failed validation",
            ));
        }
        for from in [
            P::Pending,
            P::Creating,
            P::Forming,
            P::Running,
            P::Degraded,
            P::SplitBrain,
            P::Upgrading,
            P::Failed,
        ] {
            transitions.push(Transition::new(
                from,
                P::Deleting,
                E::DeletionRequested,
                "Deletion requested",
            ));
        }

        Self { transitions }
    }

    /// Check the move from `current` to `next`.
    pub fn transition(
        &self,
        current: ClusterPhase,
        next: ClusterPhase,
        event: ClusterEvent,
    ) -> TransitionResult {
        if current == next {
            return TransitionResult::Unchanged;
        }
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.to == next && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                from: current,
                to: next,
                event,
            },
        }
    }

    pub fn can_transition(&self, from: ClusterPhase, event: ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    pub fn valid_events(&self, state: ClusterPhase) -> Vec<ClusterEvent> {
        let mut events = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == state) {
            if !events.contains(&t.event) {
                events.push(t.event);
            }
        }
        events
    }
}

/// Phase this pass observed, and the event that explains it.
pub fn determine_phase(current: ClusterPhase, ctx: &PhaseContext) -> (ClusterPhase, ClusterEvent) {
    if ctx.deleting {
        return (ClusterPhase::Deleting, ClusterEvent::DeletionRequested);
    }
    if ctx.validation_failed {
        return (ClusterPhase::Failed, ClusterEvent::ValidationFailed);
    }
    if ctx.upgrade_active {
        return (ClusterPhase::Upgrading, ClusterEvent::UpgradeActive);
    }
    if ctx.membership == MembershipHealth::Split {
        return (ClusterPhase::SplitBrain, ClusterEvent::SplitDetected);
    }

    let still_creating = matches!(
        current,
        ClusterPhase::Pending | ClusterPhase::Creating | ClusterPhase::Failed
    );
    if !ctx.all_replicas_ready() {
        return if still_creating {
            (ClusterPhase::Creating, ClusterEvent::ResourcesApplied)
        } else {
            (ClusterPhase::Degraded, ClusterEvent::ReplicasDegraded)
        };
    }

    match ctx.membership {
        MembershipHealth::Healthy => (ClusterPhase::Running, ClusterEvent::MembershipHealthy),
        _ => (ClusterPhase::Forming, ClusterEvent::PodsReady),
    }
}
