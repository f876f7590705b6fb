//! State machine for rolling upgrade phase transitions.
//!
//! Transitions are a static table with guards evaluated against a
//! [`UpgradeTransitionContext`]. The orchestrator derives an event from the
//! current observation with [`determine_upgrade_event`] and only moves the
//! phase when the table accepts it.

use crate::crd::UpgradePhase;

// ============================================================================
// Upgrade Events
// ============================================================================

/// Events that can trigger upgrade phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeEvent {
    /// Pre-upgrade health gate passed.
    PreChecksPassed,

    /// Every planned server runs the target version and the post gate passed.
    AllServersUpgraded,

    /// A restarted server did not rejoin within the step timeout.
    StepTimedOut,

    /// The cluster split or the post-upgrade gate did not pass in time.
    HealthGateFailed,

    /// A new resume token was observed.
    Resumed,

    /// A new abort token was observed.
    Aborted,
}

impl std::fmt::Display for UpgradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeEvent::PreChecksPassed => write!(f, "PreChecksPassed"),
            UpgradeEvent::AllServersUpgraded => write!(f, "AllServersUpgraded"),
            UpgradeEvent::StepTimedOut => write!(f, "StepTimedOut"),
            UpgradeEvent::HealthGateFailed => write!(f, "HealthGateFailed"),
            UpgradeEvent::Resumed => write!(f, "Resumed"),
            UpgradeEvent::Aborted => write!(f, "Aborted"),
        }
    }
}

// ============================================================================
// Transition Context
// ============================================================================

/// Observation used to pick events and evaluate guards.
#[derive(Debug, Clone, Default)]
pub struct UpgradeTransitionContext {
    /// Membership classification is `Healthy`.
    pub cluster_healthy: bool,

    /// Membership classification is `Split`.
    pub cluster_split: bool,

    pub pre_gate_enabled: bool,
    pub post_gate_enabled: bool,
    pub auto_pause: bool,

    /// No configuration change is waiting in a debounce window.
    pub config_settled: bool,

    pub total_servers: i32,
    pub upgraded_servers: i32,
    pub in_flight: i32,

    /// An in-flight server exceeded the step timeout.
    pub step_timed_out: bool,

    /// The post-upgrade gate waited longer than the step timeout.
    pub post_gate_timed_out: bool,

    pub resume_requested: bool,
    pub abort_requested: bool,
}

impl UpgradeTransitionContext {
    pub fn all_servers_upgraded(&self) -> bool {
        self.upgraded_servers >= self.total_servers && self.in_flight == 0
    }

    pub fn pre_gate_passed(&self) -> bool {
        self.config_settled && (!self.pre_gate_enabled || self.cluster_healthy)
    }

    pub fn post_gate_passed(&self) -> bool {
        !self.post_gate_enabled || self.cluster_healthy
    }
}

// ============================================================================
// Upgrade Transition
// ============================================================================

/// Represents a single state transition.
#[derive(Debug, Clone)]
pub struct UpgradeTransition {
    pub from: UpgradePhase,
    pub to: UpgradePhase,
    pub event: UpgradeEvent,
    pub description: &'static str,
}

// ============================================================================
// Upgrade State Machine
// ============================================================================

/// Transition table for rolling upgrades.
#[derive(Debug, Clone, Default)]
pub struct UpgradeStateMachine {
    transitions: Vec<UpgradeTransition>,
}

impl UpgradeStateMachine {
    pub fn new() -> Self {
        let t = |from, to, event, description| UpgradeTransition {
            from,
            to,
            event,
            description,
        };
        let transitions = vec![
            // From Pending
            t(
                UpgradePhase::Pending,
                UpgradePhase::InProgress,
                UpgradeEvent::PreChecksPassed,
                "Pre-upgrade gate passed, begin restarting servers",
            ),
            t(
                UpgradePhase::Pending,
                UpgradePhase::Failed,
                UpgradeEvent::Aborted,
                "Upgrade aborted before it started",
            ),
            // From InProgress
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Completed,
                UpgradeEvent::AllServersUpgraded,
                "All servers upgraded and cluster healthy",
            ),
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Paused,
                UpgradeEvent::StepTimedOut,
                "Server did not rejoin in time, pausing",
            ),
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Paused,
                UpgradeEvent::HealthGateFailed,
                "Health gate failed, pausing",
            ),
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Failed,
                UpgradeEvent::StepTimedOut,
                "Server did not rejoin in time",
            ),
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Failed,
                UpgradeEvent::HealthGateFailed,
                "Health gate failed",
            ),
            t(
                UpgradePhase::InProgress,
                UpgradePhase::Failed,
                UpgradeEvent::Aborted,
                "Upgrade aborted",
            ),
            // From Paused
            t(
                UpgradePhase::Paused,
                UpgradePhase::InProgress,
                UpgradeEvent::Resumed,
                "Upgrade resumed",
            ),
            t(
                UpgradePhase::Paused,
                UpgradePhase::Failed,
                UpgradeEvent::Aborted,
                "Paused upgrade aborted",
            ),
        ];

        Self { transitions }
    }

    /// Transition for `event` from `from`, if the table has one whose
    /// guard passes.
    pub fn transition(
        &self,
        from: UpgradePhase,
        event: UpgradeEvent,
        ctx: &UpgradeTransitionContext,
    ) -> Option<UpgradeTransition> {
        self.transitions
            .iter()
            .filter(|t| t.from == from && t.event == event)
            .find(|t| self.evaluate_guards(t, ctx))
            .cloned()
    }

    fn evaluate_guards(
        &self,
        transition: &UpgradeTransition,
        ctx: &UpgradeTransitionContext,
    ) -> bool {
        match (transition.from, transition.to, transition.event) {
            (UpgradePhase::Pending, UpgradePhase::InProgress, _) => ctx.pre_gate_passed(),

            (UpgradePhase::InProgress, UpgradePhase::Completed, _) => {
                ctx.all_servers_upgraded() && ctx.post_gate_passed()
            }

            (UpgradePhase::InProgress, UpgradePhase::Paused, _) => ctx.auto_pause,

            (
                UpgradePhase::InProgress,
                UpgradePhase::Failed,
                UpgradeEvent::StepTimedOut | UpgradeEvent::HealthGateFailed,
            ) => !ctx.auto_pause,

            _ => true,
        }
    }

    /// Check if a phase transition is valid (without guards).
    pub fn can_transition(&self, from: UpgradePhase, to: UpgradePhase) -> bool {
        from == to
            || self
                .transitions
                .iter()
                .any(|t| t.from == from && t.to == to)
    }

    pub fn valid_transitions(&self, from: UpgradePhase) -> Vec<UpgradePhase> {
        let mut phases: Vec<UpgradePhase> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == from) {
            if !phases.contains(&t.to) {
                phases.push(t.to);
            }
        }
        phases
    }
}

/// Pick the event for the current phase.
///
/// Priority: abort, then step timeout, then health gate, then progress.
pub fn determine_upgrade_event(
    phase: UpgradePhase,
    ctx: &UpgradeTransitionContext,
) -> Option<UpgradeEvent> {
    if phase.is_terminal() {
        return None;
    }
    if ctx.abort_requested {
        return Some(UpgradeEvent::Aborted);
    }

    match phase {
        UpgradePhase::Pending => ctx
            .pre_gate_passed()
            .then_some(UpgradeEvent::PreChecksPassed),

        UpgradePhase::InProgress => {
            if ctx.step_timed_out {
                Some(UpgradeEvent::StepTimedOut)
            } else if ctx.cluster_split || ctx.post_gate_timed_out {
                Some(UpgradeEvent::HealthGateFailed)
            } else if ctx.all_servers_upgraded() && ctx.post_gate_passed() {
                Some(UpgradeEvent::AllServersUpgraded)
            } else {
                None
            }
        }

        UpgradePhase::Paused => ctx.resume_requested.then_some(UpgradeEvent::Resumed),

        UpgradePhase::Completed | UpgradePhase::Failed => None,
    }
}
