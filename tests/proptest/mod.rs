// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for neo4j-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use jiff::Timestamp;
use proptest::prelude::*;

use neo4j_operator::client::{MembershipView, RetryPolicy};
use neo4j_operator::controller::cluster_state_machine::{
    ClusterStateMachine, PhaseContext, TransitionResult, determine_phase,
};
use neo4j_operator::controller::drift::{DriftDecision, evaluate};
use neo4j_operator::controller::split_brain::equivalence_classes;
use neo4j_operator::controller::topology::{
    RenderInputs, ValidatedTopology, derive_config, formation_quorum, resolve_deployment,
    validate_role_hints,
};
use neo4j_operator::crd::{
    ClusterPhase, ConfigurationStatus, MembershipHealth, ModeConstraint, ServerRoleHint,
};

fn any_mode() -> impl Strategy<Value = ModeConstraint> {
    prop_oneof![
        Just(ModeConstraint::None),
        Just(ModeConstraint::Primary),
        Just(ModeConstraint::Secondary),
    ]
}

fn any_phase() -> impl Strategy<Value = ClusterPhase> {
    prop_oneof![
        Just(ClusterPhase::Pending),
        Just(ClusterPhase::Creating),
        Just(ClusterPhase::Forming),
        Just(ClusterPhase::Running),
        Just(ClusterPhase::Degraded),
        Just(ClusterPhase::SplitBrain),
        Just(ClusterPhase::Upgrading),
        Just(ClusterPhase::Failed),
    ]
}

fn any_health() -> impl Strategy<Value = MembershipHealth> {
    prop_oneof![
        Just(MembershipHealth::Unformed),
        Just(MembershipHealth::Converging),
        Just(MembershipHealth::Split),
        Just(MembershipHealth::Healthy),
    ]
}

/// Config keys that pass validation.
fn user_config() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z][a-z0-9_.]{0,20}", "[a-zA-Z0-9]{0,10}"), 0..8)
}

fn topology(constraints: Vec<ModeConstraint>) -> ValidatedTopology {
    ValidatedTopology {
        deployment: resolve_deployment(&constraints),
        constraints,
    }
}

fn at(secs: i64) -> Timestamp {
    Timestamp::from_second(1_800_000_000 + secs).unwrap()
}

proptest! {
    /// Rendering depends on content only, never on insertion order.
    #[test]
    fn derived_config_is_order_independent(
        modes in prop::collection::vec(any_mode(), 1..8),
        entries in user_config(),
    ) {
        let topo = topology(modes);
        let forward: BTreeMap<String, String> = entries.iter().cloned().collect();
        let mut reverse = BTreeMap::new();
        for (k, v) in forward.iter().rev() {
            reverse.insert(k.clone(), v.clone());
        }
        let render = |config: &BTreeMap<String, String>| derive_config(&topo, RenderInputs {
            cluster_name: "graph",
            namespace: "default",
            user_config: config,
            restart_trigger: None,
        });

        let a = render(&forward);
        let b = render(&reverse);
        let again = render(&forward);
        prop_assert_eq!(&a.hash, &b.hash);
        prop_assert_eq!(&a, &again);
        prop_assert_eq!(a.files.len(), topo.constraints.len() + 1);
    }

    /// Any config change produces a different digest.
    #[test]
    fn config_change_changes_hash(
        servers in 1..6usize,
        value_a in "[a-z]{1,8}",
        value_b in "[a-z]{1,8}",
    ) {
        prop_assume!(value_a != value_b);
        let topo = topology(vec![ModeConstraint::None; servers]);
        let render = |value: &str| {
            let config = BTreeMap::from([("db.tx_timeout".to_string(), value.to_string())]);
            derive_config(&topo, RenderInputs {
                cluster_name: "graph",
                namespace: "default",
                user_config: &config,
                restart_trigger: None,
            })
            .hash
        };
        prop_assert_ne!(render(&value_a), render(&value_b));
    }

    /// An all-SECONDARY topology is always rejected.
    #[test]
    fn all_secondary_is_rejected(servers in 1..20i32) {
        let result = validate_role_hints(servers, ModeConstraint::Secondary, &[]);
        prop_assert!(result.is_err());
    }

    /// Every bad hint is reported, not just the first.
    #[test]
    fn every_out_of_range_hint_is_reported(servers in 1..10i32, extra in 1..5i32) {
        let hints: Vec<ServerRoleHint> = (0..extra)
            .map(|i| ServerRoleHint::new(servers + i, ModeConstraint::Primary))
            .collect();
        let violations = validate_role_hints(servers, ModeConstraint::None, &hints).unwrap_err();
        prop_assert_eq!(violations.len(), usize::try_from(extra).unwrap());
    }

    /// Valid hints yield exactly one constraint per server.
    #[test]
    fn valid_hints_cover_every_server(
        modes in prop::collection::vec(any_mode(), 1..10),
        global in any_mode(),
    ) {
        let servers = i32::try_from(modes.len()).unwrap();
        let hints: Vec<ServerRoleHint> = (0..servers)
            .zip(modes.iter())
            .map(|(i, m)| ServerRoleHint::new(i, *m))
            .collect();
        match validate_role_hints(servers, global, &hints) {
            Ok(constraints) => prop_assert_eq!(constraints, modes),
            Err(_) => prop_assert!(modes.iter().all(|m| *m == ModeConstraint::Secondary)),
        }
    }

    /// Quorum is a majority, bounded by primary-eligible servers, never zero.
    #[test]
    fn quorum_bounds(servers in 1..100i32, eligible_raw in 0..100i32) {
        let eligible = eligible_raw.min(servers);
        let quorum = formation_quorum(servers, eligible);
        prop_assert!(quorum >= 1);
        prop_assert!(quorum <= servers / 2 + 1);
        if eligible >= 1 {
            prop_assert!(quorum <= eligible);
        }
    }

    /// Re-evaluating the applied hash never schedules work.
    #[test]
    fn applied_hash_is_noop(hash in "[0-9a-f]{64}", now in 0..1_000_000i64) {
        let state = ConfigurationStatus {
            last_applied_hash: Some(hash.clone()),
            ..Default::default()
        };
        let (decision, next) = evaluate(&state, &hash, at(now), Duration::from_secs(120));
        prop_assert_eq!(decision, DriftDecision::NoOp);
        prop_assert_eq!(next, state);
    }

    /// A pending change applies exactly when its window has elapsed.
    #[test]
    fn pending_change_applies_after_window(waited in 0..600u64, window in 1..300u64) {
        let state = ConfigurationStatus {
            last_applied_hash: Some("old".into()),
            pending_hash: Some("new".into()),
            pending_since: Some(at(0).to_string()),
            ..Default::default()
        };
        let now = at(i64::try_from(waited).unwrap());
        let (decision, next) = evaluate(&state, "new", now, Duration::from_secs(window));
        if waited >= window {
            prop_assert_eq!(decision, DriftDecision::Apply { hash: "new".into() });
            prop_assert_eq!(next.last_applied_hash.as_deref(), Some("new"));
            prop_assert_eq!(next.pending_hash, None);
        } else {
            let is_debounce = matches!(decision, DriftDecision::Debounce { opened: false, .. });
            prop_assert!(is_debounce);
            prop_assert_eq!(next, state);
        }
    }

    /// Equivalence classes partition the pods that reported a view.
    #[test]
    fn equivalence_classes_partition_pods(
        links in prop::collection::vec(prop::collection::vec(any::<bool>(), 6), 6),
    ) {
        let pods: Vec<String> = (0..6).map(|i| format!("graph-{i}")).collect();
        let views: BTreeMap<String, MembershipView> = pods
            .iter()
            .enumerate()
            .map(|(i, pod)| {
                let peers: BTreeSet<String> = pods
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j == i || links[i][*j])
                    .map(|(_, p)| p.clone())
                    .collect();
                (pod.clone(), MembershipView { pod: pod.clone(), peers, observed_at: at(0) })
            })
            .collect();

        let classes = equivalence_classes(&views);

        let mut seen: Vec<String> = classes.iter().flatten().cloned().collect();
        seen.sort();
        let mut expected = pods.clone();
        expected.sort();
        prop_assert_eq!(seen, expected);
        for pair in classes.windows(2) {
            prop_assert!(pair[0].len() >= pair[1].len(), "largest class first");
        }
    }

    /// Backoff never decreases and never exceeds its cap.
    #[test]
    fn backoff_is_monotonic_and_capped(base_ms in 1..1000u64, max_ms in 1..10_000u64) {
        let policy = RetryPolicy {
            attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..=40 {
            let delay = policy.backoff(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    /// Whatever the pass observes, the resulting phase change is in the table.
    #[test]
    fn determined_phase_follows_table(
        current in any_phase(),
        ready in 0..=5i32,
        formed_health in any_health(),
        upgrade_active in any::<bool>(),
    ) {
        // Membership is only Unformed while servers are missing.
        let health = if ready < 5 { MembershipHealth::Unformed } else { formed_health };
        let ctx = PhaseContext {
            ready_replicas: ready,
            desired_replicas: 5,
            membership: health,
            upgrade_active,
            validation_failed: false,
            deleting: false,
        };
        let (next, event) = determine_phase(current, &ctx);
        let result = ClusterStateMachine::new().transition(current, next, event);
        let known = !matches!(result, TransitionResult::InvalidTransition { .. });
        prop_assert!(known, "{} -> {} via {}", current, next, event);
    }

    /// Deletion is reachable from every live phase.
    #[test]
    fn deletion_always_reachable(current in any_phase()) {
        let ctx = PhaseContext {
            ready_replicas: 0,
            desired_replicas: 3,
            membership: MembershipHealth::Unformed,
            upgrade_active: false,
            validation_failed: false,
            deleting: true,
        };
        let (next, event) = determine_phase(current, &ctx);
        prop_assert_eq!(next, ClusterPhase::Deleting);
        let result = ClusterStateMachine::new().transition(current, next, event);
        let reachable = matches!(result, TransitionResult::Success { .. });
        prop_assert!(reachable);
    }
}
