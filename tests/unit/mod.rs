// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for neo4j-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use neo4j_operator::crd::{
        ClusterPhase, Condition, MembershipHealth, ModeConstraint, Neo4jClusterSpec,
        UpgradeOrder, UpgradePhase,
    };

    #[test]
    fn test_phase_display() {
        assert_eq!(ClusterPhase::Pending.to_string(), "Pending");
        assert_eq!(ClusterPhase::Forming.to_string(), "Forming");
        assert_eq!(ClusterPhase::Running.to_string(), "Running");
        assert_eq!(ClusterPhase::SplitBrain.to_string(), "SplitBrain");
        assert_eq!(ClusterPhase::Upgrading.to_string(), "Upgrading");
        assert_eq!(ClusterPhase::Deleting.to_string(), "Deleting");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ClusterPhase::default(), ClusterPhase::Pending);
        assert_eq!(MembershipHealth::default(), MembershipHealth::Unformed);
        assert_eq!(UpgradePhase::default(), UpgradePhase::Pending);
        assert_eq!(ModeConstraint::default(), ModeConstraint::None);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: Neo4jClusterSpec = serde_json::from_value(serde_json::json!({
            "serverRoleHints": [{"serverIndex": 0, "modeConstraint": "PRIMARY"}],
            "image": {"tag": "5.26.0"},
            "consistency": {"configDebounceSeconds": 30}
        }))
        .unwrap();

        assert_eq!(spec.servers, 3);
        assert_eq!(spec.server_role_hints[0].mode_constraint, "PRIMARY");
        assert_eq!(spec.image.repository, "neo4j");
        assert_eq!(spec.image.reference_for("5.27.0"), "neo4j:5.27.0");
        assert_eq!(spec.upgrade_strategy.max_unavailable, 1);
        assert_eq!(spec.upgrade_strategy.step_timeout_seconds, 600);
        assert!(spec.upgrade_strategy.auto_pause);
        assert_eq!(spec.upgrade_strategy.order, UpgradeOrder::default());
        assert_eq!(spec.consistency.config_debounce_seconds, Some(30));
        assert_eq!(spec.consistency.split_brain_grace_seconds, None);
    }

    #[test]
    fn test_mode_constraint_parse() {
        assert_eq!("SECONDARY".parse::<ModeConstraint>(), Ok(ModeConstraint::Secondary));
        assert!("secondary".parse::<ModeConstraint>().is_err());
        assert!(!ModeConstraint::Secondary.allows_primary());
        assert!(ModeConstraint::None.allows_primary());
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Running", "3/3 servers ready", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert!(condition.is_true());
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_degraded() {
        let condition = Condition::degraded(false, "Running", "", None);
        assert_eq!(condition.r#type, "Degraded");
        assert_eq!(condition.status, "False");
    }

    #[test]
    fn test_holds_pods() {
        assert!(UpgradePhase::InProgress.holds_pods());
        assert!(UpgradePhase::Paused.holds_pods());
        assert!(!UpgradePhase::Pending.holds_pods());
        assert!(UpgradePhase::Completed.is_terminal());
        assert!(UpgradePhase::Failed.is_terminal());
    }
}

mod upgrade_state_machine_tests {
    use neo4j_operator::controller::upgrade_state_machine::{
        UpgradeEvent, UpgradeStateMachine, UpgradeTransitionContext, determine_upgrade_event,
    };
    use neo4j_operator::crd::UpgradePhase;

    fn healthy() -> UpgradeTransitionContext {
        UpgradeTransitionContext {
            cluster_healthy: true,
            pre_gate_enabled: true,
            post_gate_enabled: true,
            auto_pause: true,
            config_settled: true,
            total_servers: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_pending_waits_for_settled_config() {
        let mut ctx = healthy();
        ctx.config_settled = false;
        assert_eq!(determine_upgrade_event(UpgradePhase::Pending, &ctx), None);
        ctx.config_settled = true;
        assert_eq!(
            determine_upgrade_event(UpgradePhase::Pending, &ctx),
            Some(UpgradeEvent::PreChecksPassed)
        );
    }

    #[test]
    fn test_timeout_fails_without_auto_pause() {
        let sm = UpgradeStateMachine::new();
        let mut ctx = healthy();
        ctx.step_timed_out = true;
        let paused = sm
            .transition(UpgradePhase::InProgress, UpgradeEvent::StepTimedOut, &ctx)
            .unwrap();
        assert_eq!(paused.to, UpgradePhase::Paused);

        ctx.auto_pause = false;
        let failed = sm
            .transition(UpgradePhase::InProgress, UpgradeEvent::StepTimedOut, &ctx)
            .unwrap();
        assert_eq!(failed.to, UpgradePhase::Failed);
    }

    #[test]
    fn test_abort_wins_over_everything() {
        let mut ctx = healthy();
        ctx.abort_requested = true;
        ctx.step_timed_out = true;
        for phase in [UpgradePhase::Pending, UpgradePhase::InProgress, UpgradePhase::Paused] {
            assert_eq!(determine_upgrade_event(phase, &ctx), Some(UpgradeEvent::Aborted));
        }
        assert_eq!(determine_upgrade_event(UpgradePhase::Completed, &ctx), None);
    }

    #[test]
    fn test_completed_is_terminal() {
        let sm = UpgradeStateMachine::new();
        assert!(sm.valid_transitions(UpgradePhase::Completed).is_empty());
        assert!(sm.can_transition(UpgradePhase::Paused, UpgradePhase::InProgress));
        assert!(!sm.can_transition(UpgradePhase::Completed, UpgradePhase::InProgress));
    }
}

mod config_tests {
    use std::time::Duration;

    use neo4j_operator::OperatorConfig;
    use neo4j_operator::crd::ConsistencySpec;

    #[test]
    fn test_env_overrides() {
        let config = OperatorConfig::from_lookup(|key| match key {
            "NEO4J_OPERATOR_SPLIT_BRAIN_GRACE_SECONDS" => Some("60".to_string()),
            "NEO4J_OPERATOR_WORKER_CONCURRENCY" => Some(" 8 ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.split_brain_grace, Duration::from_secs(60));
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.repair_cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let err = OperatorConfig::from_lookup(|key| {
            (key == "NEO4J_OPERATOR_RESYNC_SECONDS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert_eq!(err.key, "NEO4J_OPERATOR_RESYNC_SECONDS");
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn test_per_cluster_tunables() {
        let config = OperatorConfig::default();
        let tunables = config.tunables_for(&ConsistencySpec {
            repair_cooldown_seconds: Some(30),
            ..Default::default()
        });
        assert_eq!(tunables.repair_cooldown, Duration::from_secs(30));
        assert_eq!(tunables.split_brain_grace, config.split_brain_grace);
        assert_eq!(tunables.config_debounce, config.config_debounce);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = OperatorConfig {
            conflict_retry_attempts: 7,
            conflict_retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.attempts, 7);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
    }
}

mod resource_tests {
    use std::collections::BTreeMap;

    use neo4j_operator::controller::topology::{
        RenderInputs, TargetManifest, derive_config,
    };
    use neo4j_operator::controller::validation::validate_spec;
    use neo4j_operator::crd::{Neo4jCluster, Neo4jClusterSpec};
    use neo4j_operator::resources::CONFIG_HASH_ANNOTATION;
    use neo4j_operator::resources::configmap::generate_configmap;
    use neo4j_operator::resources::statefulset::generate_statefulset;

    fn manifest(cluster: &Neo4jCluster) -> TargetManifest {
        let topology = validate_spec(&cluster.spec, None).unwrap();
        let derived = derive_config(
            &topology,
            RenderInputs {
                cluster_name: "graph",
                namespace: "default",
                user_config: &BTreeMap::new(),
                restart_trigger: None,
            },
        );
        TargetManifest::new(&topology, cluster.spec.image.reference_for("5.26.0"), derived)
    }

    #[test]
    fn test_configmap_and_statefulset_share_hash() {
        let mut cluster = Neo4jCluster::new("graph", Neo4jClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_string());
        let manifest = manifest(&cluster);

        let cm = generate_configmap(&cluster, &manifest);
        let sts = generate_statefulset(&cluster, &manifest);

        let cm_hash = &cm.metadata.annotations.unwrap()[CONFIG_HASH_ANNOTATION];
        let pod_hash = sts.spec.unwrap().template.metadata.unwrap().annotations.unwrap()
            [CONFIG_HASH_ANNOTATION]
            .clone();
        assert_eq!(cm_hash, &manifest.config_hash);
        assert_eq!(pod_hash, manifest.config_hash);
        assert_eq!(cm.data.unwrap().len(), 4, "shared file plus one per server");
    }
}
