//! Configuration debounce and split-brain repair across passes.

use std::time::Duration;

use neo4j_operator::crd::{ClusterPhase, ConditionType, MembershipHealth};

use crate::mock_state::*;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn set_tx_timeout(h: &Harness, value: &str) {
    h.store.edit(|c| {
        c.spec
            .config
            .insert("db.tx_timeout".to_string(), value.to_string());
    });
}

async fn running_cluster() -> Harness {
    let h = Harness::admitted(spec_with_tag(3, "5.26.0"));
    h.converge().await;
    h
}

// ============================================================================
// Configuration drift
// ============================================================================

#[tokio::test]
async fn test_config_change_waits_for_debounce_window() {
    let h = running_cluster().await;
    let applied_before = h.store.applied().len();
    let hash_before = h.status().configuration.last_applied_hash.clone();

    set_tx_timeout(&h, "30s");
    let requeue = h.reconcile().await.unwrap().unwrap();

    assert!(requeue <= secs(120));
    assert_eq!(h.store.applied().len(), applied_before, "held changes are not applied");
    let status = h.status();
    assert_eq!(status.configuration.last_applied_hash, hash_before);
    assert!(status.configuration.pending_hash.is_some());
    let pending = h.condition(ConditionType::ConfigurationPending).unwrap();
    assert_eq!(pending.status, "True");
    assert_eq!(pending.reason, "Debouncing");
    assert_eq!(h.store.event_count("ConfigurationDriftDetected"), 1);
    assert!(h.store.deleted_pods().is_empty());
}

#[tokio::test]
async fn test_debounce_coalesces_successive_edits() {
    let h = running_cluster().await;

    set_tx_timeout(&h, "30s");
    h.reconcile().await.unwrap();
    let first_pending = h.status().configuration.pending_hash.clone().unwrap();

    // A second edit inside the window restarts it with the newer value.
    h.advance(secs(60));
    set_tx_timeout(&h, "60s");
    h.reconcile().await.unwrap();
    let second_pending = h.status().configuration.pending_hash.clone().unwrap();
    assert_ne!(first_pending, second_pending);
    assert_eq!(h.store.event_count("ConfigurationDriftDetected"), 2);

    // 121s after the first edit, but only 61s after the second.
    h.advance(secs(61));
    h.reconcile().await.unwrap();
    let pending = h.condition(ConditionType::ConfigurationPending).unwrap();
    assert!(pending.message.contains("applies in 59s"), "{}", pending.message);
    assert_ne!(
        h.store.last_applied().unwrap().config_hash,
        second_pending,
        "still inside the restarted window"
    );

    h.advance(secs(60));
    h.reconcile().await.unwrap();

    let manifest = h.store.last_applied().unwrap();
    assert_eq!(manifest.config_hash, second_pending, "only the latest value is applied");
    assert!(h.store.applied().iter().all(|m| m.config_hash != first_pending));
    let status = h.status();
    assert_eq!(status.configuration.last_applied_hash.as_deref(), Some(second_pending.as_str()));
    assert_eq!(status.configuration.pending_hash, None);
    assert_eq!(h.store.event_count("ConfigurationApplied"), 2, "creation plus this change");
}

#[tokio::test]
async fn test_reverted_change_is_dropped() {
    let h = running_cluster().await;
    let applied_before = h.store.applied().len();

    set_tx_timeout(&h, "30s");
    h.reconcile().await.unwrap();
    h.store.edit(|c| {
        c.spec.config.remove("db.tx_timeout");
    });
    h.reconcile().await.unwrap();

    let status = h.status();
    assert_eq!(status.configuration.pending_hash, None);
    assert_eq!(h.condition(ConditionType::ConfigurationPending).unwrap().status, "False");
    assert_eq!(h.store.applied().len(), applied_before + 1);
    assert!(h.store.deleted_pods().is_empty());
}

#[tokio::test]
async fn test_applied_config_rolls_one_server_at_a_time() {
    let h = running_cluster().await;

    set_tx_timeout(&h, "30s");
    h.reconcile().await.unwrap();
    h.advance(secs(121));
    h.reconcile().await.unwrap();

    assert_eq!(h.store.deleted_pods(), vec!["graph-0"]);
    assert_eq!(h.store.event_count("ConfigurationRollout"), 1);

    // graph-0 is not back yet: nothing else restarts.
    h.reconcile().await.unwrap();
    assert_eq!(h.store.deleted_pods(), vec!["graph-0"]);

    h.settle();
    h.reconcile().await.unwrap();
    assert_eq!(h.store.deleted_pods(), vec!["graph-0", "graph-1"]);

    h.settle();
    h.reconcile().await.unwrap();
    h.settle();
    h.reconcile().await.unwrap();
    assert_eq!(h.store.deleted_pods(), vec!["graph-0", "graph-1", "graph-2"]);

    let hash = h.status().configuration.last_applied_hash.unwrap();
    assert!(h.store.pods().iter().all(|p| p.config_hash.as_deref() == Some(hash.as_str())));
    assert_eq!(h.status().phase, ClusterPhase::Running);
}

#[tokio::test]
async fn test_restart_annotation_rolls_the_cluster() {
    let h = running_cluster().await;
    let hash_before = h.status().configuration.last_applied_hash.clone();

    h.set_annotation(
        neo4j_operator::controller::common::RESTART_REQUESTED_ANNOTATION,
        "2027-01-01T00:00:00Z",
    );
    h.reconcile().await.unwrap();
    assert!(h.store.deleted_pods().is_empty(), "restarts are debounced like any change");

    h.advance(secs(121));
    h.reconcile().await.unwrap();
    assert_ne!(h.status().configuration.last_applied_hash, hash_before);
    assert_eq!(h.store.deleted_pods(), vec!["graph-0"]);
}

// ============================================================================
// Split brain
// ============================================================================

#[tokio::test]
async fn test_split_brain_repair_with_cooldown() {
    let h = running_cluster().await;
    h.probe.partition(&[&[0, 1], &[2]]);

    // A fresh disagreement is only converging.
    h.reconcile().await.unwrap();
    assert_eq!(h.status().membership.health, MembershipHealth::Converging);
    assert!(h.store.deleted_pods().is_empty());

    // Persisting past the grace period makes it a split; the minority restarts.
    h.advance(secs(181));
    h.reconcile().await.unwrap();
    let status = h.status();
    assert_eq!(status.membership.health, MembershipHealth::Split);
    assert_eq!(status.phase, ClusterPhase::SplitBrain);
    assert_eq!(status.membership.last_repaired_pods, vec!["graph-2"]);
    assert_eq!(h.store.deleted_pods(), vec!["graph-2"]);
    assert_eq!(h.store.event_count("SplitBrainDetected"), 1);
    assert_eq!(h.store.event_count("SplitBrainRepaired"), 1);
    let cond = h.condition(ConditionType::SplitBrainDetected).unwrap();
    assert_eq!(cond.status, "True");
    assert_eq!(cond.reason, "MinorityRestarted");

    // The restarted server comes back still partitioned; the cooldown holds.
    h.settle();
    h.advance(secs(181));
    h.reconcile().await.unwrap();
    assert_eq!(h.status().membership.health, MembershipHealth::Split);
    assert_eq!(h.store.deleted_pods(), vec!["graph-2"]);
    assert_eq!(
        h.condition(ConditionType::SplitBrainDetected).unwrap().reason,
        "RepairCoolingDown"
    );

    // Once the cooldown has elapsed, the repair runs again.
    h.advance(secs(120));
    h.reconcile().await.unwrap();
    assert_eq!(h.store.deleted_pods(), vec!["graph-2", "graph-2"]);
    assert_eq!(h.store.event_count("SplitBrainRepaired"), 2);

    h.probe.agree(3);
    h.converge().await;
    let status = h.status();
    assert_eq!(status.membership.health, MembershipHealth::Healthy);
    assert_eq!(h.condition(ConditionType::SplitBrainDetected).unwrap().status, "False");
}

#[tokio::test]
async fn test_unreachable_server_is_not_evidence_of_split() {
    let h = running_cluster().await;
    h.probe.set_unreachable(2);

    h.reconcile().await.unwrap();
    h.advance(secs(600));
    h.reconcile().await.unwrap();

    let status = h.status();
    assert_eq!(status.membership.health, MembershipHealth::Converging);
    assert_eq!(status.phase, ClusterPhase::Forming);
    assert!(h.store.deleted_pods().is_empty());
    assert_eq!(h.store.event_count("SplitBrainDetected"), 0);
}

#[tokio::test]
async fn test_readiness_change_restarts_grace_period() {
    let h = running_cluster().await;
    h.probe.partition(&[&[0, 1], &[2]]);
    h.reconcile().await.unwrap();

    // graph-1 flaps 100s in; the grace period counts from its return.
    h.advance(secs(100));
    h.ctx.store.delete_pod(NAMESPACE, "graph-1").await.unwrap();
    h.settle();
    h.advance(secs(100));
    h.reconcile().await.unwrap();

    assert_eq!(h.status().membership.health, MembershipHealth::Converging);
    assert_eq!(h.store.deleted_pods(), vec!["graph-1"]);

    h.advance(secs(81));
    h.reconcile().await.unwrap();
    assert_eq!(h.status().membership.health, MembershipHealth::Split);
}
