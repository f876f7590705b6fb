//! Topology reaching the rendered configuration and the status.

use neo4j_operator::controller::topology::{ENDPOINTS_KEY, QUORUM_KEY, SHARED_CONFIG_FILE};
use neo4j_operator::crd::{
    ClusterPhase, MembershipHealth, ModeConstraint, ServerRoleHint,
};

use crate::mock_state::*;

#[tokio::test]
async fn test_role_hints_render_per_server_constraints() {
    let mut spec = spec_with_tag(5, "5.26.0");
    spec.mode_constraint = ModeConstraint::Secondary;
    spec.server_role_hints = vec![
        ServerRoleHint::new(0, ModeConstraint::Primary),
        ServerRoleHint::new(1, ModeConstraint::None),
    ];
    let h = Harness::admitted(spec);
    h.probe.agree(5);

    h.converge().await;

    let manifest = h.store.last_applied().unwrap();
    let files = &manifest.config_files;
    assert!(files["server-0.conf"].contains("initial.server.mode_constraint=PRIMARY"));
    assert!(files["server-1.conf"].contains("initial.server.mode_constraint=NONE"));
    for ordinal in 2..5 {
        assert!(
            files[&format!("server-{ordinal}.conf")]
                .contains("initial.server.mode_constraint=SECONDARY")
        );
    }

    // Majority of 5 is 3, but only two servers may host primaries.
    let shared = &files[SHARED_CONFIG_FILE];
    assert!(shared.contains(&format!("{QUORUM_KEY}=2")));
    assert!(shared.contains("graph-4.graph-headless.default.svc.cluster.local:6000"));

    let status = h.status();
    let modes: Vec<ModeConstraint> = status.servers.iter().map(|s| s.mode_constraint).collect();
    assert_eq!(
        modes,
        vec![
            ModeConstraint::Primary,
            ModeConstraint::None,
            ModeConstraint::Secondary,
            ModeConstraint::Secondary,
            ModeConstraint::Secondary,
        ]
    );
    assert_eq!(
        status.endpoints.unwrap().bolt,
        "neo4j://graph.default.svc.cluster.local:7687"
    );
}

#[tokio::test]
async fn test_standalone_server_needs_no_discovery() {
    let h = Harness::admitted(spec_with_tag(1, "5.26.0"));

    h.converge().await;

    let manifest = h.store.last_applied().unwrap();
    assert_eq!(manifest.replicas, 1);
    let shared = &manifest.config_files[SHARED_CONFIG_FILE];
    assert!(!shared.contains(ENDPOINTS_KEY));
    assert!(!shared.contains(QUORUM_KEY));
    assert_eq!(h.status().membership.health, MembershipHealth::Healthy);
    assert_eq!(h.status().phase, ClusterPhase::Running);
    assert_eq!(h.probe.queries(), 0, "a standalone server is never queried");
}

#[tokio::test]
async fn test_user_config_is_rendered_into_shared_file() {
    let mut spec = spec_with_tag(3, "5.26.0");
    spec.config
        .insert("server.memory.heap.max_size".into(), "2g".into());
    let h = Harness::admitted(spec);

    h.converge().await;

    let manifest = h.store.last_applied().unwrap();
    assert!(manifest.config_files[SHARED_CONFIG_FILE].contains("server.memory.heap.max_size=2g"));
    assert_eq!(
        h.status().configuration.last_applied_hash.as_deref(),
        Some(manifest.config_hash.as_str())
    );
}

#[tokio::test]
async fn test_reserved_config_key_is_rejected() {
    let mut spec = spec_with_tag(3, "5.26.0");
    spec.config.insert(QUORUM_KEY.into(), "1".into());
    let h = Harness::admitted(spec);

    let err = h.reconcile().await.unwrap_err();

    assert!(err.violations()[0].contains("managed by the operator"));
    assert!(h.store.applied().is_empty());
}

#[tokio::test]
async fn test_all_secondary_topology_is_rejected() {
    let mut spec = spec_with_tag(3, "5.26.0");
    spec.mode_constraint = ModeConstraint::Secondary;
    let h = Harness::admitted(spec);

    let err = h.reconcile().await.unwrap_err();

    assert!(
        err.violations()
            .iter()
            .any(|v| v.contains("constrained to SECONDARY"))
    );
    assert_eq!(h.status().phase, ClusterPhase::Failed);
}
