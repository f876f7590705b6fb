//! StatefulSet generation for Neo4j clusters.
//!
//! Creates a StatefulSet with proper configuration for Neo4j cluster operation:
//! - Stable network identity via headless service
//! - Persistent storage for the data directory
//! - OnDelete updates, so restarts only happen when the operator deletes a pod
//! - Per-server configuration assembled at startup from the ConfigMap

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector,
    SecurityContext, TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::controller::topology::{DeploymentRef, SHARED_CONFIG_FILE, TargetManifest};
use crate::crd::{BOLT_PORT, CLUSTER_PORT, HTTP_PORT, Neo4jCluster, RAFT_PORT};
use crate::resources::CONFIG_HASH_ANNOTATION;
use crate::resources::common::{
    config_map_name, headless_service_name, non_empty, owner_reference, pod_selector_labels,
    standard_annotations, standard_labels,
};

/// Name of the Neo4j container in every server pod.
pub const CONTAINER_NAME: &str = "neo4j";
/// neo4j user ID in the official container image
const NEO4J_USER_ID: i64 = 7474;
/// Time for a server to leave the cluster and flush transactions
const TERMINATION_GRACE_PERIOD: i64 = 120;

const CONFIG_SOURCE_DIR: &str = "/config";
const CONF_DIR: &str = "/conf";
const DATA_DIR: &str = "/data";

/// Generate a StatefulSet for a Neo4jCluster.
///
/// The StatefulSet provides:
/// - Stable network identity (graph-0, graph-1, etc.)
/// - Persistent storage via PVC templates
/// - Parallel start, since discovery waits for the formation quorum anyway
pub fn generate_statefulset(cluster: &Neo4jCluster, manifest: &TargetManifest) -> StatefulSet {
    let labels = standard_labels(cluster);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(cluster.name_any()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            annotations: non_empty(standard_annotations(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(manifest.replicas),
            service_name: Some(headless_service_name(cluster)),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(cluster)),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(cluster, manifest, labels),
            volume_claim_templates: Some(vec![generate_pvc_template(cluster)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the pod template for the StatefulSet.
///
/// The config hash annotation lets the drift manager tell which pods run
/// the current configuration.
fn generate_pod_template(
    cluster: &Neo4jCluster,
    manifest: &TargetManifest,
    labels: BTreeMap<String, String>,
) -> PodTemplateSpec {
    let mut annotations = standard_annotations(cluster);
    annotations.insert(
        CONFIG_HASH_ANNOTATION.to_string(),
        manifest.config_hash.clone(),
    );

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(generate_pod_security_context()),
            containers: vec![generate_neo4j_container(cluster, manifest)],
            volumes: Some(generate_volumes(cluster)),
            ..Default::default()
        }),
    }
}

fn generate_pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(NEO4J_USER_ID),
        run_as_group: Some(NEO4J_USER_ID),
        fs_group: Some(NEO4J_USER_ID),
        seccomp_profile: Some(k8s_openapi::api::core::v1::SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the main Neo4j container.
fn generate_neo4j_container(cluster: &Neo4jCluster, manifest: &TargetManifest) -> Container {
    let mut ports = vec![
        container_port("bolt", BOLT_PORT),
        container_port("http", HTTP_PORT),
    ];
    match manifest.deployment {
        DeploymentRef::Cluster { .. } => {
            ports.push(container_port("cluster", CLUSTER_PORT));
            ports.push(container_port("raft", RAFT_PORT));
        }
        DeploymentRef::Standalone => {}
    }

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(manifest.image.clone()),
        image_pull_policy: Some(cluster.spec.image.pull_policy.clone()),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
        args: Some(vec![startup_script(cluster, manifest.deployment)]),
        ports: Some(ports),
        env: Some(generate_env_vars(cluster)),
        resources: Some(generate_resource_requirements(cluster)),
        volume_mounts: Some(generate_volume_mounts()),
        security_context: Some(generate_container_security_context()),
        startup_probe: Some(generate_startup_probe()),
        liveness_probe: Some(generate_liveness_probe()),
        readiness_probe: Some(generate_readiness_probe()),
        ..Default::default()
    }
}

/// Shell run as the container entrypoint.
///
/// Builds `/conf/neo4j.conf` from the shared file plus this server's own
/// file (selected by ordinal), appends the advertised addresses, then hands
/// over to the image's entrypoint.
fn startup_script(cluster: &Neo4jCluster, deployment: DeploymentRef) -> String {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let fqdn = format!(
        "${{POD_NAME}}.{}.{namespace}.svc.cluster.local",
        headless_service_name(cluster)
    );

    let mut lines = vec![
        "set -euo pipefail".to_string(),
        "ordinal=\"${POD_NAME##*-}\"".to_string(),
        format!(
            "cat {CONFIG_SOURCE_DIR}/{SHARED_CONFIG_FILE} \"{CONFIG_SOURCE_DIR}/server-${{ordinal}}.conf\" > {CONF_DIR}/{SHARED_CONFIG_FILE}"
        ),
        format!("echo \"server.default_listen_address=0.0.0.0\" >> {CONF_DIR}/{SHARED_CONFIG_FILE}"),
        format!("echo \"server.default_advertised_address={fqdn}\" >> {CONF_DIR}/{SHARED_CONFIG_FILE}"),
    ];
    match deployment {
        DeploymentRef::Cluster { .. } => {
            lines.push(format!(
                "echo \"server.cluster.advertised_address={fqdn}:{CLUSTER_PORT}\" >> {CONF_DIR}/{SHARED_CONFIG_FILE}"
            ));
            lines.push(format!(
                "echo \"server.cluster.raft.advertised_address={fqdn}:{RAFT_PORT}\" >> {CONF_DIR}/{SHARED_CONFIG_FILE}"
            ));
        }
        DeploymentRef::Standalone => {}
    }
    lines.push(
        "case \"${NEO4J_PASSWORD:-}\" in '') export NEO4J_AUTH=none ;; */*) export NEO4J_AUTH=\"$NEO4J_PASSWORD\" ;; *) export NEO4J_AUTH=\"neo4j/$NEO4J_PASSWORD\" ;; esac"
            .to_string(),
    );
    lines.push("exec /startup/docker-entrypoint.sh neo4j".to_string());
    lines.join("\n")
}

fn generate_env_vars(cluster: &Neo4jCluster) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "NEO4J_ACCEPT_LICENSE_AGREEMENT".to_string(),
            value: Some("yes".to_string()),
            ..Default::default()
        },
    ];

    if let Some(auth) = &cluster.spec.auth {
        env.push(EnvVar {
            name: "NEO4J_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: auth.secret_ref.name.clone(),
                    key: auth.secret_ref.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    env
}

/// Requests and limits are equal; Neo4j sizes its heap from the limit.
fn generate_resource_requirements(cluster: &Neo4jCluster) -> ResourceRequirements {
    let mut quantities = BTreeMap::new();
    quantities.insert(
        "cpu".to_string(),
        Quantity(cluster.spec.resources.cpu.clone()),
    );
    quantities.insert(
        "memory".to_string(),
        Quantity(cluster.spec.resources.memory.clone()),
    );

    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}

fn generate_container_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(false),
        run_as_non_root: Some(true),
        run_as_user: Some(NEO4J_USER_ID),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tcp_probe(port: &str) -> Option<TCPSocketAction> {
    Some(TCPSocketAction {
        port: IntOrString::String(port.to_string()),
        ..Default::default()
    })
}

/// Generate startup probe.
///
/// Store recovery after an unclean shutdown can take minutes.
fn generate_startup_probe() -> Probe {
    Probe {
        tcp_socket: tcp_probe("bolt"),
        // 120 failures * 5 seconds = 10 minutes
        failure_threshold: Some(120),
        period_seconds: Some(5),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

fn generate_liveness_probe() -> Probe {
    Probe {
        tcp_socket: tcp_probe("bolt"),
        period_seconds: Some(15),
        timeout_seconds: Some(5),
        failure_threshold: Some(4),
        ..Default::default()
    }
}

fn generate_readiness_probe() -> Probe {
    Probe {
        tcp_socket: tcp_probe("http"),
        period_seconds: Some(5),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        success_threshold: Some(1),
        ..Default::default()
    }
}

fn generate_volumes(cluster: &Neo4jCluster) -> Vec<Volume> {
    vec![
        Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(cluster),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "conf".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ]
}

fn generate_volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_SOURCE_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "conf".to_string(),
            mount_path: CONF_DIR.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "data".to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        },
    ]
}

/// Generate PVC template for the StatefulSet.
fn generate_pvc_template(cluster: &Neo4jCluster) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(cluster.spec.storage.size.clone()),
    );

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
