//! Service generation for Neo4j clusters.
//!
//! Creates two services:
//! - **Headless Service**: per-server DNS used by discovery and the admin probe
//! - **Client Service**: Bolt and HTTP access load balanced across ready servers

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{BOLT_PORT, CLUSTER_PORT, HTTP_PORT, Neo4jCluster, RAFT_PORT};
use crate::resources::common::{
    client_service_name, headless_service_name, non_empty, owner_reference, pod_selector_labels,
    standard_annotations, standard_labels,
};

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Ports every server listens on for clients.
fn client_ports() -> Vec<ServicePort> {
    vec![tcp_port("bolt", BOLT_PORT), tcp_port("http", HTTP_PORT)]
}

fn service_metadata(cluster: &Neo4jCluster, name: String, service_type: &str) -> ObjectMeta {
    let mut labels = standard_labels(cluster);
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        service_type.to_string(),
    );

    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels),
        annotations: non_empty(standard_annotations(cluster)),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}

/// Generate a headless Service for discovery.
///
/// `publishNotReadyAddresses` is required: servers resolve each other
/// through this service while forming, before any of them is ready.
/// Discovery and raft ports are only exposed when more than one server runs.
pub fn generate_headless_service(cluster: &Neo4jCluster) -> Service {
    let mut ports = client_ports();
    if cluster.spec.servers > 1 {
        ports.push(tcp_port("cluster", CLUSTER_PORT));
        ports.push(tcp_port("raft", RAFT_PORT));
    }

    Service {
        metadata: service_metadata(cluster, headless_service_name(cluster), "headless"),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(pod_selector_labels(cluster)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the client Service.
pub fn generate_client_service(cluster: &Neo4jCluster) -> Service {
    Service {
        metadata: service_metadata(cluster, client_service_name(cluster), "client"),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(pod_selector_labels(cluster)),
            ports: Some(client_ports()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
