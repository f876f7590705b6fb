//! neo4j-operator entry point.
//!
//! Loads `OperatorConfig`, serves health and metrics on every replica, and
//! runs the controller only on the replica holding the leader Lease.

use std::sync::Arc;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use neo4j_operator::config::LeaderElectionConfig;
use neo4j_operator::health::{HealthState, run_health_server};
use neo4j_operator::{OperatorConfig, run_controller};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neo4j_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    // Invalid settings are fatal before anything connects
    let config = OperatorConfig::from_env()?;
    let election = config.leader_election.clone();
    let holder_id = election.holder_id();
    info!(
        resync_secs = config.resync_interval.as_secs(),
        workers = config.worker_concurrency,
        health_port = config.health_port,
        lease = %election.lease_name,
        lease_namespace = %election.lease_namespace,
        holder_id = %holder_id,
        "Starting neo4j-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes answer on standby replicas too
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!(error = %e, "Health server stopped");
            }
        })
    };

    let lock = lease_lock(&client, &election, &holder_id);
    tokio::select! {
        () = acquire_leadership(&lock, &election) => {}
        () = shutdown_signal() => {
            info!("Shutdown requested while on standby");
            return Ok(());
        }
    }

    let renewal_handle = tokio::spawn(hold_leadership(lock, election));
    let shutdown_grace = config.shutdown_grace;
    let controller_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_controller(client, config, Some(health_state)).await {
                error!(error = %e, "Controller failed to start");
            }
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        result = renewal_handle => {
            if let Err(e) = result {
                error!(error = %e, "Lease renewal task panicked");
            }
        }
        () = shutdown_signal() => {
            health_state.set_ready(false).await;
            info!(
                grace_secs = shutdown_grace.as_secs(),
                "Shutdown requested, draining in-flight reconciliations"
            );
            tokio::time::sleep(shutdown_grace).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn lease_lock(client: &Client, election: &LeaderElectionConfig, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &election.lease_namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: election.lease_name.clone(),
            lease_ttl: election.lease_ttl,
        },
    )
}

/// Block until this replica holds the Lease.
async fn acquire_leadership(lock: &LeaseLock, election: &LeaderElectionConfig) {
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!(lease = %election.lease_name, "Acquired leadership");
                return;
            }
            Ok(_) => info!(lease = %election.lease_name, "Another replica is leader, standing by"),
            Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
        }
        tokio::time::sleep(election.renew_interval).await;
    }
}

/// Renew the Lease until it is lost, then exit so the pod re-enters the
/// election from scratch.
#[allow(clippy::exit)]
async fn hold_leadership(lock: LeaseLock, election: LeaderElectionConfig) {
    loop {
        tokio::time::sleep(election.renew_interval).await;
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!(lease = %election.lease_name, "Lost leadership, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed, exiting");
                std::process::exit(1);
            }
        }
    }
}

/// Resolves on SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
