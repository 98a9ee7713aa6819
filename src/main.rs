//! datadog-operator - A Kubernetes operator that deploys the Datadog Agent.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the operator configuration from the environment
//! - Runs leader election (required for HA deployments)
//! - Starts the controllers, health server, credential refresh and metadata forwarder

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use envconfig::Envconfig;
use futures::future::join_all;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use datadog_operator::config::OperatorConfig;
use datadog_operator::controller::context::{Context, ReconcileOptions};
use datadog_operator::credentials::{CredentialManager, EnvCredentialSource};
use datadog_operator::health::{HealthState, run_health_server};
use datadog_operator::metadata::{MetadataForwarder, OperatorInfo};
use datadog_operator::run_controller;

/// Lease configuration
const LEASE_NAME: &str = "datadog-operator-lock";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datadog_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let config = OperatorConfig::init_from_env()?;
    info!(site = config.site(), "Starting datadog-operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = config.pod_name.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = config.pod_namespace.clone();

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());
    let is_leader = Arc::new(AtomicBool::new(false));

    // Probes must answer even while this replica is not the leader
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = |holder_id: String| LeaseLockParams {
        holder_id,
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };
    let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params(pod_name.clone()));

    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) => {
                if result.acquired_lease {
                    info!("Acquired leadership");
                    is_leader.store(true, Ordering::SeqCst);
                    break;
                } else {
                    info!("Another instance is leader, waiting...");
                }
            }
            Err(e) => {
                warn!("Failed to acquire lease: {}, retrying...", e);
            }
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let lease_renewal_handle = {
        let is_leader = is_leader.clone();
        let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params(pod_name));

        #[allow(clippy::exit)]
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lease_lock.try_acquire_or_renew().await {
                    Ok(result) => {
                        if !result.acquired_lease {
                            error!("Lost leadership! Shutting down...");
                            is_leader.store(false, Ordering::SeqCst);
                            // Exit so Kubernetes restarts us and we re-enter election
                            std::process::exit(1);
                        }
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        is_leader.store(false, Ordering::SeqCst);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let credentials = Arc::new(CredentialManager::new(EnvCredentialSource));
    if let Err(e) = credentials.refresh().await {
        warn!(error = %e, "Operator credentials not available yet");
    }
    let credentials_handle = credentials
        .clone()
        .spawn_refresh(config.credentials_refresh_interval());

    let metadata_handle = match config.metadata_interval() {
        Some(interval) if config.api_key.is_some() => {
            let info = OperatorInfo {
                cluster_name: config.cluster_name.clone(),
                site: config.site().to_string(),
                dd_url: config.dd_url.clone(),
                profiles_enabled: config.profiles_enabled,
            };
            match MetadataForwarder::new(client.clone(), credentials.clone(), info) {
                Ok(forwarder) => {
                    forwarder.follow_credential_rotation().await;
                    Some(Arc::new(forwarder).spawn(interval))
                }
                Err(e) => {
                    warn!(error = %e, "Metadata forwarder disabled");
                    None
                }
            }
        }
        _ => {
            info!("Metadata forwarder disabled");
            None
        }
    };

    let ctx = Context::new(client.clone(), Some(health_state.clone()))
        .with_credentials(credentials)
        .with_options(ReconcileOptions {
            supports_cilium: config.support_cilium,
            profiles_enabled: config.profiles_enabled,
            profile_namespaces: config.profile_namespaces(),
        });

    // One controller per watched namespace, or a single cluster-wide one
    let controller_handle = {
        let namespaces = config.agent_namespaces();
        tokio::spawn(async move {
            match namespaces {
                Some(namespaces) => {
                    join_all(
                        namespaces
                            .iter()
                            .map(|ns| run_controller(ctx.clone(), Some(ns.as_str()))),
                    )
                    .await;
                }
                None => run_controller(ctx, None).await,
            }
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal task only exits via process::exit() or panic
        // so this branch is only reached on panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false);
            info!("Marked operator as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    credentials_handle.abort();
    if let Some(handle) = metadata_handle {
        handle.abort();
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
