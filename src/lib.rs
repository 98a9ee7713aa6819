//! datadog-operator library crate
//!
//! Turns DatadogAgent resources into node agent DaemonSets, cluster agent
//! and cluster checks runner Deployments and their dependent objects.
//!
//! The feature engine ([`feature`], [`merger`], [`orchestrator`]) is pure
//! and runs without a cluster; [`controller`] applies its output.

pub mod config;
pub mod controller;
pub mod crd;
pub mod credentials;
pub mod feature;
pub mod global;
pub mod hash;
pub mod health;
pub mod images;
pub mod merger;
pub mod metadata;
pub mod orchestrator;
pub mod overrides;
pub mod profiles;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{
    Controller, PredicateConfig, WatchStreamExt, metadata_watcher, predicates, reflector, watcher,
};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::{DatadogAgent, DatadogAgentProfile};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, PredicateConfig::default());
    (reader, stream)
}

/// Run the DatadogAgent controller.
///
/// When `namespace` is `Some(ns)`, only DatadogAgents in that namespace are
/// watched. When `namespace` is `None`, they are watched cluster-wide.
///
/// Any change to a DatadogAgentProfile triggers a reconcile of every
/// DatadogAgent when profiles are enabled, since a profile can move nodes
/// between DaemonSets.
pub async fn run_controller(ctx: Context, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(scope = scope_msg, "Starting controller for DatadogAgent resources");

    if let Some(ref state) = ctx.health_state {
        state.set_ready(true);
    }

    let client = ctx.client.clone();
    let profiles_enabled = ctx.options.profiles_enabled;
    let ctx = Arc::new(ctx);

    let agents: Api<DatadogAgent> = scoped_api(client.clone(), namespace);
    let daemonsets: Api<DaemonSet> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let service_accounts: Api<ServiceAccount> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, agent_stream) = create_filtered_stream(agents, watcher_config.clone());

    // Only metadata is needed for dependents: their changes just trigger a
    // reconcile that re-applies them.
    let mut controller = Controller::for_stream(agent_stream, reader)
        .owns(daemonsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(secrets, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(service_accounts, watcher_config.clone()).touched_objects());

    if profiles_enabled {
        let profiles: Api<DatadogAgentProfile> = Api::all(client.clone());
        let profile_changes = watcher(profiles, watcher_config)
            .default_backoff()
            .applied_objects()
            .predicate_filter(predicates::generation, PredicateConfig::default())
            .map(|_| ());
        controller = controller.reconcile_all_on(profile_changes);
    }

    controller
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion when
                    // related watch events trigger reconciliation for a deleted object.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
