//! Reconciliation loop for DatadogAgent.
//!
//! Each pass reads what the feature engine needs from the cluster, builds
//! the desired state, applies it and reports the outcome in the status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::{
    Api, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::apply::{
    ApplyOutcome, apply_daemonset, apply_dependent, apply_deployment, delete_stale_dependencies,
    delete_stale_workloads,
};
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::{Error, Result};
use crate::controller::status::{
    daemonsets_status, deployment_status, remove_condition, set_condition,
};
use crate::crd::{
    ComponentName, Condition, ConditionType, DatadogAgent, DatadogAgentProfile,
    DatadogAgentStatus,
};
use crate::global::TOKEN_SECRET_KEY;
use crate::orchestrator::{BuildOptions, DesiredState, build_desired_state};
use crate::profiles::{ProfileResolution, profiles_to_apply};
use crate::resources::common::{PROFILE_LABEL, token_secret_name};
use crate::resources::store::{ObjectKind, Store};

/// Finalizer used to remove cluster-scoped objects, which cannot be
/// garbage collected through owner references.
pub const FINALIZER: &str = "finalizer.agent.datadoghq.com";

/// Requeue interval of a successful reconcile.
pub const RESYNC_PERIOD: Duration = Duration::from_secs(60);

const CLUSTER_SCOPED_KINDS: [ObjectKind; 3] = [
    ObjectKind::ClusterRole,
    ObjectKind::ClusterRoleBinding,
    ObjectKind::APIService,
];

/// Cluster state read before building the desired state.
struct Inputs {
    options: BuildOptions,
    profiles: Option<(ProfileResolution, Vec<Node>)>,
}

/// Reconcile a DatadogAgent
#[instrument(
    skip(dda, ctx),
    fields(name = %dda.name_any(), namespace = %dda.namespace().unwrap_or_default())
)]
pub async fn reconcile(dda: Arc<DatadogAgent>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = dda.name_any();
    let namespace = dda
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;
    let api: Api<DatadogAgent> = Api::namespaced(ctx.client.clone(), &namespace);

    if dda.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&dda, &ctx, &api).await;
    }

    if !dda.finalizers().iter().any(|f| f == FINALIZER) {
        info!("Adding finalizer");
        add_finalizer(&api, &dda).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let inputs = gather_inputs(&dda, &ctx, &namespace).await?;
    let state = match build_desired_state(&dda, ctx.registry, &inputs.options) {
        Ok(state) => state,
        Err(e) => {
            let err = Error::from(e);
            record_failure(&dda, &ctx, &api, &err).await;
            return Err(err);
        }
    };
    debug!(
        features = state.enabled_features.len(),
        daemonsets = state.node_agents.len(),
        dependencies = state.dependencies.len(),
        "Built desired state"
    );

    if let Err(err) = apply_state(&dda, &ctx, &state).await {
        record_failure(&dda, &ctx, &api, &err).await;
        return Err(err);
    }

    if let Some((resolution, nodes)) = inputs.profiles.as_ref() {
        apply_profile_results(&ctx, resolution, nodes).await?;
    }

    let status = build_status(&dda, &ctx, &state).await?;
    patch_status(&api, &name, &status).await?;

    if let Some(health_state) = ctx.health_state.as_ref() {
        health_state.mark_reconciled();
        let metrics = &health_state.metrics;
        metrics.record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());
        metrics.set_desired_state(
            &namespace,
            &name,
            state.enabled_features.len(),
            state.override_conflicts.len(),
            state.node_agents.len(),
        );
        for (component, summary) in [
            (ComponentName::NodeAgent, status.agent.as_ref()),
            (ComponentName::ClusterAgent, status.cluster_agent.as_ref()),
            (ComponentName::ClusterChecksRunner, status.cluster_checks_runner.as_ref()),
        ] {
            if let Some(summary) = summary {
                metrics.set_component_pods(
                    &namespace,
                    &name,
                    component.as_str(),
                    i64::from(summary.desired),
                    i64::from(summary.ready),
                );
            }
        }
    }

    Ok(Action::requeue(RESYNC_PERIOD))
}

/// Error policy for the controller
pub fn error_policy(dda: Arc<DatadogAgent>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = dda.name_any();
    let namespace = dda.namespace().unwrap_or_default();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name, error.kind());
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

async fn gather_inputs(dda: &DatadogAgent, ctx: &Context, namespace: &str) -> Result<Inputs> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let existing_cluster_agent_token = secrets
        .get_opt(&token_secret_name(dda))
        .await?
        .and_then(|s| s.data)
        .and_then(|data| data.get(TOKEN_SECRET_KEY).cloned())
        .and_then(|token| String::from_utf8(token.0).ok())
        .filter(|token| !token.is_empty());

    // user ConfigMaps referenced by feature configuration
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    let existing_config_maps = config_maps
        .list(&ListParams::default())
        .await?
        .items;

    let profiles = if ctx.options.profiles_enabled {
        let profiles = list_profiles(ctx).await?;
        let nodes = Api::<Node>::all(ctx.client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        Some((profiles_to_apply(&profiles, &nodes), nodes))
    } else {
        None
    };

    Ok(Inputs {
        options: BuildOptions {
            existing_config_maps,
            profiles: profiles.as_ref().map(|(r, _)| r.applied.clone()),
            supports_cilium: ctx.options.supports_cilium,
            existing_cluster_agent_token,
            fallback_credentials: ctx.fallback_credentials().await,
            ..Default::default()
        },
        profiles,
    })
}

async fn list_profiles(ctx: &Context) -> Result<Vec<DatadogAgentProfile>> {
    let params = ListParams::default();
    match ctx.options.profile_namespaces.as_ref() {
        None => Ok(Api::<DatadogAgentProfile>::all(ctx.client.clone())
            .list(&params)
            .await?
            .items),
        Some(namespaces) => {
            let mut profiles = Vec::new();
            for ns in namespaces {
                let api: Api<DatadogAgentProfile> = Api::namespaced(ctx.client.clone(), ns);
                profiles.extend(api.list(&params).await?.items);
            }
            Ok(profiles)
        }
    }
}

async fn apply_state(dda: &DatadogAgent, ctx: &Context, state: &DesiredState) -> Result<()> {
    let client = &ctx.client;
    for object in state.dependencies.objects() {
        apply_dependent(client, object).await?;
    }

    let mut daemonsets = Vec::with_capacity(state.node_agents.len());
    for ds in &state.node_agents {
        let outcome = apply_daemonset(client, ds).await?;
        publish_outcome(dda, ctx, "DaemonSet", &ds.name_any(), outcome).await;
        daemonsets.push(ds.name_any());
    }
    let mut deployments = Vec::new();
    for deployment in [&state.cluster_agent, &state.cluster_checks_runner]
        .into_iter()
        .flatten()
    {
        let outcome = apply_deployment(client, deployment).await?;
        publish_outcome(dda, ctx, "Deployment", &deployment.name_any(), outcome).await;
        deployments.push(deployment.name_any());
    }

    let kinds: Vec<ObjectKind> = ObjectKind::ALL
        .iter()
        .copied()
        .filter(|k| ctx.options.supports_cilium || *k != ObjectKind::CiliumNetworkPolicy)
        .collect();
    delete_stale_dependencies(client, dda, &state.dependencies, &kinds).await?;
    delete_stale_workloads(client, dda, &daemonsets, &deployments).await?;
    Ok(())
}

async fn publish_outcome(
    dda: &DatadogAgent,
    ctx: &Context,
    kind: &str,
    name: &str,
    outcome: ApplyOutcome,
) {
    let reason = match outcome {
        ApplyOutcome::Created => "Created",
        ApplyOutcome::Updated => "Updated",
        ApplyOutcome::Unchanged => return,
    };
    ctx.publish_normal_event(
        dda,
        reason,
        "Reconciling",
        Some(format!("{reason} {kind} {name}")),
    )
    .await;
}

/// Write profile statuses and move the profile label between nodes.
async fn apply_profile_results(
    ctx: &Context,
    resolution: &ProfileResolution,
    nodes: &[Node],
) -> Result<()> {
    for update in &resolution.statuses {
        let api: Api<DatadogAgentProfile> = Api::namespaced(ctx.client.clone(), &update.namespace);
        let patch = serde_json::json!({ "status": update.status });
        if let Err(e) = api
            .patch_status(&update.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!(profile = %update.name, error = %e, "Failed to update profile status");
        }
    }

    let node_api: Api<Node> = Api::all(ctx.client.clone());
    for (node, label) in resolution.node_labels(nodes) {
        let patch = serde_json::json!({ "metadata": { "labels": { PROFILE_LABEL: label } } });
        node_api
            .patch(&node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(node = %node, profile = ?label, "Updated node profile label");
    }
    Ok(())
}

async fn build_status(
    dda: &DatadogAgent,
    ctx: &Context,
    state: &DesiredState,
) -> Result<DatadogAgentStatus> {
    let generation = dda.metadata.generation;
    let now = jiff::Timestamp::now().to_string();
    let namespace = dda.namespace().unwrap_or_default();
    let mut status = dda.status.clone().unwrap_or_default();

    let ds_api: Api<DaemonSet> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut daemonsets = Vec::with_capacity(state.node_agents.len());
    for ds in &state.node_agents {
        if let Some(live) = ds_api.get_opt(&ds.name_any()).await? {
            daemonsets.push(live);
        }
    }
    status.agent = (!state.node_agents.is_empty()).then(|| daemonsets_status(&daemonsets, &now));

    let deploy_api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    status.cluster_agent = match state.cluster_agent.as_ref() {
        Some(d) => deploy_api
            .get_opt(&d.name_any())
            .await?
            .map(|live| deployment_status(&live, &now)),
        None => None,
    };
    status.cluster_checks_runner = match state.cluster_checks_runner.as_ref() {
        Some(d) => deploy_api
            .get_opt(&d.name_any())
            .await?
            .map(|live| deployment_status(&live, &now)),
        None => None,
    };

    for component in ComponentName::ALL {
        let condition_type = ConditionType::for_component(component);
        if state.has_component(component) {
            set_condition(
                &mut status.conditions,
                Condition::new(
                    condition_type.as_str(),
                    true,
                    "Reconciled",
                    &format!("{} is reconciled", component.as_str()),
                    generation,
                ),
            );
        } else {
            remove_condition(&mut status.conditions, condition_type);
        }
    }
    if state.override_conflicts.is_empty() {
        remove_condition(&mut status.conditions, ConditionType::OverrideReconcileConflict);
    } else {
        let names: Vec<&str> = state.override_conflicts.iter().map(|c| c.as_str()).collect();
        let message = format!(
            "{} disabled by override but required by a feature",
            names.join(", ")
        );
        ctx.publish_warning_event(dda, "OverrideConflict", "Reconciling", Some(message.clone()))
            .await;
        set_condition(
            &mut status.conditions,
            Condition::new(
                ConditionType::OverrideReconcileConflict.as_str(),
                true,
                "ComponentDisabled",
                &message,
                generation,
            ),
        );
    }
    remove_condition(&mut status.conditions, ConditionType::DatadogAgentReconcileError);

    status.enabled_features = state
        .enabled_features
        .iter()
        .map(|id| id.to_string())
        .collect();
    status.observed_generation = generation;
    Ok(status)
}

/// Surface a failed reconcile as an event and a status condition.
async fn record_failure(dda: &DatadogAgent, ctx: &Context, api: &Api<DatadogAgent>, err: &Error) {
    error!(error = %err, "Reconcile failed");
    ctx.publish_warning_event(dda, "ReconcileError", "Reconciling", Some(err.to_string()))
        .await;
    let mut status = dda.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        Condition::new(
            ConditionType::DatadogAgentReconcileError.as_str(),
            true,
            "ReconcileError",
            &err.to_string(),
            dda.metadata.generation,
        ),
    );
    if let Err(e) = patch_status(api, &dda.name_any(), &status).await {
        warn!(error = %e, "Failed to record reconcile error in status");
    }
}

async fn patch_status(
    api: &Api<DatadogAgent>,
    name: &str,
    status: &DatadogAgentStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Remove cluster-scoped objects, then release the finalizer.
async fn handle_deletion(
    dda: &DatadogAgent,
    ctx: &Context,
    api: &Api<DatadogAgent>,
) -> Result<Action> {
    if !dda.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("Handling deletion");
    let deleted = delete_stale_dependencies(
        &ctx.client,
        dda,
        &Store::default(),
        &CLUSTER_SCOPED_KINDS,
    )
    .await?;
    debug!(deleted, "Deleted cluster-scoped objects");
    remove_finalizer(api, dda).await?;
    if let Some(health_state) = ctx.health_state.as_ref() {
        health_state
            .metrics
            .forget(&dda.namespace().unwrap_or_default(), &dda.name_any());
    }
    Ok(Action::await_change())
}

async fn add_finalizer(api: &Api<DatadogAgent>, dda: &DatadogAgent) -> Result<()> {
    let mut finalizers = dda.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(api, &dda.name_any(), finalizers).await
}

async fn remove_finalizer(api: &Api<DatadogAgent>, dda: &DatadogAgent) -> Result<()> {
    let finalizers: Vec<String> = dda
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(api, &dda.name_any(), finalizers).await
}

async fn patch_finalizers(
    api: &Api<DatadogAgent>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
