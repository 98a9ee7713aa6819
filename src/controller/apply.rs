//! Server-side apply of a [`DesiredState`](crate::orchestrator::DesiredState).
//!
//! Every object is stamped with the MD5 of its desired form. Objects whose
//! live copy already carries the same hash are not sent again. Dependent
//! objects that a previous reconcile created and the current one no longer
//! wants are deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{CiliumNetworkPolicy, DatadogAgent};
use crate::hash::{generate_md5_for_spec, is_up_to_date};
use crate::resources::common::{
    MANAGED_BY_LABEL, MANAGED_BY_STORE_LABEL, MD5_ANNOTATION, OPERATOR_NAME, PART_OF_LABEL, part_of,
};
use crate::resources::store::{DependentObject, ObjectKey, ObjectKind, Store};

/// What happened to an applied object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

pub fn api_resource(kind: ObjectKind) -> ApiResource {
    match kind {
        ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
        ObjectKind::Secret => ApiResource::erase::<Secret>(&()),
        ObjectKind::Service => ApiResource::erase::<Service>(&()),
        ObjectKind::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
        ObjectKind::Role => ApiResource::erase::<Role>(&()),
        ObjectKind::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
        ObjectKind::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
        ObjectKind::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
        ObjectKind::NetworkPolicy => ApiResource::erase::<NetworkPolicy>(&()),
        ObjectKind::CiliumNetworkPolicy => ApiResource::erase::<CiliumNetworkPolicy>(&()),
        ObjectKind::APIService => ApiResource::erase::<APIService>(&()),
    }
}

fn dynamic_api(client: &Client, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, ar),
        None => Api::all_with(client.clone(), ar),
    }
}

/// Label selector matching the dependent objects of `dda`.
pub fn store_selector(dda: &DatadogAgent) -> String {
    format!(
        "{MANAGED_BY_STORE_LABEL}=true,{PART_OF_LABEL}={}",
        part_of(dda)
    )
}

/// Label selector matching the workloads of `dda`.
pub fn workload_selector(dda: &DatadogAgent) -> String {
    format!(
        "{MANAGED_BY_LABEL}={OPERATOR_NAME},{PART_OF_LABEL}={}",
        part_of(dda)
    )
}

/// Apply `object` unless its live copy already carries the same hash.
async fn apply_object<T: Serialize>(
    client: &Client,
    ar: &ApiResource,
    namespaced: bool,
    object: &T,
) -> Result<ApplyOutcome> {
    let hash = generate_md5_for_spec(object)?;
    let mut desired: DynamicObject = serde_json::from_value(serde_json::to_value(object)?)?;
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::MissingField(format!("{}.metadata.name", ar.kind)))?;
    let namespace = if namespaced {
        Some(
            desired
                .metadata
                .namespace
                .clone()
                .ok_or_else(|| Error::MissingField(format!("{}.metadata.namespace", ar.kind)))?,
        )
    } else {
        None
    };
    let api = dynamic_api(client, ar, namespace.as_deref());

    let live = api.get_opt(&name).await?;
    if live
        .as_ref()
        .is_some_and(|l| is_up_to_date(l.metadata.annotations.as_ref(), &hash))
    {
        debug!(kind = %ar.kind, name = %name, "Object is up to date");
        return Ok(ApplyOutcome::Unchanged);
    }

    desired
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(MD5_ANNOTATION.to_string(), hash);
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;

    let outcome = if live.is_some() {
        ApplyOutcome::Updated
    } else {
        ApplyOutcome::Created
    };
    debug!(kind = %ar.kind, name = %name, ?outcome, "Applied object");
    Ok(outcome)
}

pub async fn apply_dependent(client: &Client, object: &DependentObject) -> Result<ApplyOutcome> {
    let kind = object.kind();
    apply_object(client, &api_resource(kind), kind.is_namespaced(), &object.to_json()?).await
}

pub async fn apply_daemonset(client: &Client, daemonset: &DaemonSet) -> Result<ApplyOutcome> {
    apply_object(client, &ApiResource::erase::<DaemonSet>(&()), true, daemonset).await
}

pub async fn apply_deployment(client: &Client, deployment: &Deployment) -> Result<ApplyOutcome> {
    apply_object(client, &ApiResource::erase::<Deployment>(&()), true, deployment).await
}

/// Objects found in the cluster that `desired` does not contain.
pub fn stale_keys(found: impl IntoIterator<Item = ObjectKey>, desired: &Store) -> Vec<ObjectKey> {
    found.into_iter().filter(|k| !desired.contains(k)).collect()
}

/// Delete the dependent objects of `dda` that are not in `desired`.
///
/// Only `kinds` are listed; a kind whose API is not served by the cluster
/// is skipped with a warning.
pub async fn delete_stale_dependencies(
    client: &Client,
    dda: &DatadogAgent,
    desired: &Store,
    kinds: &[ObjectKind],
) -> Result<usize> {
    let namespace = dda.namespace().unwrap_or_default();
    let params = ListParams::default().labels(&store_selector(dda));
    let mut deleted = 0;
    for kind in kinds {
        let ar = api_resource(*kind);
        let scope = kind.is_namespaced().then_some(namespace.as_str());
        let api = dynamic_api(client, &ar, scope);
        let found = match api.list_metadata(&params).await {
            Ok(list) => list,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(kind = %kind, "API not served by the cluster, skipping cleanup");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let keys = found
            .items
            .iter()
            .map(|o| ObjectKey::new(*kind, scope.unwrap_or_default(), &o.name_any()));
        for key in stale_keys(keys, desired) {
            delete_ignoring_missing(&api, &key.name).await?;
            info!(kind = %kind, name = %key.name, "Deleted stale object");
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Delete the DaemonSets and Deployments of `dda` that are no longer wanted,
/// such as profile DaemonSets of removed profiles or disabled components.
pub async fn delete_stale_workloads(
    client: &Client,
    dda: &DatadogAgent,
    daemonsets: &[String],
    deployments: &[String],
) -> Result<usize> {
    let namespace = dda.namespace().unwrap_or_default();
    let params = ListParams::default().labels(&workload_selector(dda));
    let mut deleted = 0;

    let ds_api: Api<DaemonSet> = Api::namespaced(client.clone(), &namespace);
    for ds in ds_api.list_metadata(&params).await?.items {
        let name = ds.name_any();
        if !daemonsets.contains(&name) {
            delete_ignoring_missing(&ds_api, &name).await?;
            info!(name = %name, "Deleted stale DaemonSet");
            deleted += 1;
        }
    }

    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    for deployment in deploy_api.list_metadata(&params).await?.items {
        let name = deployment.name_any();
        if !deployments.contains(&name) {
            delete_ignoring_missing(&deploy_api, &name).await?;
            info!(name = %name, "Deleted stale Deployment");
            deleted += 1;
        }
    }
    Ok(deleted)
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
