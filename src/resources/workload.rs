//! DaemonSet and Deployment wrappers around finished pod templates.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    RollingUpdateDaemonSet,
};
use k8s_openapi::api::core::v1::{
    Affinity, HTTPGetAction, PodAffinityTerm, PodAntiAffinity, PodTemplateSpec, Probe,
    TCPSocketAction, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{ComponentName, DatadogAgent};
use crate::resources::common::{COMPONENT_LABEL, component_labels, owner_reference, pod_selector};

/// Port the agent health endpoints listen on.
pub const DEFAULT_HEALTH_PORT: i32 = 5555;
pub const DEFAULT_CLUSTER_AGENT_REPLICAS: i32 = 1;
pub const DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS: i32 = 1;
const DAEMONSET_MAX_UNAVAILABLE: &str = "10%";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

fn http_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(15),
        period_seconds: Some(15),
        timeout_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(6),
        ..Default::default()
    }
}

pub fn liveness_probe(port: i32) -> Probe {
    http_probe("/live", port)
}

pub fn readiness_probe(port: i32) -> Probe {
    http_probe("/ready", port)
}

pub fn startup_probe(port: i32) -> Probe {
    http_probe("/startup", port)
}

/// The trace agent has no health endpoint; its receiver port is probed instead.
pub fn trace_agent_probe(port: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(15),
        period_seconds: Some(15),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

/// Prefer spreading the replicas of a Deployment over nodes.
pub fn spread_replicas_affinity(component: ComponentName) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 50,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([(
                                COMPONENT_LABEL.to_string(),
                                component.resource_suffix().to_string(),
                            )])),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workload_meta(dda: &DatadogAgent, name: &str, component: ComponentName) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: dda.namespace(),
        labels: Some(component_labels(dda, component)),
        owner_references: Some(vec![owner_reference(dda)]),
        ..Default::default()
    }
}

/// Node agent DaemonSet named `name`.
///
/// The selector is the component selector, so pods of a profile DaemonSet
/// carry extra labels on top of it.
pub fn daemonset(dda: &DatadogAgent, name: &str, template: PodTemplateSpec) -> DaemonSet {
    let mut selector = pod_selector(dda, ComponentName::NodeAgent);
    if let Some(labels) = template.metadata.as_ref().and_then(|m| m.labels.as_ref())
        && let Some(profile) = labels.get(crate::resources::common::PROFILE_LABEL)
    {
        selector
            .match_labels
            .get_or_insert_with(BTreeMap::new)
            .insert(crate::resources::common::PROFILE_LABEL.to_string(), profile.clone());
    }

    DaemonSet {
        metadata: workload_meta(dda, name, ComponentName::NodeAgent),
        spec: Some(DaemonSetSpec {
            selector,
            template,
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::String(
                        DAEMONSET_MAX_UNAVAILABLE.to_string(),
                    )),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster agent or cluster checks runner Deployment.
pub fn deployment(
    dda: &DatadogAgent,
    component: ComponentName,
    name: &str,
    replicas: i32,
    template: PodTemplateSpec,
) -> Deployment {
    Deployment {
        metadata: workload_meta(dda, name, component),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: pod_selector(dda, component),
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}
