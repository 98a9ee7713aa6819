//! Component overrides.
//!
//! `spec.override.<component>` is the escape hatch applied after every
//! feature hook. It works on the finished pod template, so anything it sets
//! wins over what features contributed.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Container, EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use crate::crd::{
    AgentContainerName, AgentImageConfig, DatadogAgentComponentOverride,
    DatadogAgentGenericContainer,
};
use crate::feature::Result;
use crate::global::DD_LOG_LEVEL;
use crate::images::override_image;
use crate::merger::env::env_var;
use crate::merger::{MergePolicy, PodTemplateManagers};
use crate::resources::agent::DD_HEALTH_PORT;
use crate::resources::volumes::APPARMOR_ANNOTATION_KEY;

/// Apply the pod-level part of an override.
///
/// Workload-level fields (`name`, `replicas`, `disabled`) are read by the
/// orchestrator when it builds the DaemonSet or Deployment.
pub fn apply_component_override(
    managers: &mut PodTemplateManagers,
    config: &DatadogAgentComponentOverride,
) -> Result<()> {
    if let Some(sa) = &config.service_account_name {
        managers.pod_spec_mut().service_account_name = Some(sa.clone());
    }

    if let Some(image) = &config.image {
        override_images(managers, image);
    }

    if !config.env.is_empty() {
        for name in all_container_names(managers) {
            for env in &config.env {
                managers.env_var().add_env_var_to_container_with_merge(
                    name,
                    env.clone(),
                    MergePolicy::Override,
                )?;
            }
        }
    }

    for (name, container) in &config.containers {
        apply_container_override(managers, *name, container)?;
    }

    for volume in &config.volumes {
        managers
            .volume()
            .add_volume_with_merge(volume.clone(), MergePolicy::Override)?;
    }

    let spec = managers.pod_spec_mut();
    if let Some(security_context) = &config.security_context {
        spec.security_context = Some(security_context.clone());
    }
    if let Some(priority_class) = &config.priority_class_name {
        spec.priority_class_name = Some(priority_class.clone());
    }
    if let Some(runtime_class) = &config.runtime_class_name {
        spec.runtime_class_name = Some(runtime_class.clone());
    }
    if let Some(affinity) = &config.affinity {
        spec.affinity = Some(merge_affinities(spec.affinity.take(), affinity));
    }
    if !config.node_selector.is_empty() {
        spec.node_selector
            .get_or_insert_with(BTreeMap::new)
            .extend(config.node_selector.clone());
    }
    if !config.tolerations.is_empty() {
        spec.tolerations
            .get_or_insert_with(Vec::new)
            .extend(config.tolerations.iter().cloned());
    }
    if let Some(host_network) = config.host_network {
        spec.host_network = Some(host_network);
    }
    if let Some(host_pid) = config.host_pid {
        spec.host_pid = Some(host_pid);
    }
    if let Some(dns_policy) = &config.dns_policy {
        spec.dns_policy = Some(dns_policy.clone());
    }

    for (key, value) in &config.annotations {
        managers.annotation().add_annotation(key, value);
    }
    if !config.labels.is_empty() {
        managers
            .pod_template_spec()
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(config.labels.clone());
    }
    Ok(())
}

/// Names of every known container and init container in the template.
fn all_container_names(managers: &PodTemplateManagers) -> Vec<AgentContainerName> {
    let Some(spec) = managers.template().spec.as_ref() else {
        return Vec::new();
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(|c| AgentContainerName::from_container_name(&c.name))
        .collect()
}

fn override_images(managers: &mut PodTemplateManagers, config: &AgentImageConfig) {
    // the OTel collector image has no JMX flavour
    let without_jmx = AgentImageConfig {
        jmx_enabled: false,
        ..config.clone()
    };
    let spec = managers.pod_spec_mut();
    for container in spec.containers.iter_mut() {
        let Some(name) = AgentContainerName::from_container_name(&container.name) else {
            continue;
        };
        let effective = if name == AgentContainerName::OtelAgent {
            &without_jmx
        } else {
            config
        };
        set_image(container, effective);
    }
    for container in spec.init_containers.iter_mut().flatten() {
        set_image(container, config);
    }
    if !config.pull_secrets.is_empty() {
        spec.image_pull_secrets = Some(config.pull_secrets.clone());
    }
}

fn set_image(container: &mut Container, config: &AgentImageConfig) {
    let current = container.image.as_deref().unwrap_or_default();
    container.image = Some(override_image(current, config));
    if let Some(policy) = &config.pull_policy {
        container.image_pull_policy = Some(policy.clone());
    }
}

/// Apply `override.<component>.containers.<name>`.
///
/// Does nothing when the container is not part of the template.
pub fn apply_container_override(
    managers: &mut PodTemplateManagers,
    name: AgentContainerName,
    config: &DatadogAgentGenericContainer,
) -> Result<()> {
    if !managers.has_container(name) {
        debug!(container = %name, "Skipping override for absent container");
        return Ok(());
    }

    let mut env: Vec<EnvVar> = Vec::new();
    if let Some(level) = config.log_level.as_deref().filter(|l| !l.is_empty()) {
        env.push(env_var(DD_LOG_LEVEL, level));
    }
    if let Some(port) = config.health_port {
        env.push(env_var(DD_HEALTH_PORT, port.to_string()));
    }
    env.extend(config.env.iter().cloned());
    for var in env {
        managers
            .env_var()
            .add_env_var_to_container_with_merge(name, var, MergePolicy::Override)?;
    }
    for mount in &config.volume_mounts {
        managers.volume_mount().add_volume_mount_to_container_with_merge(
            mount.clone(),
            name,
            MergePolicy::Override,
        )?;
    }

    if let Some(profile) = &config.app_armor_profile_name {
        managers
            .annotation()
            .add_annotation(&format!("{APPARMOR_ANNOTATION_KEY}/{name}"), profile);
    }

    if let Some(container) = managers.container_mut(name) {
        if let Some(resources) = &config.resources {
            merge_resources(
                container.resources.get_or_insert_with(ResourceRequirements::default),
                resources,
            );
        }
        if !config.command.is_empty() {
            container.command = Some(config.command.clone());
        }
        if !config.args.is_empty() {
            container.args = Some(config.args.clone());
        }
        if let Some(security_context) = &config.security_context {
            container.security_context = Some(security_context.clone());
        }
    }
    Ok(())
}

/// Requests and limits are merged per resource name.
fn merge_resources(current: &mut ResourceRequirements, update: &ResourceRequirements) {
    if let Some(requests) = &update.requests {
        current
            .requests
            .get_or_insert_with(BTreeMap::new)
            .extend(requests.clone());
    }
    if let Some(limits) = &update.limits {
        current
            .limits
            .get_or_insert_with(BTreeMap::new)
            .extend(limits.clone());
    }
    if update.claims.is_some() {
        current.claims = update.claims.clone();
    }
}

/// Combine a template affinity with an override.
///
/// Required node selector terms are ANDed into every existing term so the
/// template's constraints still hold. Preferred terms and pod
/// (anti-)affinity terms are appended.
pub fn merge_affinities(current: Option<Affinity>, update: &Affinity) -> Affinity {
    let mut merged = current.unwrap_or_default();

    if let Some(update_node) = &update.node_affinity {
        let node = merged.node_affinity.get_or_insert_with(Default::default);
        if let Some(update_required) =
            &update_node.required_during_scheduling_ignored_during_execution
        {
            match node.required_during_scheduling_ignored_during_execution.as_mut() {
                Some(required) if !required.node_selector_terms.is_empty() => {
                    let mut terms = Vec::new();
                    for existing in &required.node_selector_terms {
                        for extra in &update_required.node_selector_terms {
                            let mut term = existing.clone();
                            if let Some(exprs) = &extra.match_expressions {
                                term.match_expressions
                                    .get_or_insert_with(Vec::new)
                                    .extend(exprs.iter().cloned());
                            }
                            if let Some(fields) = &extra.match_fields {
                                term.match_fields
                                    .get_or_insert_with(Vec::new)
                                    .extend(fields.iter().cloned());
                            }
                            terms.push(term);
                        }
                    }
                    required.node_selector_terms = terms;
                }
                _ => {
                    node.required_during_scheduling_ignored_during_execution =
                        Some(update_required.clone());
                }
            }
        }
        if let Some(preferred) = &update_node.preferred_during_scheduling_ignored_during_execution {
            node.preferred_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .extend(preferred.iter().cloned());
        }
    }

    if let Some(update_pod) = &update.pod_affinity {
        let pod = merged.pod_affinity.get_or_insert_with(Default::default);
        if let Some(required) = &update_pod.required_during_scheduling_ignored_during_execution {
            pod.required_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .extend(required.iter().cloned());
        }
        if let Some(preferred) = &update_pod.preferred_during_scheduling_ignored_during_execution {
            pod.preferred_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .extend(preferred.iter().cloned());
        }
    }

    if let Some(update_anti) = &update.pod_anti_affinity {
        let anti = merged.pod_anti_affinity.get_or_insert_with(Default::default);
        if let Some(required) = &update_anti.required_during_scheduling_ignored_during_execution {
            anti.required_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .extend(required.iter().cloned());
        }
        if let Some(preferred) = &update_anti.preferred_during_scheduling_ignored_during_execution {
            anti.preferred_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .extend(preferred.iter().cloned());
        }
    }

    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::feature::tests::*;
    use crate::merger::pod_template::tests::template_with;
    use k8s_openapi::api::core::v1::{
        LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement,
        NodeSelectorTerm, Toleration,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    const CORE: AgentContainerName = AgentContainerName::CoreAgent;

    fn managers_with_images() -> PodTemplateManagers {
        let mut template = template_with(&[CORE, AgentContainerName::OtelAgent]);
        let spec = template.spec.as_mut().unwrap();
        for c in spec.containers.iter_mut() {
            c.image = Some("gcr.io/datadoghq/agent:7.50.0".to_string());
        }
        for c in spec.init_containers.iter_mut().flatten() {
            c.image = Some("gcr.io/datadoghq/agent:7.50.0".to_string());
        }
        PodTemplateManagers::new(template)
    }

    fn requirement(key: &str) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: key.to_string(),
            operator: "Exists".to_string(),
            values: None,
        }
    }

    fn required_terms(affinity: &Affinity) -> Vec<NodeSelectorTerm> {
        affinity
            .node_affinity
            .as_ref()
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .as_ref()
            .unwrap()
            .node_selector_terms
            .clone()
    }

    fn node_affinity(keys: &[&str]) -> Affinity {
        Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(keys.iter().map(|k| requirement(k)).collect()),
                        match_fields: None,
                    }],
                }),
                preferred_during_scheduling_ignored_during_execution: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_override_wins_over_everything() {
        let mut managers = managers_with_images();
        let config = DatadogAgentComponentOverride {
            image: Some(AgentImageConfig {
                name: "registry.example.com/custom-agent:1.2.3".into(),
                pull_policy: Some("Always".into()),
                pull_secrets: vec![LocalObjectReference {
                    name: "regcred".into(),
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        apply_component_override(&mut managers, &config).unwrap();
        let core = container(&mut managers, CORE);
        assert_eq!(
            core.image.as_deref(),
            Some("registry.example.com/custom-agent:1.2.3")
        );
        assert_eq!(core.image_pull_policy.as_deref(), Some("Always"));
        let init = container(&mut managers, AgentContainerName::InitConfig);
        assert_eq!(
            init.image.as_deref(),
            Some("registry.example.com/custom-agent:1.2.3")
        );
        let spec = managers.template().spec.as_ref().unwrap();
        assert_eq!(spec.image_pull_secrets.as_ref().unwrap()[0].name, "regcred");
    }

    #[test]
    fn test_jmx_is_not_applied_to_otel_agent() {
        let mut managers = managers_with_images();
        let config = DatadogAgentComponentOverride {
            image: Some(AgentImageConfig {
                tag: "7.60.0".into(),
                jmx_enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        apply_component_override(&mut managers, &config).unwrap();
        assert_eq!(
            container(&mut managers, CORE).image.as_deref(),
            Some("gcr.io/datadoghq/agent:7.60.0-jmx")
        );
        assert_eq!(
            container(&mut managers, AgentContainerName::OtelAgent)
                .image
                .as_deref(),
            Some("gcr.io/datadoghq/agent:7.60.0")
        );
    }

    #[test]
    fn test_env_override_replaces_feature_value() {
        let mut managers = PodTemplateManagers::new(template_with(&[CORE]));
        managers
            .env_var()
            .add_env_var_to_container(CORE, env_var("DD_APM_ENABLED", "true"));
        let config = DatadogAgentComponentOverride {
            env: vec![env_var("DD_APM_ENABLED", "false")],
            ..Default::default()
        };
        apply_component_override(&mut managers, &config).unwrap();
        assert_eq!(
            env_value(&managers, CORE, "DD_APM_ENABLED").as_deref(),
            Some("false")
        );
        assert_eq!(
            env_value(&managers, AgentContainerName::InitConfig, "DD_APM_ENABLED").as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_container_override() {
        let mut managers = PodTemplateManagers::new(template_with(&[CORE]));
        let config = DatadogAgentGenericContainer {
            log_level: Some("debug".into()),
            health_port: Some(5556),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity("512Mi".to_string()),
                )])),
                ..Default::default()
            }),
            args: vec!["agent".into(), "run".into()],
            app_armor_profile_name: Some("unconfined".into()),
            ..Default::default()
        };
        apply_container_override(&mut managers, CORE, &config).unwrap();
        apply_container_override(&mut managers, AgentContainerName::SystemProbe, &config).unwrap();

        assert_eq!(env_value(&managers, CORE, DD_LOG_LEVEL).as_deref(), Some("debug"));
        assert_eq!(env_value(&managers, CORE, DD_HEALTH_PORT).as_deref(), Some("5556"));
        let core = container(&mut managers, CORE);
        assert_eq!(
            core.resources.unwrap().limits.unwrap()["memory"],
            Quantity("512Mi".to_string())
        );
        assert_eq!(core.args.unwrap(), vec!["agent", "run"]);
        assert_eq!(
            managers
                .annotation()
                .get("container.apparmor.security.beta.kubernetes.io/agent"),
            Some("unconfined")
        );
        assert!(!managers.has_container(AgentContainerName::SystemProbe));
    }

    #[test]
    fn test_pod_level_fields() {
        let mut managers = PodTemplateManagers::new(template_with(&[CORE]));
        managers.pod_spec_mut().node_selector =
            Some(BTreeMap::from([("kubernetes.io/os".to_string(), "linux".to_string())]));
        let config = DatadogAgentComponentOverride {
            priority_class_name: Some("system-node-critical".into()),
            node_selector: BTreeMap::from([("pool".to_string(), "agents".to_string())]),
            tolerations: vec![Toleration {
                operator: Some("Exists".into()),
                ..Default::default()
            }],
            labels: BTreeMap::from([("team".to_string(), "infra".to_string())]),
            annotations: BTreeMap::from([("a".to_string(), "b".to_string())]),
            host_network: Some(true),
            dns_policy: Some("ClusterFirstWithHostNet".into()),
            service_account_name: Some("custom-sa".into()),
            ..Default::default()
        };
        apply_component_override(&mut managers, &config).unwrap();

        let template = managers.template().clone();
        let spec = template.spec.unwrap();
        assert_eq!(spec.priority_class_name.as_deref(), Some("system-node-critical"));
        assert_eq!(spec.node_selector.unwrap().len(), 2);
        assert_eq!(spec.tolerations.unwrap().len(), 1);
        assert_eq!(spec.host_network, Some(true));
        assert_eq!(spec.dns_policy.as_deref(), Some("ClusterFirstWithHostNet"));
        assert_eq!(spec.service_account_name.as_deref(), Some("custom-sa"));
        let meta = template.metadata.unwrap();
        assert_eq!(meta.labels.unwrap()["team"], "infra");
        assert_eq!(meta.annotations.unwrap()["a"], "b");
    }

    #[test]
    fn test_merge_affinities_ands_required_terms() {
        let merged = merge_affinities(Some(node_affinity(&["a"])), &node_affinity(&["b"]));
        let terms = required_terms(&merged);
        assert_eq!(terms.len(), 1);
        let keys: Vec<_> = terms[0]
            .match_expressions
            .as_ref()
            .unwrap()
            .iter()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_merge_affinities_without_existing() {
        let merged = merge_affinities(None, &node_affinity(&["b"]));
        assert_eq!(required_terms(&merged).len(), 1);
    }
}
