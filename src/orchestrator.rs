//! Builds the desired state of a DatadogAgent.
//!
//! One pass runs every registered feature against the DatadogAgent:
//!
//! 1. instantiate and `configure` each feature, keeping the configured ones
//! 2. merge their [`RequiredComponents`]
//! 3. seed a pod template per enabled component, apply global settings,
//!    then run the component hook of every configured feature
//! 4. collect dependent objects through `manage_dependencies`
//! 5. apply `spec.override` (and the profile override for node agents)
//! 6. attach checksum annotations and build the workloads
//!
//! The pass is pure: it reads nothing from the cluster beyond what the
//! caller puts in [`BuildOptions`].

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use kube::ResourceExt;
use tracing::{debug, instrument, warn};

use crate::credentials::Credentials;
use crate::crd::{
    AgentContainerName, ComponentName, ContainerStrategy, DatadogAgent,
    DatadogAgentComponentOverride,
};
use crate::feature::{
    ChecksumAnnotation, Feature, FeatureId, FeatureRegistry, RequiredComponent,
    RequiredComponents, Result,
};
use crate::global::{
    GlobalOptions, add_global_dependencies, apply_global_settings, resolve_cluster_agent_token,
};
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::overrides::apply_component_override;
use crate::profiles::AppliedProfile;
use crate::resources::agent::default_agent_pod_template;
use crate::resources::cluster_agent::default_cluster_agent_pod_template;
use crate::resources::cluster_checks_runner::default_cluster_checks_runner_pod_template;
use crate::resources::common::component_resource_name;
use crate::resources::store::{ObjectKind, Store};
use crate::resources::workload::{
    DEFAULT_CLUSTER_AGENT_REPLICAS, DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS, daemonset, deployment,
};

/// Node agent variant used when nothing else is selected.
pub const DEFAULT_PROVIDER: &str = "legacy";

/// Inputs of a build besides the DatadogAgent itself.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub provider: String,
    /// ConfigMaps already in the cluster, for features that merge with them.
    pub existing_config_maps: Vec<ConfigMap>,
    /// Applied profiles, the default profile included. `None` when profiles
    /// are disabled, which yields a single node agent DaemonSet.
    pub profiles: Option<Vec<AppliedProfile>>,
    /// Whether the cluster runs Cilium and accepts CiliumNetworkPolicies.
    pub supports_cilium: bool,
    /// Token currently stored in the token Secret.
    pub existing_cluster_agent_token: Option<String>,
    /// Operator credentials for DatadogAgents that carry none.
    pub fallback_credentials: Option<Credentials>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            existing_config_maps: Vec::new(),
            profiles: None,
            supports_cilium: false,
            existing_cluster_agent_token: None,
            fallback_credentials: None,
        }
    }
}

/// Everything the apply layer needs to converge one DatadogAgent.
#[derive(Clone, Debug, Default)]
pub struct DesiredState {
    /// One DaemonSet per applied profile, or a single one.
    pub node_agents: Vec<DaemonSet>,
    pub cluster_agent: Option<Deployment>,
    pub cluster_checks_runner: Option<Deployment>,
    pub dependencies: Store,
    /// Merged opinions of the configured features.
    pub required_components: RequiredComponents,
    /// Configured features in registration order.
    pub enabled_features: Vec<FeatureId>,
    /// Components required by features but disabled by an override.
    pub override_conflicts: Vec<ComponentName>,
}

impl DesiredState {
    /// Whether a component produced a workload.
    pub fn has_component(&self, component: ComponentName) -> bool {
        match component {
            ComponentName::NodeAgent => !self.node_agents.is_empty(),
            ComponentName::ClusterAgent => self.cluster_agent.is_some(),
            ComponentName::ClusterChecksRunner => self.cluster_checks_runner.is_some(),
        }
    }
}

/// Run every feature of `registry` against `dda`.
#[instrument(skip_all, fields(name = %dda.name_any()))]
pub fn build_desired_state(
    dda: &DatadogAgent,
    registry: &FeatureRegistry,
    options: &BuildOptions,
) -> Result<DesiredState> {
    let mut features = registry.instantiate();
    let mut required = RequiredComponents::default();
    let mut configured = Vec::with_capacity(features.len());
    for feature in features.iter_mut() {
        let components = feature.configure(dda);
        let enabled = components.is_configured();
        if enabled {
            required.merge(&components);
        }
        configured.push(enabled);
    }

    let checksums: Vec<ChecksumAnnotation> = features
        .iter()
        .flat_map(|f| f.checksum_annotations())
        .collect();
    let active: Vec<&dyn Feature> = features
        .iter()
        .zip(&configured)
        .filter(|(_, enabled)| **enabled)
        .map(|(f, _)| f.as_ref())
        .collect();
    let enabled_features: Vec<FeatureId> = active.iter().map(|f| f.id()).collect();
    debug!(features = ?enabled_features, "Configured features");

    let (effective, override_conflicts) = effective_components(dda, &required);
    let single_container = dda.spec.global.container_strategy == Some(ContainerStrategy::Single)
        && !effective.agent.is_privileged();
    let fallback = options.fallback_credentials.as_ref();
    let global = GlobalOptions {
        cluster_agent_enabled: effective.cluster_agent.is_enabled(),
        single_container,
        fallback_credentials: fallback,
    };

    let mut state = DesiredState {
        enabled_features,
        override_conflicts,
        ..Default::default()
    };

    if effective.agent.is_enabled() {
        let template = build_node_agent_template(
            dda,
            &active,
            &effective.agent,
            &global,
            &options.provider,
        )?;
        state.node_agents = node_agent_daemonsets(dda, template, options, &checksums)?;
    }
    if effective.cluster_agent.is_enabled() {
        let mut managers = PodTemplateManagers::new(default_cluster_agent_pod_template(dda));
        apply_global_settings(dda, ComponentName::ClusterAgent, &mut managers, &global)?;
        for feature in &active {
            feature.manage_cluster_agent(&mut managers)?;
        }
        let template =
            finish_template(dda, ComponentName::ClusterAgent, managers, None, &checksums)?;
        let replicas = replicas(dda, ComponentName::ClusterAgent, DEFAULT_CLUSTER_AGENT_REPLICAS);
        state.cluster_agent = Some(deployment(
            dda,
            ComponentName::ClusterAgent,
            &component_resource_name(dda, ComponentName::ClusterAgent),
            replicas,
            template,
        ));
    }
    if effective.cluster_checks_runner.is_enabled() {
        let mut managers =
            PodTemplateManagers::new(default_cluster_checks_runner_pod_template(dda));
        apply_global_settings(dda, ComponentName::ClusterChecksRunner, &mut managers, &global)?;
        for feature in &active {
            feature.manage_cluster_checks_runner(&mut managers)?;
        }
        let template = finish_template(
            dda,
            ComponentName::ClusterChecksRunner,
            managers,
            None,
            &checksums,
        )?;
        let replicas = replicas(
            dda,
            ComponentName::ClusterChecksRunner,
            DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS,
        );
        state.cluster_checks_runner = Some(deployment(
            dda,
            ComponentName::ClusterChecksRunner,
            &component_resource_name(dda, ComponentName::ClusterChecksRunner),
            replicas,
            template,
        ));
    }

    let mut resources = ResourceManagers::new(Store::new(dda))
        .with_config_maps(options.existing_config_maps.iter().cloned());
    for feature in &active {
        feature.manage_dependencies(&mut resources, &effective)?;
    }
    let token = resolve_cluster_agent_token(dda, options.existing_cluster_agent_token.as_deref());
    add_global_dependencies(dda, &mut resources, &global, &token);

    let mut store = resources.into_store();
    if !options.supports_cilium {
        drop_cilium_policies(&mut store);
    }
    state.dependencies = store;
    state.required_components = effective;
    Ok(state)
}

/// Required components after `override.<component>.disabled`.
///
/// A disabled component is forced off. Disabling a component some feature
/// asked for is reported as a conflict. The cluster checks runner cannot
/// run without the cluster agent.
fn effective_components(
    dda: &DatadogAgent,
    required: &RequiredComponents,
) -> (RequiredComponents, Vec<ComponentName>) {
    let mut effective = required.clone();
    let mut conflicts = Vec::new();
    for component in ComponentName::ALL {
        if !dda.is_component_disabled(component) {
            continue;
        }
        if required.get(component).is_enabled() {
            warn!(component = %component, "Component required by features is disabled by override");
            conflicts.push(component);
        }
        *effective.get_mut(component) = RequiredComponent::required(false);
    }
    if !effective.cluster_agent.is_enabled() && effective.cluster_checks_runner.is_enabled() {
        debug!("Cluster checks runners need the cluster agent, disabling them");
        effective.cluster_checks_runner = RequiredComponent::required(false);
    }
    (effective, conflicts)
}

fn build_node_agent_template(
    dda: &DatadogAgent,
    features: &[&dyn Feature],
    agent: &RequiredComponent,
    global: &GlobalOptions<'_>,
    provider: &str,
) -> Result<PodTemplateManagers> {
    let containers: Vec<AgentContainerName> = if global.single_container {
        vec![AgentContainerName::UnprivilegedSingleAgent]
    } else {
        agent.containers.clone()
    };
    let mut managers = PodTemplateManagers::new(default_agent_pod_template(dda, &containers));
    apply_global_settings(dda, ComponentName::NodeAgent, &mut managers, global)?;
    for feature in features {
        if global.single_container {
            feature.manage_single_container_node_agent(&mut managers, provider)?;
        } else {
            feature.manage_node_agent(&mut managers, provider)?;
        }
    }
    Ok(managers)
}

/// One DaemonSet per applied profile, sharing the feature output.
fn node_agent_daemonsets(
    dda: &DatadogAgent,
    managers: PodTemplateManagers,
    options: &BuildOptions,
    checksums: &[ChecksumAnnotation],
) -> Result<Vec<DaemonSet>> {
    let default_name = component_resource_name(dda, ComponentName::NodeAgent);
    let Some(profiles) = options.profiles.as_ref().filter(|p| !p.is_empty()) else {
        let template = finish_template(dda, ComponentName::NodeAgent, managers, None, checksums)?;
        return Ok(vec![daemonset(dda, &default_name, template)]);
    };

    let mut daemonsets = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let profile_override = profile.component_override();
        let name = profile_override
            .name
            .clone()
            .unwrap_or_else(|| default_name.clone());
        let template = finish_template(
            dda,
            ComponentName::NodeAgent,
            managers.clone(),
            Some(&profile_override),
            checksums,
        )?;
        daemonsets.push(daemonset(dda, &name, template));
    }
    Ok(daemonsets)
}

/// Apply broadcasts, overrides and checksum annotations.
fn finish_template(
    dda: &DatadogAgent,
    component: ComponentName,
    managers: PodTemplateManagers,
    profile_override: Option<&DatadogAgentComponentOverride>,
    checksums: &[ChecksumAnnotation],
) -> Result<PodTemplateSpec> {
    let mut managers = PodTemplateManagers::new(managers.finalize()?);
    if let Some(config) = dda.component_override(component) {
        apply_component_override(&mut managers, config)?;
    }
    if let Some(config) = profile_override {
        apply_component_override(&mut managers, config)?;
    }
    for checksum in checksums.iter().filter(|c| c.component == component) {
        managers
            .annotation()
            .add_annotation(&checksum.key, &checksum.value);
    }
    Ok(managers.finalize()?)
}

fn replicas(dda: &DatadogAgent, component: ComponentName, default: i32) -> i32 {
    dda.component_override(component)
        .and_then(|o| o.replicas)
        .unwrap_or(default)
}

fn drop_cilium_policies(store: &mut Store) {
    let cilium: Vec<_> = store
        .keys()
        .filter(|k| k.kind == ObjectKind::CiliumNetworkPolicy)
        .cloned()
        .collect();
    for key in cilium {
        warn!(policy = %key.name, "Cilium is not supported by this operator, skipping policy");
        store.delete(key.kind, &key.namespace, &key.name);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::DatadogAgentSpec;
    use crate::feature::tests::dda_with;
    use crate::feature::{FeatureConstructor, ids};
    use crate::merger::env::env_var;
    use crate::resources::common::{MANAGED_BY_STORE_LABEL, PROFILE_LABEL};
    use std::collections::BTreeMap;

    fn container_env(template: &PodTemplateSpec, container: &str, var: &str) -> Option<String> {
        template
            .spec
            .as_ref()?
            .containers
            .iter()
            .find(|c| c.name == container)?
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == var)?
            .value
            .clone()
    }

    fn build(dda: &DatadogAgent) -> DesiredState {
        build_desired_state(dda, FeatureRegistry::builtin(), &BuildOptions::default()).unwrap()
    }

    fn node_template(state: &DesiredState) -> &PodTemplateSpec {
        &state.node_agents[0].spec.as_ref().unwrap().template
    }

    #[derive(Default)]
    struct WriterA;
    #[derive(Default)]
    struct WriterB;

    impl Feature for WriterA {
        fn id(&self) -> FeatureId {
            "writer_a"
        }
        fn configure(&mut self, _dda: &DatadogAgent) -> RequiredComponents {
            RequiredComponents {
                agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
                ..Default::default()
            }
        }
        fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _: &str) -> Result<()> {
            managers
                .env_var()
                .add_env_var_to_container(AgentContainerName::CoreAgent, env_var("DD_SHARED", "a"));
            Ok(())
        }
    }

    impl Feature for WriterB {
        fn id(&self) -> FeatureId {
            "writer_b"
        }
        fn configure(&mut self, _dda: &DatadogAgent) -> RequiredComponents {
            RequiredComponents {
                agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
                ..Default::default()
            }
        }
        fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _: &str) -> Result<()> {
            managers
                .env_var()
                .add_env_var_to_container(AgentContainerName::CoreAgent, env_var("DD_SHARED", "b"));
            Ok(())
        }
    }

    fn registry(entries: &[(FeatureId, FeatureConstructor)]) -> FeatureRegistry {
        FeatureRegistry::from_constructors(entries.iter().copied()).unwrap()
    }

    #[test]
    fn test_first_registered_writer_wins() {
        let dda = dda_with(DatadogAgentSpec::default());
        let a: FeatureConstructor = || Box::new(WriterA);
        let b: FeatureConstructor = || Box::new(WriterB);

        let options = BuildOptions::default();
        let ab = build_desired_state(
            &dda,
            &registry(&[("writer_a", a), ("writer_b", b)]),
            &options,
        )
        .unwrap();
        let ba = build_desired_state(
            &dda,
            &registry(&[("writer_b", b), ("writer_a", a)]),
            &options,
        )
        .unwrap();
        assert_eq!(
            container_env(node_template(&ab), "agent", "DD_SHARED").as_deref(),
            Some("a")
        );
        assert_eq!(
            container_env(node_template(&ba), "agent", "DD_SHARED").as_deref(),
            Some("b")
        );
        assert_eq!(ab.enabled_features, vec!["writer_a", "writer_b"]);
        assert!(ab.cluster_agent.is_none());
    }

    #[test]
    fn test_builtin_defaults() {
        let dda = dda_with(DatadogAgentSpec::default());
        let state = build(&dda);
        assert_eq!(state.node_agents.len(), 1);
        assert_eq!(state.node_agents[0].metadata.name.as_deref(), Some("dd-agent"));
        let dca = state.cluster_agent.as_ref().unwrap();
        assert_eq!(dca.metadata.name.as_deref(), Some("dd-cluster-agent"));
        assert_eq!(dca.spec.as_ref().unwrap().replicas, Some(1));
        assert!(state.cluster_checks_runner.is_none());
        assert!(state.enabled_features.contains(&ids::ENABLE_DEFAULT));
        assert!(state.dependencies.keys().any(|k| k.kind == ObjectKind::Secret));
        for object in state.dependencies.objects() {
            let labels = object.meta().labels.as_ref().unwrap();
            assert_eq!(labels[MANAGED_BY_STORE_LABEL], "true");
        }
    }

    #[test]
    fn test_idempotent() {
        let mut spec = DatadogAgentSpec::default();
        spec.global.cluster_agent_token = Some("fixed".into());
        let dda = dda_with(spec);
        let options = BuildOptions::default();
        let first = build_desired_state(&dda, FeatureRegistry::builtin(), &options).unwrap();
        let second = build_desired_state(&dda, FeatureRegistry::builtin(), &options).unwrap();
        assert_eq!(first.node_agents, second.node_agents);
        assert_eq!(first.cluster_agent, second.cluster_agent);
        assert_eq!(first.cluster_checks_runner, second.cluster_checks_runner);
        assert_eq!(first.enabled_features, second.enabled_features);
        let objects = |s: &DesiredState| s.dependencies.objects().cloned().collect::<Vec<_>>();
        assert!(!objects(&first).is_empty());
        assert_eq!(objects(&first), objects(&second));
    }

    #[test]
    fn test_disabled_cluster_agent_is_a_conflict() {
        let mut spec = DatadogAgentSpec::default();
        spec.overrides.insert(
            ComponentName::ClusterAgent,
            DatadogAgentComponentOverride {
                disabled: Some(true),
                ..Default::default()
            },
        );
        let dda = dda_with(spec);
        let state = build(&dda);
        assert!(state.cluster_agent.is_none());
        assert_eq!(state.override_conflicts, vec![ComponentName::ClusterAgent]);
        assert!(!state.required_components.cluster_agent.is_enabled());
    }

    #[test]
    fn test_override_applies_name_and_replicas() {
        let mut spec = DatadogAgentSpec::default();
        spec.overrides.insert(
            ComponentName::ClusterAgent,
            DatadogAgentComponentOverride {
                name: Some("custom-dca".into()),
                replicas: Some(3),
                env: vec![env_var("DD_CUSTOM", "1")],
                ..Default::default()
            },
        );
        let dda = dda_with(spec);
        let state = build(&dda);
        let dca = state.cluster_agent.unwrap();
        assert_eq!(dca.metadata.name.as_deref(), Some("custom-dca"));
        let spec = dca.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(
            container_env(&spec.template, "cluster-agent", "DD_CUSTOM").as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_one_daemonset_per_profile() {
        let dda = dda_with(DatadogAgentSpec::default());
        let options = BuildOptions {
            profiles: Some(vec![
                AppliedProfile {
                    namespace: Some("datadog".into()),
                    name: "gpu".into(),
                    spec: Default::default(),
                },
                AppliedProfile::default_profile(),
            ]),
            ..Default::default()
        };
        let state = build_desired_state(&dda, FeatureRegistry::builtin(), &options).unwrap();
        let names: Vec<_> = state
            .node_agents
            .iter()
            .map(|ds| ds.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["datadog-agent-with-profile-datadog-gpu", "dd-agent"]);
        let labels = |ds: &DaemonSet| -> BTreeMap<String, String> {
            ds.spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default()
        };
        assert_eq!(labels(&state.node_agents[0])[PROFILE_LABEL], "gpu");
        assert!(!labels(&state.node_agents[1]).contains_key(PROFILE_LABEL));
    }

    #[test]
    fn test_single_container_strategy() {
        let mut spec = DatadogAgentSpec::default();
        spec.global.container_strategy = Some(ContainerStrategy::Single);
        let dda = dda_with(spec);
        let state = build(&dda);
        let names: Vec<_> = node_template(&state)
            .spec
            .as_ref()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["unprivileged-single-agent"]);
    }
}
