//! Orchestrator explorer.
//!
//! The cluster agent (or the cluster checks runners) runs the
//! `orchestrator` check, which ships Kubernetes resource manifests to
//! Datadog. Custom resources to collect come from the DatadogAgent and from
//! remote configuration, which stores its list in the DatadogAgent status.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::rbac::v1::PolicyRule;
use semver::Version;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::check_config::{self, CheckConfig, checksum_for, default_config_map_name};
use super::shared::{self, FeatureRbac};
use super::{
    ChecksumAnnotation, Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::images;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::policy_rule;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::volumes::ORCHESTRATOR_EXPLORER_VOLUME_NAME;

pub const DD_ORCHESTRATOR_EXPLORER_ENABLED: &str = "DD_ORCHESTRATOR_EXPLORER_ENABLED";
pub const DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED: &str =
    "DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED";
pub const DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS: &str = "DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS";
pub const DD_ORCHESTRATOR_EXPLORER_DD_URL: &str = "DD_ORCHESTRATOR_EXPLORER_ORCHESTRATOR_DD_URL";

pub const DEFAULT_CONF_SUFFIX: &str = "orchestrator-explorer-config";
pub const CHECK_FOLDER: &str = "orchestrator.d";
pub const CHECK_FILE: &str = "orchestrator.yaml";

/// Node agents older than this run the check in the process agent.
const NO_PROCESS_AGENT_MIN_VERSION: Version = Version::new(7, 51, 0);

const CRD_COLLECTORS_KEY: &str = "crd_collectors";
const INSTANCES_KEY: &str = "instances";

/// Why a check configuration could not take the custom resources.
#[derive(Error, Debug)]
pub enum CheckConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing 'instances' section")]
    MissingInstances,

    #[error("'instances' must contain exactly one entry")]
    InstanceCount,

    #[error("the instance must be a mapping")]
    InstanceNotMapping,

    #[error("ConfigMap {0:?} not found")]
    ConfigMapNotFound(String),

    #[error("ConfigMap {0:?} is empty")]
    EmptyConfigMap(String),

    #[error("ConfigMap {0:?} must contain exactly one entry when cluster checks runners are disabled")]
    TooManyEntries(String),
}

#[derive(Debug, Default)]
pub struct OrchestratorExplorerFeature {
    check: CheckConfig,
    /// User ConfigMap to merge remote custom resources into.
    source_config_map: Option<String>,
    remote_config: bool,
    run_in_runners: bool,
    process_agent_required: bool,
    custom_resources: Vec<String>,
    scrub_containers: bool,
    extra_tags: Vec<String>,
    dd_url: Option<String>,
    checksum: Option<ChecksumAnnotation>,
    rbac: Option<FeatureRbac>,
}

impl Feature for OrchestratorExplorerFeature {
    fn id(&self) -> FeatureId {
        ids::ORCHESTRATOR_EXPLORER
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(mut section) = dda
            .spec
            .features
            .orchestrator_explorer
            .clone()
            .filter(|oe| oe.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        let mut custom_resources = section.custom_resources.clone();
        custom_resources.extend(dda.remote_config_custom_resources().iter().cloned());
        custom_resources.sort();
        custom_resources.dedup();
        section.custom_resources = custom_resources.clone();

        if section.conf.is_some() || !section.custom_resources.is_empty() {
            self.checksum =
                checksum_for(ComponentName::ClusterAgent, ids::ORCHESTRATOR_EXPLORER, &section);
        }

        self.remote_config = shared::remote_config_enabled(dda);
        self.run_in_runners =
            shared::cluster_checks_enabled(dda) && shared::use_cluster_checks_runners(dda);
        self.custom_resources = custom_resources;
        self.scrub_containers = section.scrub_containers.unwrap_or(false);
        self.extra_tags = section.extra_tags.clone();
        self.dd_url = section.dd_url.clone().filter(|url| !url.is_empty());
        self.process_agent_required = dda
            .component_override(ComponentName::NodeAgent)
            .and_then(|o| o.image.as_ref())
            .is_some_and(|image| !images::is_at_least(image, &NO_PROCESS_AGENT_MIN_VERSION));

        self.check = CheckConfig::new(
            dda,
            ids::ORCHESTRATOR_EXPLORER,
            DEFAULT_CONF_SUFFIX,
            ORCHESTRATOR_EXPLORER_VOLUME_NAME,
            CHECK_FOLDER,
            CHECK_FILE,
            section.conf.as_ref(),
        );
        // With remote configuration the user ConfigMap is only a template:
        // the merged copy gets the default name, suffixed on collision.
        if self.remote_config {
            if let Some(user) = self.check.user_config_map.take() {
                let mut name = default_config_map_name(dda, DEFAULT_CONF_SUFFIX);
                if name == user.name {
                    name.push_str("-rc");
                }
                self.check.config_map_name = name;
                self.source_config_map = Some(user.name);
            }
        }

        let rbac_component = if self.run_in_runners {
            ComponentName::ClusterChecksRunner
        } else {
            ComponentName::ClusterAgent
        };
        self.rbac = FeatureRbac::for_feature(dda, rbac_component, ids::ORCHESTRATOR_EXPLORER);

        let mut agent_containers = vec![AgentContainerName::CoreAgent];
        if self.process_agent_required {
            agent_containers.push(AgentContainerName::ProcessAgent);
        }
        RequiredComponents {
            agent: RequiredComponent::with_containers(&agent_containers),
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            cluster_checks_runner: if self.run_in_runners {
                RequiredComponent::with_containers(&[AgentContainerName::ClusterChecksRunner])
            } else {
                RequiredComponent::default()
            },
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        if let Some(config_map) = self.build_config_map(managers)? {
            self.check
                .add_config_map(managers, config_map, self.checksum.as_ref());
        }
        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(managers, rbac_rules(&self.custom_resources))?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.check.mount(managers, AgentContainerName::ClusterAgent);
        let mut env = managers.env_var();
        for var in self.env_vars()? {
            env.add_env_var(var);
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        let mut containers = vec![AgentContainerName::CoreAgent];
        if self.process_agent_required {
            containers.push(AgentContainerName::ProcessAgent);
        }
        let mut env = managers.env_var();
        for var in self.env_vars()? {
            env.add_env_var_to_containers(&containers, var);
        }
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        let mut env = managers.env_var();
        for var in self.env_vars()? {
            env.add_env_var_to_container(AgentContainerName::UnprivilegedSingleAgent, var);
        }
        Ok(())
    }

    fn manage_cluster_checks_runner(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        if !self.run_in_runners {
            return Ok(());
        }
        let mut env = managers.env_var();
        for var in self.env_vars()? {
            env.add_env_var_to_container(AgentContainerName::ClusterChecksRunner, var);
        }
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum.iter().cloned().collect()
    }
}

impl OrchestratorExplorerFeature {
    fn env_vars(&self) -> Result<Vec<k8s_openapi::api::core::v1::EnvVar>> {
        let mut vars = vec![
            bool_env_var(DD_ORCHESTRATOR_EXPLORER_ENABLED, true),
            bool_env_var(
                DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED,
                self.scrub_containers,
            ),
        ];
        if !self.extra_tags.is_empty() {
            vars.push(shared::json_env_var(
                DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS,
                &self.extra_tags,
            )?);
        }
        if let Some(url) = &self.dd_url {
            vars.push(env_var(DD_ORCHESTRATOR_EXPLORER_DD_URL, url.as_str()));
        }
        Ok(vars)
    }

    /// The ConfigMap to generate, if any.
    ///
    /// Without remote configuration a user ConfigMap is mounted untouched.
    /// Otherwise the custom resources are merged into whatever the check
    /// would have read, falling back to the default configuration when the
    /// user ConfigMap cannot be used.
    fn build_config_map(&self, managers: &ResourceManagers) -> Result<Option<ConfigMap>> {
        if let Some(source) = &self.source_config_map {
            let config_map = self
                .merge_user_config_map(managers, source)
                .unwrap_or_else(|error| {
                    warn!(
                        config_map = %source,
                        %error,
                        "unable to merge custom resources into orchestrator explorer ConfigMap, using default"
                    );
                    self.default_config_map()
                });
            return Ok(Some(config_map));
        }
        if !self.check.is_generated() {
            return Ok(None);
        }

        let Some(data) = self.check.parsed_config_data()? else {
            return Ok(Some(self.default_config_map()));
        };
        if !self.remote_config {
            return Ok(Some(self.check.build_config_map(data)));
        }
        let content = match add_custom_resources(&data, &self.custom_resources) {
            Ok(merged) => merged,
            Err(error) => {
                warn!(
                    %error,
                    "unable to merge custom resources into orchestrator explorer configuration"
                );
                data
            }
        };
        Ok(Some(self.check.build_config_map(content)))
    }

    fn default_config_map(&self) -> ConfigMap {
        self.check.build_config_map(default_check_config(
            self.run_in_runners,
            &self.custom_resources,
        ))
    }

    fn merge_user_config_map(
        &self,
        managers: &ResourceManagers,
        source: &str,
    ) -> std::result::Result<ConfigMap, CheckConfigError> {
        let mut data = managers
            .existing_config_map(&self.check.namespace, source)
            .and_then(|cm| cm.data.clone())
            .ok_or_else(|| CheckConfigError::ConfigMapNotFound(source.to_string()))?;
        if data.is_empty() {
            return Err(CheckConfigError::EmptyConfigMap(source.to_string()));
        }
        if !self.run_in_runners && data.len() != 1 {
            return Err(CheckConfigError::TooManyEntries(source.to_string()));
        }

        let mut already_collected = Vec::new();
        for content in data.values() {
            let (_, instance) = parse_instance(content)?;
            already_collected.extend(crd_collectors(&instance));
        }
        let missing: Vec<String> = self
            .custom_resources
            .iter()
            .filter(|cr| !already_collected.contains(cr))
            .cloned()
            .collect();

        // BTreeMap keys are sorted, the last file gets the new collectors.
        if let Some(mut last) = data.last_entry() {
            let merged = add_custom_resources(last.get(), &missing)?;
            last.insert(merged);
        }
        debug!(
            config_map = %source,
            added = missing.len(),
            "merged custom resources into user ConfigMap"
        );

        Ok(check_config::config_map(
            &self.check.namespace,
            &self.check.config_map_name,
            data,
        ))
    }
}

/// Default `orchestrator` check configuration.
pub fn default_check_config(cluster_check: bool, custom_resources: &[String]) -> String {
    let mut config = format!(
        "---\ncluster_check: {cluster_check}\nad_identifiers:\n  - _kube_orchestrator\ninit_config:\n\ninstances:\n  - skip_leader_election: {cluster_check}\n"
    );
    if !custom_resources.is_empty() {
        config.push_str("    crd_collectors:\n");
        for cr in custom_resources {
            config.push_str(&format!("      - {cr}\n"));
        }
    }
    config
}

/// The whole document and its single instance.
fn parse_instance(content: &str) -> std::result::Result<(Mapping, Mapping), CheckConfigError> {
    let config: Mapping = serde_yaml::from_str(content)?;
    let instances = config
        .get(INSTANCES_KEY)
        .ok_or(CheckConfigError::MissingInstances)?;
    let Some([instance]) = instances.as_sequence().map(Vec::as_slice) else {
        return Err(CheckConfigError::InstanceCount);
    };
    let instance = instance
        .as_mapping()
        .cloned()
        .ok_or(CheckConfigError::InstanceNotMapping)?;
    Ok((config, instance))
}

fn crd_collectors(instance: &Mapping) -> Vec<String> {
    instance
        .get(CRD_COLLECTORS_KEY)
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Append custom resources to `crd_collectors` of the single instance,
/// leaving every other setting untouched.
pub fn add_custom_resources(
    content: &str,
    custom_resources: &[String],
) -> std::result::Result<String, CheckConfigError> {
    let (mut config, mut instance) = parse_instance(content)?;
    let mut collectors = crd_collectors(&instance);
    collectors.extend(custom_resources.iter().cloned());
    instance.insert(
        Value::from(CRD_COLLECTORS_KEY),
        Value::Sequence(collectors.into_iter().map(Value::String).collect()),
    );
    config.insert(
        Value::from(INSTANCES_KEY),
        Value::Sequence(vec![Value::Mapping(instance)]),
    );
    Ok(serde_yaml::to_string(&config)?)
}

fn rbac_rules(custom_resources: &[String]) -> Vec<PolicyRule> {
    const LIST_WATCH: &[&str] = &["list", "watch"];
    let mut rules = vec![
        policy_rule(
            "",
            &[
                "pods",
                "services",
                "nodes",
                "namespaces",
                "persistentvolumes",
                "persistentvolumeclaims",
                "serviceaccounts",
                "limitranges",
            ],
            LIST_WATCH,
        ),
        policy_rule(
            "apps",
            &["deployments", "replicasets", "daemonsets", "statefulsets"],
            LIST_WATCH,
        ),
        policy_rule("batch", &["jobs", "cronjobs"], LIST_WATCH),
        policy_rule("networking.k8s.io", &["ingresses", "networkpolicies"], LIST_WATCH),
        policy_rule(
            "rbac.authorization.k8s.io",
            &["roles", "rolebindings", "clusterroles", "clusterrolebindings"],
            LIST_WATCH,
        ),
        policy_rule("autoscaling", &["horizontalpodautoscalers"], LIST_WATCH),
        policy_rule("autoscaling.k8s.io", &["verticalpodautoscalers"], LIST_WATCH),
        policy_rule("apiextensions.k8s.io", &["customresourcedefinitions"], LIST_WATCH),
        policy_rule("storage.k8s.io", &["storageclasses"], LIST_WATCH),
        policy_rule("policy", &["poddisruptionbudgets"], LIST_WATCH),
    ];

    // group/version/resource
    let mut by_group: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for cr in custom_resources {
        match cr.split('/').collect::<Vec<_>>().as_slice() {
            [group, _version, resource] => by_group.entry(*group).or_default().push(*resource),
            _ => warn!(
                custom_resource = %cr,
                "ignoring custom resource not formatted group/version/resource"
            ),
        }
    }
    for (group, resources) in by_group {
        rules.push(policy_rule(group, &resources, LIST_WATCH));
    }
    rules
}
