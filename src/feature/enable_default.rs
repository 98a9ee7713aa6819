//! Baseline configuration every DatadogAgent gets.
//!
//! Requires the node agent and the cluster agent, and creates what they
//! cannot run without: service accounts, base RBAC, the cluster agent
//! Service and the install-info ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids, shared};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::merger::env::env_var;
use crate::merger::rbac::{named_policy_rule, non_resource_rule, policy_rule};
use crate::merger::service::service_port;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{
    CLUSTER_ID_RESOURCE_NAME, LEGACY_LEADER_ELECTION_RESOURCE_NAME, cluster_agent_service_name,
    component_resource_name, install_info_config_map_name, leader_election_resource_name,
    pod_selector_labels, rbac_resource_name, service_account_name, should_create_rbac,
};

pub const DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME: &str = "DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME";
pub const DD_AGENT_DAEMONSET: &str = "DD_AGENT_DAEMONSET";
pub const DD_CLUSTER_AGENT_DEPLOYMENT: &str = "DD_CLUSTER_AGENT_DEPLOYMENT";
pub const DD_DATADOG_AGENT_CUSTOM_RESOURCE: &str = "DD_DATADOG_AGENT_CUSTOM_RESOURCE";
pub const DD_KUBERNETES_POD_LABELS_AS_TAGS: &str = "DD_KUBERNETES_POD_LABELS_AS_TAGS";
pub const DD_KUBERNETES_POD_ANNOTATIONS_AS_TAGS: &str = "DD_KUBERNETES_POD_ANNOTATIONS_AS_TAGS";
pub const DD_KUBERNETES_NODE_LABELS_AS_TAGS: &str = "DD_KUBERNETES_NODE_LABELS_AS_TAGS";
pub const DD_KUBERNETES_NAMESPACE_LABELS_AS_TAGS: &str = "DD_KUBERNETES_NAMESPACE_LABELS_AS_TAGS";

pub const CLUSTER_AGENT_PORT: i32 = 5005;
pub const CLUSTER_AGENT_PORT_NAME: &str = "agentport";
pub const INSTALL_INFO_KEY: &str = "install_info";

#[derive(Debug, Default)]
pub struct DefaultFeature {
    namespace: String,
    name: String,
    agent_service_account: String,
    cluster_agent_service_account: String,
    runner_service_account: String,
    agent_rbac: Option<String>,
    cluster_agent_rbac: Option<String>,
    runner_rbac: Option<String>,
    daemonset_name: String,
    deployment_name: String,
    cluster_agent_service: String,
    cluster_agent_selector: BTreeMap<String, String>,
    leader_election_name: String,
    install_info_name: String,
    labels_as_tags: Vec<(&'static str, BTreeMap<String, String>)>,
}

impl Feature for DefaultFeature {
    fn id(&self) -> FeatureId {
        ids::ENABLE_DEFAULT
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        self.namespace = dda.namespace().unwrap_or_default();
        self.name = dda.name_any();
        self.agent_service_account = service_account_name(dda, ComponentName::NodeAgent);
        self.cluster_agent_service_account = service_account_name(dda, ComponentName::ClusterAgent);
        self.runner_service_account =
            service_account_name(dda, ComponentName::ClusterChecksRunner);

        let rbac = |component| {
            should_create_rbac(dda, component).then(|| rbac_resource_name(dda, component))
        };
        self.agent_rbac = rbac(ComponentName::NodeAgent);
        self.cluster_agent_rbac = rbac(ComponentName::ClusterAgent);
        self.runner_rbac = rbac(ComponentName::ClusterChecksRunner);

        self.daemonset_name = component_resource_name(dda, ComponentName::NodeAgent);
        self.deployment_name = component_resource_name(dda, ComponentName::ClusterAgent);
        self.cluster_agent_service = cluster_agent_service_name(dda);
        self.cluster_agent_selector = pod_selector_labels(dda, ComponentName::ClusterAgent);
        self.leader_election_name = leader_election_resource_name(dda);
        self.install_info_name = install_info_config_map_name(dda);

        let global = &dda.spec.global;
        self.labels_as_tags = [
            (DD_KUBERNETES_POD_LABELS_AS_TAGS, &global.pod_labels_as_tags),
            (
                DD_KUBERNETES_POD_ANNOTATIONS_AS_TAGS,
                &global.pod_annotations_as_tags,
            ),
            (DD_KUBERNETES_NODE_LABELS_AS_TAGS, &global.node_labels_as_tags),
            (
                DD_KUBERNETES_NAMESPACE_LABELS_AS_TAGS,
                &global.namespace_labels_as_tags,
            ),
        ]
        .into_iter()
        .filter(|(_, map)| !map.is_empty())
        .map(|(name, map)| (name, map.clone()))
        .collect();

        RequiredComponents {
            agent: RequiredComponent::required(true),
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            cluster_checks_runner: RequiredComponent::default(),
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        components: &RequiredComponents,
    ) -> Result<()> {
        managers.store().add_or_update(self.install_info_config_map());

        if components.agent.is_enabled() {
            managers
                .rbac()
                .add_service_account(&self.namespace, &self.agent_service_account)?;
            if let Some(role) = &self.agent_rbac {
                managers.rbac().add_cluster_policy_rules(
                    &self.namespace,
                    role,
                    &self.agent_service_account,
                    agent_cluster_role_rules(),
                )?;
            }
        }

        if components.cluster_agent.is_enabled() {
            managers
                .rbac()
                .add_service_account(&self.namespace, &self.cluster_agent_service_account)?;
            if let Some(role) = &self.cluster_agent_rbac {
                managers.rbac().add_policy_rules(
                    &self.namespace,
                    role,
                    &self.cluster_agent_service_account,
                    cluster_agent_role_rules(&self.name, &self.leader_election_name),
                )?;
                managers.rbac().add_cluster_policy_rules(
                    &self.namespace,
                    role,
                    &self.cluster_agent_service_account,
                    cluster_agent_cluster_role_rules(),
                )?;
            }
            managers.service().add_service(
                &self.cluster_agent_service,
                &self.namespace,
                self.cluster_agent_selector.clone(),
                vec![service_port(
                    CLUSTER_AGENT_PORT_NAME,
                    CLUSTER_AGENT_PORT,
                    CLUSTER_AGENT_PORT,
                    "TCP",
                )],
                None,
            )?;
        }

        if components.cluster_checks_runner.is_enabled() {
            managers
                .rbac()
                .add_service_account(&self.namespace, &self.runner_service_account)?;
            if let Some(role) = &self.runner_rbac {
                managers.rbac().add_cluster_policy_rules(
                    &self.namespace,
                    role,
                    &self.runner_service_account,
                    runner_cluster_role_rules(),
                )?;
            }
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.add_common_env(managers)?;
        let mut env = managers.env_var();
        env.add_env_var(env_var(
            DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME,
            self.cluster_agent_service_account.as_str(),
        ));
        env.add_env_var(env_var(DD_AGENT_DAEMONSET, self.daemonset_name.as_str()));
        env.add_env_var(env_var(
            DD_CLUSTER_AGENT_DEPLOYMENT,
            self.deployment_name.as_str(),
        ));
        env.add_env_var(env_var(DD_DATADOG_AGENT_CUSTOM_RESOURCE, self.name.as_str()));
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.add_common_env(managers)
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        provider: &str,
    ) -> Result<()> {
        self.manage_node_agent(managers, provider)
    }

    fn manage_cluster_checks_runner(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.add_common_env(managers)
    }
}

impl DefaultFeature {
    fn add_common_env(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        for (name, map) in &self.labels_as_tags {
            managers
                .env_var()
                .add_env_var(shared::json_env_var(name, map)?);
        }
        Ok(())
    }

    fn install_info_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.install_info_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                INSTALL_INFO_KEY.to_string(),
                install_info_value(),
            )])),
            ..Default::default()
        }
    }
}

fn install_info_value() -> String {
    format!(
        "---\ninstall_method:\n  tool: datadog-operator\n  tool_version: unknown\n  installer_version: {}\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn agent_cluster_role_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule(
            "",
            &["nodes/metrics", "nodes/spec", "nodes/proxy", "nodes/stats"],
            &["get"],
        ),
        policy_rule("", &["endpoints"], &["get"]),
        policy_rule("coordination.k8s.io", &["leases"], &["get"]),
        policy_rule(
            "metrics.eks.amazonaws.com",
            &["kcm/metrics", "ksh/metrics"],
            &["get"],
        ),
        non_resource_rule(&["/metrics", "/metrics/slis"], &["get"]),
    ]
}

fn cluster_agent_role_rules(dda_name: &str, leader_election: &str) -> Vec<PolicyRule> {
    vec![
        named_policy_rule(
            "",
            &["configmaps"],
            &[LEGACY_LEADER_ELECTION_RESOURCE_NAME, leader_election],
            &["get", "update"],
        ),
        policy_rule("", &["configmaps"], &["create"]),
        policy_rule("coordination.k8s.io", &["leases"], &["create"]),
        named_policy_rule(
            "coordination.k8s.io",
            &["leases"],
            &[leader_election],
            &["get", "update"],
        ),
        named_policy_rule(
            "",
            &["configmaps"],
            &[CLUSTER_ID_RESOURCE_NAME],
            &["get", "update", "create"],
        ),
        named_policy_rule("datadoghq.com", &["datadogagents"], &[dda_name], &["get"]),
    ]
}

fn cluster_agent_cluster_role_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule(
            "",
            &[
                "services",
                "events",
                "endpoints",
                "pods",
                "nodes",
                "componentstatuses",
                "configmaps",
                "namespaces",
            ],
            &["get", "list", "watch"],
        ),
        policy_rule("quota.openshift.io", &["clusterresourcequotas"], &["get", "list"]),
        non_resource_rule(&["/version", "/healthz"], &["get"]),
        policy_rule("autoscaling", &["horizontalpodautoscalers"], &["list", "watch"]),
        named_policy_rule("", &["namespaces"], &["kube-system"], &["get"]),
    ]
}

fn runner_cluster_role_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule(
            "",
            &[
                "services",
                "events",
                "endpoints",
                "pods",
                "nodes",
                "componentstatuses",
            ],
            &["get", "list", "watch"],
        ),
        policy_rule("coordination.k8s.io", &["leases"], &["get"]),
        non_resource_rule(&["/version", "/healthz", "/metrics"], &["get"]),
    ]
}
