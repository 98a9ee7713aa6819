//! Cluster checks dispatched by the cluster agent.
//!
//! Checks are scheduled either on the node agents or, when
//! `useClusterChecksRunners` is set, on a dedicated runner Deployment.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::warn;

use super::shared::{self, NetworkPolicyTarget};
use super::{
    ChecksumAnnotation, Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::hash::generate_md5_for_spec;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::pod_selector;

use super::enable_default::CLUSTER_AGENT_PORT;

pub const DD_CLUSTER_CHECKS_ENABLED: &str = "DD_CLUSTER_CHECKS_ENABLED";
pub const DD_EXTRA_CONFIG_PROVIDERS: &str = "DD_EXTRA_CONFIG_PROVIDERS";
pub const DD_EXTRA_LISTENERS: &str = "DD_EXTRA_LISTENERS";

pub const KUBE_SERVICES_AND_ENDPOINTS_CONFIG_PROVIDERS: &str =
    "kube_services kube_endpoints";
pub const KUBE_SERVICES_AND_ENDPOINTS_LISTENERS: &str = "kube_services kube_endpoints";
pub const CLUSTER_AND_ENDPOINTS_CONFIG_PROVIDERS: &str = "clusterchecks endpointschecks";
pub const ENDPOINTS_CHECKS_CONFIG_PROVIDER: &str = "endpointschecks";
pub const CLUSTER_CHECKS_CONFIG_PROVIDER: &str = "clusterchecks";

#[derive(Debug, Default)]
pub struct ClusterChecksFeature {
    use_runners: bool,
    checksum: Option<String>,
    network_policy: Option<NetworkPolicyTarget>,
    runner_selector: Option<LabelSelector>,
}

impl Feature for ClusterChecksFeature {
    fn id(&self) -> FeatureId {
        ids::CLUSTER_CHECKS
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        // The section is hashed whether or not it enables anything, so that
        // toggling it restarts the cluster agent.
        self.checksum = dda
            .spec
            .features
            .cluster_checks
            .as_ref()
            .and_then(|section| match generate_md5_for_spec(section) {
                Ok(hash) => Some(hash),
                Err(error) => {
                    warn!(%error, "failed to hash cluster checks configuration");
                    None
                }
            });

        if !shared::cluster_checks_enabled(dda) {
            return RequiredComponents::default();
        }
        self.use_runners = shared::use_cluster_checks_runners(dda);
        self.network_policy =
            NetworkPolicyTarget::for_feature(dda, ComponentName::ClusterAgent, ids::CLUSTER_CHECKS);
        self.runner_selector = Some(pod_selector(dda, ComponentName::ClusterChecksRunner));

        RequiredComponents {
            agent: RequiredComponent::required(true),
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            cluster_checks_runner: RequiredComponent::required(self.use_runners),
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        if let Some(policy) = &self.network_policy {
            let from = self.runner_selector.clone().into_iter().collect();
            policy.allow_ingress(
                managers,
                "Ingress from cluster workers",
                CLUSTER_AGENT_PORT,
                "TCP",
                from,
            )?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        const DCA: AgentContainerName = AgentContainerName::ClusterAgent;
        let mut env = managers.env_var();
        env.add_env_var_to_container(DCA, bool_env_var(DD_CLUSTER_CHECKS_ENABLED, true));
        env.add_env_var_to_container(
            DCA,
            env_var(
                DD_EXTRA_CONFIG_PROVIDERS,
                KUBE_SERVICES_AND_ENDPOINTS_CONFIG_PROVIDERS,
            ),
        );
        env.add_env_var_to_container(
            DCA,
            env_var(DD_EXTRA_LISTENERS, KUBE_SERVICES_AND_ENDPOINTS_LISTENERS),
        );
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.manage_agent(managers, AgentContainerName::CoreAgent);
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.manage_agent(managers, AgentContainerName::UnprivilegedSingleAgent);
        Ok(())
    }

    fn manage_cluster_checks_runner(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        if !self.use_runners {
            return Ok(());
        }
        const RUNNER: AgentContainerName = AgentContainerName::ClusterChecksRunner;
        let mut env = managers.env_var();
        env.add_env_var_to_container(RUNNER, bool_env_var(DD_CLUSTER_CHECKS_ENABLED, true));
        env.add_env_var_to_container(
            RUNNER,
            env_var(DD_EXTRA_CONFIG_PROVIDERS, CLUSTER_CHECKS_CONFIG_PROVIDER),
        );
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum
            .iter()
            .map(|hash| {
                ChecksumAnnotation::new(
                    ComponentName::ClusterAgent,
                    ids::CLUSTER_CHECKS,
                    hash.clone(),
                )
            })
            .collect()
    }
}

impl ClusterChecksFeature {
    fn manage_agent(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        let providers = if self.use_runners {
            ENDPOINTS_CHECKS_CONFIG_PROVIDER
        } else {
            CLUSTER_AND_ENDPOINTS_CONFIG_PROVIDERS
        };
        managers
            .env_var()
            .add_env_var_to_container(container, env_var(DD_EXTRA_CONFIG_PROVIDERS, providers));
    }
}
