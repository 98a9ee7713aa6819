//! Live container collection.

use super::shared::ProcessChecks;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_PROCESS_CONFIG_CONTAINER_COLLECTION_ENABLED: &str =
    "DD_PROCESS_CONFIG_CONTAINER_COLLECTION_ENABLED";

#[derive(Debug, Default)]
pub struct LiveContainerFeature {
    process_checks: ProcessChecks,
}

impl Feature for LiveContainerFeature {
    fn id(&self) -> FeatureId {
        ids::LIVE_CONTAINER
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.live_container_collection.as_ref()) {
            return RequiredComponents::default();
        }
        self.process_checks = ProcessChecks::for_dda(dda);
        RequiredComponents {
            agent: RequiredComponent::with_containers(&self.process_checks.required_containers()),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.process_checks.add_run_in_core_agent_env(managers, false);
        managers.env_var().add_env_var_to_container(
            self.process_checks.container(),
            bool_env_var(DD_PROCESS_CONFIG_CONTAINER_COLLECTION_ENABLED, true),
        );
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.process_checks.add_run_in_core_agent_env(managers, true);
        managers.env_var().add_env_var_to_container(
            AgentContainerName::UnprivilegedSingleAgent,
            bool_env_var(DD_PROCESS_CONFIG_CONTAINER_COLLECTION_ENABLED, true),
        );
        Ok(())
    }
}
