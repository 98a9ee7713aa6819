//! Process discovery: a lightweight process inventory that does not need
//! live process collection.

use super::shared::ProcessChecks;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED: &str =
    "DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED";

#[derive(Debug, Default)]
pub struct ProcessDiscoveryFeature {
    process_checks: ProcessChecks,
}

impl Feature for ProcessDiscoveryFeature {
    fn id(&self) -> FeatureId {
        ids::PROCESS_DISCOVERY
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.process_discovery.as_ref()) {
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
            bool_env_var(DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED, true),
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
            bool_env_var(DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED, true),
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{DatadogAgentSpec, ToggleFeatureConfig};
    use crate::feature::tests::*;

    #[test]
    fn test_runs_in_core_agent_when_asked() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.process_discovery = Some(ToggleFeatureConfig::enabled(true));
        spec.global.run_process_checks_in_core_agent = Some(true);
        let mut feature = ProcessDiscoveryFeature::default();
        let rc = feature.configure(&dda_with(spec));
        assert_eq!(rc.agent.containers, vec![AgentContainerName::CoreAgent]);

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(
                &managers,
                AgentContainerName::CoreAgent,
                DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED
            )
            .as_deref(),
            Some("true")
        );
        assert!(env_value(
            &managers,
            AgentContainerName::ProcessAgent,
            DD_PROCESS_CONFIG_PROCESS_DISCOVERY_ENABLED
        )
        .is_none());
    }

    #[test]
    fn test_missing_section_is_disabled() {
        let mut feature = ProcessDiscoveryFeature::default();
        assert!(!feature
            .configure(&dda_with(DatadogAgentSpec::default()))
            .is_configured());
    }
}
