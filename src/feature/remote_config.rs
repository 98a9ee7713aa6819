//! Remote configuration.
//!
//! Always configured so that every component learns whether remote
//! configuration is on, including when it was just turned off.

use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids, shared};
use crate::crd::DatadogAgent;
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_REMOTE_CONFIGURATION_ENABLED: &str = "DD_REMOTE_CONFIGURATION_ENABLED";

#[derive(Debug, Default)]
pub struct RemoteConfigFeature {
    enabled: bool,
}

impl Feature for RemoteConfigFeature {
    fn id(&self) -> FeatureId {
        ids::REMOTE_CONFIG
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        self.enabled = shared::remote_config_enabled(dda);
        RequiredComponents {
            agent: RequiredComponent::required(true),
            ..Default::default()
        }
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.broadcast(managers);
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.broadcast(managers);
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.broadcast(managers);
        Ok(())
    }

    fn manage_cluster_checks_runner(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.broadcast(managers);
        Ok(())
    }
}

impl RemoteConfigFeature {
    fn broadcast(&self, managers: &mut PodTemplateManagers) {
        managers
            .env_var()
            .add_env_var(bool_env_var(DD_REMOTE_CONFIGURATION_ENABLED, self.enabled));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{AgentContainerName, DatadogAgentSpec, ToggleFeatureConfig};
    use crate::feature::tests::*;

    #[test]
    fn test_configured_without_section() {
        let mut feature = RemoteConfigFeature::default();
        let rc = feature.configure(&dda_with(DatadogAgentSpec::default()));
        assert!(rc.is_configured());
        assert!(!rc.cluster_agent.is_configured());

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, AgentContainerName::SystemProbe, DD_REMOTE_CONFIGURATION_ENABLED)
                .as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_broadcast_to_every_container() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.remote_configuration = Some(ToggleFeatureConfig::enabled(true));
        let mut feature = RemoteConfigFeature::default();
        feature.configure(&dda_with(spec));

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        for container in [
            AgentContainerName::CoreAgent,
            AgentContainerName::TraceAgent,
            AgentContainerName::ProcessAgent,
        ] {
            assert_eq!(
                env_value(&managers, container, DD_REMOTE_CONFIGURATION_ENABLED).as_deref(),
                Some("true")
            );
        }

        let mut runner = runner_managers();
        feature.manage_cluster_checks_runner(&mut runner).unwrap();
        assert_eq!(
            env_value(
                &runner,
                AgentContainerName::ClusterChecksRunner,
                DD_REMOTE_CONFIGURATION_ENABLED
            )
            .as_deref(),
            Some("true")
        );
    }
}
