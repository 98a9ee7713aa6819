//! OOM kill check, reported by the core agent from system-probe data.

use super::system_probe::{add_kernel_headers, add_system_probe};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_SYSTEM_PROBE_CONFIG_ENABLE_OOM_KILL: &str = "DD_SYSTEM_PROBE_CONFIG_ENABLE_OOM_KILL";

#[derive(Debug, Default)]
pub struct OomKillFeature;

impl Feature for OomKillFeature {
    fn id(&self) -> FeatureId {
        ids::OOM_KILL
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.oom_kill.as_ref()) {
            return RequiredComponents::default();
        }
        RequiredComponents {
            agent: RequiredComponent::with_containers(&[
                AgentContainerName::CoreAgent,
                AgentContainerName::SystemProbe,
            ]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        add_system_probe(managers, &[AgentContainerName::CoreAgent]);
        add_kernel_headers(managers);
        managers.env_var().add_env_var_to_containers(
            &[AgentContainerName::CoreAgent, AgentContainerName::SystemProbe],
            bool_env_var(DD_SYSTEM_PROBE_CONFIG_ENABLE_OOM_KILL, true),
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
    fn test_enabled() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.oom_kill = Some(ToggleFeatureConfig::enabled(true));
        let mut feature = OomKillFeature;
        let rc = feature.configure(&dda_with(spec));
        assert!(rc.agent.is_privileged());

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(
                &managers,
                AgentContainerName::SystemProbe,
                DD_SYSTEM_PROBE_CONFIG_ENABLE_OOM_KILL
            )
            .as_deref(),
            Some("true")
        );
        assert!(env_value(
            &managers,
            AgentContainerName::TraceAgent,
            DD_SYSTEM_PROBE_CONFIG_ENABLE_OOM_KILL
        )
        .is_none());
    }
}
