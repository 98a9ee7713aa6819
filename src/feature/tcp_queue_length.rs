//! TCP queue length check.

use super::system_probe::{add_kernel_headers, add_system_probe};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_SYSTEM_PROBE_CONFIG_ENABLE_TCP_QUEUE_LENGTH: &str =
    "DD_SYSTEM_PROBE_CONFIG_ENABLE_TCP_QUEUE_LENGTH";

#[derive(Debug, Default)]
pub struct TcpQueueLengthFeature;

impl Feature for TcpQueueLengthFeature {
    fn id(&self) -> FeatureId {
        ids::TCP_QUEUE_LENGTH
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.tcp_queue_length.as_ref()) {
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
            bool_env_var(DD_SYSTEM_PROBE_CONFIG_ENABLE_TCP_QUEUE_LENGTH, true),
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
    use crate::resources::volumes::SRC_VOLUME_NAME;

    #[test]
    fn test_enabled() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.tcp_queue_length = Some(ToggleFeatureConfig::enabled(true));
        let mut feature = TcpQueueLengthFeature;
        assert!(feature.configure(&dda_with(spec)).agent.is_enabled());

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(
                &managers,
                AgentContainerName::CoreAgent,
                DD_SYSTEM_PROBE_CONFIG_ENABLE_TCP_QUEUE_LENGTH
            )
            .as_deref(),
            Some("true")
        );
        assert!(volume_names(&managers).contains(&SRC_VOLUME_NAME.to_string()));
    }

    #[test]
    fn test_explicitly_disabled() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.tcp_queue_length = Some(ToggleFeatureConfig::enabled(false));
        assert!(!TcpQueueLengthFeature.configure(&dda_with(spec)).is_configured());
    }
}
