//! eBPF check: statistics about the eBPF programs loaded on the host.

use super::system_probe::add_system_probe;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_EBPF_CHECK_ENABLED: &str = "DD_EBPF_CHECK_ENABLED";

#[derive(Debug, Default)]
pub struct EbpfCheckFeature;

impl Feature for EbpfCheckFeature {
    fn id(&self) -> FeatureId {
        ids::EBPF_CHECK
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.ebpf_check.as_ref()) {
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
        managers.env_var().add_env_var_to_containers(
            &[AgentContainerName::CoreAgent, AgentContainerName::SystemProbe],
            bool_env_var(DD_EBPF_CHECK_ENABLED, true),
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
    use crate::resources::volumes::MODULES_VOLUME_NAME;

    #[test]
    fn test_enabled_without_kernel_headers() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.ebpf_check = Some(ToggleFeatureConfig::enabled(true));
        let mut feature = EbpfCheckFeature;
        feature.configure(&dda_with(spec));

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, AgentContainerName::CoreAgent, DD_EBPF_CHECK_ENABLED).as_deref(),
            Some("true")
        );
        assert!(!volume_names(&managers).contains(&MODULES_VOLUME_NAME.to_string()));
    }
}
