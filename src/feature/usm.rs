//! Universal service monitoring.

use super::system_probe::{add_kernel_headers, add_system_probe};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;

pub const DD_SERVICE_MONITORING_ENABLED: &str = "DD_SERVICE_MONITORING_ENABLED";

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const PROCESS: AgentContainerName = AgentContainerName::ProcessAgent;
const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

#[derive(Debug, Default)]
pub struct UsmFeature;

impl Feature for UsmFeature {
    fn id(&self) -> FeatureId {
        ids::USM
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !is_enabled(dda.spec.features.usm.as_ref()) {
            return RequiredComponents::default();
        }
        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, PROCESS, SYSTEM_PROBE]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        add_system_probe(managers, &[CORE, PROCESS]);
        add_kernel_headers(managers);
        managers.env_var().add_env_var_to_containers(
            &[CORE, PROCESS, SYSTEM_PROBE],
            bool_env_var(DD_SERVICE_MONITORING_ENABLED, true),
        );
        Ok(())
    }
}
