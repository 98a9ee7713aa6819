//! Service discovery.
//!
//! system-probe inspects the processes of the node to name the services
//! they run. With network stats on it also attributes traffic to them,
//! which needs the eBPF mounts.

use super::system_probe::add_system_probe;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{MODULES_PATH, MODULES_VOLUME_NAME, SRC_PATH, SRC_VOLUME_NAME};

pub const DD_DISCOVERY_ENABLED: &str = "DD_DISCOVERY_ENABLED";
pub const DD_DISCOVERY_NETWORK_STATS_ENABLED: &str = "DD_DISCOVERY_NETWORK_STATS_ENABLED";

/// Provider whose nodes ship without kernel sources.
pub const GKE_COS_PROVIDER: &str = "gke-cos";

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

#[derive(Debug, Default)]
pub struct ServiceDiscoveryFeature {
    network_stats: bool,
}

impl Feature for ServiceDiscoveryFeature {
    fn id(&self) -> FeatureId {
        ids::SERVICE_DISCOVERY
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(discovery) = dda
            .spec
            .features
            .service_discovery
            .as_ref()
            .filter(|sd| sd.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.network_stats = discovery
            .network_stats
            .as_ref()
            .is_none_or(|ns| ns.enabled.unwrap_or(false));

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, SYSTEM_PROBE]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, provider: &str) -> Result<()> {
        add_system_probe(managers, &[CORE]);

        if self.network_stats {
            let mut host_paths = vec![(MODULES_VOLUME_NAME, MODULES_PATH, true)];
            if provider != GKE_COS_PROVIDER {
                host_paths.push((SRC_VOLUME_NAME, SRC_PATH, false));
            }
            for (name, path, read_only) in host_paths {
                let (volume, mount) = host_path_volume(name, path, path, read_only);
                managers.volume().add_volume(volume);
                managers
                    .volume_mount()
                    .add_volume_mount_to_container(mount, SYSTEM_PROBE);
            }
        }

        let mut env = managers.env_var();
        env.add_env_var_to_containers(
            &[CORE, SYSTEM_PROBE, AgentContainerName::InitConfig],
            bool_env_var(DD_DISCOVERY_ENABLED, true),
        );
        env.add_env_var_to_container(
            SYSTEM_PROBE,
            bool_env_var(DD_DISCOVERY_NETWORK_STATS_ENABLED, self.network_stats),
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{DatadogAgentSpec, ServiceDiscoveryFeatureConfig, ToggleFeatureConfig};
    use crate::feature::system_probe::apparmor_annotation_key;
    use crate::feature::tests::*;

    fn configure(
        sd: ServiceDiscoveryFeatureConfig,
    ) -> (ServiceDiscoveryFeature, RequiredComponents) {
        let mut spec = DatadogAgentSpec::default();
        spec.features.service_discovery = Some(sd);
        let mut feature = ServiceDiscoveryFeature::default();
        let rc = feature.configure(&dda_with(spec));
        (feature, rc)
    }

    fn volume_names(managers: &PodTemplateManagers) -> Vec<String> {
        managers
            .template()
            .spec
            .as_ref()
            .and_then(|s| s.volumes.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect()
    }

    #[test]
    fn test_network_stats_on_by_default() {
        let (feature, rc) = configure(ServiceDiscoveryFeatureConfig {
            enabled: Some(true),
            network_stats: None,
        });
        assert_eq!(rc.agent.containers, vec![CORE, SYSTEM_PROBE]);
        assert!(rc.agent.is_privileged());

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert!(managers.annotation().get(&apparmor_annotation_key()).is_some());
        assert_eq!(
            env_value(&managers, CORE, DD_DISCOVERY_ENABLED).as_deref(),
            Some("true")
        );
        assert_eq!(
            env_value(&managers, SYSTEM_PROBE, DD_DISCOVERY_NETWORK_STATS_ENABLED).as_deref(),
            Some("true")
        );
        let volumes = volume_names(&managers);
        assert!(volumes.contains(&MODULES_VOLUME_NAME.to_string()));
        assert!(volumes.contains(&SRC_VOLUME_NAME.to_string()));
    }

    #[test]
    fn test_gke_cos_skips_kernel_sources() {
        let (feature, _) = configure(ServiceDiscoveryFeatureConfig {
            enabled: Some(true),
            network_stats: None,
        });
        let mut managers = node_agent_managers();
        feature
            .manage_node_agent(&mut managers, GKE_COS_PROVIDER)
            .unwrap();
        let volumes = volume_names(&managers);
        assert!(volumes.contains(&MODULES_VOLUME_NAME.to_string()));
        assert!(!volumes.contains(&SRC_VOLUME_NAME.to_string()));
    }

    #[test]
    fn test_network_stats_disabled() {
        let (feature, _) = configure(ServiceDiscoveryFeatureConfig {
            enabled: Some(true),
            network_stats: Some(ToggleFeatureConfig::enabled(false)),
        });
        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, SYSTEM_PROBE, DD_DISCOVERY_NETWORK_STATS_ENABLED).as_deref(),
            Some("false")
        );
        assert!(!volume_names(&managers).contains(&MODULES_VOLUME_NAME.to_string()));
    }

    #[test]
    fn test_disabled() {
        let (_, rc) = configure(ServiceDiscoveryFeatureConfig::default());
        assert!(!rc.is_configured());
    }
}
