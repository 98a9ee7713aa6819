//! Software bill of materials for container images and hosts.

use super::cspm::DD_HOST_ROOT;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, SbomTypeConfig};
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{HOST_ROOT_HOST_PATH, HOST_ROOT_MOUNT_PATH, HOST_ROOT_VOLUME_NAME};

pub const DD_SBOM_ENABLED: &str = "DD_SBOM_ENABLED";
pub const DD_SBOM_CONTAINER_IMAGE_ENABLED: &str = "DD_SBOM_CONTAINER_IMAGE_ENABLED";
pub const DD_SBOM_CONTAINER_IMAGE_ANALYZERS: &str = "DD_SBOM_CONTAINER_IMAGE_ANALYZERS";
pub const DD_SBOM_HOST_ENABLED: &str = "DD_SBOM_HOST_ENABLED";
pub const DD_SBOM_HOST_ANALYZERS: &str = "DD_SBOM_HOST_ANALYZERS";

/// Analyzers of one SBOM target; `None` when the target is off.
fn analyzers(config: Option<&SbomTypeConfig>) -> Option<Vec<String>> {
    config
        .filter(|c| c.enabled.unwrap_or(false))
        .map(|c| c.analyzers.clone())
}

#[derive(Debug, Default)]
pub struct SbomFeature {
    container_image: Option<Vec<String>>,
    host: Option<Vec<String>>,
}

impl Feature for SbomFeature {
    fn id(&self) -> FeatureId {
        ids::SBOM
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(sbom) = dda
            .spec
            .features
            .sbom
            .as_ref()
            .filter(|s| s.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.container_image = analyzers(sbom.container_image.as_ref());
        self.host = analyzers(sbom.host.as_ref());

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.configure_agent(managers, AgentContainerName::CoreAgent);
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.configure_agent(managers, AgentContainerName::UnprivilegedSingleAgent);
        Ok(())
    }
}

impl SbomFeature {
    fn configure_agent(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        let mut env = managers.env_var();
        env.add_env_var_to_container(container, bool_env_var(DD_SBOM_ENABLED, true));
        env.add_env_var_to_container(
            container,
            bool_env_var(DD_SBOM_CONTAINER_IMAGE_ENABLED, self.container_image.is_some()),
        );
        env.add_env_var_to_container(
            container,
            bool_env_var(DD_SBOM_HOST_ENABLED, self.host.is_some()),
        );
        for (name, analyzers) in [
            (DD_SBOM_CONTAINER_IMAGE_ANALYZERS, &self.container_image),
            (DD_SBOM_HOST_ANALYZERS, &self.host),
        ] {
            if let Some(analyzers) = analyzers.as_ref().filter(|a| !a.is_empty()) {
                env.add_env_var_to_container(container, env_var(name, analyzers.join(" ")));
            }
        }

        if self.host.is_some() {
            env.add_env_var_to_container(container, env_var(DD_HOST_ROOT, HOST_ROOT_MOUNT_PATH));
            let (volume, mount) = host_path_volume(
                HOST_ROOT_VOLUME_NAME,
                HOST_ROOT_HOST_PATH,
                HOST_ROOT_MOUNT_PATH,
                true,
            );
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, container);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{DatadogAgentSpec, SbomFeatureConfig};
    use crate::feature::tests::*;

    const CORE: AgentContainerName = AgentContainerName::CoreAgent;

    fn configured(sbom: SbomFeatureConfig) -> SbomFeature {
        let mut spec = DatadogAgentSpec::default();
        spec.features.sbom = Some(sbom);
        let mut feature = SbomFeature::default();
        assert!(feature.configure(&dda_with(spec)).agent.is_enabled());
        feature
    }

    #[test]
    fn test_enabled_without_targets() {
        let feature = configured(SbomFeatureConfig {
            enabled: Some(true),
            ..Default::default()
        });
        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(env_value(&managers, CORE, DD_SBOM_ENABLED).as_deref(), Some("true"));
        assert_eq!(
            env_value(&managers, CORE, DD_SBOM_HOST_ENABLED).as_deref(),
            Some("false")
        );
        assert!(volume_names(&managers).is_empty());
    }

    #[test]
    fn test_host_and_container_image_analyzers() {
        let feature = configured(SbomFeatureConfig {
            enabled: Some(true),
            container_image: Some(SbomTypeConfig {
                enabled: Some(true),
                analyzers: vec!["os".into(), "languages".into()],
            }),
            host: Some(SbomTypeConfig {
                enabled: Some(true),
                analyzers: vec!["os".into()],
            }),
        });
        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, CORE, DD_SBOM_CONTAINER_IMAGE_ANALYZERS).as_deref(),
            Some("os languages")
        );
        assert_eq!(
            env_value(&managers, CORE, DD_HOST_ROOT).as_deref(),
            Some(HOST_ROOT_MOUNT_PATH)
        );
        assert_eq!(volume_names(&managers), vec![HOST_ROOT_VOLUME_NAME.to_string()]);
    }

    #[test]
    fn test_disabled() {
        let mut feature = SbomFeature::default();
        assert!(!feature
            .configure(&dda_with(DatadogAgentSpec::default()))
            .is_configured());
    }
}
