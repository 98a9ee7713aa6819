//! Cloud workload security: runtime threat detection in system-probe,
//! reported through the security agent.

use super::shared;
use super::system_probe::add_system_probe;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent, is_enabled};
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{
    GROUP_HOST_PATH, GROUP_MOUNT_PATH, GROUP_VOLUME_NAME, HOST_ROOT_HOST_PATH,
    HOST_ROOT_MOUNT_PATH, HOST_ROOT_VOLUME_NAME, OS_RELEASE_HOST_PATH, OS_RELEASE_MOUNT_PATH,
    OS_RELEASE_VOLUME_NAME, PASSWD_HOST_PATH, PASSWD_MOUNT_PATH, PASSWD_VOLUME_NAME,
    SECURITY_AGENT_RUNTIME_POLICIES_VOLUME_PATH, SECURITYFS_HOST_PATH, SECURITYFS_MOUNT_PATH,
    SECURITYFS_VOLUME_NAME, SYSTEM_PROBE_SOCKET_VOLUME_PATH, TRACEFS_PATH, TRACEFS_VOLUME_NAME,
};

use super::cspm::DD_HOST_ROOT;

pub const DD_RUNTIME_SECURITY_CONFIG_ENABLED: &str = "DD_RUNTIME_SECURITY_CONFIG_ENABLED";
pub const DD_RUNTIME_SECURITY_CONFIG_SOCKET: &str = "DD_RUNTIME_SECURITY_CONFIG_SOCKET";
pub const DD_RUNTIME_SECURITY_CONFIG_SYSCALL_MONITOR_ENABLED: &str =
    "DD_RUNTIME_SECURITY_CONFIG_SYSCALL_MONITOR_ENABLED";
pub const DD_RUNTIME_SECURITY_CONFIG_NETWORK_ENABLED: &str =
    "DD_RUNTIME_SECURITY_CONFIG_NETWORK_ENABLED";
pub const DD_RUNTIME_SECURITY_CONFIG_ACTIVITY_DUMP_ENABLED: &str =
    "DD_RUNTIME_SECURITY_CONFIG_ACTIVITY_DUMP_ENABLED";
pub const DD_RUNTIME_SECURITY_CONFIG_REMOTE_CONFIGURATION_ENABLED: &str =
    "DD_RUNTIME_SECURITY_CONFIG_REMOTE_CONFIGURATION_ENABLED";
pub const DD_RUNTIME_SECURITY_CONFIG_POLICIES_DIR: &str = "DD_RUNTIME_SECURITY_CONFIG_POLICIES_DIR";

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const SECURITY: AgentContainerName = AgentContainerName::SecurityAgent;
const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

#[derive(Debug, Default)]
pub struct CwsFeature {
    syscall_monitor: bool,
    network: bool,
    security_profiles: bool,
    remote_configuration: bool,
}

impl Feature for CwsFeature {
    fn id(&self) -> FeatureId {
        ids::CWS
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(cws) = dda
            .spec
            .features
            .cws
            .as_ref()
            .filter(|c| c.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.syscall_monitor = cws.syscall_monitor_enabled.unwrap_or(false);
        self.network = is_enabled(cws.network.as_ref());
        self.security_profiles = is_enabled(cws.security_profiles.as_ref());
        self.remote_configuration = shared::remote_config_enabled(dda);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, SECURITY, SYSTEM_PROBE]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        add_system_probe(managers, &[CORE, SECURITY]);

        for (name, host_path, mount_path, read_only) in [
            (TRACEFS_VOLUME_NAME, TRACEFS_PATH, TRACEFS_PATH, false),
            (SECURITYFS_VOLUME_NAME, SECURITYFS_HOST_PATH, SECURITYFS_MOUNT_PATH, true),
            (PASSWD_VOLUME_NAME, PASSWD_HOST_PATH, PASSWD_MOUNT_PATH, true),
            (GROUP_VOLUME_NAME, GROUP_HOST_PATH, GROUP_MOUNT_PATH, true),
            (OS_RELEASE_VOLUME_NAME, OS_RELEASE_HOST_PATH, OS_RELEASE_MOUNT_PATH, true),
        ] {
            let (volume, mount) = host_path_volume(name, host_path, mount_path, read_only);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, SYSTEM_PROBE);
        }
        let (host_root, host_root_mount) = host_path_volume(
            HOST_ROOT_VOLUME_NAME,
            HOST_ROOT_HOST_PATH,
            HOST_ROOT_MOUNT_PATH,
            true,
        );
        managers.volume().add_volume(host_root);
        managers
            .volume_mount()
            .add_volume_mount_to_container(host_root_mount, SECURITY);

        let all = [CORE, SECURITY, SYSTEM_PROBE];
        let mut env = managers.env_var();
        env.add_env_var_to_containers(&all, bool_env_var(DD_RUNTIME_SECURITY_CONFIG_ENABLED, true));
        env.add_env_var_to_containers(
            &all,
            env_var(
                DD_RUNTIME_SECURITY_CONFIG_SOCKET,
                format!("{SYSTEM_PROBE_SOCKET_VOLUME_PATH}/runtime-security.sock"),
            ),
        );
        if self.syscall_monitor {
            env.add_env_var_to_containers(
                &all,
                bool_env_var(DD_RUNTIME_SECURITY_CONFIG_SYSCALL_MONITOR_ENABLED, true),
            );
        }
        for (enabled, name) in [
            (self.network, DD_RUNTIME_SECURITY_CONFIG_NETWORK_ENABLED),
            (self.security_profiles, DD_RUNTIME_SECURITY_CONFIG_ACTIVITY_DUMP_ENABLED),
            (
                self.remote_configuration,
                DD_RUNTIME_SECURITY_CONFIG_REMOTE_CONFIGURATION_ENABLED,
            ),
        ] {
            if enabled {
                env.add_env_var_to_container(SYSTEM_PROBE, bool_env_var(name, true));
            }
        }
        env.add_env_var_to_container(
            SYSTEM_PROBE,
            env_var(
                DD_RUNTIME_SECURITY_CONFIG_POLICIES_DIR,
                SECURITY_AGENT_RUNTIME_POLICIES_VOLUME_PATH,
            ),
        );
        env.add_env_var_to_container(SECURITY, env_var(DD_HOST_ROOT, HOST_ROOT_MOUNT_PATH));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{CwsFeatureConfig, DatadogAgentSpec, ToggleFeatureConfig};
    use crate::feature::tests::*;

    #[test]
    fn test_enabled_with_options() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.cws = Some(CwsFeatureConfig {
            enabled: Some(true),
            syscall_monitor_enabled: Some(true),
            network: Some(ToggleFeatureConfig::enabled(true)),
            security_profiles: None,
        });
        spec.features.remote_configuration = Some(ToggleFeatureConfig::enabled(true));
        let mut feature = CwsFeature::default();
        let rc = feature.configure(&dda_with(spec));
        assert_eq!(rc.agent.containers, vec![CORE, SECURITY, SYSTEM_PROBE]);

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, SECURITY, DD_RUNTIME_SECURITY_CONFIG_SOCKET).as_deref(),
            Some("/var/run/sysprobe/runtime-security.sock")
        );
        assert_eq!(
            env_value(&managers, CORE, DD_RUNTIME_SECURITY_CONFIG_SYSCALL_MONITOR_ENABLED)
                .as_deref(),
            Some("true")
        );
        assert_eq!(
            env_value(&managers, SYSTEM_PROBE, DD_RUNTIME_SECURITY_CONFIG_NETWORK_ENABLED)
                .as_deref(),
            Some("true")
        );
        assert!(
            env_value(&managers, SYSTEM_PROBE, DD_RUNTIME_SECURITY_CONFIG_ACTIVITY_DUMP_ENABLED)
                .is_none()
        );
        assert_eq!(
            env_value(
                &managers,
                SYSTEM_PROBE,
                DD_RUNTIME_SECURITY_CONFIG_REMOTE_CONFIGURATION_ENABLED
            )
            .as_deref(),
            Some("true")
        );
        let volumes = volume_names(&managers);
        assert!(volumes.contains(&TRACEFS_VOLUME_NAME.to_string()));
        assert!(volumes.contains(&HOST_ROOT_VOLUME_NAME.to_string()));
    }

    #[test]
    fn test_disabled() {
        let mut feature = CwsFeature::default();
        assert!(!feature
            .configure(&dda_with(DatadogAgentSpec::default()))
            .is_configured());
    }
}
