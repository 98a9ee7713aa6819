//! Network performance monitoring.

use super::system_probe::{DD_SYSTEM_PROBE_EXTERNAL, add_system_probe};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{
    CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, CGROUPS_VOLUME_NAME, DEBUGFS_PATH,
    DEBUGFS_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH, PROCDIR_VOLUME_NAME,
};

pub const DD_SYSTEM_PROBE_NETWORK_ENABLED: &str = "DD_SYSTEM_PROBE_NETWORK_ENABLED";
pub const DD_SYSTEM_PROBE_CONFIG_ENABLE_CONNTRACK: &str = "DD_SYSTEM_PROBE_CONFIG_ENABLE_CONNTRACK";
pub const DD_SYSTEM_PROBE_NETWORK_COLLECT_DNS_STATS: &str =
    "DD_SYSTEM_PROBE_NETWORK_COLLECT_DNS_STATS";

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const PROCESS: AgentContainerName = AgentContainerName::ProcessAgent;
const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

#[derive(Debug, Default)]
pub struct NpmFeature {
    enable_conntrack: bool,
    collect_dns_stats: bool,
}

impl Feature for NpmFeature {
    fn id(&self) -> FeatureId {
        ids::NPM
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(npm) = dda
            .spec
            .features
            .npm
            .as_ref()
            .filter(|npm| npm.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.enable_conntrack = npm.enable_conntrack.unwrap_or(true);
        self.collect_dns_stats = npm.collect_dns_stats.unwrap_or(true);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, PROCESS, SYSTEM_PROBE]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        add_system_probe(managers, &[CORE, PROCESS]);

        // The process agent reads the same host state as system-probe to
        // resolve connections to containers.
        for (name, host_path, mount_path, read_only) in [
            (PROCDIR_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH, true),
            (CGROUPS_VOLUME_NAME, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, true),
            (DEBUGFS_VOLUME_NAME, DEBUGFS_PATH, DEBUGFS_PATH, false),
        ] {
            let (_, mount) = host_path_volume(name, host_path, mount_path, read_only);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, PROCESS);
        }

        let mut env = managers.env_var();
        env.add_env_var_to_containers(
            &[CORE, PROCESS, SYSTEM_PROBE],
            bool_env_var(DD_SYSTEM_PROBE_NETWORK_ENABLED, true),
        );
        env.add_env_var_to_containers(
            &[CORE, SYSTEM_PROBE],
            bool_env_var(DD_SYSTEM_PROBE_NETWORK_COLLECT_DNS_STATS, self.collect_dns_stats),
        );
        env.add_env_var_to_containers(
            &[CORE, SYSTEM_PROBE],
            bool_env_var(DD_SYSTEM_PROBE_CONFIG_ENABLE_CONNTRACK, self.enable_conntrack),
        );
        env.add_env_var_to_container(PROCESS, bool_env_var(DD_SYSTEM_PROBE_EXTERNAL, true));
        Ok(())
    }
}
