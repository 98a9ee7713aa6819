//! Live process collection.

use super::shared::ProcessChecks;
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::bool_env_var;
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{
    CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, CGROUPS_VOLUME_NAME, PASSWD_HOST_PATH,
    PASSWD_MOUNT_PATH, PASSWD_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH,
    PROCDIR_VOLUME_NAME,
};

pub const DD_PROCESS_CONFIG_PROCESS_COLLECTION_ENABLED: &str =
    "DD_PROCESS_CONFIG_PROCESS_COLLECTION_ENABLED";
pub const DD_PROCESS_CONFIG_SCRUB_ARGS: &str = "DD_PROCESS_CONFIG_SCRUB_ARGS";
pub const DD_PROCESS_CONFIG_STRIP_PROC_ARGUMENTS: &str = "DD_PROCESS_CONFIG_STRIP_PROC_ARGUMENTS";

#[derive(Debug, Default)]
pub struct LiveProcessFeature {
    process_checks: ProcessChecks,
    scrub_args: Option<bool>,
    strip_args: Option<bool>,
}

impl Feature for LiveProcessFeature {
    fn id(&self) -> FeatureId {
        ids::LIVE_PROCESS
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(live_process) = dda
            .spec
            .features
            .live_process_collection
            .as_ref()
            .filter(|f| f.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.scrub_args = live_process.scrub_process_arguments;
        self.strip_args = live_process.strip_process_arguments;
        self.process_checks = ProcessChecks::for_dda(dda);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&self.process_checks.required_containers()),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.process_checks.add_run_in_core_agent_env(managers, false);
        self.manage_agent(managers, self.process_checks.container());
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.process_checks.add_run_in_core_agent_env(managers, true);
        self.manage_agent(managers, AgentContainerName::UnprivilegedSingleAgent);
        Ok(())
    }
}

impl LiveProcessFeature {
    fn manage_agent(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        for (name, host_path, mount_path) in [
            (PASSWD_VOLUME_NAME, PASSWD_HOST_PATH, PASSWD_MOUNT_PATH),
            (CGROUPS_VOLUME_NAME, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH),
            (PROCDIR_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH),
        ] {
            let (volume, mount) = host_path_volume(name, host_path, mount_path, true);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, container);
        }

        let mut env = managers.env_var();
        env.add_env_var_to_container(
            container,
            bool_env_var(DD_PROCESS_CONFIG_PROCESS_COLLECTION_ENABLED, true),
        );
        if let Some(scrub) = self.scrub_args {
            env.add_env_var_to_container(
                container,
                bool_env_var(DD_PROCESS_CONFIG_SCRUB_ARGS, scrub),
            );
        }
        if let Some(strip) = self.strip_args {
            env.add_env_var_to_container(
                container,
                bool_env_var(DD_PROCESS_CONFIG_STRIP_PROC_ARGUMENTS, strip),
            );
        }
    }
}
