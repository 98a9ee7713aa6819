//! Container log collection by the core agent.

use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::host_path_volume;
use crate::resources::volumes::{
    CONTAINER_LOG_VOLUME_NAME, CONTAINER_LOG_VOLUME_PATH, LOG_TEMP_STORAGE_PATH,
    POD_LOG_VOLUME_NAME, POD_LOG_VOLUME_PATH, POINTER_VOLUME_NAME, POINTER_VOLUME_PATH,
    SYMLINK_CONTAINER_VOLUME_NAME, SYMLINK_CONTAINER_VOLUME_PATH,
};

pub const DD_LOGS_ENABLED: &str = "DD_LOGS_ENABLED";
pub const DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL: &str = "DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL";
pub const DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE: &str = "DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE";
pub const DD_LOGS_CONFIG_OPEN_FILES_LIMIT: &str = "DD_LOGS_CONFIG_OPEN_FILES_LIMIT";
pub const DD_LOGS_CONFIG_AUTO_MULTI_LINE_DETECTION: &str =
    "DD_LOGS_CONFIG_AUTO_MULTI_LINE_DETECTION";

#[derive(Debug, Default)]
pub struct LogCollectionFeature {
    container_collect_all: bool,
    container_collect_using_files: bool,
    container_logs_path: String,
    pod_logs_path: String,
    container_symlinks_path: String,
    temp_storage_path: String,
    open_files_limit: Option<i32>,
    auto_multi_line_detection: Option<bool>,
}

impl Feature for LogCollectionFeature {
    fn id(&self) -> FeatureId {
        ids::LOG_COLLECTION
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(logs) = dda
            .spec
            .features
            .log_collection
            .as_ref()
            .filter(|l| l.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.container_collect_all = logs.container_collect_all.unwrap_or(false);
        self.container_collect_using_files = logs.container_collect_using_files.unwrap_or(true);
        self.container_logs_path = logs
            .container_logs_path
            .clone()
            .unwrap_or_else(|| CONTAINER_LOG_VOLUME_PATH.to_string());
        self.pod_logs_path = logs
            .pod_logs_path
            .clone()
            .unwrap_or_else(|| POD_LOG_VOLUME_PATH.to_string());
        self.container_symlinks_path = logs
            .container_symlinks_path
            .clone()
            .unwrap_or_else(|| SYMLINK_CONTAINER_VOLUME_PATH.to_string());
        self.temp_storage_path = logs
            .temp_storage_path
            .clone()
            .unwrap_or_else(|| LOG_TEMP_STORAGE_PATH.to_string());
        self.open_files_limit = logs.open_files_limit.filter(|limit| *limit != 0);
        self.auto_multi_line_detection = logs.auto_multi_line_detection;

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.manage_agent(managers, AgentContainerName::CoreAgent);
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.manage_agent(managers, AgentContainerName::UnprivilegedSingleAgent);
        Ok(())
    }
}

impl LogCollectionFeature {
    fn manage_agent(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        let volumes = [
            // Registry of read positions, kept across restarts.
            (POINTER_VOLUME_NAME, &self.temp_storage_path, POINTER_VOLUME_PATH, false),
            (POD_LOG_VOLUME_NAME, &self.pod_logs_path, POD_LOG_VOLUME_PATH, true),
            (
                CONTAINER_LOG_VOLUME_NAME,
                &self.container_logs_path,
                CONTAINER_LOG_VOLUME_PATH,
                true,
            ),
            (
                SYMLINK_CONTAINER_VOLUME_NAME,
                &self.container_symlinks_path,
                SYMLINK_CONTAINER_VOLUME_PATH,
                true,
            ),
        ];
        for (name, host_path, mount_path, read_only) in volumes {
            let (volume, mount) = host_path_volume(name, host_path, mount_path, read_only);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, container);
        }

        let mut env = managers.env_var();
        env.add_env_var_to_container(container, bool_env_var(DD_LOGS_ENABLED, true));
        env.add_env_var_to_container(
            container,
            bool_env_var(DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL, self.container_collect_all),
        );
        env.add_env_var_to_container(
            container,
            bool_env_var(
                DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE,
                self.container_collect_using_files,
            ),
        );
        if let Some(limit) = self.open_files_limit {
            env.add_env_var_to_container(
                container,
                env_var(DD_LOGS_CONFIG_OPEN_FILES_LIMIT, limit.to_string()),
            );
        }
        if let Some(detect) = self.auto_multi_line_detection {
            env.add_env_var_to_container(
                container,
                bool_env_var(DD_LOGS_CONFIG_AUTO_MULTI_LINE_DETECTION, detect),
            );
        }
    }
}
