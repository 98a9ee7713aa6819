//! GPU monitoring.
//!
//! The core agent collects GPU metrics through NVML. In privileged mode
//! system-probe also runs its eBPF GPU module, which attributes usage to
//! processes. The NVIDIA container runtime exposes the devices to a pod
//! either through `NVIDIA_VISIBLE_DEVICES` or through a mount of
//! `/var/run/nvidia-container-devices/all`; both are set.

use super::system_probe::add_system_probe;
use super::{
    Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::{host_path_volume, volume_mount};

pub const DD_GPU_ENABLED: &str = "DD_GPU_ENABLED";
pub const DD_GPU_MONITORING_ENABLED: &str = "DD_GPU_MONITORING_ENABLED";
pub const DD_ENABLE_NVML_DETECTION: &str = "DD_ENABLE_NVML_DETECTION";
pub const DD_GPU_MONITORING_CONFIGURE_CGROUP_PERMS: &str =
    "DD_GPU_MONITORING_CONFIGURE_CGROUP_PERMS";
pub const DD_KUBERNETES_KUBELET_PODRESOURCES_SOCKET: &str =
    "DD_KUBERNETES_KUBELET_PODRESOURCES_SOCKET";
pub const NVIDIA_VISIBLE_DEVICES: &str = "NVIDIA_VISIBLE_DEVICES";

pub const DEFAULT_GPU_RUNTIME_CLASS: &str = "nvidia";
pub const NVIDIA_DEVICES_VOLUME_NAME: &str = "nvidia-devices";
pub const NVIDIA_DEVICES_MOUNT_PATH: &str = "/var/run/nvidia-container-devices/all";
const DEV_NULL_PATH: &str = "/dev/null";
pub const POD_RESOURCES_VOLUME_NAME: &str = "pod-resources";
pub const HOST_RUN_VOLUME_NAME: &str = "hostrun";
const HOST_RUN_PATH: &str = "/run";
const HOST_RUN_MOUNT_PATH: &str = "/host/run";

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

#[derive(Debug, Default)]
pub struct GpuFeature {
    privileged: bool,
    patch_cgroup_permissions: bool,
    /// Empty leaves the pod runtime class untouched.
    runtime_class: String,
    pod_resources_socket_dir: Option<String>,
}

impl Feature for GpuFeature {
    fn id(&self) -> FeatureId {
        ids::GPU
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(gpu) = dda
            .spec
            .features
            .gpu
            .as_ref()
            .filter(|gpu| gpu.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };
        self.privileged = gpu.privileged_mode.unwrap_or(false);
        self.patch_cgroup_permissions = gpu.patch_cgroup_permissions.unwrap_or(false);
        self.runtime_class = gpu
            .pod_runtime_class_name
            .clone()
            .unwrap_or_else(|| DEFAULT_GPU_RUNTIME_CLASS.to_string());
        self.pod_resources_socket_dir = dda
            .spec
            .global
            .kubelet
            .as_ref()
            .and_then(|k| k.pod_resources_socket_path.clone())
            .filter(|path| !path.is_empty());

        let mut containers = vec![CORE];
        if self.privileged {
            containers.push(SYSTEM_PROBE);
        }
        RequiredComponents {
            agent: RequiredComponent::with_containers(&containers),
            ..Default::default()
        }
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        if self.patch_cgroup_permissions && !self.privileged {
            return Err(FeatureError::InvalidConfig {
                feature: ids::GPU,
                message: "patchCgroupPermissions is only supported in privileged mode".to_string(),
            });
        }

        let mut env = managers.env_var();
        env.add_env_var_to_container(CORE, bool_env_var(DD_ENABLE_NVML_DETECTION, true));
        // init-config turns the check on when it sees this
        env.add_env_var_to_containers(
            &[CORE, AgentContainerName::InitConfig],
            bool_env_var(DD_GPU_ENABLED, true),
        );
        env.add_env_var_to_container(CORE, env_var(NVIDIA_VISIBLE_DEVICES, "all"));

        if let Some(dir) = &self.pod_resources_socket_dir {
            managers.env_var().add_env_var_to_container(
                CORE,
                env_var(
                    DD_KUBERNETES_KUBELET_PODRESOURCES_SOCKET,
                    format!("{}/kubelet.sock", dir.trim_end_matches('/')),
                ),
            );
            let (volume, mount) = host_path_volume(POD_RESOURCES_VOLUME_NAME, dir, dir, false);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, CORE);
        }

        let (devices, devices_mount) = host_path_volume(
            NVIDIA_DEVICES_VOLUME_NAME,
            DEV_NULL_PATH,
            NVIDIA_DEVICES_MOUNT_PATH,
            true,
        );
        managers.volume().add_volume(devices);
        managers
            .volume_mount()
            .add_volume_mount_to_container(devices_mount, CORE);

        if self.privileged {
            self.manage_system_probe(managers);
        }

        if !self.runtime_class.is_empty() {
            managers.pod_spec_mut().runtime_class_name = Some(self.runtime_class.clone());
        }
        Ok(())
    }
}

impl GpuFeature {
    fn manage_system_probe(&self, managers: &mut PodTemplateManagers) {
        add_system_probe(managers, &[CORE]);

        let mut env = managers.env_var();
        // both containers read this flag
        env.add_env_var_to_containers(
            &[CORE, SYSTEM_PROBE],
            bool_env_var(DD_GPU_MONITORING_ENABLED, true),
        );
        env.add_env_var_to_container(SYSTEM_PROBE, env_var(NVIDIA_VISIBLE_DEVICES, "all"));

        // device nodes are created on the fly when the driver loads late
        let mut security = managers.security_context();
        security.add_capabilities_to_container(&["MKNOD"], SYSTEM_PROBE);
        security.add_capabilities_to_container(&["MKNOD"], CORE);

        managers.volume_mount().add_volume_mount_to_container(
            volume_mount(NVIDIA_DEVICES_VOLUME_NAME, NVIDIA_DEVICES_MOUNT_PATH, true),
            SYSTEM_PROBE,
        );

        if self.patch_cgroup_permissions {
            managers.env_var().add_env_var_to_container(
                SYSTEM_PROBE,
                bool_env_var(DD_GPU_MONITORING_CONFIGURE_CGROUP_PERMS, true),
            );
            let (volume, mount) =
                host_path_volume(HOST_RUN_VOLUME_NAME, HOST_RUN_PATH, HOST_RUN_MOUNT_PATH, false);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, SYSTEM_PROBE);
        }
    }
}
