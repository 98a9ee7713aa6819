//! Volume and volume mount managers.

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, HostPathVolumeSource, KeyToPath, Volume, VolumeMount,
};

use super::{MergePolicy, PodTemplateManagers, Result, merge_keyed};
use crate::crd::AgentContainerName;

pub struct VolumeManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl VolumeManager<'_> {
    pub fn add_volume(&mut self, volume: Volume) {
        // KeepExisting never fails
        let _ = self.add_volume_with_merge(volume, MergePolicy::KeepExisting);
    }

    pub fn add_volume_with_merge(&mut self, volume: Volume, policy: MergePolicy) -> Result<()> {
        let spec = self.managers.pod_spec_mut();
        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        merge_keyed(volumes, volume, |v: &Volume| v.name.as_str(), policy, "volume", "pod")?;
        Ok(())
    }
}

pub struct VolumeMountManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl VolumeMountManager<'_> {
    /// Queue a mount for every regular container.
    pub fn add_volume_mount(&mut self, mount: VolumeMount) {
        let queue = &mut self.managers.broadcast_mounts;
        if !queue.iter().any(|m| m.name == mount.name) {
            queue.push(mount);
        }
    }

    pub fn add_volume_mount_to_container(
        &mut self,
        mount: VolumeMount,
        container: AgentContainerName,
    ) {
        // KeepExisting never fails
        let _ = self.add_volume_mount_to_container_with_merge(
            mount,
            container,
            MergePolicy::KeepExisting,
        );
    }

    pub fn add_volume_mount_to_container_with_merge(
        &mut self,
        mount: VolumeMount,
        container: AgentContainerName,
        policy: MergePolicy,
    ) -> Result<()> {
        let Some(c) = self.managers.container_mut(container) else {
            return Ok(());
        };
        let mounts = c.volume_mounts.get_or_insert_with(Vec::new);
        merge_keyed(
            mounts,
            mount,
            |m: &VolumeMount| m.name.as_str(),
            policy,
            "volume mount",
            container.as_str(),
        )?;
        Ok(())
    }

    pub fn add_volume_mount_to_containers(
        &mut self,
        mount: VolumeMount,
        containers: &[AgentContainerName],
    ) {
        for container in containers {
            self.add_volume_mount_to_container(mount.clone(), *container);
        }
    }
}

/// A host path volume and the matching mount.
pub fn host_path_volume(
    name: &str,
    host_path: &str,
    mount_path: &str,
    read_only: bool,
) -> (Volume, VolumeMount) {
    host_path_volume_with_type(name, host_path, mount_path, read_only, None)
}

pub fn host_path_volume_with_type(
    name: &str,
    host_path: &str,
    mount_path: &str,
    read_only: bool,
    path_type: Option<&str>,
) -> (Volume, VolumeMount) {
    let volume = Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: host_path.to_string(),
            type_: path_type.map(str::to_string),
        }),
        ..Default::default()
    };
    (volume, volume_mount(name, mount_path, read_only))
}

/// An emptyDir volume and the matching mount.
pub fn empty_dir_volume(name: &str, mount_path: &str) -> (Volume, VolumeMount) {
    let volume = Volume {
        name: name.to_string(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    };
    (volume, volume_mount(name, mount_path, false))
}

/// A ConfigMap volume exposing `items` (all keys when empty).
pub fn config_map_volume(
    name: &str,
    config_map_name: &str,
    items: Vec<KeyToPath>,
    mount_path: &str,
) -> (Volume, VolumeMount) {
    let volume = Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name.to_string(),
            items: if items.is_empty() { None } else { Some(items) },
            ..Default::default()
        }),
        ..Default::default()
    };
    (volume, volume_mount(name, mount_path, true))
}

pub fn volume_mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: if read_only { Some(true) } else { None },
        ..Default::default()
    }
}
