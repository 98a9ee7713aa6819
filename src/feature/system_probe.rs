//! Pieces every system-probe backed feature adds to the node agent.
//!
//! NPM, USM, CWS and the eBPF checks each run inside system-probe. They all
//! need the same privileges, host mounts and socket, so they call
//! [`add_system_probe`] and only add their own toggles on top. Every
//! manager call here is idempotent, so several features calling it leave a
//! single copy of each item.

use crate::crd::AgentContainerName;
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::{empty_dir_volume, host_path_volume, volume_mount};
use crate::resources::volumes::{
    APPARMOR_ANNOTATION_KEY, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, CGROUPS_VOLUME_NAME,
    DEBUGFS_PATH, DEBUGFS_VOLUME_NAME, MODULES_PATH, MODULES_VOLUME_NAME, PROCDIR_HOST_PATH,
    PROCDIR_MOUNT_PATH, PROCDIR_VOLUME_NAME, SRC_PATH, SRC_VOLUME_NAME,
    SYSTEM_PROBE_SOCKET_VOLUME_NAME, SYSTEM_PROBE_SOCKET_VOLUME_PATH,
};

pub const DD_SYSTEM_PROBE_ENABLED: &str = "DD_SYSTEM_PROBE_ENABLED";
pub const DD_SYSTEM_PROBE_SOCKET: &str = "DD_SYSTEM_PROBE_SOCKET";
pub const DD_SYSTEM_PROBE_EXTERNAL: &str = "DD_SYSTEM_PROBE_EXTERNAL";
pub const SYSTEM_PROBE_SOCKET_PATH: &str = "/var/run/sysprobe/sysprobe.sock";
pub const APPARMOR_UNCONFINED: &str = "unconfined";

/// Linux capabilities system-probe runs with.
pub const SYSTEM_PROBE_CAPABILITIES: &[&str] = &[
    "SYS_ADMIN",
    "SYS_RESOURCE",
    "SYS_PTRACE",
    "NET_ADMIN",
    "NET_BROADCAST",
    "NET_RAW",
    "IPC_LOCK",
    "CHOWN",
    "DAC_READ_SEARCH",
];

/// `container.apparmor.security.beta.kubernetes.io/system-probe`
pub fn apparmor_annotation_key() -> String {
    format!(
        "{APPARMOR_ANNOTATION_KEY}/{}",
        AgentContainerName::SystemProbe.as_str()
    )
}

/// Run system-probe and let `clients` talk to it over its socket.
pub fn add_system_probe(managers: &mut PodTemplateManagers, clients: &[AgentContainerName]) {
    const SYSTEM_PROBE: AgentContainerName = AgentContainerName::SystemProbe;

    managers
        .annotation()
        .add_annotation(&apparmor_annotation_key(), APPARMOR_UNCONFINED);
    managers
        .security_context()
        .add_capabilities_to_container(SYSTEM_PROBE_CAPABILITIES, SYSTEM_PROBE);

    for (name, host_path, mount_path, read_only) in [
        (PROCDIR_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH, true),
        (CGROUPS_VOLUME_NAME, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, true),
        (DEBUGFS_VOLUME_NAME, DEBUGFS_PATH, DEBUGFS_PATH, false),
    ] {
        let (volume, mount) = host_path_volume(name, host_path, mount_path, read_only);
        managers.volume().add_volume(volume);
        managers
            .volume_mount()
            .add_volume_mount_to_container(mount, SYSTEM_PROBE);
    }

    let (socket, socket_mount) =
        empty_dir_volume(SYSTEM_PROBE_SOCKET_VOLUME_NAME, SYSTEM_PROBE_SOCKET_VOLUME_PATH);
    managers.volume().add_volume(socket);
    managers
        .volume_mount()
        .add_volume_mount_to_container(socket_mount, SYSTEM_PROBE);
    managers.volume_mount().add_volume_mount_to_containers(
        volume_mount(SYSTEM_PROBE_SOCKET_VOLUME_NAME, SYSTEM_PROBE_SOCKET_VOLUME_PATH, true),
        clients,
    );

    let mut targets = clients.to_vec();
    targets.push(SYSTEM_PROBE);
    let mut env = managers.env_var();
    env.add_env_var_to_containers(&targets, bool_env_var(DD_SYSTEM_PROBE_ENABLED, true));
    env.add_env_var_to_containers(
        &targets,
        env_var(DD_SYSTEM_PROBE_SOCKET, SYSTEM_PROBE_SOCKET_PATH),
    );
}

/// Kernel modules and headers, needed to compile eBPF programs at runtime.
pub fn add_kernel_headers(managers: &mut PodTemplateManagers) {
    for (name, path) in [(MODULES_VOLUME_NAME, MODULES_PATH), (SRC_VOLUME_NAME, SRC_PATH)] {
        let (volume, mount) = host_path_volume(name, path, path, true);
        managers.volume().add_volume(volume);
        managers
            .volume_mount()
            .add_volume_mount_to_container(mount, AgentContainerName::SystemProbe);
    }
}
