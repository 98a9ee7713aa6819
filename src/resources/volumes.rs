//! Volume names and paths shared by the default templates and features.

pub const CONFD_VOLUME_NAME: &str = "confd";
pub const CONFD_VOLUME_PATH: &str = "/conf.d";
pub const CONFIG_VOLUME_NAME: &str = "config";
pub const CONFIG_VOLUME_PATH: &str = "/etc/datadog-agent";
pub const CHECKSD_VOLUME_NAME: &str = "checksd";
pub const CHECKSD_VOLUME_PATH: &str = "/checks.d";
pub const LOG_DATADOG_VOLUME_NAME: &str = "logdatadog";
pub const LOG_DATADOG_VOLUME_PATH: &str = "/var/log/datadog";
pub const TMP_VOLUME_NAME: &str = "tmp";
pub const TMP_VOLUME_PATH: &str = "/tmp";
pub const CERTIFICATES_VOLUME_NAME: &str = "certificates";
pub const CERTIFICATES_VOLUME_PATH: &str = "/etc/datadog-agent/certificates";
pub const AUTH_VOLUME_NAME: &str = "datadog-agent-auth";
pub const AUTH_VOLUME_PATH: &str = "/etc/datadog-agent/auth";
pub const INSTALL_INFO_VOLUME_NAME: &str = "installinfo";
pub const INSTALL_INFO_VOLUME_SUB_PATH: &str = "install_info";
pub const INSTALL_INFO_VOLUME_PATH: &str = "/etc/datadog-agent/install_info";

pub const PROCDIR_VOLUME_NAME: &str = "procdir";
pub const PROCDIR_HOST_PATH: &str = "/proc";
pub const PROCDIR_MOUNT_PATH: &str = "/host/proc";
pub const CGROUPS_VOLUME_NAME: &str = "cgroups";
pub const CGROUPS_HOST_PATH: &str = "/sys/fs/cgroup";
pub const CGROUPS_MOUNT_PATH: &str = "/host/sys/fs/cgroup";
pub const PASSWD_VOLUME_NAME: &str = "passwd";
pub const PASSWD_HOST_PATH: &str = "/etc/passwd";
pub const PASSWD_MOUNT_PATH: &str = "/etc/passwd";
pub const GROUP_VOLUME_NAME: &str = "group";
pub const GROUP_HOST_PATH: &str = "/etc/group";
pub const GROUP_MOUNT_PATH: &str = "/etc/group";
pub const HOST_ROOT_VOLUME_NAME: &str = "hostroot";
pub const HOST_ROOT_HOST_PATH: &str = "/";
pub const HOST_ROOT_MOUNT_PATH: &str = "/host/root";
pub const OS_RELEASE_VOLUME_NAME: &str = "host-osrelease";
pub const OS_RELEASE_HOST_PATH: &str = "/etc/os-release";
pub const OS_RELEASE_MOUNT_PATH: &str = "/host/etc/os-release";

pub const SYSTEM_PROBE_SOCKET_VOLUME_NAME: &str = "sysprobe-socket-dir";
pub const SYSTEM_PROBE_SOCKET_VOLUME_PATH: &str = "/var/run/sysprobe";
pub const DEBUGFS_VOLUME_NAME: &str = "debugfs";
pub const DEBUGFS_PATH: &str = "/sys/kernel/debug";
pub const TRACEFS_VOLUME_NAME: &str = "tracefs";
pub const TRACEFS_PATH: &str = "/sys/kernel/tracing";
pub const SECURITYFS_VOLUME_NAME: &str = "securityfs";
pub const SECURITYFS_HOST_PATH: &str = "/sys/kernel/security";
pub const SECURITYFS_MOUNT_PATH: &str = "/host/sys/kernel/security";
pub const MODULES_VOLUME_NAME: &str = "modules";
pub const MODULES_PATH: &str = "/lib/modules";
pub const SRC_VOLUME_NAME: &str = "src";
pub const SRC_PATH: &str = "/usr/src";
pub const BPFFS_VOLUME_NAME: &str = "bpffs";
pub const BPFFS_PATH: &str = "/sys/fs/bpf";

pub const POD_LOG_VOLUME_NAME: &str = "logpodpath";
pub const POD_LOG_VOLUME_PATH: &str = "/var/log/pods";
pub const CONTAINER_LOG_VOLUME_NAME: &str = "logcontainerpath";
pub const CONTAINER_LOG_VOLUME_PATH: &str = "/var/lib/docker/containers";
pub const SYMLINK_CONTAINER_VOLUME_NAME: &str = "symlinkcontainerpath";
pub const SYMLINK_CONTAINER_VOLUME_PATH: &str = "/var/log/containers";
pub const POINTER_VOLUME_NAME: &str = "pointerdir";
pub const POINTER_VOLUME_PATH: &str = "/opt/datadog-agent/run";
pub const LOG_TEMP_STORAGE_PATH: &str = "/var/lib/datadog-agent/logs";

pub const CRI_SOCKET_VOLUME_NAME: &str = "runtimesocketdir";
pub const HOST_CRI_SOCKET_PATH_PREFIX: &str = "/host";
pub const RUNTIME_DIR_VOLUME_PATH: &str = "/var/run";

pub const SECURITY_AGENT_COMPLIANCE_VOLUME_NAME: &str = "compliancedir";
pub const SECURITY_AGENT_COMPLIANCE_VOLUME_PATH: &str = "/etc/datadog-agent/compliance.d";
pub const SECURITY_AGENT_RUNTIME_POLICIES_VOLUME_NAME: &str = "runtimepoliciesdir";
pub const SECURITY_AGENT_RUNTIME_POLICIES_VOLUME_PATH: &str = "/etc/datadog-agent/runtime-security.d";

pub const KUBE_STATE_METRICS_CORE_VOLUME_NAME: &str = "ksm-core-config";
pub const ORCHESTRATOR_EXPLORER_VOLUME_NAME: &str = "orchestrator-explorer-config";
pub const HELM_CHECK_VOLUME_NAME: &str = "helm-check-config";

pub const APPARMOR_ANNOTATION_KEY: &str = "container.apparmor.security.beta.kubernetes.io";
