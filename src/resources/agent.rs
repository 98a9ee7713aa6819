//! Default node agent pod template.
//!
//! The template holds one container per required agent process plus the
//! two init containers that seed `/etc/datadog-agent`. Features and global
//! settings are layered on top of it by the orchestrator.

use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSecurityContext, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::images::{DEFAULT_REGISTRY, Image};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::{config_map_volume, empty_dir_volume, host_path_volume, volume_mount};
use crate::resources::common::{
    cluster_agent_service_name, component_labels, default_component_name,
    install_info_config_map_name,
    service_account_name, token_secret_name,
};
use crate::resources::volumes::*;
use crate::resources::workload::{
    DEFAULT_HEALTH_PORT, liveness_probe, readiness_probe, startup_probe, trace_agent_probe,
};

pub const DD_HEALTH_PORT: &str = "DD_HEALTH_PORT";
pub const DD_KUBERNETES_KUBELET_HOST: &str = "DD_KUBERNETES_KUBELET_HOST";
pub const DD_CLUSTER_AGENT_ENABLED: &str = "DD_CLUSTER_AGENT_ENABLED";
pub const DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME: &str = "DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME";
pub const DD_CLUSTER_AGENT_TOKEN_NAME: &str = "DD_CLUSTER_AGENT_TOKEN_NAME";
pub const DD_AUTH_TOKEN_FILE_PATH: &str = "DD_AUTH_TOKEN_FILE_PATH";
pub const DD_CONTAINER_IMAGE_ENABLED: &str = "DD_CONTAINER_IMAGE_ENABLED";
pub const KUBERNETES: &str = "KUBERNETES";
pub const HOST_ROOT: &str = "HOST_ROOT";

pub const AGENT_CONFIG_FILE: &str = "/etc/datadog-agent/datadog.yaml";
pub const SYSTEM_PROBE_CONFIG_FILE: &str = "/etc/datadog-agent/system-probe.yaml";
pub const DEFAULT_APM_PORT: i32 = 8126;
const INIT_VOLUME_MOUNT_PATH: &str = "/opt/datadog-agent";

/// Path of the auth token shared by the agent processes.
pub fn auth_token_file_path() -> String {
    format!("{AUTH_VOLUME_PATH}/token")
}

/// Env var reading a pod field through the downward API.
pub fn field_ref_env_var(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Default node agent template running `containers`.
///
/// Init containers are always present. Containers that are not node agent
/// processes are ignored.
pub fn default_agent_pod_template(
    dda: &DatadogAgent,
    containers: &[AgentContainerName],
) -> PodTemplateSpec {
    let image = Image::latest_agent(DEFAULT_REGISTRY).to_string();
    let mut agent_containers: Vec<Container> = containers
        .iter()
        .filter_map(|name| agent_container(dda, *name, &image))
        .collect();
    if agent_containers.is_empty() {
        agent_containers.extend(agent_container(dda, AgentContainerName::CoreAgent, &image));
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            name: Some(default_component_name(dda, ComponentName::NodeAgent)),
            labels: Some(component_labels(dda, ComponentName::NodeAgent)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account_name(dda, ComponentName::NodeAgent)),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(0),
                ..Default::default()
            }),
            init_containers: Some(vec![
                init_volume_container(&image),
                init_config_container(&image),
            ]),
            containers: agent_containers,
            volumes: Some(default_volumes(dda)),
            ..Default::default()
        }),
    }
}

fn default_volumes(dda: &DatadogAgent) -> Vec<Volume> {
    vec![
        empty_dir_volume(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH).0,
        empty_dir_volume(AUTH_VOLUME_NAME, AUTH_VOLUME_PATH).0,
        install_info_volume(dda).0,
        empty_dir_volume(CHECKSD_VOLUME_NAME, CHECKSD_VOLUME_PATH).0,
        empty_dir_volume(CONFD_VOLUME_NAME, CONFD_VOLUME_PATH).0,
        empty_dir_volume(CONFIG_VOLUME_NAME, CONFIG_VOLUME_PATH).0,
        host_path_volume(PROCDIR_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH, true).0,
        host_path_volume(CGROUPS_VOLUME_NAME, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, true).0,
    ]
}

/// The install-info ConfigMap volume, mounted as a single file.
pub fn install_info_volume(dda: &DatadogAgent) -> (Volume, VolumeMount) {
    let (volume, mut mount) = config_map_volume(
        INSTALL_INFO_VOLUME_NAME,
        &install_info_config_map_name(dda),
        vec![],
        INSTALL_INFO_VOLUME_PATH,
    );
    mount.sub_path = Some(INSTALL_INFO_VOLUME_SUB_PATH.to_string());
    (volume, mount)
}

fn common_env(dda: &DatadogAgent) -> Vec<EnvVar> {
    vec![
        env_var(KUBERNETES, "yes"),
        bool_env_var(
            DD_CLUSTER_AGENT_ENABLED,
            !dda.is_component_disabled(ComponentName::ClusterAgent),
        ),
        env_var(
            DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME,
            cluster_agent_service_name(dda),
        ),
        env_var(DD_CLUSTER_AGENT_TOKEN_NAME, token_secret_name(dda)),
        env_var(DD_AUTH_TOKEN_FILE_PATH, auth_token_file_path()),
        field_ref_env_var(DD_KUBERNETES_KUBELET_HOST, "status.hostIP"),
    ]
}

fn common_mounts(dda: &DatadogAgent) -> Vec<VolumeMount> {
    vec![
        volume_mount(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH, false),
        volume_mount(AUTH_VOLUME_NAME, AUTH_VOLUME_PATH, false),
        install_info_volume(dda).1,
        volume_mount(CONFIG_VOLUME_NAME, CONFIG_VOLUME_PATH, false),
    ]
}

fn agent_container(dda: &DatadogAgent, name: AgentContainerName, image: &str) -> Option<Container> {
    let mut env = common_env(dda);
    let mut mounts = common_mounts(dda);
    let (command, probes) = match name {
        AgentContainerName::CoreAgent | AgentContainerName::UnprivilegedSingleAgent => {
            env.push(env_var(DD_HEALTH_PORT, DEFAULT_HEALTH_PORT.to_string()));
            env.push(bool_env_var(DD_CONTAINER_IMAGE_ENABLED, true));
            mounts.push(volume_mount(CHECKSD_VOLUME_NAME, CHECKSD_VOLUME_PATH, true));
            mounts.push(volume_mount(PROCDIR_VOLUME_NAME, PROCDIR_MOUNT_PATH, true));
            mounts.push(volume_mount(CGROUPS_VOLUME_NAME, CGROUPS_MOUNT_PATH, true));
            (vec!["agent".to_string(), "run".to_string()], true)
        }
        AgentContainerName::TraceAgent => (
            vec![
                "trace-agent".to_string(),
                format!("--config={AGENT_CONFIG_FILE}"),
            ],
            false,
        ),
        AgentContainerName::ProcessAgent => {
            mounts.push(volume_mount(PROCDIR_VOLUME_NAME, PROCDIR_MOUNT_PATH, true));
            mounts.push(volume_mount(CGROUPS_VOLUME_NAME, CGROUPS_MOUNT_PATH, true));
            (
                vec![
                    "process-agent".to_string(),
                    format!("--config={AGENT_CONFIG_FILE}"),
                    format!("--sysprobe-config={SYSTEM_PROBE_CONFIG_FILE}"),
                ],
                false,
            )
        }
        AgentContainerName::SecurityAgent => {
            env.push(env_var(HOST_ROOT, HOST_ROOT_MOUNT_PATH));
            (
                vec![
                    "security-agent".to_string(),
                    "start".to_string(),
                    format!("-c={AGENT_CONFIG_FILE}"),
                ],
                false,
            )
        }
        AgentContainerName::SystemProbe => (
            vec![
                "system-probe".to_string(),
                format!("--config={SYSTEM_PROBE_CONFIG_FILE}"),
            ],
            false,
        ),
        AgentContainerName::OtelAgent => (
            vec![
                "otel-agent".to_string(),
                format!("--core-config={AGENT_CONFIG_FILE}"),
            ],
            false,
        ),
        _ => return None,
    };

    let mut container = Container {
        name: name.as_str().to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(command),
        env: Some(env),
        volume_mounts: Some(mounts),
        ..Default::default()
    };
    if probes {
        container.liveness_probe = Some(liveness_probe(DEFAULT_HEALTH_PORT));
        container.readiness_probe = Some(readiness_probe(DEFAULT_HEALTH_PORT));
        container.startup_probe = Some(startup_probe(DEFAULT_HEALTH_PORT));
    } else if name == AgentContainerName::TraceAgent {
        container.liveness_probe = Some(trace_agent_probe(DEFAULT_APM_PORT));
    }
    Some(container)
}

/// Copies the configuration shipped in the image into the shared volume.
fn init_volume_container(image: &str) -> Container {
    Container {
        name: AgentContainerName::InitVolume.as_str().to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["bash".to_string(), "-c".to_string()]),
        args: Some(vec!["cp -vnr /etc/datadog-agent /opt".to_string()]),
        volume_mounts: Some(vec![volume_mount(
            CONFIG_VOLUME_NAME,
            INIT_VOLUME_MOUNT_PATH,
            false,
        )]),
        ..Default::default()
    }
}

/// Runs the cont-init.d scripts that render the agent configuration.
pub fn init_config_container(image: &str) -> Container {
    Container {
        name: AgentContainerName::InitConfig.as_str().to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["bash".to_string(), "-c".to_string()]),
        args: Some(vec![
            "for script in $(find /etc/cont-init.d/ -type f -name '*.sh' | sort) ; do bash $script ; done"
                .to_string(),
        ]),
        volume_mounts: Some(vec![
            volume_mount(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH, false),
            volume_mount(CONFIG_VOLUME_NAME, CONFIG_VOLUME_PATH, false),
            volume_mount(CONFD_VOLUME_NAME, CONFD_VOLUME_PATH, true),
            volume_mount(CHECKSD_VOLUME_NAME, CHECKSD_VOLUME_PATH, true),
            volume_mount(PROCDIR_VOLUME_NAME, PROCDIR_MOUNT_PATH, true),
        ]),
        ..Default::default()
    }
}
