//! Default cluster agent pod template.

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::images::{DEFAULT_REGISTRY, Image};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::port::container_port;
use crate::merger::volume::{empty_dir_volume, volume_mount};
use crate::resources::agent::{
    DD_AUTH_TOKEN_FILE_PATH, DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME, DD_HEALTH_PORT,
    auth_token_file_path, field_ref_env_var, install_info_volume,
};
use crate::resources::common::{
    cluster_agent_service_name, component_labels, default_component_name, service_account_name,
};
use crate::resources::volumes::*;
use crate::resources::workload::{
    DEFAULT_HEALTH_PORT, liveness_probe, readiness_probe, spread_replicas_affinity, startup_probe,
};

pub const DD_POD_NAME: &str = "DD_POD_NAME";
pub const DD_KUBE_RESOURCES_NAMESPACE: &str = "DD_KUBE_RESOURCES_NAMESPACE";
pub const DD_LEADER_ELECTION: &str = "DD_LEADER_ELECTION";
pub const CLUSTER_AGENT_PORT: i32 = 5005;
pub const CLUSTER_AGENT_PORT_NAME: &str = "agentport";

pub fn default_cluster_agent_pod_template(dda: &DatadogAgent) -> PodTemplateSpec {
    let (install_info, install_info_mount) = install_info_volume(dda);
    let (confd, _) = empty_dir_volume(CONFD_VOLUME_NAME, CONFD_VOLUME_PATH);
    let (logs, logs_mount) = empty_dir_volume(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH);
    let (certs, certs_mount) = empty_dir_volume(CERTIFICATES_VOLUME_NAME, CERTIFICATES_VOLUME_PATH);
    let (auth, auth_mount) = empty_dir_volume(AUTH_VOLUME_NAME, AUTH_VOLUME_PATH);
    let (tmp, tmp_mount) = empty_dir_volume(TMP_VOLUME_NAME, TMP_VOLUME_PATH);

    let container = Container {
        name: AgentContainerName::ClusterAgent.as_str().to_string(),
        image: Some(Image::latest_cluster_agent(DEFAULT_REGISTRY).to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![container_port(
            CLUSTER_AGENT_PORT_NAME,
            CLUSTER_AGENT_PORT,
            "TCP",
        )]),
        env: Some(vec![
            field_ref_env_var(DD_POD_NAME, "metadata.name"),
            env_var(
                DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME,
                cluster_agent_service_name(dda),
            ),
            field_ref_env_var(DD_KUBE_RESOURCES_NAMESPACE, "metadata.namespace"),
            bool_env_var(DD_LEADER_ELECTION, true),
            env_var(DD_HEALTH_PORT, DEFAULT_HEALTH_PORT.to_string()),
            env_var(DD_AUTH_TOKEN_FILE_PATH, auth_token_file_path()),
        ]),
        volume_mounts: Some(vec![
            install_info_mount,
            volume_mount(CONFD_VOLUME_NAME, CONFD_VOLUME_PATH, true),
            logs_mount,
            certs_mount,
            auth_mount,
            tmp_mount,
        ]),
        liveness_probe: Some(liveness_probe(DEFAULT_HEALTH_PORT)),
        readiness_probe: Some(readiness_probe(DEFAULT_HEALTH_PORT)),
        startup_probe: Some(startup_probe(DEFAULT_HEALTH_PORT)),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            name: Some(default_component_name(dda, ComponentName::ClusterAgent)),
            labels: Some(component_labels(dda, ComponentName::ClusterAgent)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account_name(dda, ComponentName::ClusterAgent)),
            affinity: Some(spread_replicas_affinity(ComponentName::ClusterAgent)),
            containers: vec![container],
            volumes: Some(vec![install_info, confd, logs, certs, auth, tmp]),
            ..Default::default()
        }),
    }
}
