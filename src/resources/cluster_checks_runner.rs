//! Default cluster checks runner pod template.
//!
//! Runners are plain agents that only execute checks dispatched by the
//! cluster agent, so most agent subsystems are switched off here.

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::images::{DEFAULT_REGISTRY, Image};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::{empty_dir_volume, volume_mount};
use crate::resources::agent::{
    DD_CLUSTER_AGENT_ENABLED, DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME, DD_HEALTH_PORT, KUBERNETES,
    field_ref_env_var, init_config_container, install_info_volume,
};
use crate::resources::common::{
    cluster_agent_service_name, component_labels, default_component_name, service_account_name,
};
use crate::resources::volumes::*;
use crate::resources::workload::{
    DEFAULT_HEALTH_PORT, liveness_probe, readiness_probe, spread_replicas_affinity, startup_probe,
};

pub const DD_ENABLE_METADATA_COLLECTION: &str = "DD_ENABLE_METADATA_COLLECTION";
pub const DD_CLC_RUNNER_ENABLED: &str = "DD_CLC_RUNNER_ENABLED";
pub const DD_CLC_RUNNER_HOST: &str = "DD_CLC_RUNNER_HOST";
pub const DD_CLC_RUNNER_ID: &str = "DD_CLC_RUNNER_ID";
pub const DD_DOGSTATSD_ENABLED: &str = "DD_DOGSTATSD_ENABLED";
pub const DD_PROCESS_AGENT_ENABLED: &str = "DD_PROCESS_AGENT_ENABLED";
pub const DD_CONTAINER_COLLECTION_ENABLED: &str = "DD_CONTAINER_COLLECTION_ENABLED";
pub const DD_LOGS_ENABLED: &str = "DD_LOGS_ENABLED";
pub const DD_APM_ENABLED: &str = "DD_APM_ENABLED";
pub const DD_HOSTNAME: &str = "DD_HOSTNAME";

/// emptyDir shadowing conf.d so the node-level core checks do not run.
pub const REMOVE_CORECHECKS_VOLUME_NAME: &str = "remove-corechecks";
pub const REMOVE_CORECHECKS_VOLUME_PATH: &str = "/etc/datadog-agent/conf.d";

pub fn default_cluster_checks_runner_pod_template(dda: &DatadogAgent) -> PodTemplateSpec {
    let image = Image::latest_agent(DEFAULT_REGISTRY).to_string();
    let (install_info, install_info_mount) = install_info_volume(dda);
    let (config, config_mount) = empty_dir_volume(CONFIG_VOLUME_NAME, CONFIG_VOLUME_PATH);
    let (corechecks, corechecks_mount) =
        empty_dir_volume(REMOVE_CORECHECKS_VOLUME_NAME, REMOVE_CORECHECKS_VOLUME_PATH);
    let (logs, logs_mount) = empty_dir_volume(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH);
    let (tmp, tmp_mount) = empty_dir_volume(TMP_VOLUME_NAME, TMP_VOLUME_PATH);

    let container = Container {
        name: AgentContainerName::ClusterChecksRunner.as_str().to_string(),
        image: Some(image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["bash".to_string(), "-c".to_string()]),
        args: Some(vec!["agent run".to_string()]),
        env: Some(vec![
            env_var(
                DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME,
                cluster_agent_service_name(dda),
            ),
            bool_env_var(DD_CLUSTER_AGENT_ENABLED, true),
            env_var(DD_HEALTH_PORT, DEFAULT_HEALTH_PORT.to_string()),
            env_var(KUBERNETES, "yes"),
            bool_env_var(DD_ENABLE_METADATA_COLLECTION, false),
            bool_env_var(DD_CLC_RUNNER_ENABLED, true),
            field_ref_env_var(DD_CLC_RUNNER_HOST, "status.podIP"),
            field_ref_env_var(DD_CLC_RUNNER_ID, "metadata.name"),
            bool_env_var(DD_DOGSTATSD_ENABLED, false),
            bool_env_var(DD_PROCESS_AGENT_ENABLED, false),
            bool_env_var(DD_CONTAINER_COLLECTION_ENABLED, true),
            bool_env_var(DD_LOGS_ENABLED, false),
            bool_env_var(DD_APM_ENABLED, false),
            field_ref_env_var(DD_HOSTNAME, "spec.nodeName"),
        ]),
        volume_mounts: Some(vec![
            install_info_mount,
            config_mount,
            corechecks_mount,
            logs_mount,
            tmp_mount,
        ]),
        liveness_probe: Some(liveness_probe(DEFAULT_HEALTH_PORT)),
        readiness_probe: Some(readiness_probe(DEFAULT_HEALTH_PORT)),
        startup_probe: Some(startup_probe(DEFAULT_HEALTH_PORT)),
        ..Default::default()
    };

    let mut init = init_config_container(&image);
    init.volume_mounts = Some(vec![
        volume_mount(LOG_DATADOG_VOLUME_NAME, LOG_DATADOG_VOLUME_PATH, false),
        volume_mount(CONFIG_VOLUME_NAME, CONFIG_VOLUME_PATH, false),
    ]);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            name: Some(default_component_name(dda, ComponentName::ClusterChecksRunner)),
            labels: Some(component_labels(dda, ComponentName::ClusterChecksRunner)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account_name(
                dda,
                ComponentName::ClusterChecksRunner,
            )),
            affinity: Some(spread_replicas_affinity(ComponentName::ClusterChecksRunner)),
            init_containers: Some(vec![init]),
            containers: vec![container],
            volumes: Some(vec![install_info, config, corechecks, logs, tmp]),
            ..Default::default()
        }),
    }
}
