//! Dogstatsd intake of the node agent.
//!
//! Always on: every node agent listens on UDP 8125. Host port, unix socket,
//! origin detection and mapper profiles are opt-in.

use kube::ResourceExt;

use super::shared::{
    self, DEFAULT_DOGSTATSD_PORT, DOGSTATSD_PORT_NAME, DOGSTATSD_SOCKET_LOCAL_PATH,
    DOGSTATSD_SOCKET_VOLUME_NAME, NetworkPolicyTarget,
};
use super::{
    Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::port::container_port;
use crate::merger::service::service_port;
use crate::merger::volume::host_path_volume_with_type;
use crate::merger::{MergePolicy, PodTemplateManagers, ResourceManagers};
use crate::resources::common::{agent_local_service_name, pod_selector_labels};

pub const DD_DOGSTATSD_PORT: &str = "DD_DOGSTATSD_PORT";
pub const DD_DOGSTATSD_NON_LOCAL_TRAFFIC: &str = "DD_DOGSTATSD_NON_LOCAL_TRAFFIC";
pub const DD_DOGSTATSD_SOCKET: &str = "DD_DOGSTATSD_SOCKET";
pub const DD_DOGSTATSD_ORIGIN_DETECTION: &str = "DD_DOGSTATSD_ORIGIN_DETECTION";
pub const DD_DOGSTATSD_ORIGIN_DETECTION_CLIENT: &str = "DD_DOGSTATSD_ORIGIN_DETECTION_CLIENT";
pub const DD_DOGSTATSD_TAG_CARDINALITY: &str = "DD_DOGSTATSD_TAG_CARDINALITY";
pub const DD_DOGSTATSD_MAPPER_PROFILES: &str = "DD_DOGSTATSD_MAPPER_PROFILES";

#[derive(Debug, Default)]
pub struct DogstatsdFeature {
    host_port: Option<i32>,
    use_host_network: bool,
    non_local_traffic: bool,
    uds_host_path: Option<String>,
    origin_detection: bool,
    tag_cardinality: Option<String>,
    mapper_profiles: Option<String>,
    namespace: String,
    local_service: String,
    local_service_selector: std::collections::BTreeMap<String, String>,
    network_policy: Option<NetworkPolicyTarget>,
}

impl Feature for DogstatsdFeature {
    fn id(&self) -> FeatureId {
        ids::DOGSTATSD
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let dsd = dda.spec.features.dogstatsd.clone().unwrap_or_default();

        self.host_port = dsd
            .host_port_config
            .as_ref()
            .filter(|hp| hp.enabled.unwrap_or(false))
            .map(|hp| hp.port.unwrap_or(DEFAULT_DOGSTATSD_PORT));
        self.use_host_network = shared::host_network_enabled(dda, ComponentName::NodeAgent);
        self.non_local_traffic = dsd.non_local_traffic.unwrap_or(false);
        self.uds_host_path = shared::dsd_uds_enabled(dda).then(|| shared::dsd_socket_path(dda));
        self.origin_detection = dsd.origin_detection_enabled.unwrap_or(false);
        self.tag_cardinality = dsd.tag_cardinality.filter(|c| !c.is_empty());
        self.mapper_profiles = dsd
            .mapper_profiles
            .and_then(|mp| mp.config_data)
            .filter(|data| !data.trim().is_empty());

        self.namespace = dda.namespace().unwrap_or_default();
        self.local_service = agent_local_service_name(dda);
        self.local_service_selector = pod_selector_labels(dda, ComponentName::NodeAgent);
        if self.host_port.is_some() {
            self.network_policy =
                NetworkPolicyTarget::for_feature(dda, ComponentName::NodeAgent, ids::DOGSTATSD);
        }

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
            ..Default::default()
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        let port = self.host_port.unwrap_or(DEFAULT_DOGSTATSD_PORT);
        let target = if self.use_host_network {
            port
        } else {
            DEFAULT_DOGSTATSD_PORT
        };
        managers.service().add_service(
            &self.local_service,
            &self.namespace,
            self.local_service_selector.clone(),
            vec![service_port(DOGSTATSD_PORT_NAME, port, target, "UDP")],
            Some("Local"),
        )?;

        if let Some(policy) = &self.network_policy {
            policy.allow_ingress(managers, "Ingress for dogstatsd", port, "UDP", Vec::new())?;
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.manage(managers, AgentContainerName::CoreAgent)
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.manage(managers, AgentContainerName::UnprivilegedSingleAgent)
    }
}

impl DogstatsdFeature {
    fn manage(
        &self,
        managers: &mut PodTemplateManagers,
        container: AgentContainerName,
    ) -> Result<()> {
        let mut port = container_port(DOGSTATSD_PORT_NAME, DEFAULT_DOGSTATSD_PORT, "UDP");
        if let Some(host_port) = self.host_port {
            port.host_port = Some(host_port);
            if self.use_host_network {
                port.container_port = host_port;
            }
            managers.env_var().add_env_var_to_container(
                container,
                env_var(DD_DOGSTATSD_PORT, port.container_port.to_string()),
            );
        }
        if self.host_port.is_some() || self.non_local_traffic {
            managers.env_var().add_env_var_to_container(
                container,
                bool_env_var(DD_DOGSTATSD_NON_LOCAL_TRAFFIC, true),
            );
        }
        managers.port().add_port_to_container(container, port);

        if let Some(host_path) = &self.uds_host_path {
            let (dir, socket) = shared::split_socket_path(host_path);
            let (volume, mount) = host_path_volume_with_type(
                DOGSTATSD_SOCKET_VOLUME_NAME,
                dir,
                DOGSTATSD_SOCKET_LOCAL_PATH,
                false,
                Some("DirectoryOrCreate"),
            );
            managers.volume().add_volume(volume);
            managers.volume_mount().add_volume_mount_to_container_with_merge(
                mount,
                container,
                MergePolicy::Override,
            )?;
            managers.env_var().add_env_var_to_container(
                container,
                env_var(
                    DD_DOGSTATSD_SOCKET,
                    format!("{DOGSTATSD_SOCKET_LOCAL_PATH}/{socket}"),
                ),
            );
            if self.origin_detection {
                // Origin detection over the socket resolves client PIDs.
                managers.pod_spec_mut().host_pid = Some(true);
            }
        }

        if self.origin_detection {
            let mut env = managers.env_var();
            env.add_env_var_to_container(
                container,
                bool_env_var(DD_DOGSTATSD_ORIGIN_DETECTION, true),
            );
            env.add_env_var_to_container(
                container,
                bool_env_var(DD_DOGSTATSD_ORIGIN_DETECTION_CLIENT, true),
            );
        }

        if let Some(cardinality) = &self.tag_cardinality {
            managers.env_var().add_env_var_to_container(
                container,
                env_var(DD_DOGSTATSD_TAG_CARDINALITY, cardinality.as_str()),
            );
        }

        if let Some(profiles) = &self.mapper_profiles {
            let value: serde_json::Value =
                serde_yaml::from_str(profiles).map_err(|source| FeatureError::Parse {
                    feature: ids::DOGSTATSD,
                    what: "mapper profiles",
                    source,
                })?;
            managers.env_var().add_env_var_to_container(
                container,
                shared::json_env_var(DD_DOGSTATSD_MAPPER_PROFILES, &value)?,
            );
        }
        Ok(())
    }
}
