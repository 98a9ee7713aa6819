//! APM trace intake.
//!
//! Turns on the trace agent and exposes its intake over TCP 8126, a host
//! port or a unix socket. With the admission controller enabled it also
//! drives single step instrumentation from the cluster agent.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::ResourceExt;

use super::shared::{
    self, APM_HOST_PORT_NAME, APM_SOCKET_LOCAL_PATH, APM_SOCKET_VOLUME_NAME,
    DD_PROCESS_CONFIG_RUN_IN_CORE_AGENT_ENABLED, DEFAULT_APM_PORT, DEFAULT_APM_PORT_NAME,
    FeatureRbac, NetworkPolicyTarget,
};
use super::{
    Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent, is_enabled};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::port::container_port;
use crate::merger::rbac::policy_rule;
use crate::merger::service::service_port;
use crate::merger::volume::host_path_volume_with_type;
use crate::merger::{MergePolicy, PodTemplateManagers, ResourceManagers};
use crate::resources::common::{agent_local_service_name, pod_selector_labels};

pub const DD_APM_ENABLED: &str = "DD_APM_ENABLED";
pub const DD_APM_NON_LOCAL_TRAFFIC: &str = "DD_APM_NON_LOCAL_TRAFFIC";
pub const DD_APM_RECEIVER_PORT: &str = "DD_APM_RECEIVER_PORT";
pub const DD_APM_RECEIVER_SOCKET: &str = "DD_APM_RECEIVER_SOCKET";
pub const DD_APM_ERROR_TRACKING_STANDALONE_ENABLED: &str =
    "DD_APM_ERROR_TRACKING_STANDALONE_ENABLED";
pub const DD_APM_INSTRUMENTATION_ENABLED: &str = "DD_APM_INSTRUMENTATION_ENABLED";
pub const DD_APM_INSTRUMENTATION_ENABLED_NAMESPACES: &str =
    "DD_APM_INSTRUMENTATION_ENABLED_NAMESPACES";
pub const DD_APM_INSTRUMENTATION_DISABLED_NAMESPACES: &str =
    "DD_APM_INSTRUMENTATION_DISABLED_NAMESPACES";
pub const DD_APM_INSTRUMENTATION_LIB_VERSIONS: &str = "DD_APM_INSTRUMENTATION_LIB_VERSIONS";
pub const DD_APM_INSTRUMENTATION_INJECTOR_IMAGE_TAG: &str =
    "DD_ADMISSION_CONTROLLER_AUTO_INSTRUMENTATION_INJECTOR_IMAGE_TAG";
pub const DD_LANGUAGE_DETECTION_ENABLED: &str = "DD_LANGUAGE_DETECTION_ENABLED";
pub const DD_LANGUAGE_DETECTION_REPORTING_ENABLED: &str =
    "DD_LANGUAGE_DETECTION_REPORTING_ENABLED";

/// Single step instrumentation settings, kept only when the admission
/// controller can act on them.
#[derive(Clone, Debug, Default, PartialEq)]
struct Instrumentation {
    enabled: bool,
    enabled_namespaces: Vec<String>,
    disabled_namespaces: Vec<String>,
    lib_versions: BTreeMap<String, String>,
    language_detection: bool,
    injector_image_tag: String,
}

#[derive(Debug, Default)]
pub struct ApmFeature {
    host_port: Option<i32>,
    use_host_network: bool,
    uds_host_path: Option<String>,
    instrumentation: Option<Instrumentation>,
    process_checks_in_core_agent: bool,
    error_tracking_standalone: bool,
    namespace: String,
    local_service: String,
    local_service_selector: BTreeMap<String, String>,
    network_policy: Option<NetworkPolicyTarget>,
    cluster_agent_rbac: Option<FeatureRbac>,
}

impl Feature for ApmFeature {
    fn id(&self) -> FeatureId {
        ids::APM
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !shared::apm_enabled(dda) {
            return RequiredComponents::default();
        }
        let apm = dda.spec.features.apm.clone().unwrap_or_default();

        self.host_port = shared::apm_host_port_enabled(dda).then(|| shared::apm_host_port(dda));
        self.use_host_network = shared::host_network_enabled(dda, ComponentName::NodeAgent);
        self.uds_host_path = shared::apm_uds_enabled(dda).then(|| shared::apm_socket_path(dda));
        self.process_checks_in_core_agent = shared::process_checks_in_core_agent(dda);
        self.error_tracking_standalone = is_enabled(apm.error_tracking_standalone.as_ref());

        self.namespace = dda.namespace().unwrap_or_default();
        self.local_service = agent_local_service_name(dda);
        self.local_service_selector = pod_selector_labels(dda, ComponentName::NodeAgent);
        if self.host_port.is_some() {
            self.network_policy =
                NetworkPolicyTarget::for_feature(dda, ComponentName::NodeAgent, ids::APM);
        }

        let mut components = RequiredComponents {
            agent: RequiredComponent::with_containers(&[
                AgentContainerName::CoreAgent,
                AgentContainerName::TraceAgent,
            ]),
            ..Default::default()
        };

        if let Some(ssi) = apm
            .single_step_instrumentation
            .filter(|_| shared::admission_controller_enabled(dda))
        {
            self.instrumentation = Some(Instrumentation {
                enabled: ssi.enabled.unwrap_or(false),
                enabled_namespaces: ssi.enabled_namespaces,
                disabled_namespaces: ssi.disabled_namespaces,
                lib_versions: ssi.lib_versions,
                language_detection: is_enabled(ssi.language_detection.as_ref()),
                injector_image_tag: ssi.injector.map(|i| i.image_tag).unwrap_or_default(),
            });
            components.cluster_agent =
                RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]);
        }

        if self.language_detection_enabled() {
            self.cluster_agent_rbac =
                FeatureRbac::for_feature(dda, ComponentName::ClusterAgent, ids::APM);
            if !self.process_checks_in_core_agent {
                components.agent.merge(&RequiredComponent::with_containers(&[
                    AgentContainerName::ProcessAgent,
                ]));
            }
        }

        components
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        let (port, name, target) = match self.host_port {
            Some(host_port) if self.use_host_network => (host_port, APM_HOST_PORT_NAME, host_port),
            Some(host_port) => (host_port, APM_HOST_PORT_NAME, DEFAULT_APM_PORT),
            None => (DEFAULT_APM_PORT, DEFAULT_APM_PORT_NAME, DEFAULT_APM_PORT),
        };
        managers.service().add_service(
            &self.local_service,
            &self.namespace,
            self.local_service_selector.clone(),
            vec![service_port(name, port, target, "TCP")],
            Some("Local"),
        )?;

        if let (Some(policy), Some(host_port)) = (&self.network_policy, self.host_port) {
            policy.allow_ingress(managers, "Ingress for APM trace", host_port, "TCP", Vec::new())?;
        }

        if let Some(rbac) = &self.cluster_agent_rbac {
            rbac.add_cluster_rules(managers, language_detection_rules())?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        let Some(ssi) = &self.instrumentation else {
            return Ok(());
        };
        if !ssi.enabled_namespaces.is_empty() && !ssi.disabled_namespaces.is_empty() {
            return Err(FeatureError::InvalidConfig {
                feature: ids::APM,
                message: "instrumentation enabledNamespaces and disabledNamespaces \
                          cannot be set together"
                    .to_string(),
            });
        }

        const DCA: AgentContainerName = AgentContainerName::ClusterAgent;
        let mut env = managers.env_var();
        env.add_env_var_to_container(
            DCA,
            bool_env_var(DD_APM_INSTRUMENTATION_ENABLED, ssi.enabled),
        );
        if ssi.enabled && !ssi.injector_image_tag.is_empty() {
            env.add_env_var_to_container(
                DCA,
                env_var(
                    DD_APM_INSTRUMENTATION_INJECTOR_IMAGE_TAG,
                    ssi.injector_image_tag.as_str(),
                ),
            );
        }
        if self.language_detection_enabled() {
            env.add_env_var_to_container(DCA, bool_env_var(DD_LANGUAGE_DETECTION_ENABLED, true));
            env.add_env_var_to_container(
                DCA,
                bool_env_var(DD_LANGUAGE_DETECTION_REPORTING_ENABLED, true),
            );
        }
        if !ssi.disabled_namespaces.is_empty() {
            env.add_env_var_to_container(
                DCA,
                shared::json_env_var(
                    DD_APM_INSTRUMENTATION_DISABLED_NAMESPACES,
                    &ssi.disabled_namespaces,
                )?,
            );
        }
        if !ssi.enabled_namespaces.is_empty() {
            env.add_env_var_to_container(
                DCA,
                shared::json_env_var(
                    DD_APM_INSTRUMENTATION_ENABLED_NAMESPACES,
                    &ssi.enabled_namespaces,
                )?,
            );
        }
        if !ssi.lib_versions.is_empty() {
            env.add_env_var_to_container(
                DCA,
                shared::json_env_var(DD_APM_INSTRUMENTATION_LIB_VERSIONS, &ssi.lib_versions)?,
            );
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.manage(managers, AgentContainerName::TraceAgent, false)
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.manage(managers, AgentContainerName::UnprivilegedSingleAgent, true)
    }
}

impl ApmFeature {
    fn language_detection_enabled(&self) -> bool {
        self.instrumentation
            .as_ref()
            .is_some_and(|ssi| ssi.enabled && ssi.language_detection)
    }

    fn manage(
        &self,
        managers: &mut PodTemplateManagers,
        container: AgentContainerName,
        single_container: bool,
    ) -> Result<()> {
        let core = if single_container {
            container
        } else {
            AgentContainerName::CoreAgent
        };

        managers
            .env_var()
            .add_env_var_to_container(container, bool_env_var(DD_APM_ENABLED, true));

        let mut port = container_port(DEFAULT_APM_PORT_NAME, DEFAULT_APM_PORT, "TCP");
        if let Some(host_port) = self.host_port {
            port.host_port = Some(host_port);
            // Under host network the container port must match the host port.
            if self.use_host_network {
                port.container_port = host_port;
            }
            let mut env = managers.env_var();
            env.add_env_var_to_container(container, bool_env_var(DD_APM_NON_LOCAL_TRAFFIC, true));
            env.add_env_var_to_container(
                container,
                env_var(DD_APM_RECEIVER_PORT, port.container_port.to_string()),
            );
        }
        managers.port().add_port_to_container(container, port);

        if self.language_detection_enabled() {
            let mut targets = vec![core];
            if !single_container {
                targets.push(AgentContainerName::ProcessAgent);
            }
            let mut env = managers.env_var();
            env.add_env_var_to_containers(
                &targets,
                bool_env_var(DD_LANGUAGE_DETECTION_ENABLED, true),
            );
            env.add_env_var_to_containers(
                &targets,
                bool_env_var(DD_LANGUAGE_DETECTION_REPORTING_ENABLED, true),
            );
            env.add_env_var_to_containers(
                &targets,
                bool_env_var(
                    DD_PROCESS_CONFIG_RUN_IN_CORE_AGENT_ENABLED,
                    self.process_checks_in_core_agent,
                ),
            );
        } else {
            // Reporting defaults to on in the agent.
            managers.env_var().add_env_var_to_container(
                core,
                bool_env_var(DD_LANGUAGE_DETECTION_REPORTING_ENABLED, false),
            );
        }

        if let Some(host_path) = &self.uds_host_path {
            let (dir, socket) = shared::split_socket_path(host_path);
            managers.env_var().add_env_var_to_container(
                container,
                env_var(
                    DD_APM_RECEIVER_SOCKET,
                    format!("{APM_SOCKET_LOCAL_PATH}/{socket}"),
                ),
            );
            let (volume, mount) = host_path_volume_with_type(
                APM_SOCKET_VOLUME_NAME,
                dir,
                APM_SOCKET_LOCAL_PATH,
                false,
                Some("DirectoryOrCreate"),
            );
            managers.volume_mount().add_volume_mount_to_container_with_merge(
                mount,
                container,
                MergePolicy::Override,
            )?;
            managers.volume().add_volume(volume);
        }

        if self.error_tracking_standalone {
            managers.env_var().add_env_var_to_containers(
                &[container, core],
                bool_env_var(DD_APM_ERROR_TRACKING_STANDALONE_ENABLED, true),
            );
        }
        Ok(())
    }
}

fn language_detection_rules() -> Vec<PolicyRule> {
    vec![policy_rule(
        "apps",
        &["deployments"],
        &["get", "list", "watch", "patch"],
    )]
}
