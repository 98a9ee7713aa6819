//! Derivations shared by several features.
//!
//! These read the DatadogAgent directly so that no feature depends on the
//! state of another one. APM and Dogstatsd socket settings, for instance,
//! are needed by their own features and by the admission controller.

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use serde::Serialize;

use k8s_openapi::api::rbac::v1::PolicyRule;

use crate::crd::{
    AgentContainerName, CiliumIngressRule, CiliumNetworkPolicySpec, CiliumPortRule,
    ComponentName, DatadogAgent, ENTITY_KUBE_APISERVER, is_enabled,
};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::network_policy::{ingress_on_port, pod_peer};
use crate::merger::{MergeError, PodTemplateManagers, ResourceManagers};
use crate::resources::common::{
    network_policy_name, pod_selector, service_account_name, should_create_rbac,
};

pub const DEFAULT_APM_PORT: i32 = 8126;
pub const DEFAULT_APM_PORT_NAME: &str = "traceport";
pub const APM_HOST_PORT_NAME: &str = "traceport";
pub const DEFAULT_DOGSTATSD_PORT: i32 = 8125;
pub const DOGSTATSD_PORT_NAME: &str = "dogstatsdport";

/// Host directory holding the agent sockets.
pub const SOCKET_HOST_DIR: &str = "/var/run/datadog";
pub const APM_SOCKET_NAME: &str = "apm.socket";
pub const DOGSTATSD_SOCKET_NAME: &str = "dsd.socket";
pub const APM_SOCKET_VOLUME_NAME: &str = "apmsocket";
pub const APM_SOCKET_LOCAL_PATH: &str = "/var/run/datadog";
pub const DOGSTATSD_SOCKET_VOLUME_NAME: &str = "dsdsocket";
pub const DOGSTATSD_SOCKET_LOCAL_PATH: &str = "/var/run/datadog";
pub const DD_PROCESS_CONFIG_RUN_IN_CORE_AGENT_ENABLED: &str =
    "DD_PROCESS_CONFIG_RUN_IN_CORE_AGENT_ENABLED";

/// Whether the APM feature is on.
///
/// An explicit `apm.enabled` decides. Otherwise APM is on when single step
/// instrumentation or standalone error tracking is enabled.
pub fn apm_enabled(dda: &DatadogAgent) -> bool {
    let Some(apm) = dda.spec.features.apm.as_ref() else {
        return false;
    };
    if let Some(enabled) = apm.enabled {
        return enabled;
    }
    if apm
        .single_step_instrumentation
        .as_ref()
        .and_then(|ssi| ssi.enabled)
        .unwrap_or(false)
    {
        return true;
    }
    is_enabled(apm.error_tracking_standalone.as_ref())
}

pub fn apm_host_port_enabled(dda: &DatadogAgent) -> bool {
    apm_enabled(dda)
        && dda
            .spec
            .features
            .apm
            .as_ref()
            .and_then(|apm| apm.host_port_config.as_ref())
            .and_then(|hp| hp.enabled)
            .unwrap_or(false)
}

/// Host port of the trace intake.
pub fn apm_host_port(dda: &DatadogAgent) -> i32 {
    dda.spec
        .features
        .apm
        .as_ref()
        .and_then(|apm| apm.host_port_config.as_ref())
        .and_then(|hp| hp.port)
        .unwrap_or(DEFAULT_APM_PORT)
}

pub fn apm_uds_enabled(dda: &DatadogAgent) -> bool {
    apm_enabled(dda)
        && dda
            .spec
            .features
            .apm
            .as_ref()
            .and_then(|apm| apm.unix_domain_socket_config.as_ref())
            .and_then(|uds| uds.enabled)
            .unwrap_or(false)
}

/// Host path of the trace socket.
pub fn apm_socket_path(dda: &DatadogAgent) -> String {
    dda.spec
        .features
        .apm
        .as_ref()
        .and_then(|apm| apm.unix_domain_socket_config.as_ref())
        .and_then(|uds| uds.path.clone())
        .unwrap_or_else(|| format!("{SOCKET_HOST_DIR}/{APM_SOCKET_NAME}"))
}

pub fn dsd_uds_enabled(dda: &DatadogAgent) -> bool {
    dda.spec
        .features
        .dogstatsd
        .as_ref()
        .and_then(|dsd| dsd.unix_domain_socket_config.as_ref())
        .and_then(|uds| uds.enabled)
        .unwrap_or(false)
}

/// Host path of the Dogstatsd socket.
pub fn dsd_socket_path(dda: &DatadogAgent) -> String {
    dda.spec
        .features
        .dogstatsd
        .as_ref()
        .and_then(|dsd| dsd.unix_domain_socket_config.as_ref())
        .and_then(|uds| uds.path.clone())
        .unwrap_or_else(|| format!("{SOCKET_HOST_DIR}/{DOGSTATSD_SOCKET_NAME}"))
}

pub fn admission_controller_enabled(dda: &DatadogAgent) -> bool {
    dda.spec
        .features
        .admission_controller
        .as_ref()
        .and_then(|ac| ac.enabled)
        .unwrap_or(false)
}

/// How injected pods reach the node agent.
///
/// The configured mode wins. Otherwise pods use the sockets when either the
/// APM or the Dogstatsd socket is enabled, and the host IP when neither is.
pub fn admission_communication_mode(dda: &DatadogAgent) -> String {
    if let Some(mode) = dda
        .spec
        .features
        .admission_controller
        .as_ref()
        .and_then(|ac| ac.agent_communication_mode.as_ref())
        .filter(|mode| !mode.is_empty())
    {
        return mode.clone();
    }
    if apm_uds_enabled(dda) || dsd_uds_enabled(dda) {
        "socket".to_string()
    } else {
        "hostip".to_string()
    }
}

pub fn cluster_checks_enabled(dda: &DatadogAgent) -> bool {
    dda.spec
        .features
        .cluster_checks
        .as_ref()
        .and_then(|cc| cc.enabled)
        .unwrap_or(false)
}

/// Whether cluster checks are dispatched to the runners instead of the
/// node agents.
pub fn use_cluster_checks_runners(dda: &DatadogAgent) -> bool {
    cluster_checks_enabled(dda)
        && dda
            .spec
            .features
            .cluster_checks
            .as_ref()
            .and_then(|cc| cc.use_cluster_checks_runners)
            .unwrap_or(false)
}

pub fn remote_config_enabled(dda: &DatadogAgent) -> bool {
    is_enabled(dda.spec.features.remote_configuration.as_ref())
}

pub fn host_network_enabled(dda: &DatadogAgent, component: ComponentName) -> bool {
    dda.component_override(component)
        .and_then(|o| o.host_network)
        .unwrap_or(false)
}

pub fn process_checks_in_core_agent(dda: &DatadogAgent) -> bool {
    dda.spec.global.run_process_checks_in_core_agent.unwrap_or(false)
}

/// Where the process checks (live processes, live containers, process
/// discovery) run on the node agent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProcessChecks {
    pub run_in_core_agent: bool,
}

impl ProcessChecks {
    pub fn for_dda(dda: &DatadogAgent) -> Self {
        Self {
            run_in_core_agent: process_checks_in_core_agent(dda),
        }
    }

    /// Node agent containers the checks need.
    pub fn required_containers(&self) -> Vec<AgentContainerName> {
        if self.run_in_core_agent {
            vec![AgentContainerName::CoreAgent]
        } else {
            vec![AgentContainerName::CoreAgent, AgentContainerName::ProcessAgent]
        }
    }

    /// Container running the checks in the multi-container layout.
    pub fn container(&self) -> AgentContainerName {
        if self.run_in_core_agent {
            AgentContainerName::CoreAgent
        } else {
            AgentContainerName::ProcessAgent
        }
    }

    /// Tell the agents which process runs the checks.
    pub fn add_run_in_core_agent_env(&self, managers: &mut PodTemplateManagers, single: bool) {
        let containers: &[AgentContainerName] = if single {
            &[AgentContainerName::UnprivilegedSingleAgent]
        } else {
            &[AgentContainerName::CoreAgent, AgentContainerName::ProcessAgent]
        };
        managers.env_var().add_env_var_to_containers(
            containers,
            bool_env_var(DD_PROCESS_CONFIG_RUN_IN_CORE_AGENT_ENABLED, self.run_in_core_agent),
        );
    }
}

/// Env var holding the JSON encoding of `value`.
pub fn json_env_var<T: Serialize + ?Sized>(name: &str, value: &T) -> serde_json::Result<EnvVar> {
    Ok(env_var(name, serde_json::to_string(value)?))
}

/// Split a socket path into its directory and file name.
pub fn split_socket_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", file)) => ("/", file),
        Some((dir, file)) => (dir, file),
        None => (".", path),
    }
}

/// Where and how a feature creates its network policy, captured during
/// `configure`. Absent when the DatadogAgent does not ask for policies.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkPolicyTarget {
    pub name: String,
    pub namespace: String,
    pub pod_selector: LabelSelector,
    pub cilium: bool,
}

impl NetworkPolicyTarget {
    pub fn for_feature(
        dda: &DatadogAgent,
        component: ComponentName,
        feature: &str,
    ) -> Option<Self> {
        if !dda.creates_network_policies() {
            return None;
        }
        Some(Self {
            name: network_policy_name(dda, component, feature),
            namespace: dda.namespace().unwrap_or_default(),
            pod_selector: pod_selector(dda, component),
            cilium: dda.uses_cilium(),
        })
    }

    /// Allow ingress on one port from the Kubernetes API server. Kubernetes
    /// policies cannot single out the API server and allow any source.
    pub fn allow_api_server_ingress(
        &self,
        managers: &mut ResourceManagers,
        description: &str,
        port: i32,
    ) -> Result<(), MergeError> {
        if !self.cilium {
            return self.allow_ingress(managers, description, port, "TCP", Vec::new());
        }
        let spec = CiliumNetworkPolicySpec {
            description: description.to_string(),
            endpoint_selector: self.pod_selector.clone(),
            ingress: vec![CiliumIngressRule {
                from_endpoints: Vec::new(),
                from_entities: vec![ENTITY_KUBE_APISERVER.to_string()],
                to_ports: vec![CiliumPortRule::single(port, "TCP")],
            }],
            egress: Vec::new(),
        };
        managers
            .cilium_policy()
            .add_cilium_policy(&self.name, &self.namespace, spec)
    }

    /// Allow ingress on one port, from `from` or from anywhere when empty.
    pub fn allow_ingress(
        &self,
        managers: &mut ResourceManagers,
        description: &str,
        port: i32,
        protocol: &str,
        from: Vec<LabelSelector>,
    ) -> Result<(), MergeError> {
        if self.cilium {
            let from_endpoints = if from.is_empty() {
                vec![LabelSelector::default()]
            } else {
                from
            };
            let spec = CiliumNetworkPolicySpec {
                description: description.to_string(),
                endpoint_selector: self.pod_selector.clone(),
                ingress: vec![CiliumIngressRule {
                    from_endpoints,
                    from_entities: Vec::new(),
                    to_ports: vec![CiliumPortRule::single(port, protocol)],
                }],
                egress: Vec::new(),
            };
            return managers
                .cilium_policy()
                .add_cilium_policy(&self.name, &self.namespace, spec);
        }

        let peers = from.into_iter().map(pod_peer).collect();
        managers.network_policy().add_kubernetes_network_policy(
            &self.name,
            &self.namespace,
            self.pod_selector.clone(),
            &["Ingress"],
            vec![ingress_on_port(port, protocol, peers)],
            Vec::new(),
        )
    }
}

/// Role a feature owns for one component, bound to the component's service
/// account. Absent when the component's RBAC is managed by the user.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureRbac {
    pub namespace: String,
    pub role_name: String,
    pub service_account: String,
}

impl FeatureRbac {
    /// `<dda>-<feature>-<component>`
    pub fn for_feature(
        dda: &DatadogAgent,
        component: ComponentName,
        feature: &str,
    ) -> Option<Self> {
        if !should_create_rbac(dda, component) {
            return None;
        }
        Some(Self {
            namespace: dda.namespace().unwrap_or_default(),
            role_name: format!(
                "{}-{}-{}",
                dda.name_any(),
                feature.replace('_', "-"),
                component.resource_suffix()
            ),
            service_account: service_account_name(dda, component),
        })
    }

    pub fn add_cluster_rules(
        &self,
        managers: &mut ResourceManagers,
        rules: Vec<PolicyRule>,
    ) -> Result<(), MergeError> {
        managers.rbac().add_cluster_policy_rules(
            &self.namespace,
            &self.role_name,
            &self.service_account,
            rules,
        )
    }

    pub fn add_rules(
        &self,
        managers: &mut ResourceManagers,
        rules: Vec<PolicyRule>,
    ) -> Result<(), MergeError> {
        managers.rbac().add_policy_rules(
            &self.namespace,
            &self.role_name,
            &self.service_account,
            rules,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crd::{
        AdmissionControllerFeatureConfig, ApmFeatureConfig, ClusterChecksFeatureConfig,
        DatadogAgentSpec, DogstatsdFeatureConfig, SingleStepInstrumentation,
        UnixDomainSocketConfig,
    };
    use crate::feature::tests::dda_with;

    fn with_apm(apm: ApmFeatureConfig) -> DatadogAgent {
        let mut spec = DatadogAgentSpec::default();
        spec.features.apm = Some(apm);
        dda_with(spec)
    }

    #[test]
    fn test_apm_enabled_by_instrumentation() {
        let dda = with_apm(ApmFeatureConfig {
            single_step_instrumentation: Some(SingleStepInstrumentation {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(apm_enabled(&dda));

        let explicit_off = with_apm(ApmFeatureConfig {
            enabled: Some(false),
            single_step_instrumentation: Some(SingleStepInstrumentation {
                enabled: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(!apm_enabled(&explicit_off));
    }

    #[test]
    fn test_communication_mode_derived_from_sockets() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.admission_controller = Some(AdmissionControllerFeatureConfig {
            enabled: Some(true),
            ..Default::default()
        });
        assert_eq!(admission_communication_mode(&dda_with(spec.clone())), "hostip");

        spec.features.dogstatsd = Some(DogstatsdFeatureConfig {
            unix_domain_socket_config: Some(UnixDomainSocketConfig {
                enabled: Some(true),
                path: None,
            }),
            ..Default::default()
        });
        assert_eq!(admission_communication_mode(&dda_with(spec.clone())), "socket");

        spec.features.admission_controller = Some(AdmissionControllerFeatureConfig {
            enabled: Some(true),
            agent_communication_mode: Some("service".to_string()),
            ..Default::default()
        });
        assert_eq!(admission_communication_mode(&dda_with(spec)), "service");
    }

    #[test]
    fn test_apm_uds_requires_apm() {
        let dda = with_apm(ApmFeatureConfig {
            enabled: Some(false),
            unix_domain_socket_config: Some(UnixDomainSocketConfig {
                enabled: Some(true),
                path: None,
            }),
            ..Default::default()
        });
        assert!(!apm_uds_enabled(&dda));
        assert_eq!(apm_socket_path(&dda), "/var/run/datadog/apm.socket");
    }

    #[test]
    fn test_runners_require_cluster_checks() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.cluster_checks = Some(ClusterChecksFeatureConfig {
            enabled: Some(false),
            use_cluster_checks_runners: Some(true),
        });
        assert!(!use_cluster_checks_runners(&dda_with(spec)));
    }

    #[test]
    fn test_network_policy_target_only_when_requested() {
        use crate::crd::{NetworkPolicyConfig, NetworkPolicyFlavor};
        use crate::feature::tests::resource_managers;
        use k8s_openapi::api::networking::v1::NetworkPolicy;

        let mut spec = DatadogAgentSpec::default();
        let disabled = dda_with(spec.clone());
        assert!(
            NetworkPolicyTarget::for_feature(&disabled, ComponentName::NodeAgent, "apm").is_none()
        );

        spec.global.network_policy = Some(NetworkPolicyConfig {
            create: Some(true),
            flavor: Some(NetworkPolicyFlavor::Kubernetes),
            dns_selector_endpoints: vec![],
        });
        let dda = dda_with(spec);
        let target =
            NetworkPolicyTarget::for_feature(&dda, ComponentName::NodeAgent, "apm").unwrap();
        assert!(!target.cilium);

        let mut managers = resource_managers(&dda);
        target
            .allow_ingress(&mut managers, "Ingress for APM trace", 8126, "TCP", vec![])
            .unwrap();
        let store = managers.into_store();
        assert!(store.get::<NetworkPolicy>("datadog", "dd-agent-apm").is_some());
    }

    #[test]
    fn test_feature_rbac_name() {
        use crate::crd::DatadogAgentComponentOverride;

        let mut spec = DatadogAgentSpec::default();
        let rbac = FeatureRbac::for_feature(
            &dda_with(spec.clone()),
            ComponentName::ClusterAgent,
            "kubernetes_state_core",
        )
        .unwrap();
        assert_eq!(rbac.role_name, "dd-kubernetes-state-core-cluster-agent");
        assert_eq!(rbac.service_account, "dd-cluster-agent");

        spec.overrides.insert(
            ComponentName::ClusterAgent,
            DatadogAgentComponentOverride {
                create_rbac: Some(false),
                ..Default::default()
            },
        );
        assert!(
            FeatureRbac::for_feature(&dda_with(spec), ComponentName::ClusterAgent, "apm").is_none()
        );
    }

    #[test]
    fn test_split_socket_path() {
        assert_eq!(
            split_socket_path("/custom/host/filepath.sock"),
            ("/custom/host", "filepath.sock")
        );
        assert_eq!(split_socket_path("/apm.socket"), ("/", "apm.socket"));
    }
}
