//! DatadogAgent Custom Resource Definition.
//!
//! A DatadogAgent describes which Datadog features are enabled in a cluster.
//! The operator turns it into a node agent DaemonSet, a cluster agent
//! Deployment, an optional cluster checks runner Deployment and the
//! ConfigMaps, Services, RBAC and network policies they depend on.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, LocalObjectReference, PodSecurityContext, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{AgentContainerName, ComponentName, Condition};
use super::features::DatadogFeatures;

/// DatadogAgent deploys the Datadog Agent and its companion workloads.
///
/// Example:
/// ```yaml
/// apiVersion: datadoghq.com/v2alpha1
/// kind: DatadogAgent
/// metadata:
///   name: datadog
/// spec:
///   global:
///     clusterName: prod-eu
///     credentials:
///       apiSecret:
///         secretName: datadog-secret
///         keyName: api-key
///   features:
///     apm:
///       enabled: true
///     clusterChecks:
///       enabled: true
///       useClusterChecksRunners: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datadoghq.com",
    version = "v2alpha1",
    kind = "DatadogAgent",
    plural = "datadogagents",
    shortname = "dd",
    status = "DatadogAgentStatus",
    namespaced,
    printcolumn = r#"{"name":"Agent", "type":"string", "jsonPath":".status.agent.status"}"#,
    printcolumn = r#"{"name":"Cluster-Agent", "type":"string", "jsonPath":".status.clusterAgent.status"}"#,
    printcolumn = r#"{"name":"Cluster-Checks-Runner", "type":"string", "jsonPath":".status.clusterChecksRunner.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentSpec {
    /// Feature configuration. Each feature is off unless its section enables it.
    #[serde(default)]
    pub features: DatadogFeatures,

    /// Settings shared by every component.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Per-component overrides, applied after every feature.
    #[serde(
        default,
        rename = "override",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub overrides: BTreeMap<ComponentName, DatadogAgentComponentOverride>,
}

/// Settings shared by every component.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Datadog intake site, `datadoghq.com` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Image registry used for every agent image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<DatadogCredentials>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    /// Token shared by the node agents and the cluster agent. Generated
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_agent_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<NetworkPolicyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_service: Option<LocalService>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri_socket_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfig>,

    /// Extra environment variables for every container of every component.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels_as_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations_as_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels_as_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_labels_as_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_strategy: Option<ContainerStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_process_checks_in_core_agent: Option<bool>,
}

/// API and application keys, inline or from a Secret.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<SecretConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<SecretConfig>,
}

/// Reference to a key in an existing Secret.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<NetworkPolicyFlavor>,
    /// Cilium DNS selectors copied into every Cilium egress rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_selector_endpoints: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicyFlavor {
    #[default]
    Kubernetes,
    Cilium,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_enable_local_service: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ca_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ca_path: Option<String>,
    /// Directory of the kubelet pod resources socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_resources_socket_path: Option<String>,
}

/// How node agent processes are spread over containers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStrategy {
    /// One container per agent process.
    #[default]
    Optimized,
    /// Every process in one unprivileged container, when features allow it.
    Single,
}

/// Override of a generated workload.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentComponentOverride {
    /// Workload name, `<dda>-<component>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_rbac: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<AgentImageConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<AgentContainerName, DatadogAgentGenericContainer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    #[serde(default, rename = "hostPID", skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    /// Drop the component entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

/// Container image selection.
///
/// `name` may be a bare image name (`agent`), a repository path
/// (`gcr.io/datadoghq/agent`) or a full reference with a tag
/// (`gcr.io/datadoghq/agent:7.50.0`). A full reference is used as is.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentImageConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, rename = "jmxEnabled")]
    pub jmx_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_secrets: Vec<LocalObjectReference>,
}

/// Override of a single container.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentGenericContainer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_armor_profile_name: Option<String>,
}

/// Status of a DatadogAgent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_agent: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_checks_runner: Option<ComponentStatus>,

    /// Feature IDs that were configured on the last reconcile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_features: Vec<String>,

    /// Configuration pushed by Datadog remote configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config_configuration: Option<RemoteConfigConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Summary of a generated workload.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Human readable summary, e.g. `Running (3/3/3)`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub desired: i32,
    #[serde(default)]
    pub current: i32,
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub up_to_date: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<RemoteConfigFeatures>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_explorer: Option<RemoteOrchestratorExplorer>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrchestratorExplorer {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_resources: Vec<String>,
}

impl DatadogAgent {
    /// Custom resources pushed through remote configuration for the
    /// orchestrator explorer.
    pub fn remote_config_custom_resources(&self) -> &[String] {
        self.status
            .as_ref()
            .and_then(|s| s.remote_config_configuration.as_ref())
            .and_then(|rc| rc.features.as_ref())
            .and_then(|f| f.orchestrator_explorer.as_ref())
            .map(|oe| oe.custom_resources.as_slice())
            .unwrap_or(&[])
    }

    /// Override for a component, if any.
    pub fn component_override(
        &self,
        component: ComponentName,
    ) -> Option<&DatadogAgentComponentOverride> {
        self.spec.overrides.get(&component)
    }

    /// Whether the override for a component sets `disabled: true`.
    pub fn is_component_disabled(&self, component: ComponentName) -> bool {
        self.component_override(component)
            .and_then(|o| o.disabled)
            .unwrap_or(false)
    }

    /// Whether network policies should be rendered as CiliumNetworkPolicies.
    pub fn uses_cilium(&self) -> bool {
        self.spec
            .global
            .network_policy
            .as_ref()
            .and_then(|np| np.flavor)
            == Some(NetworkPolicyFlavor::Cilium)
    }

    /// Whether per-feature network policies should be created at all.
    pub fn creates_network_policies(&self) -> bool {
        self.spec
            .global
            .network_policy
            .as_ref()
            .and_then(|np| np.create)
            .unwrap_or(false)
    }
}
