//! Feature configuration sections of the DatadogAgent spec.
//!
//! Every section is optional. A missing section and a section with
//! `enabled` unset are treated the same way by the features, except
//! where a feature documents otherwise (APM, cluster checks).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, KeyToPath, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All feature sections.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_configuration: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_collection: Option<EventCollectionFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_explorer: Option<OrchestratorExplorerFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_state_metrics_core: Option<KubeStateMetricsCoreFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_controller: Option<AdmissionControllerFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_metrics_server: Option<ExternalMetricsServerFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_checks: Option<ClusterChecksFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_scrape: Option<PrometheusScrapeFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_check: Option<HelmCheckFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_collection: Option<LogCollectionFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_process_collection: Option<LiveProcessCollectionFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_container_collection: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_discovery: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_kill: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_queue_length: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebpf_check: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apm: Option<ApmFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cspm: Option<CspmFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cws: Option<CwsFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npm: Option<NpmFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usm: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dogstatsd: Option<DogstatsdFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom: Option<SbomFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otel_collector: Option<OtelCollectorFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_discovery: Option<ServiceDiscoveryFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingFeatureConfig>,
}

/// A feature section with nothing but an on/off switch.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ToggleFeatureConfig {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
        }
    }
}

/// Whether an optional toggle section is switched on.
pub fn is_enabled(section: Option<&ToggleFeatureConfig>) -> bool {
    section.and_then(|s| s.enabled).unwrap_or(false)
}

/// Host port exposure of an agent listener.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostPortConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, rename = "hostPort", skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Unix domain socket exposure of an agent listener.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnixDomainSocketConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Socket path on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Inline configuration or a reference to a user ConfigMap.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomConfig {
    /// Raw configuration file content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapConfig>,
}

/// Reference to a ConfigMap holding configuration files.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApmFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port_config: Option<HostPortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_domain_socket_config: Option<UnixDomainSocketConfig>,
    #[serde(
        default,
        rename = "instrumentation",
        skip_serializing_if = "Option::is_none"
    )]
    pub single_step_instrumentation: Option<SingleStepInstrumentation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tracking_standalone: Option<ToggleFeatureConfig>,
}

/// Library injection driven by the admission controller.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SingleStepInstrumentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_namespaces: Vec<String>,
    /// Tracer library versions keyed by language.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lib_versions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_detection: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injector: Option<InjectorConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InjectorConfig {
    #[serde(default)]
    pub image_tag: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionControllerFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutate_unlabelled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// One of `hostip`, `service` or `socket`. Derived from APM and
    /// Dogstatsd socket settings when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_communication_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_sidecar_injection: Option<AgentSidecarInjectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cws_instrumentation: Option<CwsInstrumentationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_admission_events: Option<ToggleFeatureConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CwsInstrumentationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentSidecarInjectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_agent_communication_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<super::AgentImageConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<SidecarSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<SidecarProfile>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarProfile {
    #[serde(default, rename = "env", skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,
    #[serde(
        default,
        rename = "resources",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_requirements: Option<ResourceRequirements>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterChecksFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cluster_checks_runners: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorExplorerFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<CustomConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrub_containers: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_tags: Vec<String>,
    #[serde(default, rename = "ddUrl", skip_serializing_if = "Option::is_none")]
    pub dd_url: Option<String>,
    /// Custom resources to collect, formatted `group/version/resource`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_resources: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeStateMetricsCoreFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<CustomConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmCheckFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_events: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values_as_tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventCollectionFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_kubernetes_events: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbundle_events: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricsServerFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_api_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_datadog_metrics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wpa_controller: Option<bool>,
    /// Override of the metrics query endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusScrapeFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_service_endpoints: Option<bool>,
    /// YAML list of additional scrape configurations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_configs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectionFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_collect_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_collect_using_files: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_logs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_logs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_symlinks_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_storage_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_files_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_multi_line_detection: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveProcessCollectionFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrub_process_arguments: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_process_arguments: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NpmFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_conntrack: Option<bool>,
    #[serde(default, rename = "collectDNSStats", skip_serializing_if = "Option::is_none")]
    pub collect_dns_stats: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CspmFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_benchmarks: Option<ToggleFeatureConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CwsFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall_monitor_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ToggleFeatureConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profiles: Option<ToggleFeatureConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DogstatsdFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_detection_enabled: Option<bool>,
    /// One of `low`, `orchestrator` or `high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_cardinality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port_config: Option<HostPortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_domain_socket_config: Option<UnixDomainSocketConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapper_profiles: Option<CustomConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_local_traffic: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtlpFeatureConfig {
    #[serde(default)]
    pub receiver: OtlpReceiverConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtlpReceiverConfig {
    #[serde(default)]
    pub protocols: OtlpProtocolsConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtlpProtocolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<OtlpEndpointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<OtlpEndpointConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtlpEndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port_config: Option<HostPortConfig>,
    /// Listen address, `0.0.0.0:<port>` by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SbomFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<SbomTypeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<SbomTypeConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SbomTypeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzers: Vec<String>,
}

/// OpenTelemetry collector running next to the core agent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtelCollectorFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Collector configuration. The built-in pipeline is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<CustomConfig>,
    /// Ports of the otel-agent container, `otel-grpc` 4317 and `otel-http`
    /// 4318 when empty. Each is bound to the same host port.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_config: Option<OtelCoreConfig>,
}

/// Settings of the collector extension inside the core agent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtelCoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Run the GPU probe in system-probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged_mode: Option<bool>,
    /// Let system-probe grant the agents access to GPU devices in their
    /// cgroups. Needs `privilegedMode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_cgroup_permissions: Option<bool>,
    /// `nvidia` when unset; an empty string leaves the runtime class alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_runtime_class_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDiscoveryFeatureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// On unless explicitly disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_stats: Option<ToggleFeatureConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingFeatureConfig {
    /// Datadog pod autoscalers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<ToggleFeatureConfig>,
    /// Karpenter based node autoscaling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ToggleFeatureConfig>,
}
