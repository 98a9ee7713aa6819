//! Feature composition.
//!
//! A feature is one unit of agent functionality (APM, log collection,
//! cluster checks, ...). Every reconcile instantiates each registered
//! feature, lets it read the DatadogAgent in [`Feature::configure`], and
//! then calls the manage hooks of the configured ones so they can
//! contribute env vars, volumes, ports and dependent objects through the
//! merge managers.
//!
//! Features never talk to each other. Anything two features need to agree
//! on is derived from the DatadogAgent by a pure function in [`shared`].

pub mod admission_controller;
pub mod apm;
pub mod autoscaling;
pub mod check_config;
pub mod cluster_checks;
pub mod cspm;
pub mod cws;
pub mod dogstatsd;
pub mod ebpf_check;
pub mod enable_default;
pub mod event_collection;
pub mod external_metrics_server;
pub mod gpu;
pub mod helm_check;
pub mod kubernetes_state_core;
pub mod live_container;
pub mod live_process;
pub mod log_collection;
pub mod npm;
pub mod oom_kill;
pub mod orchestrator_explorer;
pub mod otel_collector;
pub mod otlp;
pub mod process_discovery;
pub mod prometheus_scrape;
pub mod registry;
pub mod remote_config;
pub mod required;
pub mod sbom;
pub mod service_discovery;
pub mod shared;
pub mod system_probe;
pub mod tcp_queue_length;
pub mod usm;

pub use registry::{FeatureConstructor, FeatureRegistry, RegistryError};
pub use required::{RequiredComponent, RequiredComponents};

use thiserror::Error;

use crate::crd::{ComponentName, DatadogAgent};
use crate::merger::{MergeError, PodTemplateManagers, ResourceManagers};

/// Stable identifier of a feature.
pub type FeatureId = &'static str;

/// Identifiers of the built-in features.
pub mod ids {
    use super::FeatureId;

    pub const ENABLE_DEFAULT: FeatureId = "enable_default";
    pub const DOGSTATSD: FeatureId = "dogstatsd";
    pub const APM: FeatureId = "apm";
    pub const ADMISSION_CONTROLLER: FeatureId = "admission_controller";
    pub const CLUSTER_CHECKS: FeatureId = "cluster_checks";
    pub const ORCHESTRATOR_EXPLORER: FeatureId = "orchestrator_explorer";
    pub const KUBERNETES_STATE_CORE: FeatureId = "kubernetes_state_core";
    pub const LOG_COLLECTION: FeatureId = "log_collection";
    pub const LIVE_PROCESS: FeatureId = "live_process";
    pub const LIVE_CONTAINER: FeatureId = "live_container";
    pub const PROCESS_DISCOVERY: FeatureId = "process_discovery";
    pub const NPM: FeatureId = "npm";
    pub const USM: FeatureId = "usm";
    pub const CSPM: FeatureId = "cspm";
    pub const CWS: FeatureId = "cws";
    pub const OOM_KILL: FeatureId = "oom_kill";
    pub const TCP_QUEUE_LENGTH: FeatureId = "tcp_queue_length";
    pub const EBPF_CHECK: FeatureId = "ebpf_check";
    pub const EVENT_COLLECTION: FeatureId = "event_collection";
    pub const EXTERNAL_METRICS_SERVER: FeatureId = "external_metrics_server";
    pub const PROMETHEUS_SCRAPE: FeatureId = "prometheus_scrape";
    pub const OTLP: FeatureId = "otlp";
    pub const REMOTE_CONFIG: FeatureId = "remote_config";
    pub const SBOM: FeatureId = "sbom";
    pub const HELM_CHECK: FeatureId = "helm_check";
    pub const SERVICE_DISCOVERY: FeatureId = "service_discovery";
    pub const GPU: FeatureId = "gpu";
    pub const OTEL_COLLECTOR: FeatureId = "otel_collector";
    pub const AUTOSCALING: FeatureId = "autoscaling";
}

/// Errors returned by feature hooks.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("feature {feature}: {message}")]
    InvalidConfig { feature: FeatureId, message: String },

    #[error("feature {feature}: failed to parse {what}: {source}")]
    Parse {
        feature: FeatureId,
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeatureError>;

/// A pod template annotation carrying the hash of a feature's custom
/// configuration, so that pods restart when the configuration changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChecksumAnnotation {
    pub component: ComponentName,
    pub key: String,
    pub value: String,
}

impl ChecksumAnnotation {
    pub fn new(component: ComponentName, feature: FeatureId, value: String) -> Self {
        Self {
            component,
            key: checksum_annotation_key(feature),
            value,
        }
    }
}

/// `checksum/<feature>-custom-config`
pub fn checksum_annotation_key(feature: FeatureId) -> String {
    format!("checksum/{feature}-custom-config")
}

/// One unit of agent functionality.
///
/// Implementations hold only what they copied out of the DatadogAgent in
/// [`configure`](Feature::configure). Every manage hook defaults to doing
/// nothing, so a feature implements only the components it touches.
pub trait Feature: Send {
    fn id(&self) -> FeatureId;

    /// Read the DatadogAgent and declare the components this feature needs.
    ///
    /// This is the only hook that reads the DatadogAgent. It must not fail; invalid
    /// settings are remembered and reported by a later hook.
    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents;

    /// Add dependent objects (RBAC, Services, ConfigMaps, network policies).
    fn manage_dependencies(
        &self,
        _managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        Ok(())
    }

    fn manage_cluster_agent(&self, _managers: &mut PodTemplateManagers) -> Result<()> {
        Ok(())
    }

    fn manage_node_agent(
        &self,
        _managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Node agent hook used when every agent process runs in the single
    /// unprivileged container.
    fn manage_single_container_node_agent(
        &self,
        _managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn manage_cluster_checks_runner(&self, _managers: &mut PodTemplateManagers) -> Result<()> {
        Ok(())
    }

    /// Hashes of custom configuration, attached to pod templates.
    ///
    /// Called for every feature, configured or not.
    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        Vec::new()
    }
}
