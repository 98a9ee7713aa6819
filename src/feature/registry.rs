//! Feature registry.
//!
//! The set of features is an explicit ordered list. Registration order is
//! the order features are configured and their hooks are invoked, which is
//! what decides who wins a `KeepExisting` merge.

use std::sync::LazyLock;

use thiserror::Error;

use super::{Feature, FeatureId};

/// Builds a fresh, unconfigured feature.
pub type FeatureConstructor = fn() -> Box<dyn Feature>;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum RegistryError {
    #[error("feature {0} is already registered")]
    DuplicateId(FeatureId),
}

/// Ordered map from feature ID to constructor.
#[derive(Clone, Debug, Default)]
pub struct FeatureRegistry {
    entries: Vec<(FeatureId, FeatureConstructor)>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: FeatureId,
        constructor: FeatureConstructor,
    ) -> Result<(), RegistryError> {
        if self.entries.iter().any(|(existing, _)| *existing == id) {
            return Err(RegistryError::DuplicateId(id));
        }
        self.entries.push((id, constructor));
        Ok(())
    }

    /// Build a registry from an ordered constructor list.
    pub fn from_constructors(
        constructors: impl IntoIterator<Item = (FeatureId, FeatureConstructor)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (id, constructor) in constructors {
            registry.register(id, constructor)?;
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<FeatureConstructor> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, constructor)| *constructor)
    }

    /// Registered IDs in registration order.
    pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// One fresh instance of every registered feature, in order.
    pub fn instantiate(&self) -> Vec<Box<dyn Feature>> {
        self.entries.iter().map(|(_, constructor)| constructor()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The process-wide registry of built-in features.
    ///
    /// # Panics
    ///
    /// Panics on first use if two built-in features share an ID.
    pub fn builtin() -> &'static FeatureRegistry {
        static BUILTIN: LazyLock<FeatureRegistry> = LazyLock::new(|| {
            match FeatureRegistry::from_constructors(default_constructors()) {
                Ok(registry) => registry,
                #[allow(clippy::panic)]
                Err(e) => panic!("invalid built-in feature table: {e}"),
            }
        });
        &BUILTIN
    }
}

fn boxed<F: Feature + Default + 'static>() -> Box<dyn Feature> {
    Box::<F>::default()
}

/// Built-in features in registration order.
pub fn default_constructors() -> Vec<(FeatureId, FeatureConstructor)> {
    use super::ids;
    use super::*;

    vec![
        (ids::ENABLE_DEFAULT, boxed::<enable_default::DefaultFeature>),
        (ids::DOGSTATSD, boxed::<dogstatsd::DogstatsdFeature>),
        (ids::APM, boxed::<apm::ApmFeature>),
        (
            ids::ADMISSION_CONTROLLER,
            boxed::<admission_controller::AdmissionControllerFeature>,
        ),
        (ids::CLUSTER_CHECKS, boxed::<cluster_checks::ClusterChecksFeature>),
        (
            ids::ORCHESTRATOR_EXPLORER,
            boxed::<orchestrator_explorer::OrchestratorExplorerFeature>,
        ),
        (
            ids::KUBERNETES_STATE_CORE,
            boxed::<kubernetes_state_core::KubernetesStateCoreFeature>,
        ),
        (ids::LOG_COLLECTION, boxed::<log_collection::LogCollectionFeature>),
        (ids::LIVE_PROCESS, boxed::<live_process::LiveProcessFeature>),
        (ids::LIVE_CONTAINER, boxed::<live_container::LiveContainerFeature>),
        (
            ids::PROCESS_DISCOVERY,
            boxed::<process_discovery::ProcessDiscoveryFeature>,
        ),
        (ids::NPM, boxed::<npm::NpmFeature>),
        (ids::USM, boxed::<usm::UsmFeature>),
        (ids::CSPM, boxed::<cspm::CspmFeature>),
        (ids::CWS, boxed::<cws::CwsFeature>),
        (ids::OOM_KILL, boxed::<oom_kill::OomKillFeature>),
        (ids::TCP_QUEUE_LENGTH, boxed::<tcp_queue_length::TcpQueueLengthFeature>),
        (ids::EBPF_CHECK, boxed::<ebpf_check::EbpfCheckFeature>),
        (
            ids::EVENT_COLLECTION,
            boxed::<event_collection::EventCollectionFeature>,
        ),
        (
            ids::EXTERNAL_METRICS_SERVER,
            boxed::<external_metrics_server::ExternalMetricsServerFeature>,
        ),
        (
            ids::PROMETHEUS_SCRAPE,
            boxed::<prometheus_scrape::PrometheusScrapeFeature>,
        ),
        (ids::OTLP, boxed::<otlp::OtlpFeature>),
        (ids::REMOTE_CONFIG, boxed::<remote_config::RemoteConfigFeature>),
        (ids::SBOM, boxed::<sbom::SbomFeature>),
        (ids::HELM_CHECK, boxed::<helm_check::HelmCheckFeature>),
        (
            ids::SERVICE_DISCOVERY,
            boxed::<service_discovery::ServiceDiscoveryFeature>,
        ),
        (ids::GPU, boxed::<gpu::GpuFeature>),
        (ids::OTEL_COLLECTOR, boxed::<otel_collector::OtelCollectorFeature>),
        (ids::AUTOSCALING, boxed::<autoscaling::AutoscalingFeature>),
    ]
}
