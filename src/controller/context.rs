//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client and event recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::credentials::{CredentialManager, Credentials};
use crate::crd::DatadogAgent;
use crate::feature::FeatureRegistry;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "datadog-operator";

/// Cluster-level switches that shape every reconcile.
#[derive(Clone, Debug, Default)]
pub struct ReconcileOptions {
    /// CiliumNetworkPolicy is installed in the cluster.
    pub supports_cilium: bool,
    /// DatadogAgentProfiles are honoured.
    pub profiles_enabled: bool,
    /// Namespaces searched for profiles. `None` means all of them.
    pub profile_namespaces: Option<Vec<String>>,
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Operator credentials used when a DatadogAgent carries none
    pub credentials: Option<Arc<CredentialManager>>,
    pub registry: &'static FeatureRegistry,
    pub options: ReconcileOptions,
}

impl Context {
    /// Create a new context with the builtin features
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            credentials: None,
            registry: FeatureRegistry::builtin(),
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialManager>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Operator credentials, if any could be resolved.
    pub async fn fallback_credentials(&self) -> Option<Credentials> {
        let manager = self.credentials.as_ref()?;
        match manager.get().await {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::debug!(error = %e, "No operator credentials available");
                None
            }
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(
        &self,
        resource: &DatadogAgent,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a DatadogAgent
    pub async fn publish_normal_event(
        &self,
        resource: &DatadogAgent,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a DatadogAgent
    pub async fn publish_warning_event(
        &self,
        resource: &DatadogAgent,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
