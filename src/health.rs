//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! - `/healthz`: liveness, 200 while the process serves requests
//! - `/readyz`: readiness, 200 once the controllers run and leadership is held
//! - `/metrics`: Prometheus text exposition

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use serde::Serialize;
use tracing::info;

/// Identifies one DatadogAgent.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AgentLabels {
    pub namespace: String,
    pub name: String,
}

impl AgentLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for AgentLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// A DatadogAgent plus one extra dimension (component or error kind).
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AgentDetailLabels {
    pub agent: AgentLabels,
    key: &'static str,
    pub value: String,
}

impl EncodeLabelSet for AgentDetailLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        self.agent.encode(encoder)?;
        (self.key, self.value.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

fn component_labels(namespace: &str, name: &str, component: &str) -> AgentDetailLabels {
    AgentDetailLabels {
        agent: AgentLabels::new(namespace, name),
        key: "component",
        value: component.to_string(),
    }
}

/// Operator metrics.
pub struct Metrics {
    pub reconciliations_total: Family<AgentLabels, Counter>,
    /// Failed reconciliations, by error kind
    pub reconciliation_errors_total: Family<AgentDetailLabels, Counter>,
    pub reconcile_duration_seconds: Family<AgentLabels, Histogram>,
    pub enabled_features: Family<AgentLabels, Gauge>,
    /// Components some feature needs but an override disabled
    pub override_conflicts: Family<AgentLabels, Gauge>,
    /// Node agent DaemonSets, one per applied profile
    pub node_agent_daemonsets: Family<AgentLabels, Gauge>,
    pub component_pods_desired: Family<AgentDetailLabels, Gauge>,
    pub component_pods_ready: Family<AgentDetailLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("datadog_operator");

        let reconciliations_total = Family::<AgentLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Successful reconciliations of a DatadogAgent",
            reconciliations_total.clone(),
        );
        let reconciliation_errors_total = Family::<AgentDetailLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Failed reconciliations of a DatadogAgent",
            reconciliation_errors_total.clone(),
        );
        let reconcile_duration_seconds =
            Family::<AgentLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 12))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Time spent building and applying the desired state",
            reconcile_duration_seconds.clone(),
        );
        let enabled_features = Family::<AgentLabels, Gauge>::default();
        registry.register(
            "enabled_features",
            "Features configured on a DatadogAgent",
            enabled_features.clone(),
        );
        let override_conflicts = Family::<AgentLabels, Gauge>::default();
        registry.register(
            "override_conflicts",
            "Components required by features but disabled by an override",
            override_conflicts.clone(),
        );
        let node_agent_daemonsets = Family::<AgentLabels, Gauge>::default();
        registry.register(
            "node_agent_daemonsets",
            "Node agent DaemonSets generated for a DatadogAgent",
            node_agent_daemonsets.clone(),
        );
        let component_pods_desired = Family::<AgentDetailLabels, Gauge>::default();
        registry.register(
            "component_pods_desired",
            "Desired pods of a component",
            component_pods_desired.clone(),
        );
        let component_pods_ready = Family::<AgentDetailLabels, Gauge>::default();
        registry.register(
            "component_pods_ready",
            "Ready pods of a component",
            component_pods_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            enabled_features,
            override_conflicts,
            node_agent_daemonsets,
            component_pods_desired,
            component_pods_ready,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = AgentLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str, kind: &'static str) {
        let labels = AgentDetailLabels {
            agent: AgentLabels::new(namespace, name),
            key: "kind",
            value: kind.to_string(),
        };
        self.reconciliation_errors_total.get_or_create(&labels).inc();
    }

    /// Gauges describing the last desired state built for a DatadogAgent.
    pub fn set_desired_state(
        &self,
        namespace: &str,
        name: &str,
        features: usize,
        conflicts: usize,
        daemonsets: usize,
    ) {
        let labels = AgentLabels::new(namespace, name);
        self.enabled_features
            .get_or_create(&labels)
            .set(gauge_value(features));
        self.override_conflicts
            .get_or_create(&labels)
            .set(gauge_value(conflicts));
        self.node_agent_daemonsets
            .get_or_create(&labels)
            .set(gauge_value(daemonsets));
    }

    pub fn set_component_pods(
        &self,
        namespace: &str,
        name: &str,
        component: &str,
        desired: i64,
        ready: i64,
    ) {
        let labels = component_labels(namespace, name, component);
        self.component_pods_desired
            .get_or_create(&labels)
            .set(desired);
        self.component_pods_ready.get_or_create(&labels).set(ready);
    }

    /// Drop every series of a deleted DatadogAgent.
    pub fn forget(&self, namespace: &str, name: &str) {
        let labels = AgentLabels::new(namespace, name);
        self.reconciliations_total.remove(&labels);
        self.reconcile_duration_seconds.remove(&labels);
        self.enabled_features.remove(&labels);
        self.override_conflicts.remove(&labels);
        self.node_agent_daemonsets.remove(&labels);
        for component in ["nodeAgent", "clusterAgent", "clusterChecksRunner"] {
            let labels = component_labels(namespace, name, component);
            self.component_pods_desired.remove(&labels);
            self.component_pods_ready.remove(&labels);
        }
    }

    /// Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

fn gauge_value(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Shared state of the health server.
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
    /// Unix seconds of the last successful reconcile, 0 before the first
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Starts not ready.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_reconciled(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        self.last_reconcile.store(now, Ordering::Relaxed);
    }

    fn readiness(&self) -> Readiness {
        let last = self.last_reconcile.load(Ordering::Relaxed);
        Readiness {
            ready: self.is_ready(),
            last_reconcile: (last > 0).then_some(last),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Readiness {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_reconcile: Option<u64>,
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    let readiness = state.readiness();
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness)).into_response()
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the health endpoints on `0.0.0.0:<port>` until the listener fails.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state)).await
}
