//! Test fixtures and builder patterns for DatadogAgent and friends.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde_json::{Value, json};

use datadog_operator::crd::{DatadogAgent, DatadogAgentProfile};

/// Builder for creating DatadogAgent test fixtures.
///
/// Sections are given as JSON, in the same shape as the manifest.
///
/// # Example
/// ```
/// let dda = DatadogAgentBuilder::new("datadog")
///     .namespace("monitoring")
///     .feature("apm", json!({"enabled": true}))
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct DatadogAgentBuilder {
    name: String,
    namespace: String,
    features: serde_json::Map<String, Value>,
    global: serde_json::Map<String, Value>,
    overrides: serde_json::Map<String, Value>,
    status: Option<Value>,
}

impl DatadogAgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "datadog".to_string(),
            features: serde_json::Map::new(),
            global: serde_json::Map::new(),
            overrides: serde_json::Map::new(),
            status: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set a feature section, e.g. `feature("apm", json!({"enabled": true}))`.
    pub fn feature(mut self, name: &str, section: Value) -> Self {
        self.features.insert(name.to_string(), section);
        self
    }

    /// Set a `global` field.
    pub fn global(mut self, field: &str, value: Value) -> Self {
        self.global.insert(field.to_string(), value);
        self
    }

    /// Set the override of a component (`nodeAgent`, `clusterAgent`, ...).
    pub fn component_override(mut self, component: &str, value: Value) -> Self {
        self.overrides.insert(component.to_string(), value);
        self
    }

    pub fn status(mut self, status: Value) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> DatadogAgent {
        let mut object = json!({
            "apiVersion": "datadoghq.com/v2alpha1",
            "kind": "DatadogAgent",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "uid": format!("test-uid-{}", self.name),
                "generation": 1,
            },
            "spec": {
                "features": self.features,
                "global": self.global,
                "override": self.overrides,
            },
        });
        if let Some(status) = self.status {
            object["status"] = status;
        }
        serde_json::from_value(object).expect("valid DatadogAgent fixture")
    }
}

/// A DatadogAgent with no feature section set.
pub fn minimal_agent() -> DatadogAgent {
    DatadogAgentBuilder::new("datadog")
        .global("clusterAgentToken", json!("0123456789abcdef0123456789abcdef"))
        .build()
}

/// A DatadogAgentProfile overriding the node agent on nodes labelled
/// `key=value`. `created` orders profiles (seconds since the epoch).
pub fn profile(name: &str, key: &str, value: &str, created: i64) -> DatadogAgentProfile {
    let mut profile: DatadogAgentProfile = serde_json::from_value(json!({
        "apiVersion": "datadoghq.com/v1alpha1",
        "kind": "DatadogAgentProfile",
        "metadata": {"name": name, "namespace": "datadog", "generation": 1},
        "spec": {
            "profileAffinity": {
                "profileNodeAffinity": [
                    {"key": key, "operator": "In", "values": [value]}
                ]
            },
            "config": {
                "override": {
                    "nodeAgent": {"priorityClassName": format!("{name}-priority")}
                }
            }
        }
    }))
    .expect("valid DatadogAgentProfile fixture");
    profile.metadata.creation_timestamp = Some(Time(
        jiff::Timestamp::from_second(created).expect("valid timestamp"),
    ));
    profile
}

pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}
