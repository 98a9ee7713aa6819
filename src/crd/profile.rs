//! DatadogAgentProfile Custom Resource Definition.
//!
//! A profile selects a subset of nodes and gives the node agents running
//! there a different configuration. Each applied profile becomes its own
//! node agent DaemonSet.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ComponentName, Condition};
use super::datadog_agent::DatadogAgentComponentOverride;

/// Example:
/// ```yaml
/// apiVersion: datadoghq.com/v1alpha1
/// kind: DatadogAgentProfile
/// metadata:
///   name: gpu-nodes
/// spec:
///   profileAffinity:
///     profileNodeAffinity:
///       - key: node.kubernetes.io/instance-type
///         operator: In
///         values: ["p3.2xlarge"]
///   config:
///     override:
///       nodeAgent:
///         priorityClassName: high
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datadoghq.com",
    version = "v1alpha1",
    kind = "DatadogAgentProfile",
    plural = "datadogagentprofiles",
    shortname = "dap",
    status = "DatadogAgentProfileStatus",
    namespaced,
    printcolumn = r#"{"name":"Valid", "type":"string", "jsonPath":".status.valid"}"#,
    printcolumn = r#"{"name":"Applied", "type":"string", "jsonPath":".status.applied"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentProfileSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_affinity: Option<ProfileAffinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ProfileConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAffinity {
    #[serde(default)]
    pub profile_node_affinity: Vec<NodeSelectorRequirement>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    /// Only the `nodeAgent` entry is supported.
    #[serde(default, rename = "override")]
    pub overrides: BTreeMap<ComponentName, DatadogAgentComponentOverride>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentProfileStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// `True` when the profile passed validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<String>,
    /// `True` when the profile was applied to at least one node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}
