//! Types shared by the DatadogAgent and DatadogAgentProfile resources.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A workload managed for a DatadogAgent.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum ComponentName {
    /// Node agent DaemonSet.
    #[serde(rename = "nodeAgent")]
    NodeAgent,
    /// Cluster agent Deployment.
    #[serde(rename = "clusterAgent")]
    ClusterAgent,
    /// Cluster checks runner Deployment.
    #[serde(rename = "clusterChecksRunner")]
    ClusterChecksRunner,
}

impl ComponentName {
    /// All components, in the order they are reconciled.
    pub const ALL: [ComponentName; 3] = [
        ComponentName::ClusterAgent,
        ComponentName::NodeAgent,
        ComponentName::ClusterChecksRunner,
    ];

    /// Name as it appears in the `override` map.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentName::NodeAgent => "nodeAgent",
            ComponentName::ClusterAgent => "clusterAgent",
            ComponentName::ClusterChecksRunner => "clusterChecksRunner",
        }
    }

    /// Suffix used to name the generated workload (`<dda>-<suffix>`).
    pub fn resource_suffix(&self) -> &'static str {
        match self {
            ComponentName::NodeAgent => "agent",
            ComponentName::ClusterAgent => "cluster-agent",
            ComponentName::ClusterChecksRunner => "cluster-checks-runner",
        }
    }
}

impl std::fmt::Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of container names the operator knows how to build.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum AgentContainerName {
    #[serde(rename = "agent")]
    CoreAgent,
    #[serde(rename = "trace-agent")]
    TraceAgent,
    #[serde(rename = "process-agent")]
    ProcessAgent,
    #[serde(rename = "security-agent")]
    SecurityAgent,
    #[serde(rename = "system-probe")]
    SystemProbe,
    #[serde(rename = "otel-agent")]
    OtelAgent,
    #[serde(rename = "unprivileged-single-agent")]
    UnprivilegedSingleAgent,
    #[serde(rename = "cluster-agent")]
    ClusterAgent,
    #[serde(rename = "cluster-checks-runner")]
    ClusterChecksRunner,
    #[serde(rename = "init-volume")]
    InitVolume,
    #[serde(rename = "init-config")]
    InitConfig,
    #[serde(rename = "seccomp-setup")]
    SeccompSetup,
}

impl AgentContainerName {
    /// Container name in the pod spec.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentContainerName::CoreAgent => "agent",
            AgentContainerName::TraceAgent => "trace-agent",
            AgentContainerName::ProcessAgent => "process-agent",
            AgentContainerName::SecurityAgent => "security-agent",
            AgentContainerName::SystemProbe => "system-probe",
            AgentContainerName::OtelAgent => "otel-agent",
            AgentContainerName::UnprivilegedSingleAgent => "unprivileged-single-agent",
            AgentContainerName::ClusterAgent => "cluster-agent",
            AgentContainerName::ClusterChecksRunner => "cluster-checks-runner",
            AgentContainerName::InitVolume => "init-volume",
            AgentContainerName::InitConfig => "init-config",
            AgentContainerName::SeccompSetup => "seccomp-setup",
        }
    }

    /// Whether this container runs agent code (and therefore takes the agent image).
    pub fn is_agent_container(&self) -> bool {
        !matches!(
            self,
            AgentContainerName::InitVolume
                | AgentContainerName::InitConfig
                | AgentContainerName::SeccompSetup
        )
    }

    /// Look up a container name from its pod-spec string.
    pub fn from_container_name(name: &str) -> Option<Self> {
        const ALL: [AgentContainerName; 12] = [
            AgentContainerName::CoreAgent,
            AgentContainerName::TraceAgent,
            AgentContainerName::ProcessAgent,
            AgentContainerName::SecurityAgent,
            AgentContainerName::SystemProbe,
            AgentContainerName::OtelAgent,
            AgentContainerName::UnprivilegedSingleAgent,
            AgentContainerName::ClusterAgent,
            AgentContainerName::ClusterChecksRunner,
            AgentContainerName::InitVolume,
            AgentContainerName::InitConfig,
            AgentContainerName::SeccompSetup,
        ];
        ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for AgentContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition describes the state of a resource at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Whether the condition status is "True".
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Condition types reported on a DatadogAgent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionType {
    /// Node agent workloads were reconciled.
    AgentReconcile,
    /// Cluster agent workload was reconciled.
    ClusterAgentReconcile,
    /// Cluster checks runner workload was reconciled.
    ClusterChecksRunnerReconcile,
    /// The last reconcile returned an error.
    DatadogAgentReconcileError,
    /// An override disabled a component that a feature requires.
    OverrideReconcileConflict,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::AgentReconcile => "AgentReconcile",
            ConditionType::ClusterAgentReconcile => "ClusterAgentReconcile",
            ConditionType::ClusterChecksRunnerReconcile => "ClusterChecksRunnerReconcile",
            ConditionType::DatadogAgentReconcileError => "DatadogAgentReconcileError",
            ConditionType::OverrideReconcileConflict => "OverrideReconcileConflict",
        }
    }

    /// Reconcile condition type for a component.
    pub fn for_component(component: ComponentName) -> Self {
        match component {
            ComponentName::NodeAgent => ConditionType::AgentReconcile,
            ComponentName::ClusterAgent => ConditionType::ClusterAgentReconcile,
            ComponentName::ClusterChecksRunner => ConditionType::ClusterChecksRunnerReconcile,
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_round_trips_through_pod_name() {
        for name in ["agent", "trace-agent", "system-probe", "cluster-agent"] {
            let parsed = AgentContainerName::from_container_name(name).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert!(AgentContainerName::from_container_name("sidecar").is_none());
    }

    #[test]
    fn test_container_name_serde_matches_pod_name() {
        let json = serde_json::to_string(&AgentContainerName::TraceAgent).unwrap();
        assert_eq!(json, "\"trace-agent\"");
    }

    #[test]
    fn test_component_name_serde() {
        let parsed: ComponentName = serde_json::from_str("\"clusterChecksRunner\"").unwrap();
        assert_eq!(parsed, ComponentName::ClusterChecksRunner);
        assert_eq!(ComponentName::NodeAgent.resource_suffix(), "agent");
    }

    #[test]
    fn test_init_containers_are_not_agent_containers() {
        assert!(!AgentContainerName::InitConfig.is_agent_container());
        assert!(AgentContainerName::CoreAgent.is_agent_container());
    }
}
