//! Common naming, label and ownership helpers.
//!
//! Every object generated for a DatadogAgent carries the same set of
//! standard labels and, when namespaced, an owner reference back to the
//! DatadogAgent so Kubernetes garbage collects it.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{ComponentName, DatadogAgent};

pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const COMPONENT_LABEL: &str = "agent.datadoghq.com/component";
pub const MANAGED_BY_STORE_LABEL: &str = "operator.datadoghq.com/managed-by-store";
pub const PROFILE_LABEL: &str = "agent.datadoghq.com/datadogagentprofile";
pub const MD5_ANNOTATION: &str = "agent.datadoghq.com/md5";
pub const OPERATOR_NAME: &str = "datadog-operator";
/// Leader election ConfigMap used by cluster agents older than 7.37.
pub const LEGACY_LEADER_ELECTION_RESOURCE_NAME: &str = "datadog-leader-election";
pub const CLUSTER_ID_RESOURCE_NAME: &str = "datadog-cluster-id";

/// Value of the part-of label: `<namespace>-<name>`.
pub fn part_of(dda: &DatadogAgent) -> String {
    format!("{}-{}", dda.namespace().unwrap_or_default(), dda.name_any())
}

/// Labels applied to every object generated for a DatadogAgent.
pub fn standard_labels(dda: &DatadogAgent) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), dda.name_any());
    labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
    labels.insert(PART_OF_LABEL.to_string(), part_of(dda));
    labels
}

/// Standard labels plus the component identity.
pub fn component_labels(dda: &DatadogAgent, component: ComponentName) -> BTreeMap<String, String> {
    let mut labels = standard_labels(dda);
    labels.insert(
        INSTANCE_LABEL.to_string(),
        component.resource_suffix().to_string(),
    );
    labels.insert(
        COMPONENT_LABEL.to_string(),
        component.resource_suffix().to_string(),
    );
    labels
}

/// Labels selecting the pods of a component.
pub fn pod_selector_labels(
    dda: &DatadogAgent,
    component: ComponentName,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        INSTANCE_LABEL.to_string(),
        component.resource_suffix().to_string(),
    );
    labels.insert(PART_OF_LABEL.to_string(), part_of(dda));
    labels
}

pub fn pod_selector(dda: &DatadogAgent, component: ComponentName) -> LabelSelector {
    LabelSelector {
        match_labels: Some(pod_selector_labels(dda, component)),
        ..Default::default()
    }
}

/// Create owner reference for a DatadogAgent.
pub fn owner_reference(dda: &DatadogAgent) -> OwnerReference {
    OwnerReference {
        api_version: DatadogAgent::api_version(&()).to_string(),
        kind: DatadogAgent::kind(&()).to_string(),
        name: dda.name_any(),
        uid: dda.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Workload name of a component, honouring `override.<component>.name`.
pub fn component_resource_name(dda: &DatadogAgent, component: ComponentName) -> String {
    dda.component_override(component)
        .and_then(|o| o.name.clone())
        .unwrap_or_else(|| default_component_name(dda, component))
}

/// `<dda>-<suffix>`, ignoring overrides.
pub fn default_component_name(dda: &DatadogAgent, component: ComponentName) -> String {
    format!("{}-{}", dda.name_any(), component.resource_suffix())
}

/// Service account used by a component's pods.
pub fn service_account_name(dda: &DatadogAgent, component: ComponentName) -> String {
    dda.component_override(component)
        .and_then(|o| o.service_account_name.clone())
        .unwrap_or_else(|| default_component_name(dda, component))
}

/// Name of the Role/ClusterRole (and binding) owned by a component.
pub fn rbac_resource_name(dda: &DatadogAgent, component: ComponentName) -> String {
    default_component_name(dda, component)
}

/// Whether the operator should create RBAC for a component.
pub fn should_create_rbac(dda: &DatadogAgent, component: ComponentName) -> bool {
    dda.component_override(component)
        .and_then(|o| o.create_rbac)
        .unwrap_or(true)
}

pub fn cluster_agent_service_name(dda: &DatadogAgent) -> String {
    default_component_name(dda, ComponentName::ClusterAgent)
}

/// Name of the node-local agent Service.
pub fn agent_local_service_name(dda: &DatadogAgent) -> String {
    dda.spec
        .global
        .local_service
        .as_ref()
        .and_then(|ls| ls.name_override.clone())
        .unwrap_or_else(|| default_component_name(dda, ComponentName::NodeAgent))
}

/// Secret holding the API and application keys given inline.
pub fn credentials_secret_name(dda: &DatadogAgent) -> String {
    format!("{}-secret", dda.name_any())
}

/// Secret holding the cluster agent auth token.
pub fn token_secret_name(dda: &DatadogAgent) -> String {
    format!("{}-token", dda.name_any())
}

/// ConfigMap and Lease the cluster agents use for leader election.
pub fn leader_election_resource_name(dda: &DatadogAgent) -> String {
    format!("{}-leader-election", dda.name_any())
}

/// ConfigMap the node agents read the install method from.
pub fn install_info_config_map_name(dda: &DatadogAgent) -> String {
    format!("{}-install-info", dda.name_any())
}

/// Name of the network policy a feature creates for a component.
pub fn network_policy_name(dda: &DatadogAgent, component: ComponentName, feature: &str) -> String {
    format!(
        "{}-{}",
        default_component_name(dda, component),
        feature.replace('_', "-")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::{DatadogAgentComponentOverride, DatadogAgentSpec};

    pub(crate) fn test_dda(name: &str) -> DatadogAgent {
        let mut dda = DatadogAgent::new(name, DatadogAgentSpec::default());
        dda.metadata.namespace = Some("datadog".to_string());
        dda.metadata.uid = Some("0000-1111".to_string());
        dda
    }

    #[test]
    fn test_standard_labels() {
        let labels = standard_labels(&test_dda("dd"));
        assert_eq!(labels.get(PART_OF_LABEL).unwrap(), "datadog-dd");
        assert_eq!(labels.get(MANAGED_BY_LABEL).unwrap(), OPERATOR_NAME);
    }

    #[test]
    fn test_owner_reference() {
        let owner = owner_reference(&test_dda("dd"));
        assert_eq!(owner.kind, "DatadogAgent");
        assert_eq!(owner.api_version, "datadoghq.com/v2alpha1");
        assert_eq!(owner.uid, "0000-1111");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_component_name_honours_override() {
        let mut dda = test_dda("dd");
        assert_eq!(
            component_resource_name(&dda, ComponentName::ClusterAgent),
            "dd-cluster-agent"
        );
        dda.spec.overrides.insert(
            ComponentName::ClusterAgent,
            DatadogAgentComponentOverride {
                name: Some("dca".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(component_resource_name(&dda, ComponentName::ClusterAgent), "dca");
    }

    #[test]
    fn test_network_policy_name() {
        assert_eq!(
            network_policy_name(&test_dda("dd"), ComponentName::NodeAgent, "cluster_checks"),
            "dd-agent-cluster-checks"
        );
    }
}
