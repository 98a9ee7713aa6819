// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

//! Unit tests for datadog-operator.
//!
//! These tests run without a Kubernetes cluster and exercise the public
//! API of individual components in isolation.

#[path = "../common/fixtures.rs"]
#[allow(dead_code)]
mod fixtures;

mod crd_tests {
    use super::fixtures::DatadogAgentBuilder;
    use datadog_operator::crd::{ComponentName, Condition, ConditionType};
    use serde_json::json;

    #[test]
    fn test_component_display() {
        assert_eq!(ComponentName::NodeAgent.to_string(), "nodeAgent");
        assert_eq!(ComponentName::ClusterAgent.to_string(), "clusterAgent");
        assert_eq!(
            ComponentName::ClusterChecksRunner.to_string(),
            "clusterChecksRunner"
        );
    }

    #[test]
    fn test_condition_for_component() {
        assert_eq!(
            ConditionType::for_component(ComponentName::NodeAgent),
            ConditionType::AgentReconcile
        );
        assert_eq!(
            ConditionType::for_component(ComponentName::ClusterChecksRunner).as_str(),
            "ClusterChecksRunnerReconcile"
        );
    }

    #[test]
    fn test_condition_status_strings() {
        let ok = Condition::new("AgentReconcile", true, "Reconciled", "", Some(4));
        assert_eq!(ok.status, "True");
        assert!(ok.is_true());
        assert_eq!(ok.observed_generation, Some(4));
        let failed = Condition::new("AgentReconcile", false, "Failed", "boom", None);
        assert_eq!(failed.status, "False");
        assert!(!failed.is_true());
    }

    #[test]
    fn test_override_map_is_read_from_manifest() {
        let dda = DatadogAgentBuilder::new("datadog")
            .component_override("clusterAgent", json!({"disabled": true, "replicas": 2}))
            .build();
        assert!(dda.is_component_disabled(ComponentName::ClusterAgent));
        assert!(!dda.is_component_disabled(ComponentName::NodeAgent));
        assert_eq!(
            dda.component_override(ComponentName::ClusterAgent)
                .and_then(|o| o.replicas),
            Some(2)
        );

        let round_trip = serde_json::to_value(&dda.spec).unwrap();
        assert_eq!(round_trip["override"]["clusterAgent"]["disabled"], true);
    }

    #[test]
    fn test_network_policy_flavor() {
        let dda = DatadogAgentBuilder::new("datadog")
            .global("networkPolicy", json!({"create": true, "flavor": "cilium"}))
            .build();
        assert!(dda.creates_network_policies());
        assert!(dda.uses_cilium());
        assert!(!DatadogAgentBuilder::new("d").build().creates_network_policies());
    }

    #[test]
    fn test_remote_config_custom_resources() {
        let dda = DatadogAgentBuilder::new("datadog")
            .status(json!({
                "remoteConfigConfiguration": {
                    "features": {
                        "orchestratorExplorer": {
                            "customResources": ["datadoghq.com/v1alpha1/datadogmetrics"]
                        }
                    }
                }
            }))
            .build();
        assert_eq!(
            dda.remote_config_custom_resources(),
            ["datadoghq.com/v1alpha1/datadogmetrics"]
        );
    }
}

mod registry_tests {
    use datadog_operator::feature::{Feature, FeatureRegistry, ids};

    #[test]
    fn test_builtin_registry_holds_every_feature() {
        let registry = FeatureRegistry::builtin();
        assert_eq!(registry.len(), 29);
        assert_eq!(registry.ids().next(), Some(ids::ENABLE_DEFAULT));
        for id in [ids::APM, ids::CWS, ids::OTLP, ids::HELM_CHECK, ids::SBOM, ids::GPU] {
            assert!(registry.get(id).is_some(), "missing {id}");
        }
    }

    #[test]
    fn test_instantiate_is_fresh_each_time() {
        let registry = FeatureRegistry::builtin();
        let first = registry.instantiate();
        let second = registry.instantiate();
        assert_eq!(first.len(), second.len());
        let ids: Vec<_> = first.iter().map(|f| f.id()).collect();
        assert_eq!(ids, registry.ids().collect::<Vec<_>>());
    }
}

mod hash_tests {
    use std::collections::BTreeMap;

    use datadog_operator::hash::{generate_md5_for_spec, is_up_to_date};
    use datadog_operator::resources::common::MD5_ANNOTATION;

    #[test]
    fn test_up_to_date_compares_annotation() {
        let hash = generate_md5_for_spec(&serde_json::json!({"a": 1})).unwrap();
        let annotations = BTreeMap::from([(MD5_ANNOTATION.to_string(), hash.clone())]);
        assert!(is_up_to_date(Some(&annotations), &hash));
        assert!(!is_up_to_date(Some(&annotations), "other"));
        assert!(!is_up_to_date(None, &hash));
    }
}

mod profile_tests {
    use super::fixtures::{node, profile};
    use datadog_operator::profiles::{CONFLICT_REASON, profiles_to_apply};
    use datadog_operator::resources::common::PROFILE_LABEL;

    #[test]
    fn test_older_profile_wins_a_node() {
        let profiles = [
            profile("newer", "pool", "gpu", 200),
            profile("older", "pool", "gpu", 100),
        ];
        let nodes = [node("n1", &[("pool", "gpu")]), node("n2", &[("pool", "cpu")])];

        let resolution = profiles_to_apply(&profiles, &nodes);
        let applied: Vec<_> = resolution.applied.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(applied, vec!["older", "default"]);
        assert_eq!(resolution.profile_by_node.get("n1").map(String::as_str), Some("older"));
        assert!(!resolution.profile_by_node.contains_key("n2"));

        let newer = resolution
            .statuses
            .iter()
            .find(|s| s.name == "newer")
            .unwrap();
        assert_eq!(newer.status.applied.as_deref(), Some("False"));
        assert!(newer.status.conditions.iter().any(|c| c.reason == CONFLICT_REASON));
    }

    #[test]
    fn test_node_labels_follow_profiles() {
        let profiles = [profile("gpu", "pool", "gpu", 100)];
        let nodes = [
            node("n1", &[("pool", "gpu")]),
            node("n2", &[("pool", "cpu"), (PROFILE_LABEL, "gpu")]),
            node("n3", &[("pool", "gpu"), (PROFILE_LABEL, "gpu")]),
        ];
        let resolution = profiles_to_apply(&profiles, &nodes);
        assert_eq!(
            resolution.node_labels(&nodes),
            vec![
                ("n1".to_string(), Some("gpu".to_string())),
                ("n2".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_invalid_profile_is_reported() {
        let mut invalid = profile("broken", "pool", "gpu", 100);
        invalid.spec.config = None;
        let resolution = profiles_to_apply(&[invalid], &[node("n1", &[("pool", "gpu")])]);
        assert_eq!(resolution.applied.len(), 1);
        assert_eq!(resolution.statuses[0].status.valid.as_deref(), Some("False"));
        assert!(resolution.profile_by_node.is_empty());
    }
}
