//! Override scenarios: `spec.override`, profiles and components turned off
//! while features still need them.

use serde_json::json;

use datadog_operator::crd::ComponentName;
use datadog_operator::orchestrator::BuildOptions;
use datadog_operator::profiles::profiles_to_apply;
use datadog_operator::resources::common::PROFILE_LABEL;

use crate::fixtures::{DatadogAgentBuilder, node, profile};
use crate::{
    build, build_with, container, container_names, daemonset_template, deployment_template,
    env_value,
};

fn agent() -> DatadogAgentBuilder {
    DatadogAgentBuilder::new("datadog")
        .global("clusterAgentToken", json!("0123456789abcdef0123456789abcdef"))
}

#[test]
fn test_node_agent_override() {
    let dda = agent()
        .component_override(
            "nodeAgent",
            json!({
                "name": "custom-agent",
                "priorityClassName": "system-node-critical",
                "tolerations": [{"operator": "Exists"}],
                "labels": {"team": "platform"},
                "env": [{"name": "DD_FROM_OVERRIDE", "value": "yes"}],
                "containers": {
                    "agent": {"env": [{"name": "DD_LOG_LEVEL", "value": "debug"}]}
                }
            }),
        )
        .build();
    let state = build(&dda);

    let ds = &state.node_agents[0];
    assert_eq!(ds.metadata.name.as_deref(), Some("custom-agent"));
    let template = daemonset_template(ds);
    let spec = template.spec.as_ref().unwrap();
    assert_eq!(spec.priority_class_name.as_deref(), Some("system-node-critical"));
    assert_eq!(spec.tolerations.as_ref().unwrap().len(), 1);
    let labels = template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
    assert_eq!(labels["team"], "platform");

    let agent_container = container(template, "agent");
    assert_eq!(env_value(agent_container, "DD_FROM_OVERRIDE").as_deref(), Some("yes"));
    assert_eq!(env_value(agent_container, "DD_LOG_LEVEL").as_deref(), Some("debug"));
}

#[test]
fn test_cluster_agent_replicas_override() {
    let dda = agent()
        .component_override("clusterAgent", json!({"replicas": 3}))
        .build();
    let state = build(&dda);
    let dca = state.cluster_agent.as_ref().unwrap();
    assert_eq!(dca.spec.as_ref().unwrap().replicas, Some(3));
}

#[test]
fn test_disabled_cluster_agent_drops_runners() {
    let dda = agent()
        .feature(
            "clusterChecks",
            json!({"enabled": true, "useClusterChecksRunners": true}),
        )
        .component_override("clusterAgent", json!({"disabled": true}))
        .build();
    let state = build(&dda);

    assert!(state.cluster_agent.is_none());
    assert!(state.cluster_checks_runner.is_none());
    assert!(state.override_conflicts.contains(&ComponentName::ClusterAgent));
    assert!(!state.has_component(ComponentName::ClusterAgent));
    assert!(state.has_component(ComponentName::NodeAgent));
}

#[test]
fn test_disabled_node_agent() {
    let dda = agent()
        .component_override("nodeAgent", json!({"disabled": true}))
        .build();
    let state = build(&dda);
    assert!(state.node_agents.is_empty());
    assert!(state.cluster_agent.is_some());
}

#[test]
fn test_profiles_split_node_agents() {
    let dda = agent().feature("apm", json!({"enabled": true})).build();
    let profiles = [profile("gpu", "pool", "gpu", 100)];
    let nodes = [node("n1", &[("pool", "gpu")]), node("n2", &[("pool", "cpu")])];
    let resolution = profiles_to_apply(&profiles, &nodes);

    let options = BuildOptions {
        profiles: Some(resolution.applied.clone()),
        ..Default::default()
    };
    let state = build_with(&dda, &options);
    assert_eq!(state.node_agents.len(), 2);

    let profile_ds = &state.node_agents[0];
    assert_eq!(
        profile_ds.metadata.name.as_deref(),
        Some("datadog-agent-with-profile-datadog-gpu")
    );
    let profile_template = daemonset_template(profile_ds);
    let profile_spec = profile_template.spec.as_ref().unwrap();
    assert_eq!(profile_spec.priority_class_name.as_deref(), Some("gpu-priority"));
    assert_eq!(
        profile_template.metadata.as_ref().unwrap().labels.as_ref().unwrap()[PROFILE_LABEL],
        "gpu"
    );

    // features reach every profile
    for ds in &state.node_agents {
        assert!(container_names(daemonset_template(ds)).contains(&"trace-agent".to_string()));
    }

    let default_ds = &state.node_agents[1];
    assert_eq!(default_ds.metadata.name.as_deref(), Some("datadog-agent"));
    assert!(
        daemonset_template(default_ds)
            .spec
            .as_ref()
            .unwrap()
            .priority_class_name
            .is_none()
    );
}

#[test]
fn test_single_container_strategy_falls_back_when_privileged() {
    let dda = agent()
        .global("containerStrategy", json!("single"))
        .feature("npm", json!({"enabled": true}))
        .build();
    let state = build(&dda);
    let names = container_names(daemonset_template(&state.node_agents[0]));
    assert!(names.contains(&"agent".to_string()));
    assert!(names.contains(&"system-probe".to_string()));
    assert!(!names.contains(&"unprivileged-single-agent".to_string()));
}

#[test]
fn test_global_env_reaches_every_component() {
    let dda = agent()
        .global("env", json!([{"name": "DD_GLOBAL_FLAG", "value": "1"}]))
        .feature(
            "clusterChecks",
            json!({"enabled": true, "useClusterChecksRunners": true}),
        )
        .build();
    let state = build(&dda);

    let agent_container = container(daemonset_template(&state.node_agents[0]), "agent");
    assert_eq!(env_value(agent_container, "DD_GLOBAL_FLAG").as_deref(), Some("1"));
    let dca = container(
        deployment_template(state.cluster_agent.as_ref().unwrap()),
        "cluster-agent",
    );
    assert_eq!(env_value(dca, "DD_GLOBAL_FLAG").as_deref(), Some("1"));
    let runner = container(
        deployment_template(state.cluster_checks_runner.as_ref().unwrap()),
        "cluster-checks-runner",
    );
    assert_eq!(env_value(runner, "DD_GLOBAL_FLAG").as_deref(), Some("1"));
}
