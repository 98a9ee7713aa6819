//! Feature scenarios: manifests with features enabled, run through the
//! whole build.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use serde_json::json;

use datadog_operator::crd::DatadogAgent;
use datadog_operator::credentials::Credentials;
use datadog_operator::feature::{checksum_annotation_key, ids};
use datadog_operator::hash::generate_md5_for_spec;
use datadog_operator::orchestrator::{BuildOptions, DesiredState};
use datadog_operator::resources::store::ObjectKind;

use crate::fixtures::{DatadogAgentBuilder, minimal_agent};
use crate::{
    annotation, build, build_with, container, container_names, daemonset_template,
    deployment_template, env_value, volume_names,
};

const TOKEN: &str = "0123456789abcdef0123456789abcdef";

fn agent() -> DatadogAgentBuilder {
    DatadogAgentBuilder::new("datadog").global("clusterAgentToken", json!(TOKEN))
}

#[test]
fn test_minimal_agent_layout() {
    let state = build(&minimal_agent());

    assert_eq!(state.node_agents.len(), 1);
    let template = daemonset_template(&state.node_agents[0]);
    assert!(container_names(template).contains(&"agent".to_string()));
    assert!(!container_names(template).contains(&"trace-agent".to_string()));

    let dca = state.cluster_agent.as_ref().unwrap();
    assert_eq!(dca.metadata.name.as_deref(), Some("datadog-cluster-agent"));
    assert!(state.cluster_checks_runner.is_none());

    let token = state
        .dependencies
        .get::<Secret>("datadog", "datadog-token")
        .unwrap();
    assert_eq!(
        token.data.as_ref().unwrap()["token"].0,
        TOKEN.as_bytes().to_vec()
    );
}

fn apm_agent(host_port: i32) -> DatadogAgent {
    agent()
        .feature(
            "apm",
            json!({
                "enabled": true,
                "hostPortConfig": {"enabled": true, "hostPort": host_port},
                "unixDomainSocketConfig": {
                    "enabled": true,
                    "path": "/var/run/datadog/apm.socket"
                }
            }),
        )
        .build()
}

#[test]
fn test_apm_host_port_and_socket() {
    let state = build(&apm_agent(8126));
    assert!(state.enabled_features.contains(&ids::APM));

    let template = daemonset_template(&state.node_agents[0]);
    let trace = container(template, "trace-agent");
    assert_eq!(env_value(trace, "DD_APM_ENABLED").as_deref(), Some("true"));
    assert_eq!(
        env_value(trace, "DD_APM_NON_LOCAL_TRAFFIC").as_deref(),
        Some("true")
    );
    assert_eq!(env_value(trace, "DD_APM_RECEIVER_PORT").as_deref(), Some("8126"));
    assert_eq!(
        env_value(trace, "DD_APM_RECEIVER_SOCKET").as_deref(),
        Some("/var/run/datadog/apm.socket")
    );

    let ports = trace.ports.as_ref().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].container_port, 8126);
    assert_eq!(ports[0].host_port, Some(8126));
    assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

    let socket_mounts: Vec<_> = trace
        .volume_mounts
        .iter()
        .flatten()
        .filter(|m| m.name == "apmsocket")
        .collect();
    assert_eq!(socket_mounts.len(), 1);
    assert_eq!(socket_mounts[0].mount_path, "/var/run/datadog");
    assert!(volume_names(template).contains(&"apmsocket".to_string()));
}

#[test]
fn test_apm_custom_host_port() {
    let state = build(&apm_agent(9126));
    let trace = container(daemonset_template(&state.node_agents[0]), "trace-agent");

    let port = &trace.ports.as_ref().unwrap()[0];
    assert_eq!(port.host_port, Some(9126));
    assert_eq!(port.container_port, 8126);
    // without host networking the agent keeps listening on its own port
    assert_eq!(env_value(trace, "DD_APM_RECEIVER_PORT").as_deref(), Some("8126"));
}

#[test]
fn test_apm_disabled_has_no_trace_agent() {
    let dda = agent().feature("apm", json!({"enabled": false})).build();
    let state = build(&dda);
    assert!(!state.enabled_features.contains(&ids::APM));
    let template = daemonset_template(&state.node_agents[0]);
    assert!(!container_names(template).contains(&"trace-agent".to_string()));
}

#[test]
fn test_cluster_checks_runners_toggle() {
    let with_runners = agent()
        .feature(
            "clusterChecks",
            json!({"enabled": true, "useClusterChecksRunners": true}),
        )
        .build();
    let state = build(&with_runners);
    let runner = state.cluster_checks_runner.as_ref().unwrap();
    assert_eq!(
        runner.metadata.name.as_deref(),
        Some("datadog-cluster-checks-runner")
    );
    let runner_container = container(deployment_template(runner), "cluster-checks-runner");
    assert_eq!(
        env_value(runner_container, "DD_EXTRA_CONFIG_PROVIDERS").as_deref(),
        Some("clusterchecks")
    );
    assert_eq!(
        env_value(runner_container, "DD_CLUSTER_CHECKS_ENABLED").as_deref(),
        Some("true")
    );
    assert!(state.required_components.cluster_checks_runner.is_enabled());
    let agent_container = container(daemonset_template(&state.node_agents[0]), "agent");
    assert_eq!(
        env_value(agent_container, "DD_EXTRA_CONFIG_PROVIDERS").as_deref(),
        Some("endpointschecks")
    );

    let without_runners = agent()
        .feature(
            "clusterChecks",
            json!({"enabled": true, "useClusterChecksRunners": false}),
        )
        .build();
    let state = build(&without_runners);
    assert!(state.cluster_checks_runner.is_none());
    let agent_container = container(daemonset_template(&state.node_agents[0]), "agent");
    assert_eq!(
        env_value(agent_container, "DD_EXTRA_CONFIG_PROVIDERS").as_deref(),
        Some("clusterchecks endpointschecks")
    );
}

#[test]
fn test_cluster_checks_checksum_tracks_section() {
    let key = checksum_annotation_key(ids::CLUSTER_CHECKS);
    let checksum = |section: serde_json::Value| {
        let state = build(&agent().feature("clusterChecks", section).build());
        annotation(
            deployment_template(state.cluster_agent.as_ref().unwrap()),
            &key,
        )
    };

    let on = checksum(json!({"enabled": true})).unwrap();
    let off = checksum(json!({"enabled": false})).unwrap();
    assert_ne!(on, off);
    assert_eq!(checksum(json!({"enabled": true})).unwrap(), on);

    let state = build(&agent().build());
    assert!(
        annotation(
            deployment_template(state.cluster_agent.as_ref().unwrap()),
            &key
        )
        .is_none()
    );
}

#[test]
fn test_orchestrator_explorer_merges_remote_custom_resources() {
    let dda = agent()
        .feature("remoteConfiguration", json!({"enabled": true}))
        .feature(
            "orchestratorExplorer",
            json!({
                "enabled": true,
                "customResources": ["apps.example.com/v1/widgets"]
            }),
        )
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
    let state = build(&dda);
    assert!(state.enabled_features.contains(&ids::ORCHESTRATOR_EXPLORER));

    let config = state
        .dependencies
        .get::<ConfigMap>("datadog", "datadog-orchestrator-explorer-config")
        .unwrap();
    let data = config.data.as_ref().unwrap().values().next().unwrap();
    assert!(data.contains("apps.example.com/v1/widgets"));
    assert!(data.contains("datadoghq.com/v1alpha1/datadogmetrics"));

    let dca = deployment_template(state.cluster_agent.as_ref().unwrap());
    assert!(annotation(dca, &checksum_annotation_key(ids::ORCHESTRATOR_EXPLORER)).is_some());
}

#[test]
fn test_orchestrator_explorer_reads_user_config_map() {
    let dda = agent()
        .feature("remoteConfiguration", json!({"enabled": true}))
        .feature(
            "orchestratorExplorer",
            json!({
                "enabled": true,
                "conf": {"configMap": {"name": "my-orchestrator-config"}},
                "customResources": ["apps.example.com/v1/widgets"]
            }),
        )
        .build();
    let user: ConfigMap = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "my-orchestrator-config", "namespace": "datadog"},
        "data": {"orchestrator.yaml": "instances:\n  - collectors: [nodes]\n"}
    }))
    .unwrap();
    let options = BuildOptions {
        existing_config_maps: vec![user],
        ..Default::default()
    };
    let state = build_with(&dda, &options);

    // the merged copy takes the default name
    let merged = state
        .dependencies
        .get::<ConfigMap>("datadog", "datadog-orchestrator-explorer-config")
        .unwrap();
    assert!(
        state
            .dependencies
            .get::<ConfigMap>("datadog", "my-orchestrator-config")
            .is_none()
    );
    let data = merged.data.as_ref().unwrap().values().next().unwrap();
    assert!(data.contains("nodes"));
    assert!(data.contains("apps.example.com/v1/widgets"));
}

#[test]
fn test_fallback_credentials_fill_the_secret() {
    let options = BuildOptions {
        fallback_credentials: Some(Credentials {
            api_key: "operator-api-key".into(),
            app_key: String::new(),
        }),
        ..Default::default()
    };
    let state = build_with(&agent().build(), &options);
    let secret = state
        .dependencies
        .get::<Secret>("datadog", "datadog-secret")
        .unwrap();
    let data = secret.data.as_ref().unwrap();
    assert_eq!(data["api_key"].0, b"operator-api-key".to_vec());
    assert!(!data.contains_key("app_key"));
}

#[test]
fn test_explicit_credentials_win_over_fallback() {
    let dda = agent()
        .global("credentials", json!({"apiKey": "from-manifest"}))
        .build();
    let options = BuildOptions {
        fallback_credentials: Some(Credentials {
            api_key: "operator-api-key".into(),
            app_key: "operator-app-key".into(),
        }),
        ..Default::default()
    };
    let state = build_with(&dda, &options);
    let secret = state
        .dependencies
        .get::<Secret>("datadog", "datadog-secret")
        .unwrap();
    let data = secret.data.as_ref().unwrap();
    assert_eq!(data["api_key"].0, b"from-manifest".to_vec());
    assert!(!data.contains_key("app_key"));
}

#[test]
fn test_cilium_policies_need_cluster_support() {
    let dda = agent()
        .global("networkPolicy", json!({"create": true, "flavor": "cilium"}))
        .feature("clusterChecks", json!({"enabled": true}))
        .build();
    let has_cilium = |supports_cilium: bool| {
        let options = BuildOptions {
            supports_cilium,
            ..Default::default()
        };
        build_with(&dda, &options)
            .dependencies
            .keys()
            .any(|k| k.kind == ObjectKind::CiliumNetworkPolicy)
    };
    assert!(has_cilium(true));
    assert!(!has_cilium(false));
}

fn every_feature_agent() -> DatadogAgent {
    agent()
        .feature(
            "apm",
            json!({"enabled": true, "unixDomainSocketConfig": {"enabled": true}}),
        )
        .feature("logCollection", json!({"enabled": true, "containerCollectAll": true}))
        .feature("liveProcessCollection", json!({"enabled": true}))
        .feature("npm", json!({"enabled": true}))
        .feature("usm", json!({"enabled": true}))
        .feature("cspm", json!({"enabled": true}))
        .feature("cws", json!({"enabled": true}))
        .feature("oomKill", json!({"enabled": true}))
        .feature("tcpQueueLength", json!({"enabled": true}))
        .feature("ebpfCheck", json!({"enabled": true}))
        .feature("otlp", json!({"receiver": {"protocols": {"grpc": {"enabled": true}}}}))
        .feature("clusterChecks", json!({"enabled": true, "useClusterChecksRunners": true}))
        .feature("kubeStateMetricsCore", json!({"enabled": true}))
        .feature("orchestratorExplorer", json!({"enabled": true}))
        .feature("helmCheck", json!({"enabled": true}))
        .feature("prometheusScrape", json!({"enabled": true}))
        .feature("externalMetricsServer", json!({"enabled": true}))
        .feature("admissionController", json!({"enabled": true}))
        .feature("sbom", json!({"enabled": true}))
        .feature("serviceDiscovery", json!({"enabled": true}))
        .feature("gpu", json!({"enabled": true, "privilegedMode": true}))
        .feature(
            "autoscaling",
            json!({"workload": {"enabled": true}, "cluster": {"enabled": true}}),
        )
        .build()
}

#[test]
fn test_every_feature_enabled_builds() {
    let state = build(&every_feature_agent());

    let template = daemonset_template(&state.node_agents[0]);
    let names = container_names(template);
    for expected in ["agent", "trace-agent", "system-probe", "security-agent"] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }
    assert!(state.cluster_checks_runner.is_some());
    assert!(state.required_components.agent.is_privileged());
    assert!(state.enabled_features.len() > 15);
    for id in [ids::SERVICE_DISCOVERY, ids::GPU, ids::AUTOSCALING] {
        assert!(state.enabled_features.contains(&id), "missing {id}");
    }
    assert_eq!(
        template.spec.as_ref().unwrap().runtime_class_name.as_deref(),
        Some("nvidia")
    );
    let dca = deployment_template(state.cluster_agent.as_ref().unwrap());
    assert_eq!(
        env_value(container(dca, "cluster-agent"), "DD_AUTOSCALING_WORKLOAD_ENABLED").as_deref(),
        Some("true")
    );
}

#[test]
fn test_rebuild_is_identical() {
    let dda = every_feature_agent();
    let first = build(&dda);
    let second = build(&dda);

    assert_eq!(first.enabled_features, second.enabled_features);
    assert_eq!(first.node_agents, second.node_agents);
    assert_eq!(first.cluster_agent, second.cluster_agent);
    assert_eq!(first.cluster_checks_runner, second.cluster_checks_runner);

    let key = checksum_annotation_key(ids::CLUSTER_CHECKS);
    let checksum = |state: &DesiredState| {
        annotation(deployment_template(state.cluster_agent.as_ref().unwrap()), &key)
    };
    assert!(checksum(&first).is_some());
    assert_eq!(checksum(&first), checksum(&second));

    let objects = |state: &DesiredState| {
        state
            .dependencies
            .objects()
            .map(|o| o.to_json().unwrap())
            .collect::<Vec<_>>()
    };
    let first_objects = objects(&first);
    assert!(first_objects.len() > 10);
    assert_eq!(first_objects, objects(&second));

    let hashes = |state: &DesiredState| {
        let mut hashes: Vec<String> = state
            .node_agents
            .iter()
            .map(|ds| generate_md5_for_spec(ds).unwrap())
            .collect();
        hashes.push(generate_md5_for_spec(&state.cluster_agent).unwrap());
        hashes.push(generate_md5_for_spec(&state.cluster_checks_runner).unwrap());
        hashes
    };
    assert_eq!(hashes(&first), hashes(&second));
}

#[test]
fn test_otel_collector_runs_next_to_the_agent() {
    let dda = agent()
        .feature(
            "otelCollector",
            json!({"enabled": true, "ports": [{"name": "otel-grpc", "containerPort": 4444}]}),
        )
        .build();
    let state = build(&dda);
    assert!(state.enabled_features.contains(&ids::OTEL_COLLECTOR));

    let template = daemonset_template(&state.node_agents[0]);
    let otel = container(template, "otel-agent");
    assert!(
        otel.args
            .as_ref()
            .unwrap()
            .contains(&"--config=/etc/datadog-agent/otel-config.yaml".to_string())
    );
    assert_eq!(otel.ports.as_ref().unwrap()[0].host_port, Some(4444));
    assert_eq!(
        env_value(container(template, "agent"), "DD_OTELCOLLECTOR_ENABLED").as_deref(),
        Some("true")
    );

    let key = checksum_annotation_key(ids::OTEL_COLLECTOR);
    let checksum = annotation(template, &key).unwrap();
    let cm = state
        .dependencies
        .get::<ConfigMap>("datadog", "datadog-otel-agent-config")
        .unwrap();
    assert_eq!(cm.metadata.annotations.as_ref().unwrap()[&key], checksum);
    assert!(cm.data.as_ref().unwrap()["otel-config.yaml"].contains("0.0.0.0:4444"));
}
