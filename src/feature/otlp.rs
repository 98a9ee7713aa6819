//! OTLP ingestion in the core agent.
//!
//! Each enabled protocol gets its endpoint env var, a container port
//! (exposed on the host unless disabled) and a port on the node-local
//! Service. Traces received over OTLP are handed to the trace agent, which
//! needs the endpoints too when APM is on.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ContainerPort;
use kube::ResourceExt;
use regex::Regex;

use super::shared;
use super::{Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent, OtlpEndpointConfig};
use crate::merger::env::env_var;
use crate::merger::port::container_port;
use crate::merger::service::service_port;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{agent_local_service_name, pod_selector_labels};

pub const DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_GRPC_ENDPOINT: &str =
    "DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_GRPC_ENDPOINT";
pub const DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_HTTP_ENDPOINT: &str =
    "DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_HTTP_ENDPOINT";

pub const DEFAULT_GRPC_ENDPOINT: &str = "0.0.0.0:4317";
pub const DEFAULT_HTTP_ENDPOINT: &str = "0.0.0.0:4318";
pub const GRPC_PORT_NAME: &str = "otlpgrpcport";
pub const HTTP_PORT_NAME: &str = "otlphttpport";

/// One OTLP protocol receiver.
#[derive(Clone, Debug, PartialEq)]
struct Receiver {
    port_name: &'static str,
    env_name: &'static str,
    endpoint: String,
    host_port: bool,
    /// Host port when it differs from the endpoint port.
    host_port_override: Option<i32>,
}

impl Receiver {
    fn from_config(
        config: Option<&OtlpEndpointConfig>,
        port_name: &'static str,
        env_name: &'static str,
        default_endpoint: &str,
    ) -> Option<Self> {
        let config = config.filter(|c| c.enabled.unwrap_or(false))?;
        let host_port_config = config.host_port_config.as_ref();
        Some(Self {
            port_name,
            env_name,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint.to_string()),
            host_port: host_port_config.and_then(|h| h.enabled).unwrap_or(true),
            host_port_override: host_port_config.and_then(|h| h.port),
        })
    }

    fn port(&self) -> Result<i32> {
        extract_port(&self.endpoint)
    }

    fn container_port(&self) -> Result<ContainerPort> {
        let port = self.port()?;
        let mut container_port = container_port(self.port_name, port, "TCP");
        if self.host_port {
            container_port.host_port = Some(self.host_port_override.unwrap_or(port));
        }
        Ok(container_port)
    }
}

#[derive(Debug, Default)]
pub struct OtlpFeature {
    grpc: Option<Receiver>,
    http: Option<Receiver>,
    using_apm: bool,
    namespace: String,
    local_service: String,
    local_service_selector: BTreeMap<String, String>,
}

impl Feature for OtlpFeature {
    fn id(&self) -> FeatureId {
        ids::OTLP
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(otlp) = dda.spec.features.otlp.as_ref() else {
            return RequiredComponents::default();
        };
        let protocols = &otlp.receiver.protocols;
        self.grpc = Receiver::from_config(
            protocols.grpc.as_ref(),
            GRPC_PORT_NAME,
            DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_GRPC_ENDPOINT,
            DEFAULT_GRPC_ENDPOINT,
        );
        self.http = Receiver::from_config(
            protocols.http.as_ref(),
            HTTP_PORT_NAME,
            DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_HTTP_ENDPOINT,
            DEFAULT_HTTP_ENDPOINT,
        );
        if self.grpc.is_none() && self.http.is_none() {
            return RequiredComponents::default();
        }

        self.using_apm = shared::apm_enabled(dda);
        self.namespace = dda.namespace().unwrap_or_default();
        self.local_service = agent_local_service_name(dda);
        self.local_service_selector = pod_selector_labels(dda, ComponentName::NodeAgent);

        let mut containers = vec![AgentContainerName::CoreAgent];
        if self.using_apm {
            containers.push(AgentContainerName::TraceAgent);
        }
        RequiredComponents {
            agent: RequiredComponent::with_containers(&containers),
            ..Default::default()
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        for receiver in self.receivers() {
            let port = receiver.port()?;
            managers.service().add_service(
                &self.local_service,
                &self.namespace,
                self.local_service_selector.clone(),
                vec![service_port(receiver.port_name, port, port, "TCP")],
                Some("Local"),
            )?;
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        for receiver in self.receivers() {
            let port = receiver.container_port()?;
            managers
                .port()
                .add_port_to_container(AgentContainerName::CoreAgent, port);
            let var = env_var(receiver.env_name, receiver.endpoint.as_str());
            let mut env = managers.env_var();
            if self.using_apm {
                env.add_env_var_to_container(AgentContainerName::TraceAgent, var.clone());
            }
            env.add_env_var_to_container(AgentContainerName::CoreAgent, var);
        }
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        let container = AgentContainerName::UnprivilegedSingleAgent;
        for receiver in self.receivers() {
            let port = receiver.container_port()?;
            managers.port().add_port_to_container(container, port);
            managers.env_var().add_env_var_to_container(
                container,
                env_var(receiver.env_name, receiver.endpoint.as_str()),
            );
        }
        Ok(())
    }
}

impl OtlpFeature {
    fn receivers(&self) -> impl Iterator<Item = &Receiver> {
        self.grpc.iter().chain(self.http.iter())
    }
}

/// Port of a `host:port` endpoint. Unix socket endpoints are rejected.
fn extract_port(endpoint: &str) -> Result<i32> {
    let invalid = |message: String| FeatureError::InvalidConfig {
        feature: ids::OTLP,
        message,
    };
    for scheme in ["unix", "unix-abstract"] {
        if endpoint.starts_with(&format!("{scheme}:")) {
            return Err(invalid(format!("{scheme:?} endpoints are not supported")));
        }
    }
    let port_regex = Regex::new(r":(\d+)$").map_err(|e| invalid(e.to_string()))?;
    let port = port_regex
        .captures(endpoint)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| invalid(format!("{endpoint:?} does not have a port explicitly set")))?;
    port.as_str()
        .parse::<u16>()
        .map(i32::from)
        .map_err(|_| invalid(format!("port of {endpoint:?} is outside the valid range")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{
        ApmFeatureConfig, DatadogAgentSpec, HostPortConfig, OtlpFeatureConfig, OtlpProtocolsConfig,
        OtlpReceiverConfig,
    };
    use crate::feature::tests::*;
    use k8s_openapi::api::core::v1::Service;

    fn endpoint(enabled: bool, endpoint: Option<&str>) -> Option<OtlpEndpointConfig> {
        Some(OtlpEndpointConfig {
            enabled: Some(enabled),
            host_port_config: None,
            endpoint: endpoint.map(str::to_string),
        })
    }

    fn dda(
        grpc: Option<OtlpEndpointConfig>,
        http: Option<OtlpEndpointConfig>,
        apm: bool,
    ) -> DatadogAgent {
        let mut spec = DatadogAgentSpec::default();
        spec.features.otlp = Some(OtlpFeatureConfig {
            receiver: OtlpReceiverConfig {
                protocols: OtlpProtocolsConfig { grpc, http },
            },
        });
        if apm {
            spec.features.apm = Some(ApmFeatureConfig {
                enabled: Some(true),
                ..Default::default()
            });
        }
        dda_with(spec)
    }

    #[test]
    fn test_extract_port() {
        assert_eq!(extract_port("0.0.0.0:4317").unwrap(), 4317);
        assert_eq!(extract_port("localhost:0").unwrap(), 0);
        assert!(extract_port("0.0.0.0").is_err());
        assert!(extract_port("0.0.0.0:70000").is_err());
        assert!(extract_port("unix:///var/run/otlp.sock").is_err());
    }

    #[test]
    fn test_both_protocols_with_apm() {
        let dda = dda(endpoint(true, None), endpoint(true, Some("0.0.0.0:5555")), true);
        let mut feature = OtlpFeature::default();
        let rc = feature.configure(&dda);
        assert_eq!(
            rc.agent.containers,
            vec![AgentContainerName::CoreAgent, AgentContainerName::TraceAgent]
        );

        let mut managers = node_agent_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(
                &managers,
                AgentContainerName::TraceAgent,
                DD_OTLP_CONFIG_RECEIVER_PROTOCOLS_GRPC_ENDPOINT
            )
            .as_deref(),
            Some(DEFAULT_GRPC_ENDPOINT)
        );
        let core = container(&mut managers, AgentContainerName::CoreAgent);
        let ports = core.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].container_port, 5555);
        assert_eq!(ports[1].host_port, Some(5555));

        let mut resources = resource_managers(&dda);
        feature.manage_dependencies(&mut resources, &rc).unwrap();
        let store = resources.into_store();
        let svc = store.get::<Service>("datadog", "dd-agent").unwrap();
        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.ports.as_ref().unwrap().len(), 2);
        assert_eq!(spec.internal_traffic_policy.as_deref(), Some("Local"));
    }

    #[test]
    fn test_http_only_without_host_port() {
        let mut http = endpoint(true, None);
        if let Some(http) = http.as_mut() {
            http.host_port_config = Some(HostPortConfig {
                enabled: Some(false),
                port: None,
            });
        }
        let mut feature = OtlpFeature::default();
        let rc = feature.configure(&dda(endpoint(false, None), http, false));
        assert_eq!(rc.agent.containers, vec![AgentContainerName::CoreAgent]);

        let mut managers = single_container_managers();
        feature
            .manage_single_container_node_agent(&mut managers, "legacy")
            .unwrap();
        let agent = container(&mut managers, AgentContainerName::UnprivilegedSingleAgent);
        let ports = agent.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 4318);
        assert!(ports[0].host_port.is_none());
    }

    #[test]
    fn test_no_protocol_enabled() {
        let mut feature = OtlpFeature::default();
        assert!(!feature
            .configure(&dda(endpoint(false, None), None, true))
            .is_configured());
    }

    #[test]
    fn test_unix_grpc_endpoint_fails() {
        let mut feature = OtlpFeature::default();
        feature.configure(&dda(endpoint(true, Some("unix:///tmp/otlp.sock")), None, false));
        let mut managers = node_agent_managers();
        assert!(feature.manage_node_agent(&mut managers, "legacy").is_err());
    }
}
