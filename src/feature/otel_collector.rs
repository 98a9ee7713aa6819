//! OpenTelemetry collector in the node agent pod.
//!
//! The collector runs in its own `otel-agent` container and reads its
//! pipeline from `otel-config.yaml`. The file comes from the user's
//! ConfigMap when one is referenced, otherwise the operator generates one
//! from `configData` or from the built-in pipeline with the configured OTLP
//! ports. The core agent hosts the collector extension and shares its IPC
//! port with the collector.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerPort, VolumeMount};
use kube::ResourceExt;
use semver::Version;
use tracing::error;

use super::check_config::{checksum_for, config_map, default_config_map_name};
use super::{
    ChecksumAnnotation, Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents,
    Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, ConfigMapConfig, DatadogAgent};
use crate::images;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::port::container_port;
use crate::merger::service::service_port;
use crate::merger::volume::config_map_volume;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{agent_local_service_name, pod_selector_labels};
use crate::resources::volumes::CONFIG_VOLUME_PATH;

pub const DD_OTELCOLLECTOR_ENABLED: &str = "DD_OTELCOLLECTOR_ENABLED";
pub const DD_OTELCOLLECTOR_EXTENSION_TIMEOUT: &str = "DD_OTELCOLLECTOR_EXTENSION_TIMEOUT";
pub const DD_OTELCOLLECTOR_EXTENSION_URL: &str = "DD_OTELCOLLECTOR_EXTENSION_URL";
pub const DD_AGENT_IPC_PORT: &str = "DD_AGENT_IPC_PORT";
pub const DD_AGENT_IPC_CONFIG_REFRESH_INTERVAL: &str = "DD_AGENT_IPC_CONFIG_REFRESH_INTERVAL";

pub const OTEL_CONFIG_FILE: &str = "otel-config.yaml";
pub const OTEL_AGENT_VOLUME_NAME: &str = "otel-agent-config-volume";
const DEFAULT_CONF_SUFFIX: &str = "otel-agent-config";
const AGENT_IPC_PORT: &str = "5009";
const AGENT_IPC_CONFIG_REFRESH_INTERVAL: &str = "60";

pub const GRPC_PORT_NAME: &str = "otel-grpc";
pub const HTTP_PORT_NAME: &str = "otel-http";
pub const DEFAULT_GRPC_PORT: i32 = 4317;
pub const DEFAULT_HTTP_PORT: i32 = 4318;
const GRPC_SERVICE_PORT_NAME: &str = "otlpgrpcport";
const HTTP_SERVICE_PORT_NAME: &str = "otlphttpport";

/// First agent version shipping the standalone `otel-agent` image.
const MIN_STANDALONE_VERSION: Version = Version::new(7, 67, 0);

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const OTEL: AgentContainerName = AgentContainerName::OtelAgent;

#[derive(Debug, Default)]
pub struct OtelCollectorFeature {
    namespace: String,
    config_map_name: String,
    user_config_map: Option<ConfigMapConfig>,
    /// Content of the generated ConfigMap, unset with a user ConfigMap.
    config_data: Option<String>,
    ports: Vec<ContainerPort>,
    core_enabled: Option<bool>,
    extension_timeout: Option<i32>,
    extension_url: Option<String>,
    checksum: Option<ChecksumAnnotation>,
    local_service: String,
    local_service_selector: BTreeMap<String, String>,
}

impl Feature for OtelCollectorFeature {
    fn id(&self) -> FeatureId {
        ids::OTEL_COLLECTOR
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(otel) = dda
            .spec
            .features
            .otel_collector
            .as_ref()
            .filter(|otel| otel.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        // An image named explicitly is assumed to carry the collector.
        let incompatible = dda
            .component_override(ComponentName::NodeAgent)
            .and_then(|o| o.image.as_ref())
            .is_some_and(|image| {
                image.name.is_empty() && !images::is_at_least(image, &MIN_STANDALONE_VERSION)
            });
        if incompatible {
            error!(
                min_version = %MIN_STANDALONE_VERSION,
                "the otel-agent image needs a newer agent version, use a -full agent image instead"
            );
            return RequiredComponents::default();
        }

        self.namespace = dda.namespace().unwrap_or_default();
        self.user_config_map = otel.conf.as_ref().and_then(|c| c.config_map.clone());
        self.config_map_name = match &self.user_config_map {
            Some(cm) => cm.name.clone(),
            None => default_config_map_name(dda, DEFAULT_CONF_SUFFIX),
        };
        self.ports = if otel.ports.is_empty() {
            vec![
                container_port(HTTP_PORT_NAME, DEFAULT_HTTP_PORT, "TCP"),
                container_port(GRPC_PORT_NAME, DEFAULT_GRPC_PORT, "TCP"),
            ]
        } else {
            otel.ports.clone()
        };
        for port in &mut self.ports {
            port.host_port = Some(port.container_port);
        }

        if self.user_config_map.is_none() {
            let data = otel
                .conf
                .as_ref()
                .and_then(|c| c.config_data.clone())
                .unwrap_or_else(|| default_config(self.grpc_port(), self.http_port()));
            self.checksum = checksum_for(ComponentName::NodeAgent, ids::OTEL_COLLECTOR, &data);
            self.config_data = Some(data);
        }

        if let Some(core) = &otel.core_config {
            self.core_enabled = core.enabled;
            self.extension_timeout = core.extension_timeout;
            self.extension_url = core.extension_url.clone();
        }
        self.local_service = agent_local_service_name(dda);
        self.local_service_selector = pod_selector_labels(dda, ComponentName::NodeAgent);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, OTEL]),
            ..Default::default()
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        if let Some(data) = &self.config_data {
            serde_yaml::from_str::<serde_yaml::Value>(data).map_err(|source| {
                FeatureError::Parse {
                    feature: ids::OTEL_COLLECTOR,
                    what: "collector configuration",
                    source,
                }
            })?;
            let mut cm = config_map(
                &self.namespace,
                &self.config_map_name,
                BTreeMap::from([(OTEL_CONFIG_FILE.to_string(), data.clone())]),
            );
            if let Some(checksum) = &self.checksum {
                cm.annotations_mut()
                    .insert(checksum.key.clone(), checksum.value.clone());
            }
            managers.store().add_or_update(cm);
        }

        let (grpc, http) = (self.grpc_port(), self.http_port());
        managers.service().add_service(
            &self.local_service,
            &self.namespace,
            self.local_service_selector.clone(),
            vec![
                service_port(GRPC_SERVICE_PORT_NAME, grpc, grpc, "TCP"),
                service_port(HTTP_SERVICE_PORT_NAME, http, http, "TCP"),
            ],
            Some("Local"),
        )?;
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        let items = self
            .user_config_map
            .as_ref()
            .map(|cm| cm.items.clone())
            .unwrap_or_default();
        let otel_dir = format!("{CONFIG_VOLUME_PATH}/otel/");
        let (volume, mut mount) = config_map_volume(
            OTEL_AGENT_VOLUME_NAME,
            &self.config_map_name,
            items.clone(),
            &otel_dir,
        );
        managers.volume().add_volume(volume);

        // several files get a directory, a single one sits next to datadog.yaml
        let config_files: Vec<String> = if items.is_empty() {
            let path = format!("{CONFIG_VOLUME_PATH}/{OTEL_CONFIG_FILE}");
            mount = VolumeMount {
                mount_path: path.clone(),
                sub_path: Some(OTEL_CONFIG_FILE.to_string()),
                ..mount
            };
            vec![path]
        } else {
            items
                .iter()
                .map(|item| format!("{otel_dir}{}", item.path))
                .collect()
        };
        managers
            .volume_mount()
            .add_volume_mount_to_container(mount, OTEL);
        if let Some(container) = managers.container_mut(OTEL) {
            container
                .args
                .get_or_insert_with(Vec::new)
                .extend(config_files.iter().map(|file| format!("--config={file}")));
        }

        for port in &self.ports {
            managers.port().add_port_to_container(OTEL, port.clone());
        }

        let mut env = managers.env_var();
        env.add_env_var_to_containers(&[CORE, OTEL], env_var(DD_AGENT_IPC_PORT, AGENT_IPC_PORT));
        env.add_env_var_to_containers(
            &[CORE, OTEL],
            env_var(DD_AGENT_IPC_CONFIG_REFRESH_INTERVAL, AGENT_IPC_CONFIG_REFRESH_INTERVAL),
        );
        env.add_env_var_to_containers(
            &[CORE, OTEL],
            bool_env_var(DD_OTELCOLLECTOR_ENABLED, self.core_enabled.unwrap_or(true)),
        );
        if let Some(timeout) = self.extension_timeout {
            env.add_env_var_to_container(
                CORE,
                env_var(DD_OTELCOLLECTOR_EXTENSION_TIMEOUT, timeout.to_string()),
            );
        }
        if let Some(url) = &self.extension_url {
            env.add_env_var_to_container(
                CORE,
                env_var(DD_OTELCOLLECTOR_EXTENSION_URL, url.as_str()),
            );
        }
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum.iter().cloned().collect()
    }
}

impl OtelCollectorFeature {
    fn named_port(&self, name: &str, default: i32) -> i32 {
        self.ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map_or(default, |p| p.container_port)
    }

    fn grpc_port(&self) -> i32 {
        self.named_port(GRPC_PORT_NAME, DEFAULT_GRPC_PORT)
    }

    fn http_port(&self) -> i32 {
        self.named_port(HTTP_PORT_NAME, DEFAULT_HTTP_PORT)
    }
}

/// Built-in pipeline: OTLP in, Datadog out, with the infra attributes
/// processor tagging telemetry with its Kubernetes origin.
pub fn default_config(grpc_port: i32, http_port: i32) -> String {
    format!(
        r#"receivers:
  prometheus:
    config:
      scrape_configs:
        - job_name: "otelcol"
          scrape_interval: 10s
          static_configs:
            - targets: ["0.0.0.0:8888"]
  otlp:
    protocols:
      grpc:
        endpoint: 0.0.0.0:{grpc_port}
      http:
        endpoint: 0.0.0.0:{http_port}
exporters:
  debug:
    verbosity: detailed
  datadog:
    api:
      key: ${{env:DD_API_KEY}}
      site: ${{env:DD_SITE}}
processors:
  infraattributes:
    cardinality: 2
  batch:
    timeout: 10s
connectors:
  datadog/connector:
    traces:
      compute_top_level_by_span_kind: true
      peer_tags_aggregation: true
      compute_stats_by_span_kind: true
extensions:
  pprof:
    endpoint: localhost:1777
  zpages:
    endpoint: localhost:55679
  health_check:
    endpoint: localhost:13133
service:
  extensions: [pprof, zpages, health_check]
  pipelines:
    traces:
      receivers: [otlp]
      processors: [infraattributes, batch]
      exporters: [datadog, datadog/connector]
    metrics:
      receivers: [otlp, datadog/connector, prometheus]
      processors: [infraattributes, batch]
      exporters: [datadog]
    logs:
      receivers: [otlp]
      processors: [infraattributes, batch]
      exporters: [datadog]
"#
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{
        AgentImageConfig, CustomConfig, DatadogAgentComponentOverride, DatadogAgentSpec,
        OtelCollectorFeatureConfig, OtelCoreConfig,
    };
    use crate::feature::checksum_annotation_key;
    use crate::feature::tests::*;
    use crate::merger::pod_template::tests::template_with;
    use k8s_openapi::api::core::v1::{ConfigMap, KeyToPath, Service};

    fn enabled() -> OtelCollectorFeatureConfig {
        OtelCollectorFeatureConfig {
            enabled: Some(true),
            ..Default::default()
        }
    }

    fn configure(otel: OtelCollectorFeatureConfig) -> (OtelCollectorFeature, RequiredComponents) {
        let mut spec = DatadogAgentSpec::default();
        spec.features.otel_collector = Some(otel);
        let mut feature = OtelCollectorFeature::default();
        let rc = feature.configure(&dda_with(spec));
        (feature, rc)
    }

    fn otel_managers() -> PodTemplateManagers {
        PodTemplateManagers::new(template_with(&[CORE, OTEL]))
    }

    #[test]
    fn test_default_pipeline() {
        let (feature, rc) = configure(enabled());
        assert_eq!(rc.agent.containers, vec![CORE, OTEL]);

        let dda = dda_with(DatadogAgentSpec::default());
        let mut resources = resource_managers(&dda);
        feature
            .manage_dependencies(&mut resources, &RequiredComponents::default())
            .unwrap();
        let store = resources.into_store();
        let cm = store.get::<ConfigMap>("datadog", "dd-otel-agent-config").unwrap();
        let data = &cm.data.as_ref().unwrap()[OTEL_CONFIG_FILE];
        assert!(data.contains("endpoint: 0.0.0.0:4317"));
        let key = checksum_annotation_key(ids::OTEL_COLLECTOR);
        let checksum = &feature.checksum_annotations()[0];
        assert_eq!(checksum.key, key);
        assert_eq!(checksum.component, ComponentName::NodeAgent);
        assert_eq!(cm.annotations()[&key], checksum.value);
        let service = store.get::<Service>("datadog", "dd-agent").unwrap();
        let ports: Vec<i32> = service
            .spec
            .as_ref()
            .unwrap()
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.port)
            .collect();
        assert!(ports.contains(&4317) && ports.contains(&4318));

        let mut managers = otel_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        let otel = container(&mut managers, OTEL);
        assert_eq!(
            otel.args.unwrap(),
            vec!["--config=/etc/datadog-agent/otel-config.yaml".to_string()]
        );
        let mount = &otel.volume_mounts.unwrap()[0];
        assert_eq!(mount.sub_path.as_deref(), Some(OTEL_CONFIG_FILE));
        let host_ports: Vec<Option<i32>> =
            otel.ports.unwrap().iter().map(|p| p.host_port).collect();
        assert_eq!(host_ports, vec![Some(4318), Some(4317)]);
        for c in [CORE, OTEL] {
            assert_eq!(env_value(&managers, c, DD_AGENT_IPC_PORT).as_deref(), Some("5009"));
            assert_eq!(
                env_value(&managers, c, DD_OTELCOLLECTOR_ENABLED).as_deref(),
                Some("true")
            );
        }
    }

    #[test]
    fn test_custom_grpc_port_in_default_pipeline() {
        let (feature, _) = configure(OtelCollectorFeatureConfig {
            ports: vec![container_port(GRPC_PORT_NAME, 4444, "TCP")],
            ..enabled()
        });
        assert_eq!(feature.grpc_port(), 4444);
        assert_eq!(feature.http_port(), DEFAULT_HTTP_PORT);
        let data = feature.config_data.as_deref().unwrap();
        assert!(data.contains("endpoint: 0.0.0.0:4444"));
        assert!(data.contains("endpoint: 0.0.0.0:4318"));
    }

    #[test]
    fn test_user_config_map_items() {
        let (feature, _) = configure(OtelCollectorFeatureConfig {
            conf: Some(CustomConfig {
                config_data: None,
                config_map: Some(ConfigMapConfig {
                    name: "user-otel".to_string(),
                    items: vec![
                        KeyToPath {
                            key: "a".to_string(),
                            path: "a.yaml".to_string(),
                            mode: None,
                        },
                        KeyToPath {
                            key: "b".to_string(),
                            path: "b.yaml".to_string(),
                            mode: None,
                        },
                    ],
                }),
            }),
            ..enabled()
        });
        assert!(feature.config_data.is_none());
        assert!(feature.checksum_annotations().is_empty());

        let mut managers = otel_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        let otel = container(&mut managers, OTEL);
        assert_eq!(
            otel.args.unwrap(),
            vec![
                "--config=/etc/datadog-agent/otel/a.yaml".to_string(),
                "--config=/etc/datadog-agent/otel/b.yaml".to_string(),
            ]
        );
        let mount = &otel.volume_mounts.unwrap()[0];
        assert_eq!(mount.mount_path, "/etc/datadog-agent/otel/");
        assert!(mount.sub_path.is_none());
    }

    #[test]
    fn test_core_config() {
        let (feature, _) = configure(OtelCollectorFeatureConfig {
            core_config: Some(OtelCoreConfig {
                enabled: Some(false),
                extension_timeout: Some(30),
                extension_url: Some("https://localhost:7777".to_string()),
            }),
            ..enabled()
        });
        let mut managers = otel_managers();
        feature.manage_node_agent(&mut managers, "legacy").unwrap();
        assert_eq!(
            env_value(&managers, CORE, DD_OTELCOLLECTOR_ENABLED).as_deref(),
            Some("false")
        );
        assert_eq!(
            env_value(&managers, CORE, DD_OTELCOLLECTOR_EXTENSION_TIMEOUT).as_deref(),
            Some("30")
        );
        assert_eq!(
            env_value(&managers, CORE, DD_OTELCOLLECTOR_EXTENSION_URL).as_deref(),
            Some("https://localhost:7777")
        );
        assert!(env_value(&managers, OTEL, DD_OTELCOLLECTOR_EXTENSION_URL).is_none());
    }

    #[test]
    fn test_invalid_config_data() {
        let (feature, _) = configure(OtelCollectorFeatureConfig {
            conf: Some(CustomConfig {
                config_data: Some("receivers: [".to_string()),
                config_map: None,
            }),
            ..enabled()
        });
        let dda = dda_with(DatadogAgentSpec::default());
        let mut resources = resource_managers(&dda);
        assert!(matches!(
            feature.manage_dependencies(&mut resources, &RequiredComponents::default()),
            Err(FeatureError::Parse { feature: ids::OTEL_COLLECTOR, .. })
        ));
    }

    #[test]
    fn test_old_standalone_image_is_rejected() {
        let image = |name: &str, tag: &str| {
            let mut spec = DatadogAgentSpec::default();
            spec.features.otel_collector = Some(enabled());
            spec.overrides.insert(
                ComponentName::NodeAgent,
                DatadogAgentComponentOverride {
                    image: Some(AgentImageConfig {
                        name: name.to_string(),
                        tag: tag.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
            OtelCollectorFeature::default().configure(&dda_with(spec))
        };
        assert!(!image("", "7.66.0").is_configured());
        assert!(image("", "7.67.0").is_configured());
        assert!(image("agent", "7.60.0-full").is_configured());
    }

    #[test]
    fn test_disabled() {
        let (_, rc) = configure(OtelCollectorFeatureConfig::default());
        assert!(!rc.is_configured());
    }
}
