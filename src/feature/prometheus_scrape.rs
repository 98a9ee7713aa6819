//! Prometheus autodiscovery: scrape pods (and optionally service endpoints)
//! annotated with `prometheus.io/scrape`.

use k8s_openapi::api::core::v1::EnvVar;
use tracing::warn;

use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, DatadogAgent};
use crate::merger::PodTemplateManagers;
use crate::merger::env::{bool_env_var, env_var};

pub const DD_PROMETHEUS_SCRAPE_ENABLED: &str = "DD_PROMETHEUS_SCRAPE_ENABLED";
pub const DD_PROMETHEUS_SCRAPE_SERVICE_ENDPOINTS: &str = "DD_PROMETHEUS_SCRAPE_SERVICE_ENDPOINTS";
pub const DD_PROMETHEUS_SCRAPE_CHECKS: &str = "DD_PROMETHEUS_SCRAPE_CHECKS";
pub const DD_PROMETHEUS_SCRAPE_VERSION: &str = "DD_PROMETHEUS_SCRAPE_VERSION";

#[derive(Debug, Default)]
pub struct PrometheusScrapeFeature {
    service_endpoints: bool,
    /// `additionalConfigs` converted from YAML to JSON.
    checks: Option<String>,
    version: Option<i32>,
}

impl Feature for PrometheusScrapeFeature {
    fn id(&self) -> FeatureId {
        ids::PROMETHEUS_SCRAPE
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(section) = dda
            .spec
            .features
            .prometheus_scrape
            .as_ref()
            .filter(|ps| ps.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.service_endpoints = section.enable_service_endpoints.unwrap_or(false);
        self.version = section.version;
        self.checks = section
            .additional_configs
            .as_deref()
            .and_then(|yaml| match yaml_to_json(yaml) {
                Ok(json) => Some(json),
                Err(error) => {
                    warn!(%error, "ignoring invalid prometheusScrape.additionalConfigs");
                    None
                }
            });

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            ..Default::default()
        }
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.add_env(managers, AgentContainerName::ClusterAgent);
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        self.add_env(managers, AgentContainerName::CoreAgent);
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        self.add_env(managers, AgentContainerName::UnprivilegedSingleAgent);
        Ok(())
    }
}

impl PrometheusScrapeFeature {
    fn env_vars(&self) -> Vec<EnvVar> {
        let mut vars = vec![
            bool_env_var(DD_PROMETHEUS_SCRAPE_ENABLED, true),
            bool_env_var(DD_PROMETHEUS_SCRAPE_SERVICE_ENDPOINTS, self.service_endpoints),
        ];
        if let Some(checks) = &self.checks {
            vars.push(env_var(DD_PROMETHEUS_SCRAPE_CHECKS, checks.as_str()));
        }
        if let Some(version) = self.version {
            vars.push(env_var(DD_PROMETHEUS_SCRAPE_VERSION, version.to_string()));
        }
        vars
    }

    fn add_env(&self, managers: &mut PodTemplateManagers, container: AgentContainerName) {
        let mut env = managers.env_var();
        for var in self.env_vars() {
            env.add_env_var_to_container(container, var);
        }
    }
}

/// Compact JSON with sorted keys, as the agent expects in
/// `DD_PROMETHEUS_SCRAPE_CHECKS`.
fn yaml_to_json(yaml: &str) -> std::result::Result<String, serde_yaml::Error> {
    let value: serde_json::Value = serde_yaml::from_str(yaml)?;
    Ok(value.to_string())
}
