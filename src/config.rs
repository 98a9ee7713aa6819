//! Operator process configuration, read from the environment.

use std::time::Duration;

use envconfig::Envconfig;

use crate::global::DEFAULT_SITE;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespaces watched for DatadogAgents, comma separated. Falls back to
    /// `WATCH_NAMESPACE`; empty means every namespace.
    #[envconfig(from = "AGENT_WATCH_NAMESPACE")]
    pub agent_watch_namespace: Option<String>,
    #[envconfig(from = "SLO_WATCH_NAMESPACE")]
    pub slo_watch_namespace: Option<String>,
    #[envconfig(from = "MONITOR_WATCH_NAMESPACE")]
    pub monitor_watch_namespace: Option<String>,
    #[envconfig(from = "PROFILE_WATCH_NAMESPACE")]
    pub profile_watch_namespace: Option<String>,
    #[envconfig(from = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "DD_API_KEY")]
    pub api_key: Option<String>,
    #[envconfig(from = "DD_APP_KEY")]
    pub app_key: Option<String>,
    #[envconfig(from = "DD_URL")]
    pub dd_url: Option<String>,
    #[envconfig(from = "DD_SITE", default = "datadoghq.com")]
    pub site: String,
    /// Cluster name reported by the metadata forwarder.
    #[envconfig(from = "DD_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    #[envconfig(from = "POD_NAME")]
    pub pod_name: Option<String>,
    #[envconfig(from = "POD_NAMESPACE", default = "default")]
    pub pod_namespace: String,

    #[envconfig(from = "DD_OPERATOR_SUPPORT_CILIUM", default = "false")]
    pub support_cilium: bool,
    #[envconfig(from = "DD_OPERATOR_PROFILES_ENABLED", default = "false")]
    pub profiles_enabled: bool,
    /// Zero disables the metadata forwarder.
    #[envconfig(from = "DD_OPERATOR_METADATA_INTERVAL_SECS", default = "300")]
    pub metadata_interval_secs: u64,
    #[envconfig(from = "DD_OPERATOR_CREDENTIALS_REFRESH_SECS", default = "60")]
    pub credentials_refresh_secs: u64,
    #[envconfig(from = "DD_OPERATOR_HEALTH_PORT", default = "8080")]
    pub health_port: u16,
}

impl OperatorConfig {
    /// Namespaces to watch for DatadogAgents. `None` means all of them.
    pub fn agent_namespaces(&self) -> Option<Vec<String>> {
        namespaces(
            self.agent_watch_namespace
                .as_deref()
                .or(self.watch_namespace.as_deref()),
        )
    }

    /// Namespaces to watch for DatadogAgentProfiles. `None` means all of them.
    pub fn profile_namespaces(&self) -> Option<Vec<String>> {
        namespaces(
            self.profile_watch_namespace
                .as_deref()
                .or(self.watch_namespace.as_deref()),
        )
    }

    pub fn site(&self) -> &str {
        if self.site.is_empty() {
            DEFAULT_SITE
        } else {
            &self.site
        }
    }

    pub fn metadata_interval(&self) -> Option<Duration> {
        (self.metadata_interval_secs > 0).then(|| Duration::from_secs(self.metadata_interval_secs))
    }

    pub fn credentials_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.credentials_refresh_secs.max(1))
    }
}

fn namespaces(value: Option<&str>) -> Option<Vec<String>> {
    let list: Vec<String> = value?
        .split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect();
    (!list.is_empty()).then_some(list)
}
