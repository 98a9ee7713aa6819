//! External metrics server.
//!
//! The cluster agent serves the `external.metrics.k8s.io` API so that
//! HorizontalPodAutoscalers can scale on Datadog metrics. The operator
//! creates the Service in front of the cluster agent, registers the
//! APIService and grants the autoscaler access to it.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIService, APIServiceSpec, ServiceReference,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::shared::{FeatureRbac, NetworkPolicyTarget};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::port::container_port;
use crate::merger::rbac::{named_policy_rule, policy_rule, role_ref};
use crate::merger::service::service_port;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{
    default_component_name, pod_selector_labels, service_account_name, should_create_rbac,
};

pub const DD_EXTERNAL_METRICS_PROVIDER_ENABLED: &str = "DD_EXTERNAL_METRICS_PROVIDER_ENABLED";
pub const DD_EXTERNAL_METRICS_PROVIDER_PORT: &str = "DD_EXTERNAL_METRICS_PROVIDER_PORT";
pub const DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD: &str =
    "DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD";
pub const DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER: &str =
    "DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER";
pub const DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT: &str = "DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT";

pub const DEFAULT_PORT: i32 = 8443;
pub const PORT_NAME: &str = "metricsapi";
pub const EXTERNAL_METRICS_API_GROUP: &str = "external.metrics.k8s.io";
pub const API_SERVICE_NAME: &str = "v1beta1.external.metrics.k8s.io";
/// ConfigMap the cluster agent keeps the metric values in.
const CUSTOM_METRICS_CONFIG_MAP: &str = "datadog-custom-metrics";
const HPA_NAMESPACE: &str = "kube-system";
const HPA_SERVICE_ACCOUNT: &str = "horizontal-pod-autoscaler";
const AUTH_DELEGATOR_ROLE: &str = "system:auth-delegator";

const DCA: AgentContainerName = AgentContainerName::ClusterAgent;

#[derive(Debug, Default)]
pub struct ExternalMetricsServerFeature {
    dda_name: String,
    namespace: String,
    port: i32,
    register_api_service: bool,
    use_datadog_metrics: bool,
    wpa_controller: bool,
    endpoint_url: Option<String>,
    service_name: String,
    service_selector: BTreeMap<String, String>,
    /// Service account of the cluster agent when its RBAC is managed here.
    service_account: Option<String>,
    rbac: Option<FeatureRbac>,
    network_policy: Option<NetworkPolicyTarget>,
}

impl Feature for ExternalMetricsServerFeature {
    fn id(&self) -> FeatureId {
        ids::EXTERNAL_METRICS_SERVER
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(em) = dda
            .spec
            .features
            .external_metrics_server
            .as_ref()
            .filter(|em| em.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.dda_name = dda.name_any();
        self.namespace = dda.namespace().unwrap_or_default();
        self.port = em.port.unwrap_or(DEFAULT_PORT);
        self.register_api_service = em.register_api_service.unwrap_or(true);
        self.use_datadog_metrics = em.use_datadog_metrics.unwrap_or(false);
        self.wpa_controller = em.wpa_controller.unwrap_or(false);
        self.endpoint_url = em.endpoint_url.clone().filter(|url| !url.is_empty());
        self.service_name = format!(
            "{}-metrics-server",
            default_component_name(dda, ComponentName::ClusterAgent)
        );
        self.service_selector = pod_selector_labels(dda, ComponentName::ClusterAgent);
        self.service_account = should_create_rbac(dda, ComponentName::ClusterAgent)
            .then(|| service_account_name(dda, ComponentName::ClusterAgent));
        self.rbac = FeatureRbac::for_feature(
            dda,
            ComponentName::ClusterAgent,
            ids::EXTERNAL_METRICS_SERVER,
        );
        self.network_policy = NetworkPolicyTarget::for_feature(
            dda,
            ComponentName::ClusterAgent,
            ids::EXTERNAL_METRICS_SERVER,
        );

        RequiredComponents {
            cluster_agent: RequiredComponent::with_containers(&[DCA]),
            ..Default::default()
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        managers.service().add_service(
            &self.service_name,
            &self.namespace,
            self.service_selector.clone(),
            vec![service_port(PORT_NAME, self.port, self.port, "TCP")],
            None,
        )?;

        if let (Some(rbac), Some(sa)) = (&self.rbac, &self.service_account) {
            rbac.add_cluster_rules(managers, self.cluster_agent_rules())?;
            managers.rbac().add_cluster_role_binding(
                &self.namespace,
                &format!("{}-auth-delegator", rbac.role_name),
                sa,
                role_ref("ClusterRole", AUTH_DELEGATOR_ROLE),
            )?;
        }

        if self.register_api_service {
            managers.store().add_or_update(self.api_service());
            managers.rbac().add_cluster_policy_rules(
                HPA_NAMESPACE,
                &format!("{}-metrics-reader", self.dda_name),
                HPA_SERVICE_ACCOUNT,
                vec![policy_rule(
                    EXTERNAL_METRICS_API_GROUP,
                    &["*"],
                    &["get", "list", "watch"],
                )],
            )?;
        }

        if let Some(policy) = &self.network_policy {
            policy.allow_api_server_ingress(
                managers,
                "Ingress from API server for external metrics",
                self.port,
            )?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        let mut env = managers.env_var();
        env.add_env_var_to_container(DCA, bool_env_var(DD_EXTERNAL_METRICS_PROVIDER_ENABLED, true));
        env.add_env_var_to_container(
            DCA,
            env_var(DD_EXTERNAL_METRICS_PROVIDER_PORT, self.port.to_string()),
        );
        env.add_env_var_to_container(
            DCA,
            bool_env_var(
                DD_EXTERNAL_METRICS_PROVIDER_USE_DATADOGMETRIC_CRD,
                self.use_datadog_metrics,
            ),
        );
        env.add_env_var_to_container(
            DCA,
            bool_env_var(DD_EXTERNAL_METRICS_PROVIDER_WPA_CONTROLLER, self.wpa_controller),
        );
        if let Some(url) = &self.endpoint_url {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_EXTERNAL_METRICS_PROVIDER_ENDPOINT, url.as_str()),
            );
        }
        managers
            .port()
            .add_port_to_container(DCA, container_port(PORT_NAME, self.port, "TCP"));
        Ok(())
    }
}

impl ExternalMetricsServerFeature {
    fn cluster_agent_rules(&self) -> Vec<PolicyRule> {
        let mut rules = vec![
            named_policy_rule(
                "",
                &["configmaps"],
                &[CUSTOM_METRICS_CONFIG_MAP],
                &["get", "update"],
            ),
            policy_rule("", &["configmaps"], &["create"]),
            policy_rule("autoscaling", &["horizontalpodautoscalers"], &["list", "watch"]),
        ];
        if self.use_datadog_metrics {
            rules.push(policy_rule(
                "datadoghq.com",
                &["datadogmetrics"],
                &["list", "watch", "create", "delete"],
            ));
            rules.push(policy_rule("datadoghq.com", &["datadogmetrics/status"], &["update"]));
        }
        if self.wpa_controller {
            rules.push(policy_rule(
                "datadoghq.com",
                &["watermarkpodautoscalers"],
                &["get", "list", "watch"],
            ));
            rules.push(policy_rule(
                "datadoghq.com",
                &["watermarkpodautoscalers/status"],
                &["update"],
            ));
        }
        rules
    }

    fn api_service(&self) -> APIService {
        APIService {
            metadata: ObjectMeta {
                name: Some(API_SERVICE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(APIServiceSpec {
                service: Some(ServiceReference {
                    name: Some(self.service_name.clone()),
                    namespace: Some(self.namespace.clone()),
                    port: Some(self.port),
                }),
                version: Some("v1beta1".to_string()),
                group: Some(EXTERNAL_METRICS_API_GROUP.to_string()),
                insecure_skip_tls_verify: Some(true),
                group_priority_minimum: 100,
                version_priority: 100,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
