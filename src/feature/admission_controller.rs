//! Cluster agent admission controller.
//!
//! The cluster agent serves mutating and validating webhooks that inject
//! agent configuration, standard tags and optionally an agent sidecar into
//! user pods.

use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::ResourceExt;

use super::shared::{self, FeatureRbac, NetworkPolicyTarget};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids};
use crate::crd::{
    AgentContainerName, ComponentName, DatadogAgent, SidecarProfile, SidecarSelector,
};
use crate::images::{AGENT_IMAGE_NAME, AGENT_LATEST_VERSION};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::{named_policy_rule, policy_rule};
use crate::merger::service::service_port;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{agent_local_service_name, pod_selector_labels};

pub const DD_ADMISSION_CONTROLLER_ENABLED: &str = "DD_ADMISSION_CONTROLLER_ENABLED";
pub const DD_ADMISSION_CONTROLLER_VALIDATION_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_VALIDATION_ENABLED";
pub const DD_ADMISSION_CONTROLLER_MUTATION_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_MUTATION_ENABLED";
pub const DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED: &str =
    "DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED";
pub const DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY: &str =
    "DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY";
pub const DD_ADMISSION_CONTROLLER_SERVICE_NAME: &str = "DD_ADMISSION_CONTROLLER_SERVICE_NAME";
pub const DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_ENABLED";
pub const DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_MODE: &str =
    "DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_MODE";
pub const DD_ADMISSION_CONTROLLER_KUBERNETES_ADMISSION_EVENTS_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_KUBERNETES_ADMISSION_EVENTS_ENABLED";
pub const DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE: &str =
    "DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE";
pub const DD_ADMISSION_CONTROLLER_INJECT_CONFIG_LOCAL_SERVICE_NAME: &str =
    "DD_ADMISSION_CONTROLLER_INJECT_CONFIG_LOCAL_SERVICE_NAME";
pub const DD_ADMISSION_CONTROLLER_FAILURE_POLICY: &str = "DD_ADMISSION_CONTROLLER_FAILURE_POLICY";
pub const DD_ADMISSION_CONTROLLER_WEBHOOK_NAME: &str = "DD_ADMISSION_CONTROLLER_WEBHOOK_NAME";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_ENABLED";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_CLUSTER_AGENT_ENABLED: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_CLUSTER_AGENT_ENABLED";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROVIDER: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROVIDER";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_REGISTRY: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_CONTAINER_REGISTRY";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_NAME: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_NAME";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_TAG: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_TAG";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_SELECTORS: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_SELECTORS";
pub const DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROFILES: &str =
    "DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROFILES";

pub const DEFAULT_SERVICE_NAME: &str = "datadog-admission-controller";
pub const DEFAULT_WEBHOOK_NAME: &str = "datadog-webhook";
pub const SERVICE_PORT: i32 = 443;
pub const TARGET_PORT: i32 = 8000;
const PORT_NAME: &str = "datadog-webhook";

#[derive(Clone, Debug, Default, PartialEq)]
struct SidecarInjection {
    cluster_agent_communication: bool,
    provider: Option<String>,
    registry: Option<String>,
    image_name: String,
    image_tag: String,
    selectors: Vec<SidecarSelector>,
    profiles: Vec<SidecarProfile>,
}

#[derive(Debug, Default)]
pub struct AdmissionControllerFeature {
    validation: Option<bool>,
    mutation: Option<bool>,
    mutate_unlabelled: bool,
    registry: Option<String>,
    service_name: String,
    communication_mode: String,
    local_service: String,
    failure_policy: Option<String>,
    webhook_name: String,
    cws_instrumentation_mode: Option<String>,
    admission_events: bool,
    sidecar: Option<SidecarInjection>,
    namespace: String,
    service_selector: std::collections::BTreeMap<String, String>,
    rbac: Option<FeatureRbac>,
    network_policy: Option<NetworkPolicyTarget>,
}

impl Feature for AdmissionControllerFeature {
    fn id(&self) -> FeatureId {
        ids::ADMISSION_CONTROLLER
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        if !shared::admission_controller_enabled(dda) {
            return RequiredComponents::default();
        }
        let ac = dda
            .spec
            .features
            .admission_controller
            .clone()
            .unwrap_or_default();
        let global_registry = dda.spec.global.registry.clone().filter(|r| !r.is_empty());

        self.validation = ac.validation.and_then(|v| v.enabled);
        self.mutation = ac.mutation.and_then(|m| m.enabled);
        self.mutate_unlabelled = ac.mutate_unlabelled.unwrap_or(false);
        self.registry = ac
            .registry
            .filter(|r| !r.is_empty())
            .or_else(|| global_registry.clone());
        self.service_name = ac
            .service_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        self.communication_mode = shared::admission_communication_mode(dda);
        self.local_service = agent_local_service_name(dda);
        self.failure_policy = ac.failure_policy.filter(|p| !p.is_empty());
        self.webhook_name = ac
            .webhook_name
            .unwrap_or_else(|| DEFAULT_WEBHOOK_NAME.to_string());
        self.cws_instrumentation_mode = ac
            .cws_instrumentation
            .filter(|cws| cws.enabled.unwrap_or(false))
            .map(|cws| cws.mode.unwrap_or_default());
        self.admission_events = crate::crd::is_enabled(ac.kubernetes_admission_events.as_ref());

        self.sidecar = ac
            .agent_sidecar_injection
            .filter(|sidecar| sidecar.enabled.unwrap_or(false))
            .map(|sidecar| {
                let node_image = dda
                    .component_override(ComponentName::NodeAgent)
                    .and_then(|o| o.image.as_ref());
                let sidecar_image = sidecar.image.as_ref();
                let image_name = sidecar_image
                    .map(|i| i.name.clone())
                    .filter(|n| !n.is_empty())
                    .or_else(|| node_image.map(|i| i.name.clone()))
                    .unwrap_or_else(|| AGENT_IMAGE_NAME.to_string());
                let image_tag = sidecar_image
                    .map(|i| i.tag.clone())
                    .filter(|t| !t.is_empty())
                    .or_else(|| node_image.map(|i| i.tag.clone()))
                    .unwrap_or_else(|| AGENT_LATEST_VERSION.to_string());
                SidecarInjection {
                    cluster_agent_communication: sidecar
                        .cluster_agent_communication_enabled
                        .unwrap_or(false),
                    provider: sidecar.provider.filter(|p| !p.is_empty()),
                    registry: sidecar
                        .registry
                        .filter(|r| !r.is_empty())
                        .or(global_registry),
                    image_name,
                    image_tag,
                    selectors: sidecar
                        .selectors
                        .into_iter()
                        .filter(|s| s.namespace_selector.is_some() || s.object_selector.is_some())
                        .collect(),
                    profiles: sidecar
                        .profiles
                        .into_iter()
                        .filter(|p| !p.env_vars.is_empty() || p.resource_requirements.is_some())
                        .collect(),
                }
            });

        self.namespace = dda.namespace().unwrap_or_default();
        self.service_selector = pod_selector_labels(dda, ComponentName::ClusterAgent);
        self.rbac =
            FeatureRbac::for_feature(dda, ComponentName::ClusterAgent, ids::ADMISSION_CONTROLLER);
        self.network_policy = NetworkPolicyTarget::for_feature(
            dda,
            ComponentName::ClusterAgent,
            ids::ADMISSION_CONTROLLER,
        );

        RequiredComponents {
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
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
            vec![service_port(PORT_NAME, SERVICE_PORT, TARGET_PORT, "TCP")],
            None,
        )?;

        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(
                managers,
                cluster_role_rules(&self.webhook_name, self.cws_instrumentation_mode.as_deref()),
            )?;
            rbac.add_rules(managers, role_rules())?;
        }

        if let Some(policy) = &self.network_policy {
            policy.allow_api_server_ingress(
                managers,
                "Ingress from API server for admission controller",
                TARGET_PORT,
            )?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        const DCA: AgentContainerName = AgentContainerName::ClusterAgent;
        let mut env = managers.env_var();

        env.add_env_var_to_container(DCA, bool_env_var(DD_ADMISSION_CONTROLLER_ENABLED, true));
        if let Some(enabled) = self.validation {
            env.add_env_var_to_container(
                DCA,
                bool_env_var(DD_ADMISSION_CONTROLLER_VALIDATION_ENABLED, enabled),
            );
        }
        if let Some(enabled) = self.mutation {
            env.add_env_var_to_container(
                DCA,
                bool_env_var(DD_ADMISSION_CONTROLLER_MUTATION_ENABLED, enabled),
            );
        }
        env.add_env_var_to_container(
            DCA,
            bool_env_var(DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED, self.mutate_unlabelled),
        );
        if let Some(registry) = &self.registry {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY, registry.as_str()),
            );
        }
        env.add_env_var_to_container(
            DCA,
            env_var(DD_ADMISSION_CONTROLLER_SERVICE_NAME, self.service_name.as_str()),
        );
        if let Some(mode) = &self.cws_instrumentation_mode {
            env.add_env_var_to_container(
                DCA,
                bool_env_var(DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_ENABLED, true),
            );
            env.add_env_var_to_container(
                DCA,
                env_var(DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_MODE, mode.as_str()),
            );
        }
        if self.admission_events {
            env.add_env_var_to_container(
                DCA,
                bool_env_var(DD_ADMISSION_CONTROLLER_KUBERNETES_ADMISSION_EVENTS_ENABLED, true),
            );
        }
        env.add_env_var_to_container(
            DCA,
            env_var(
                DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE,
                self.communication_mode.as_str(),
            ),
        );
        env.add_env_var_to_container(
            DCA,
            env_var(
                DD_ADMISSION_CONTROLLER_INJECT_CONFIG_LOCAL_SERVICE_NAME,
                self.local_service.as_str(),
            ),
        );
        if let Some(policy) = &self.failure_policy {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_ADMISSION_CONTROLLER_FAILURE_POLICY, policy.as_str()),
            );
        }
        env.add_env_var_to_container(
            DCA,
            env_var(DD_ADMISSION_CONTROLLER_WEBHOOK_NAME, self.webhook_name.as_str()),
        );

        let Some(sidecar) = &self.sidecar else {
            return Ok(());
        };
        env.add_env_var_to_container(
            DCA,
            bool_env_var(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_ENABLED, true),
        );
        env.add_env_var_to_container(
            DCA,
            bool_env_var(
                DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_CLUSTER_AGENT_ENABLED,
                sidecar.cluster_agent_communication,
            ),
        );
        if let Some(provider) = &sidecar.provider {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROVIDER, provider.as_str()),
            );
        }
        if let Some(registry) = &sidecar.registry {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_REGISTRY, registry.as_str()),
            );
        }
        env.add_env_var_to_container(
            DCA,
            env_var(
                DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_NAME,
                sidecar.image_name.as_str(),
            ),
        );
        env.add_env_var_to_container(
            DCA,
            env_var(
                DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_TAG,
                sidecar.image_tag.as_str(),
            ),
        );
        if !sidecar.selectors.is_empty() {
            env.add_env_var_to_container(
                DCA,
                shared::json_env_var(
                    DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_SELECTORS,
                    &sidecar.selectors,
                )?,
            );
        }
        if !sidecar.profiles.is_empty() {
            env.add_env_var_to_container(
                DCA,
                shared::json_env_var(
                    DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROFILES,
                    &sidecar.profiles,
                )?,
            );
        }
        Ok(())
    }
}

fn cluster_role_rules(webhook_name: &str, cws_mode: Option<&str>) -> Vec<PolicyRule> {
    let mut rules = vec![
        named_policy_rule(
            "admissionregistration.k8s.io",
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            &[webhook_name],
            &["get", "watch", "update"],
        ),
        policy_rule(
            "admissionregistration.k8s.io",
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            &["create", "list"],
        ),
        policy_rule("batch", &["jobs", "cronjobs"], &["get"]),
        policy_rule(
            "apps",
            &["statefulsets", "replicasets", "deployments", "daemonsets"],
            &["get"],
        ),
    ];
    if cws_mode == Some("remote_copy") {
        rules.push(policy_rule("", &["pods/exec"], &["create"]));
    }
    rules
}

fn role_rules() -> Vec<PolicyRule> {
    vec![policy_rule(
        "",
        &["secrets"],
        &["get", "list", "watch", "update", "create"],
    )]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{
        AdmissionControllerFeatureConfig, AgentImageConfig, AgentSidecarInjectionConfig,
        ApmFeatureConfig, CwsInstrumentationConfig, DatadogAgentSpec, NetworkPolicyConfig,
        NetworkPolicyFlavor, ToggleFeatureConfig, UnixDomainSocketConfig,
    };
    use crate::crd::CiliumNetworkPolicy;
    use crate::feature::tests::*;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::api::rbac::v1::{ClusterRole, Role};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use std::collections::BTreeMap;

    const DCA: AgentContainerName = AgentContainerName::ClusterAgent;

    fn spec_with(ac: AdmissionControllerFeatureConfig) -> DatadogAgentSpec {
        let mut spec = DatadogAgentSpec::default();
        spec.features.admission_controller = Some(ac);
        spec
    }

    fn enabled() -> AdmissionControllerFeatureConfig {
        AdmissionControllerFeatureConfig {
            enabled: Some(true),
            ..Default::default()
        }
    }

    fn configure(
        spec: DatadogAgentSpec,
    ) -> (AdmissionControllerFeature, RequiredComponents, DatadogAgent) {
        let dda = dda_with(spec);
        let mut feature = AdmissionControllerFeature::default();
        let rc = feature.configure(&dda);
        (feature, rc, dda)
    }

    fn cluster_agent_env(feature: &AdmissionControllerFeature, var: &str) -> Option<String> {
        let mut managers = cluster_agent_managers();
        feature.manage_cluster_agent(&mut managers).unwrap();
        env_value(&managers, DCA, var)
    }

    #[test]
    fn test_disabled() {
        let (_, rc, _) = configure(spec_with(AdmissionControllerFeatureConfig::default()));
        assert!(!rc.is_configured());
    }

    #[test]
    fn test_default_env() {
        let (feature, rc, _) = configure(spec_with(enabled()));
        assert_eq!(rc.cluster_agent.containers, vec![DCA]);

        let mut managers = cluster_agent_managers();
        feature.manage_cluster_agent(&mut managers).unwrap();
        let get = |var| env_value(&managers, DCA, var);
        assert_eq!(get(DD_ADMISSION_CONTROLLER_ENABLED).as_deref(), Some("true"));
        assert_eq!(get(DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED).as_deref(), Some("false"));
        assert_eq!(
            get(DD_ADMISSION_CONTROLLER_SERVICE_NAME).as_deref(),
            Some(DEFAULT_SERVICE_NAME)
        );
        assert_eq!(get(DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE).as_deref(), Some("hostip"));
        assert_eq!(
            get(DD_ADMISSION_CONTROLLER_INJECT_CONFIG_LOCAL_SERVICE_NAME).as_deref(),
            Some("dd-agent")
        );
        assert_eq!(
            get(DD_ADMISSION_CONTROLLER_WEBHOOK_NAME).as_deref(),
            Some(DEFAULT_WEBHOOK_NAME)
        );
        assert!(get(DD_ADMISSION_CONTROLLER_VALIDATION_ENABLED).is_none());
        assert!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_ENABLED).is_none());
    }

    #[test]
    fn test_socket_mode_from_apm_uds() {
        let mut spec = spec_with(enabled());
        spec.features.apm = Some(ApmFeatureConfig {
            enabled: Some(true),
            unix_domain_socket_config: Some(UnixDomainSocketConfig {
                enabled: Some(true),
                path: None,
            }),
            ..Default::default()
        });
        let (feature, _, _) = configure(spec);
        assert_eq!(
            cluster_agent_env(&feature, DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE).as_deref(),
            Some("socket")
        );
    }

    #[test]
    fn test_registry_falls_back_to_global() {
        let mut spec = spec_with(enabled());
        spec.global.registry = Some("public.ecr.aws/datadog".to_string());
        let (feature, _, _) = configure(spec);
        assert_eq!(
            cluster_agent_env(&feature, DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY).as_deref(),
            Some("public.ecr.aws/datadog")
        );
    }

    #[test]
    fn test_cws_instrumentation_and_events() {
        let (feature, _, dda) = configure(spec_with(AdmissionControllerFeatureConfig {
            enabled: Some(true),
            validation: Some(ToggleFeatureConfig::enabled(false)),
            cws_instrumentation: Some(CwsInstrumentationConfig {
                enabled: Some(true),
                mode: Some("remote_copy".to_string()),
            }),
            kubernetes_admission_events: Some(ToggleFeatureConfig::enabled(true)),
            ..Default::default()
        }));
        assert_eq!(
            cluster_agent_env(&feature, DD_ADMISSION_CONTROLLER_CWS_INSTRUMENTATION_MODE)
                .as_deref(),
            Some("remote_copy")
        );
        assert_eq!(
            cluster_agent_env(&feature, DD_ADMISSION_CONTROLLER_VALIDATION_ENABLED).as_deref(),
            Some("false")
        );
        assert_eq!(
            cluster_agent_env(
                &feature,
                DD_ADMISSION_CONTROLLER_KUBERNETES_ADMISSION_EVENTS_ENABLED
            )
            .as_deref(),
            Some("true")
        );

        let mut resources = resource_managers(&dda);
        feature
            .manage_dependencies(&mut resources, &RequiredComponents::default())
            .unwrap();
        let store = resources.into_store();
        let role = store
            .get::<ClusterRole>("", "dd-admission-controller-cluster-agent")
            .unwrap();
        assert!(role.rules.as_ref().unwrap().iter().any(|r| {
            r.resources.as_deref() == Some(&["pods/exec".to_string()][..])
        }));
        assert!(store
            .get::<Role>("datadog", "dd-admission-controller-cluster-agent")
            .is_some());
        let service = store.get::<Service>("datadog", DEFAULT_SERVICE_NAME).unwrap();
        assert_eq!(service.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].port, 443);
    }

    #[test]
    fn test_sidecar_injection() {
        let mut spec = spec_with(AdmissionControllerFeatureConfig {
            enabled: Some(true),
            agent_sidecar_injection: Some(AgentSidecarInjectionConfig {
                enabled: Some(true),
                provider: Some("fargate".to_string()),
                selectors: vec![
                    SidecarSelector {
                        object_selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([(
                                "app".to_string(),
                                "web".to_string(),
                            )])),
                            ..Default::default()
                        }),
                        namespace_selector: None,
                    },
                    SidecarSelector::default(),
                ],
                image: Some(AgentImageConfig {
                    tag: "7.60.0".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        spec.global.registry = Some("my.registry".to_string());
        let (feature, _, _) = configure(spec);

        let mut managers = cluster_agent_managers();
        feature.manage_cluster_agent(&mut managers).unwrap();
        let get = |var| env_value(&managers, DCA, var);
        assert_eq!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_ENABLED).as_deref(), Some("true"));
        assert_eq!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROVIDER).as_deref(), Some("fargate"));
        assert_eq!(
            get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_REGISTRY).as_deref(),
            Some("my.registry")
        );
        assert_eq!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_NAME).as_deref(), Some("agent"));
        assert_eq!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_IMAGE_TAG).as_deref(), Some("7.60.0"));
        assert_eq!(
            get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_SELECTORS).as_deref(),
            Some(r#"[{"objectSelector":{"matchLabels":{"app":"web"}}}]"#)
        );
        assert!(get(DD_ADMISSION_CONTROLLER_AGENT_SIDECAR_PROFILES).is_none());
    }

    #[test]
    fn test_cilium_policy_from_api_server() {
        let mut spec = spec_with(enabled());
        spec.global.network_policy = Some(NetworkPolicyConfig {
            create: Some(true),
            flavor: Some(NetworkPolicyFlavor::Cilium),
            dns_selector_endpoints: vec![],
        });
        let (feature, _, dda) = configure(spec);
        let mut resources = resource_managers(&dda);
        feature
            .manage_dependencies(&mut resources, &RequiredComponents::default())
            .unwrap();
        let store = resources.into_store();
        let policy = store
            .get::<CiliumNetworkPolicy>("datadog", "dd-cluster-agent-admission-controller")
            .unwrap();
        assert_eq!(
            policy.spec.ingress[0].from_entities,
            vec!["kube-apiserver".to_string()]
        );
    }
}
