//! kube-state-metrics core check.
//!
//! The cluster agent schedules the `kubernetes_state_core` check as a
//! cluster check. Node agents ignore the legacy `kubernetes_state`
//! autodiscovery template so the two checks never both run.

use k8s_openapi::api::rbac::v1::PolicyRule;
use semver::Version;
use tracing::debug;

use super::check_config::{CheckConfig, checksum_for};
use super::shared::{self, FeatureRbac};
use super::{
    ChecksumAnnotation, Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::images;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::{non_resource_rule, policy_rule};
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::volumes::KUBE_STATE_METRICS_CORE_VOLUME_NAME;

pub const DD_KUBE_STATE_METRICS_CORE_ENABLED: &str = "DD_KUBE_STATE_METRICS_CORE_ENABLED";
pub const DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME: &str =
    "DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME";
pub const DD_IGNORE_AUTOCONF: &str = "DD_IGNORE_AUTOCONF";
pub const LEGACY_KSM_CHECK: &str = "kubernetes_state";

pub const DEFAULT_CONF_SUFFIX: &str = "kube-state-metrics-core-config";
pub const CHECK_FOLDER: &str = "kubernetes_state_core.d";
pub const CHECK_FILE: &str = "kubernetes_state_core.yaml.default";

/// First agent release collecting CRDs and APIServices.
const CRD_APISERVICE_MIN_VERSION: Version = Version::new(7, 46, 0);

const COLLECTORS: &[&str] = &[
    "pods",
    "replicationcontrollers",
    "statefulsets",
    "nodes",
    "cronjobs",
    "jobs",
    "replicasets",
    "deployments",
    "configmaps",
    "services",
    "endpoints",
    "daemonsets",
    "horizontalpodautoscalers",
    "limitranges",
    "resourcequotas",
    "secrets",
    "namespaces",
    "persistentvolumeclaims",
    "persistentvolumes",
    "ingresses",
];

#[derive(Debug, Default)]
pub struct KubernetesStateCoreFeature {
    check: CheckConfig,
    run_in_runners: bool,
    collect_api_services_and_crds: bool,
    checksum: Option<ChecksumAnnotation>,
    rbac: Option<FeatureRbac>,
}

impl Feature for KubernetesStateCoreFeature {
    fn id(&self) -> FeatureId {
        ids::KUBERNETES_STATE_CORE
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(ksm) = dda
            .spec
            .features
            .kube_state_metrics_core
            .as_ref()
            .filter(|ksm| ksm.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.run_in_runners =
            shared::cluster_checks_enabled(dda) && shared::use_cluster_checks_runners(dda);
        let check_runner = if self.run_in_runners {
            ComponentName::ClusterChecksRunner
        } else {
            ComponentName::ClusterAgent
        };
        self.collect_api_services_and_crds = dda
            .component_override(check_runner)
            .and_then(|o| o.image.as_ref())
            .is_none_or(|image| images::is_at_least(image, &CRD_APISERVICE_MIN_VERSION));
        debug!(
            run_in_runners = self.run_in_runners,
            collect_api_services_and_crds = self.collect_api_services_and_crds,
            "configured kube-state-metrics core"
        );

        if let Some(conf) = &ksm.conf {
            self.checksum =
                checksum_for(ComponentName::ClusterAgent, ids::KUBERNETES_STATE_CORE, conf);
        }
        self.check = CheckConfig::new(
            dda,
            ids::KUBERNETES_STATE_CORE,
            DEFAULT_CONF_SUFFIX,
            KUBE_STATE_METRICS_CORE_VOLUME_NAME,
            CHECK_FOLDER,
            CHECK_FILE,
            ksm.conf.as_ref(),
        );
        self.rbac = FeatureRbac::for_feature(dda, check_runner, ids::KUBERNETES_STATE_CORE);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[AgentContainerName::CoreAgent]),
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            cluster_checks_runner: if self.run_in_runners {
                RequiredComponent::with_containers(&[AgentContainerName::ClusterChecksRunner])
            } else {
                RequiredComponent::default()
            },
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        if self.check.is_generated() {
            let content = match self.check.parsed_config_data()? {
                Some(data) => data,
                None => {
                    default_check_config(self.run_in_runners, self.collect_api_services_and_crds)
                }
            };
            let config_map = self.check.build_config_map(content);
            self.check
                .add_config_map(managers, config_map, self.checksum.as_ref());
        }
        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(managers, rbac_rules(self.collect_api_services_and_crds))?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.check.mount(managers, AgentContainerName::ClusterAgent);
        let mut env = managers.env_var();
        env.add_env_var(bool_env_var(DD_KUBE_STATE_METRICS_CORE_ENABLED, true));
        env.add_env_var(env_var(
            DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME,
            self.check.config_map_name.as_str(),
        ));
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        managers.env_var().append_env_var_to_container(
            AgentContainerName::CoreAgent,
            DD_IGNORE_AUTOCONF,
            LEGACY_KSM_CHECK,
        );
        Ok(())
    }

    fn manage_single_container_node_agent(
        &self,
        managers: &mut PodTemplateManagers,
        _provider: &str,
    ) -> Result<()> {
        managers.env_var().append_env_var_to_container(
            AgentContainerName::UnprivilegedSingleAgent,
            DD_IGNORE_AUTOCONF,
            LEGACY_KSM_CHECK,
        );
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum.iter().cloned().collect()
    }
}

/// Default `kubernetes_state_core` check configuration.
pub fn default_check_config(cluster_check: bool, collect_api_services_and_crds: bool) -> String {
    let mut config = format!(
        "---\ncluster_check: {cluster_check}\ninit_config:\ninstances:\n  - collectors:\n"
    );
    let extra: &[&str] = if collect_api_services_and_crds {
        &["apiservices", "customresourcedefinitions"]
    } else {
        &[]
    };
    for collector in COLLECTORS.iter().chain(extra) {
        config.push_str(&format!("    - {collector}\n"));
    }
    config.push_str(&format!("    skip_leader_election: {cluster_check}\n"));
    config
}

fn rbac_rules(collect_api_services_and_crds: bool) -> Vec<PolicyRule> {
    const LIST_WATCH: &[&str] = &["list", "watch"];
    let mut rules = vec![
        policy_rule(
            "",
            &[
                "configmaps",
                "endpoints",
                "events",
                "limitranges",
                "namespaces",
                "nodes",
                "persistentvolumeclaims",
                "persistentvolumes",
                "pods",
                "replicationcontrollers",
                "resourcequotas",
                "secrets",
                "services",
            ],
            LIST_WATCH,
        ),
        policy_rule(
            "apps",
            &["daemonsets", "deployments", "replicasets", "statefulsets"],
            LIST_WATCH,
        ),
        policy_rule("batch", &["cronjobs", "jobs"], LIST_WATCH),
        policy_rule("autoscaling", &["horizontalpodautoscalers"], LIST_WATCH),
        policy_rule("networking.k8s.io", &["ingresses"], LIST_WATCH),
        policy_rule("policy", &["poddisruptionbudgets"], LIST_WATCH),
        policy_rule("storage.k8s.io", &["storageclasses", "volumeattachments"], LIST_WATCH),
        policy_rule(
            "admissionregistration.k8s.io",
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            LIST_WATCH,
        ),
        non_resource_rule(&["/version", "/healthz"], &["get"]),
    ];
    if collect_api_services_and_crds {
        rules.push(policy_rule("apiregistration.k8s.io", &["apiservices"], LIST_WATCH));
        rules.push(policy_rule(
            "apiextensions.k8s.io",
            &["customresourcedefinitions"],
            LIST_WATCH,
        ));
    }
    rules
}
