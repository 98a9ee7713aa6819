//! Helm check: reports Helm releases, read from the Secrets and ConfigMaps
//! Helm stores them in.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::PolicyRule;
use serde::Serialize;

use super::check_config::{CheckConfig, checksum_for};
use super::shared::{self, FeatureRbac};
use super::{
    ChecksumAnnotation, Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents,
    Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::merger::rbac::policy_rule;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::volumes::HELM_CHECK_VOLUME_NAME;

pub const DEFAULT_CONF_SUFFIX: &str = "helm-check-config";
pub const CHECK_FOLDER: &str = "helm.d";
pub const CHECK_FILE: &str = "conf.yaml";

#[derive(Serialize)]
struct HelmCheckConfig<'a> {
    cluster_check: bool,
    init_config: Option<()>,
    instances: [HelmInstance<'a>; 1],
}

#[derive(Serialize)]
struct HelmInstance<'a> {
    collect_events: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    helm_values_as_tags: &'a BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct HelmCheckFeature {
    check: CheckConfig,
    run_in_runners: bool,
    collect_events: bool,
    values_as_tags: BTreeMap<String, String>,
    checksum: Option<ChecksumAnnotation>,
    rbac: Option<FeatureRbac>,
}

impl Feature for HelmCheckFeature {
    fn id(&self) -> FeatureId {
        ids::HELM_CHECK
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(helm) = dda
            .spec
            .features
            .helm_check
            .as_ref()
            .filter(|h| h.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.run_in_runners =
            shared::cluster_checks_enabled(dda) && shared::use_cluster_checks_runners(dda);
        self.collect_events = helm.collect_events.unwrap_or(false);
        self.values_as_tags = helm.values_as_tags.clone();
        self.checksum = checksum_for(ComponentName::ClusterAgent, ids::HELM_CHECK, helm);
        self.check = CheckConfig::new(
            dda,
            ids::HELM_CHECK,
            DEFAULT_CONF_SUFFIX,
            HELM_CHECK_VOLUME_NAME,
            CHECK_FOLDER,
            CHECK_FILE,
            None,
        );
        let rbac_component = if self.run_in_runners {
            ComponentName::ClusterChecksRunner
        } else {
            ComponentName::ClusterAgent
        };
        self.rbac = FeatureRbac::for_feature(dda, rbac_component, ids::HELM_CHECK);

        RequiredComponents {
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            cluster_checks_runner: if self.run_in_runners {
                RequiredComponent::with_containers(&[AgentContainerName::ClusterChecksRunner])
            } else {
                RequiredComponent::default()
            },
            ..Default::default()
        }
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        let config_map = self.check.build_config_map(self.check_config()?);
        self.check
            .add_config_map(managers, config_map, self.checksum.as_ref());
        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(managers, rbac_rules())?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        self.check.mount(managers, AgentContainerName::ClusterAgent);
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum.iter().cloned().collect()
    }
}

impl HelmCheckFeature {
    fn check_config(&self) -> Result<String> {
        let config = HelmCheckConfig {
            cluster_check: self.run_in_runners,
            init_config: None,
            instances: [HelmInstance {
                collect_events: self.collect_events,
                helm_values_as_tags: &self.values_as_tags,
            }],
        };
        serde_yaml::to_string(&config).map_err(|e| FeatureError::InvalidConfig {
            feature: ids::HELM_CHECK,
            message: e.to_string(),
        })
    }
}

fn rbac_rules() -> Vec<PolicyRule> {
    vec![policy_rule(
        "",
        &["secrets", "configmaps"],
        &["get", "list", "watch"],
    )]
}
