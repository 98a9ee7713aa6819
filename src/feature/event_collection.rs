//! Kubernetes event collection by the cluster agent.
//!
//! The leader cluster agent watches events and forwards them to Datadog.
//! With `unbundleEvents` the `kube_apiserver` check sends one Datadog event
//! per Kubernetes event instead of bundling them per object.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::PolicyRule;

use super::check_config::{CheckConfig, checksum_for};
use super::shared::FeatureRbac;
use super::{
    ChecksumAnnotation, Feature, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::{named_policy_rule, policy_rule};
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{leader_election_resource_name, token_secret_name};

pub const DD_COLLECT_KUBERNETES_EVENTS: &str = "DD_COLLECT_KUBERNETES_EVENTS";
pub const DD_LEADER_ELECTION: &str = "DD_LEADER_ELECTION";
pub const DD_LEADER_LEASE_NAME: &str = "DD_LEADER_LEASE_NAME";
pub const DD_CLUSTER_AGENT_TOKEN_NAME: &str = "DD_CLUSTER_AGENT_TOKEN_NAME";

pub const KUBE_APISERVER_CONF_SUFFIX: &str = "kube-apiserver-config";
pub const KUBE_APISERVER_VOLUME_NAME: &str = "kubernetes-apiserver-check-config";
pub const KUBE_APISERVER_CHECK_FOLDER: &str = "kubernetes_apiserver.d";
pub const KUBE_APISERVER_CHECK_FILE: &str = "kubernetes_apiserver.yaml";

const UNBUNDLED_CHECK_CONFIG: &str = "init_config:\ninstances:\n  - unbundle_events: true\n";

const DCA: AgentContainerName = AgentContainerName::ClusterAgent;

#[derive(Debug, Default)]
pub struct EventCollectionFeature {
    leader_election_name: String,
    token_secret_name: String,
    /// Check configuration when events are unbundled.
    unbundled: Option<CheckConfig>,
    checksum: Option<ChecksumAnnotation>,
    rbac: Option<FeatureRbac>,
}

impl Feature for EventCollectionFeature {
    fn id(&self) -> FeatureId {
        ids::EVENT_COLLECTION
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(section) = dda
            .spec
            .features
            .event_collection
            .as_ref()
            .filter(|ec| ec.collect_kubernetes_events.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.leader_election_name = leader_election_resource_name(dda);
        self.token_secret_name = token_secret_name(dda);
        self.rbac =
            FeatureRbac::for_feature(dda, ComponentName::ClusterAgent, ids::EVENT_COLLECTION);

        if section.unbundle_events.unwrap_or(false) {
            let check = CheckConfig::new(
                dda,
                ids::EVENT_COLLECTION,
                KUBE_APISERVER_CONF_SUFFIX,
                KUBE_APISERVER_VOLUME_NAME,
                KUBE_APISERVER_CHECK_FOLDER,
                KUBE_APISERVER_CHECK_FILE,
                None,
            );
            let data = BTreeMap::from([(
                KUBE_APISERVER_CHECK_FILE.to_string(),
                UNBUNDLED_CHECK_CONFIG.to_string(),
            )]);
            self.checksum = checksum_for(ComponentName::ClusterAgent, ids::EVENT_COLLECTION, &data);
            self.unbundled = Some(check);
        }

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
        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(managers, self.rbac_rules())?;
        }
        if let Some(check) = &self.unbundled {
            let config_map = check.build_config_map(UNBUNDLED_CHECK_CONFIG.to_string());
            check.add_config_map(managers, config_map, self.checksum.as_ref());
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        let mut env = managers.env_var();
        env.add_env_var_to_container(DCA, bool_env_var(DD_COLLECT_KUBERNETES_EVENTS, true));
        env.add_env_var_to_container(DCA, bool_env_var(DD_LEADER_ELECTION, true));
        env.add_env_var_to_container(
            DCA,
            env_var(DD_LEADER_LEASE_NAME, self.leader_election_name.as_str()),
        );
        env.add_env_var_to_container(
            DCA,
            env_var(DD_CLUSTER_AGENT_TOKEN_NAME, self.token_secret_name.as_str()),
        );
        if let Some(check) = &self.unbundled {
            check.mount(managers, DCA);
        }
        Ok(())
    }

    fn checksum_annotations(&self) -> Vec<ChecksumAnnotation> {
        self.checksum.iter().cloned().collect()
    }
}

impl EventCollectionFeature {
    fn rbac_rules(&self) -> Vec<PolicyRule> {
        let leader = self.leader_election_name.as_str();
        vec![
            named_policy_rule("", &["configmaps"], &[leader], &["get", "update"]),
            policy_rule("", &["configmaps"], &["create"]),
            named_policy_rule("coordination.k8s.io", &["leases"], &[leader], &["get", "update"]),
            policy_rule("coordination.k8s.io", &["leases"], &["create"]),
            policy_rule("", &["events"], &["get", "list", "watch"]),
            named_policy_rule(
                "",
                &["secrets"],
                &[self.token_secret_name.as_str()],
                &["get", "update"],
            ),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{DatadogAgentSpec, EventCollectionFeatureConfig};
    use crate::feature::tests::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::rbac::v1::ClusterRole;

    fn dda(unbundle: bool) -> DatadogAgent {
        let mut spec = DatadogAgentSpec::default();
        spec.features.event_collection = Some(EventCollectionFeatureConfig {
            collect_kubernetes_events: Some(true),
            unbundle_events: Some(unbundle),
        });
        dda_with(spec)
    }

    #[test]
    fn test_cluster_agent_env_and_rbac() {
        let dda = dda(false);
        let mut feature = EventCollectionFeature::default();
        let rc = feature.configure(&dda);
        assert!(rc.cluster_agent.is_enabled());
        assert!(!rc.agent.is_configured());
        assert!(feature.checksum_annotations().is_empty());

        let mut managers = cluster_agent_managers();
        feature.manage_cluster_agent(&mut managers).unwrap();
        assert_eq!(
            env_value(&managers, DCA, DD_LEADER_LEASE_NAME).as_deref(),
            Some("dd-leader-election")
        );
        assert_eq!(
            env_value(&managers, DCA, DD_CLUSTER_AGENT_TOKEN_NAME).as_deref(),
            Some("dd-token")
        );
        assert!(volume_names(&managers).is_empty());

        let mut resources = resource_managers(&dda);
        feature
            .manage_dependencies(&mut resources, &rc)
            .unwrap();
        let store = resources.into_store();
        let role = store
            .get::<ClusterRole>("", "dd-event-collection-cluster-agent")
            .unwrap();
        let rules = role.rules.as_ref().unwrap();
        assert!(rules.iter().any(|r| r
            .resources
            .as_ref()
            .is_some_and(|res| res.contains(&"events".to_string()))));
    }

    #[test]
    fn test_unbundled_events_check() {
        let dda = dda(true);
        let mut feature = EventCollectionFeature::default();
        let rc = feature.configure(&dda);
        let checksums = feature.checksum_annotations();
        assert_eq!(checksums.len(), 1);
        assert_eq!(checksums[0].component, ComponentName::ClusterAgent);

        let mut resources = resource_managers(&dda);
        feature.manage_dependencies(&mut resources, &rc).unwrap();
        let store = resources.into_store();
        let cm = store
            .get::<ConfigMap>("datadog", "dd-kube-apiserver-config")
            .unwrap();
        assert!(cm.data.as_ref().unwrap()[KUBE_APISERVER_CHECK_FILE].contains("unbundle_events"));
        assert_eq!(
            cm.metadata.annotations.as_ref().unwrap()[&checksums[0].key],
            checksums[0].value
        );

        let mut managers = cluster_agent_managers();
        feature.manage_cluster_agent(&mut managers).unwrap();
        assert_eq!(volume_names(&managers), vec![KUBE_APISERVER_VOLUME_NAME.to_string()]);
    }

    #[test]
    fn test_not_collecting() {
        let mut spec = DatadogAgentSpec::default();
        spec.features.event_collection = Some(EventCollectionFeatureConfig {
            collect_kubernetes_events: Some(false),
            unbundle_events: Some(true),
        });
        let mut feature = EventCollectionFeature::default();
        assert!(!feature.configure(&dda_with(spec)).is_configured());
        assert!(feature.checksum_annotations().is_empty());
    }
}
