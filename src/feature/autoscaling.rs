//! Datadog autoscaling.
//!
//! Workload autoscaling lets the cluster agent resize and scale workloads
//! described by `DatadogPodAutoscaler` objects. It patches pods through the
//! admission controller, which must therefore be on. Cluster autoscaling
//! drives Karpenter node pools.

use k8s_openapi::api::rbac::v1::PolicyRule;

use super::shared::{self, FeatureRbac};
use super::{
    Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent, ToggleFeatureConfig};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::policy_rule;
use crate::merger::{PodTemplateManagers, ResourceManagers};

pub const DD_AUTOSCALING_WORKLOAD_ENABLED: &str = "DD_AUTOSCALING_WORKLOAD_ENABLED";
pub const DD_AUTOSCALING_CLUSTER_ENABLED: &str = "DD_AUTOSCALING_CLUSTER_ENABLED";
pub const DD_AUTOSCALING_FAILOVER_ENABLED: &str = "DD_AUTOSCALING_FAILOVER_ENABLED";
pub const DD_AUTOSCALING_FAILOVER_METRICS: &str = "DD_AUTOSCALING_FAILOVER_METRICS";

/// Local metrics the node agent keeps sending when the cluster agent is
/// unreachable.
const FAILOVER_METRICS: &str = "container.memory.usage container.cpu.usage";

#[derive(Debug, Default)]
pub struct AutoscalingFeature {
    workload: bool,
    cluster: bool,
    admission_controller: bool,
    rbac: Option<FeatureRbac>,
}

fn toggled(toggle: Option<&ToggleFeatureConfig>) -> bool {
    toggle.and_then(|t| t.enabled).unwrap_or(false)
}

impl Feature for AutoscalingFeature {
    fn id(&self) -> FeatureId {
        ids::AUTOSCALING
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(autoscaling) = dda.spec.features.autoscaling.as_ref() else {
            return RequiredComponents::default();
        };
        self.workload = toggled(autoscaling.workload.as_ref());
        self.cluster = toggled(autoscaling.cluster.as_ref());
        if !self.workload && !self.cluster {
            return RequiredComponents::default();
        }
        self.admission_controller = shared::admission_controller_enabled(dda);
        self.rbac = FeatureRbac::for_feature(dda, ComponentName::ClusterAgent, ids::AUTOSCALING);

        RequiredComponents {
            cluster_agent: RequiredComponent::with_containers(&[AgentContainerName::ClusterAgent]),
            agent: if self.workload {
                RequiredComponent::with_containers(&[AgentContainerName::CoreAgent])
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
        if !self.admission_controller {
            return Err(FeatureError::InvalidConfig {
                feature: ids::AUTOSCALING,
                message: "autoscaling needs the admission controller to be enabled".to_string(),
            });
        }
        if let Some(rbac) = &self.rbac {
            rbac.add_cluster_rules(managers, rbac_rules(self.workload, self.cluster))?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        const DCA: AgentContainerName = AgentContainerName::ClusterAgent;
        let mut env = managers.env_var();
        if self.workload {
            env.add_env_var_to_container(DCA, bool_env_var(DD_AUTOSCALING_WORKLOAD_ENABLED, true));
            env.add_env_var_to_container(DCA, bool_env_var(DD_AUTOSCALING_FAILOVER_ENABLED, true));
        }
        if self.cluster {
            env.add_env_var_to_container(DCA, bool_env_var(DD_AUTOSCALING_CLUSTER_ENABLED, true));
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        if self.workload {
            let core = AgentContainerName::CoreAgent;
            let mut env = managers.env_var();
            env.add_env_var_to_container(core, bool_env_var(DD_AUTOSCALING_FAILOVER_ENABLED, true));
            env.add_env_var_to_container(
                core,
                env_var(DD_AUTOSCALING_FAILOVER_METRICS, FAILOVER_METRICS),
            );
        }
        Ok(())
    }
}

fn rbac_rules(workload: bool, cluster: bool) -> Vec<PolicyRule> {
    let events = policy_rule("", &["events"], &["create", "patch"]);
    let mut rules = Vec::new();
    if workload {
        rules.extend([
            policy_rule(
                "datadoghq.com",
                &["datadogpodautoscalers", "datadogpodautoscalers/status"],
                &["*"],
            ),
            events.clone(),
            policy_rule("*", &["*/scale"], &["get", "update"]),
            policy_rule("", &["pods"], &["patch"]),
            policy_rule("apps", &["deployments"], &["patch"]),
            policy_rule("argoproj.io", &["rollouts"], &["patch"]),
        ]);
    }
    if cluster {
        rules.push(policy_rule(
            "karpenter.sh",
            &["*"],
            &["create", "delete", "get", "list", "patch"],
        ));
        if !workload {
            rules.push(events);
        }
        rules.push(policy_rule("karpenter.k8s.aws", &["*"], &["get", "list"]));
    }
    rules
}
