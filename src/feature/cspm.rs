//! Cloud security posture management: compliance benchmarks run by the
//! security agent on each node and by the cluster agent for the cluster.

use jiff::SignedDuration;
use k8s_openapi::api::rbac::v1::PolicyRule;

use super::shared::FeatureRbac;
use super::{
    Feature, FeatureError, FeatureId, RequiredComponent, RequiredComponents, Result, ids,
};
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent, is_enabled};
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::rbac::policy_rule;
use crate::merger::volume::host_path_volume;
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::volumes::{
    CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH, CGROUPS_VOLUME_NAME, GROUP_HOST_PATH,
    GROUP_MOUNT_PATH, GROUP_VOLUME_NAME, HOST_ROOT_HOST_PATH, HOST_ROOT_MOUNT_PATH,
    HOST_ROOT_VOLUME_NAME, PASSWD_HOST_PATH, PASSWD_MOUNT_PATH, PASSWD_VOLUME_NAME,
    PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH, PROCDIR_VOLUME_NAME,
};

pub const DD_COMPLIANCE_CONFIG_ENABLED: &str = "DD_COMPLIANCE_CONFIG_ENABLED";
pub const DD_COMPLIANCE_CONFIG_CHECK_INTERVAL: &str = "DD_COMPLIANCE_CONFIG_CHECK_INTERVAL";
pub const DD_COMPLIANCE_CONFIG_HOST_BENCHMARKS_ENABLED: &str =
    "DD_COMPLIANCE_CONFIG_HOST_BENCHMARKS_ENABLED";
pub const DD_HOST_ROOT: &str = "DD_HOST_ROOT";

const SECURITY_AGENT_CAPABILITIES: &[&str] = &["AUDIT_CONTROL", "AUDIT_READ"];

const CORE: AgentContainerName = AgentContainerName::CoreAgent;
const SECURITY: AgentContainerName = AgentContainerName::SecurityAgent;
const DCA: AgentContainerName = AgentContainerName::ClusterAgent;

#[derive(Debug, Default)]
pub struct CspmFeature {
    /// Check interval in nanoseconds, or the unparsable input.
    check_interval: Option<std::result::Result<i128, String>>,
    host_benchmarks: bool,
    rbac: Option<FeatureRbac>,
}

impl Feature for CspmFeature {
    fn id(&self) -> FeatureId {
        ids::CSPM
    }

    fn configure(&mut self, dda: &DatadogAgent) -> RequiredComponents {
        let Some(cspm) = dda
            .spec
            .features
            .cspm
            .as_ref()
            .filter(|c| c.enabled.unwrap_or(false))
        else {
            return RequiredComponents::default();
        };

        self.check_interval = cspm.check_interval.as_deref().map(|interval| {
            interval
                .parse::<SignedDuration>()
                .map(|d| d.as_nanos())
                .map_err(|_| interval.to_string())
        });
        self.host_benchmarks = is_enabled(cspm.host_benchmarks.as_ref());
        self.rbac = FeatureRbac::for_feature(dda, ComponentName::ClusterAgent, ids::CSPM);

        RequiredComponents {
            agent: RequiredComponent::with_containers(&[CORE, SECURITY]),
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
            rbac.add_cluster_rules(managers, rbac_rules())?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self, managers: &mut PodTemplateManagers) -> Result<()> {
        let interval = self.interval()?;
        let mut env = managers.env_var();
        env.add_env_var_to_container(DCA, bool_env_var(DD_COMPLIANCE_CONFIG_ENABLED, true));
        if let Some(nanos) = interval {
            env.add_env_var_to_container(
                DCA,
                env_var(DD_COMPLIANCE_CONFIG_CHECK_INTERVAL, nanos.to_string()),
            );
        }
        Ok(())
    }

    fn manage_node_agent(&self, managers: &mut PodTemplateManagers, _provider: &str) -> Result<()> {
        let interval = self.interval()?;
        managers
            .security_context()
            .add_capabilities_to_container(SECURITY_AGENT_CAPABILITIES, SECURITY);

        for (name, host_path, mount_path) in [
            (CGROUPS_VOLUME_NAME, CGROUPS_HOST_PATH, CGROUPS_MOUNT_PATH),
            (PASSWD_VOLUME_NAME, PASSWD_HOST_PATH, PASSWD_MOUNT_PATH),
            (PROCDIR_VOLUME_NAME, PROCDIR_HOST_PATH, PROCDIR_MOUNT_PATH),
            (HOST_ROOT_VOLUME_NAME, HOST_ROOT_HOST_PATH, HOST_ROOT_MOUNT_PATH),
            (GROUP_VOLUME_NAME, GROUP_HOST_PATH, GROUP_MOUNT_PATH),
        ] {
            let (volume, mount) = host_path_volume(name, host_path, mount_path, true);
            managers.volume().add_volume(volume);
            managers
                .volume_mount()
                .add_volume_mount_to_container(mount, SECURITY);
        }

        let mut env = managers.env_var();
        env.add_env_var_to_containers(
            &[CORE, SECURITY],
            bool_env_var(DD_COMPLIANCE_CONFIG_ENABLED, true),
        );
        env.add_env_var_to_container(SECURITY, env_var(DD_HOST_ROOT, HOST_ROOT_MOUNT_PATH));
        if let Some(nanos) = interval {
            env.add_env_var_to_container(
                SECURITY,
                env_var(DD_COMPLIANCE_CONFIG_CHECK_INTERVAL, nanos.to_string()),
            );
        }
        if self.host_benchmarks {
            env.add_env_var_to_container(
                SECURITY,
                bool_env_var(DD_COMPLIANCE_CONFIG_HOST_BENCHMARKS_ENABLED, true),
            );
        }
        Ok(())
    }
}

impl CspmFeature {
    fn interval(&self) -> Result<Option<i128>> {
        match &self.check_interval {
            None => Ok(None),
            Some(Ok(nanos)) => Ok(Some(*nanos)),
            Some(Err(input)) => Err(FeatureError::InvalidConfig {
                feature: ids::CSPM,
                message: format!("invalid checkInterval {input:?}"),
            }),
        }
    }
}

fn rbac_rules() -> Vec<PolicyRule> {
    vec![
        policy_rule("", &["namespaces", "serviceaccounts"], &["list"]),
        policy_rule("networking.k8s.io", &["networkpolicies"], &["list"]),
        policy_rule(
            "rbac.authorization.k8s.io",
            &["clusterrolebindings", "rolebindings"],
            &["list"],
        ),
    ]
}
