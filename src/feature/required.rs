//! Components and containers requested by features.

use crate::crd::{AgentContainerName, ComponentName};

/// What one feature (or all of them, once merged) needs from a component.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequiredComponent {
    /// `None` means the feature has no opinion.
    pub is_required: Option<bool>,
    /// Containers the component must run, in first-requested order.
    pub containers: Vec<AgentContainerName>,
}

impl RequiredComponent {
    /// Required with the given containers.
    pub fn with_containers(containers: &[AgentContainerName]) -> Self {
        Self {
            is_required: Some(true),
            containers: containers.to_vec(),
        }
    }

    pub fn required(required: bool) -> Self {
        Self {
            is_required: Some(required),
            containers: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.is_required == Some(true) || !self.containers.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        self.is_required.is_some() || !self.containers.is_empty()
    }

    /// Whether system-probe or security-agent is requested.
    pub fn is_privileged(&self) -> bool {
        self.containers.iter().any(|c| {
            matches!(
                c,
                AgentContainerName::SecurityAgent | AgentContainerName::SystemProbe
            )
        })
    }

    pub fn single_container_strategy_enabled(&self) -> bool {
        self.containers == [AgentContainerName::UnprivilegedSingleAgent]
    }

    /// Merge another opinion into this one.
    ///
    /// An explicit `false` wins over `true`, which wins over no opinion.
    /// Containers are unioned, keeping the order they were first seen in.
    pub fn merge(&mut self, other: &RequiredComponent) -> &mut Self {
        self.is_required = match (self.is_required, other.is_required) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => Some(a && b),
        };
        for container in &other.containers {
            if !self.containers.contains(container) {
                self.containers.push(*container);
            }
        }
        self
    }
}

/// Opinions about the three components.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequiredComponents {
    pub agent: RequiredComponent,
    pub cluster_agent: RequiredComponent,
    pub cluster_checks_runner: RequiredComponent,
}

impl RequiredComponents {
    pub fn merge(&mut self, other: &RequiredComponents) -> &mut Self {
        self.agent.merge(&other.agent);
        self.cluster_agent.merge(&other.cluster_agent);
        self.cluster_checks_runner.merge(&other.cluster_checks_runner);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.agent.is_enabled()
            || self.cluster_agent.is_enabled()
            || self.cluster_checks_runner.is_enabled()
    }

    pub fn is_configured(&self) -> bool {
        self.agent.is_configured()
            || self.cluster_agent.is_configured()
            || self.cluster_checks_runner.is_configured()
    }

    pub fn get(&self, component: ComponentName) -> &RequiredComponent {
        match component {
            ComponentName::NodeAgent => &self.agent,
            ComponentName::ClusterAgent => &self.cluster_agent,
            ComponentName::ClusterChecksRunner => &self.cluster_checks_runner,
        }
    }

    pub fn get_mut(&mut self, component: ComponentName) -> &mut RequiredComponent {
        match component {
            ComponentName::NodeAgent => &mut self.agent,
            ComponentName::ClusterAgent => &mut self.cluster_agent,
            ComponentName::ClusterChecksRunner => &mut self.cluster_checks_runner,
        }
    }
}
