//! DatadogAgentProfile resolution.
//!
//! Profiles are applied oldest first. A node belongs to at most one
//! profile; a profile matching a node that an older profile already claimed
//! is rejected as a whole. Nodes left unclaimed run the default node agent.
//!
//! Every applied profile becomes its own node agent DaemonSet. The profile
//! name is written to the [`PROFILE_LABEL`] node label so each DaemonSet is
//! pinned to its nodes through node affinity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Node, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodAffinityTerm, PodAntiAffinity,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crd::{
    ComponentName, Condition, DatadogAgentComponentOverride, DatadogAgentGenericContainer,
    DatadogAgentProfile, DatadogAgentProfileSpec, DatadogAgentProfileStatus,
};
use crate::hash::generate_md5_for_spec;
use crate::resources::common::{COMPONENT_LABEL, PROFILE_LABEL};

pub const DEFAULT_PROFILE_NAME: &str = "default";
pub const DAEMONSET_NAME_PREFIX: &str = "datadog-agent-with-profile-";
pub const VALID_CONDITION: &str = "Valid";
pub const APPLIED_CONDITION: &str = "Applied";
pub const VALID_REASON: &str = "Valid";
pub const INVALID_REASON: &str = "Invalid";
pub const APPLIED_REASON: &str = "Applied";
pub const CONFLICT_REASON: &str = "Conflict";
const LABEL_VALUE_MAX_LENGTH: usize = 63;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile name {0:?} is invalid: {1}")]
    InvalidName(String, &'static str),

    #[error("invalid profile spec: {0}")]
    InvalidSpec(String),

    #[error("invalid node selector on key {key}: {reason}")]
    InvalidSelector { key: String, reason: String },

    #[error("conflict with existing profile {0}")]
    Conflict(String),
}

/// A profile selected for deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct AppliedProfile {
    /// `None` for the default profile.
    pub namespace: Option<String>,
    pub name: String,
    pub spec: DatadogAgentProfileSpec,
}

impl AppliedProfile {
    pub fn default_profile() -> Self {
        Self {
            namespace: None,
            name: DEFAULT_PROFILE_NAME.to_string(),
            spec: DatadogAgentProfileSpec::default(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.namespace.is_none() && self.name == DEFAULT_PROFILE_NAME
    }

    /// DaemonSet name of the profile. The default profile keeps the regular
    /// node agent name.
    pub fn daemonset_name(&self) -> Option<String> {
        let namespace = self.namespace.as_deref()?;
        Some(format!("{DAEMONSET_NAME_PREFIX}{namespace}-{}", self.name))
    }

    /// Override applied to the node agent DaemonSet of this profile, on top
    /// of the DatadogAgent's own `nodeAgent` override.
    pub fn component_override(&self) -> DatadogAgentComponentOverride {
        let mut config = DatadogAgentComponentOverride {
            name: self.daemonset_name(),
            affinity: Some(self.affinity()),
            ..Default::default()
        };
        if self.is_default() {
            return config;
        }

        let node_agent = self
            .spec
            .config
            .as_ref()
            .and_then(|c| c.overrides.get(&ComponentName::NodeAgent));
        let mut labels = BTreeMap::new();
        if let Some(node_agent) = node_agent {
            labels.extend(node_agent.labels.clone());
            config.containers = node_agent
                .containers
                .iter()
                .filter(|(name, _)| name.is_agent_container())
                .map(|(name, c)| {
                    (
                        *name,
                        DatadogAgentGenericContainer {
                            resources: c.resources.clone(),
                            env: c.env.clone(),
                            ..Default::default()
                        },
                    )
                })
                .collect();
            config.priority_class_name = node_agent.priority_class_name.clone();
            config.runtime_class_name = node_agent.runtime_class_name.clone();
        }
        labels.insert(PROFILE_LABEL.to_string(), self.name.clone());
        config.labels = labels;
        config
    }

    fn affinity(&self) -> Affinity {
        let anti_affinity = Some(one_agent_per_node());
        if self.is_default() {
            return Affinity {
                node_affinity: Some(required_node_affinity(vec![NodeSelectorRequirement {
                    key: PROFILE_LABEL.to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                }])),
                pod_anti_affinity: anti_affinity,
                ..Default::default()
            };
        }

        let requirements = self
            .spec
            .profile_affinity
            .as_ref()
            .map(|a| a.profile_node_affinity.clone())
            .unwrap_or_default();
        if requirements.is_empty() {
            return Affinity {
                pod_anti_affinity: anti_affinity,
                ..Default::default()
            };
        }
        let mut expressions = requirements;
        expressions.push(NodeSelectorRequirement {
            key: PROFILE_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![self.name.clone()]),
        });
        Affinity {
            node_affinity: Some(required_node_affinity(expressions)),
            pod_anti_affinity: anti_affinity,
            ..Default::default()
        }
    }
}

fn required_node_affinity(expressions: Vec<NodeSelectorRequirement>) -> NodeAffinity {
    NodeAffinity {
        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(expressions),
                match_fields: None,
            }],
        }),
        preferred_during_scheduling_ignored_during_execution: None,
    }
}

/// Keeps agent pods of two profiles off the same node during a rollout.
fn one_agent_per_node() -> PodAntiAffinity {
    PodAntiAffinity {
        required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: COMPONENT_LABEL.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![ComponentName::NodeAgent.resource_suffix().to_string()]),
                }]),
                match_labels: None,
            }),
            topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
            ..Default::default()
        }]),
        preferred_during_scheduling_ignored_during_execution: None,
    }
}

/// Status to write back to a DatadogAgentProfile.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileStatusUpdate {
    pub namespace: String,
    pub name: String,
    pub status: DatadogAgentProfileStatus,
}

/// Outcome of [`profiles_to_apply`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileResolution {
    /// Applied profiles in application order, the default profile last.
    pub applied: Vec<AppliedProfile>,
    /// One entry per input profile.
    pub statuses: Vec<ProfileStatusUpdate>,
    /// Profile name claimed by each node. Nodes running the default profile
    /// are absent.
    pub profile_by_node: BTreeMap<String, String>,
}

impl ProfileResolution {
    /// Value the [`PROFILE_LABEL`] node label should have on each node;
    /// `None` means the label must be removed.
    pub fn node_labels(&self, nodes: &[Node]) -> Vec<(String, Option<String>)> {
        nodes
            .iter()
            .filter_map(|node| {
                let name = node.name_any();
                let wanted = self.profile_by_node.get(&name).cloned();
                let current = node.labels().get(PROFILE_LABEL).cloned();
                (wanted != current).then_some((name, wanted))
            })
            .collect()
    }
}

/// Decide which profiles apply, and to which nodes.
pub fn profiles_to_apply(profiles: &[DatadogAgentProfile], nodes: &[Node]) -> ProfileResolution {
    let mut resolution = ProfileResolution::default();
    let mut claimed_by: BTreeMap<String, String> = BTreeMap::new();

    for profile in sort_profiles(profiles) {
        let namespace = profile.namespace().unwrap_or_default();
        let name = profile.name_any();
        let mut status = DatadogAgentProfileStatus {
            current_hash: generate_md5_for_spec(&profile.spec).ok(),
            last_update: Some(jiff::Timestamp::now().to_string()),
            ..Default::default()
        };
        let generation = profile.metadata.generation;

        match claim_nodes(profile, nodes, &claimed_by) {
            Ok(matched) => {
                status.valid = Some("True".to_string());
                status.conditions.push(Condition::new(
                    VALID_CONDITION,
                    true,
                    VALID_REASON,
                    "Valid manifest",
                    generation,
                ));
                if !matched.is_empty() {
                    status.applied = Some("True".to_string());
                    status.conditions.push(Condition::new(
                        APPLIED_CONDITION,
                        true,
                        APPLIED_REASON,
                        "Profile applied",
                        generation,
                    ));
                }
                debug!(profile = %name, nodes = matched.len(), "Profile applied");
                for node in matched {
                    resolution.profile_by_node.insert(node.clone(), name.clone());
                    claimed_by.insert(node, format!("{namespace}/{name}"));
                }
                resolution.applied.push(AppliedProfile {
                    namespace: Some(namespace.clone()),
                    name: name.clone(),
                    spec: profile.spec.clone(),
                });
            }
            Err(ProfileError::Conflict(existing)) => {
                info!(
                    profile = %name,
                    existing = %existing,
                    "Profile conflicts with an older profile, skipping"
                );
                status.valid = Some("True".to_string());
                status.applied = Some("False".to_string());
                status.conditions.push(Condition::new(
                    VALID_CONDITION,
                    true,
                    VALID_REASON,
                    "Valid manifest",
                    generation,
                ));
                status.conditions.push(Condition::new(
                    APPLIED_CONDITION,
                    false,
                    CONFLICT_REASON,
                    "Conflict with existing profile",
                    generation,
                ));
            }
            Err(e) => {
                warn!(profile = %name, error = %e, "Profile is invalid, skipping");
                status.valid = Some("False".to_string());
                status.conditions.push(Condition::new(
                    VALID_CONDITION,
                    false,
                    INVALID_REASON,
                    &e.to_string(),
                    generation,
                ));
            }
        }
        resolution.statuses.push(ProfileStatusUpdate {
            namespace,
            name,
            status,
        });
    }

    resolution.applied.push(AppliedProfile::default_profile());
    resolution
}

/// Profiles ordered by creation timestamp, then name.
pub fn sort_profiles(profiles: &[DatadogAgentProfile]) -> Vec<&DatadogAgentProfile> {
    let mut sorted: Vec<&DatadogAgentProfile> = profiles.iter().collect();
    sorted.sort_by(|a, b| {
        let created = |p: &DatadogAgentProfile| p.metadata.creation_timestamp.as_ref().map(|t| t.0);
        created(a)
            .cmp(&created(b))
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
    sorted
}

/// Nodes the profile matches, or why it cannot be applied.
fn claim_nodes(
    profile: &DatadogAgentProfile,
    nodes: &[Node],
    claimed_by: &BTreeMap<String, String>,
) -> Result<Vec<String>, ProfileError> {
    validate_profile_name(&profile.name_any())?;
    validate_profile_spec(&profile.spec)?;

    let requirements = profile
        .spec
        .profile_affinity
        .as_ref()
        .map(|a| a.profile_node_affinity.as_slice())
        .unwrap_or_default();
    let mut matched = Vec::new();
    for node in nodes {
        if !matches_node(requirements, node.labels())? {
            continue;
        }
        let node_name = node.name_any();
        if let Some(existing) = claimed_by.get(&node_name) {
            return Err(ProfileError::Conflict(existing.clone()));
        }
        matched.push(node_name);
    }
    Ok(matched)
}

pub fn validate_profile_name(name: &str) -> Result<(), ProfileError> {
    if name.is_empty() {
        return Err(ProfileError::InvalidName(name.to_string(), "name cannot be empty"));
    }
    // the name is used as a label value
    if name.len() > LABEL_VALUE_MAX_LENGTH {
        return Err(ProfileError::InvalidName(
            name.to_string(),
            "name must be no more than 63 characters",
        ));
    }
    Ok(())
}

pub fn validate_profile_spec(spec: &DatadogAgentProfileSpec) -> Result<(), ProfileError> {
    let affinity = spec
        .profile_affinity
        .as_ref()
        .ok_or_else(|| ProfileError::InvalidSpec("profileAffinity must be defined".into()))?;
    if affinity.profile_node_affinity.is_empty() {
        return Err(ProfileError::InvalidSpec(
            "profileNodeAffinity must have at least 1 requirement".into(),
        ));
    }
    let config = spec
        .config
        .as_ref()
        .ok_or_else(|| ProfileError::InvalidSpec("config must be defined".into()))?;
    if config.overrides.is_empty() {
        return Err(ProfileError::InvalidSpec("config override must be defined".into()));
    }
    if let Some(component) = config
        .overrides
        .keys()
        .find(|c| **c != ComponentName::NodeAgent)
    {
        return Err(ProfileError::InvalidSpec(format!(
            "override of component {component} is not supported"
        )));
    }
    Ok(())
}

/// Whether every requirement matches the node labels.
pub fn matches_node(
    requirements: &[NodeSelectorRequirement],
    labels: &BTreeMap<String, String>,
) -> Result<bool, ProfileError> {
    for requirement in requirements {
        if !matches_requirement(requirement, labels)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_requirement(
    requirement: &NodeSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, ProfileError> {
    let invalid = |reason: &str| ProfileError::InvalidSelector {
        key: requirement.key.clone(),
        reason: reason.to_string(),
    };
    let values = requirement.values.as_deref().unwrap_or_default();
    let label = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        "In" | "NotIn" => {
            if values.is_empty() {
                return Err(invalid("In and NotIn need at least one value"));
            }
            let found = label.is_some_and(|v| values.contains(v));
            Ok(if requirement.operator == "In" { found } else { !found })
        }
        "Exists" | "DoesNotExist" => {
            if !values.is_empty() {
                return Err(invalid("Exists and DoesNotExist take no values"));
            }
            Ok(label.is_some() == (requirement.operator == "Exists"))
        }
        "Gt" | "Lt" => {
            let [bound] = values else {
                return Err(invalid("Gt and Lt need exactly one value"));
            };
            let bound: i64 = bound
                .parse()
                .map_err(|_| invalid("Gt and Lt need an integer value"))?;
            let Some(actual) = label.and_then(|v| v.parse::<i64>().ok()) else {
                return Ok(false);
            };
            Ok(if requirement.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            })
        }
        other => Err(invalid(&format!("unknown operator {other}"))),
    }
}
