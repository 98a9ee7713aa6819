//! Environment variable manager.

use k8s_openapi::api::core::v1::EnvVar;

use super::{MergePolicy, PodTemplateManagers, Result, merge_keyed};
use crate::crd::AgentContainerName;

pub struct EnvVarManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl EnvVarManager<'_> {
    /// Queue an env var for every container and init container.
    pub fn add_env_var(&mut self, env: EnvVar) {
        let queue = &mut self.managers.broadcast_env;
        if !queue.iter().any(|e| e.name == env.name) {
            queue.push(env);
        }
    }

    /// Add an env var to one container, keeping any existing value.
    ///
    /// Does nothing when the container is not part of the template.
    pub fn add_env_var_to_container(&mut self, container: AgentContainerName, env: EnvVar) {
        // KeepExisting never fails
        let _ = self.add_env_var_to_container_with_merge(container, env, MergePolicy::KeepExisting);
    }

    pub fn add_env_var_to_container_with_merge(
        &mut self,
        container: AgentContainerName,
        env: EnvVar,
        policy: MergePolicy,
    ) -> Result<()> {
        let Some(c) = self.managers.container_mut(container) else {
            return Ok(());
        };
        merge_env_var(c.env.get_or_insert_with(Vec::new), env, policy, container.as_str())
    }

    /// Append `value` to a space separated env var, creating it if needed.
    /// A value already in the list is not added twice.
    pub fn append_env_var_to_container(
        &mut self,
        container: AgentContainerName,
        name: &str,
        value: &str,
    ) {
        let Some(c) = self.managers.container_mut(container) else {
            return;
        };
        let list = c.env.get_or_insert_with(Vec::new);
        match list.iter_mut().find(|e| e.name == name) {
            Some(existing) => {
                let current = existing.value.get_or_insert_with(String::new);
                if !current.split_whitespace().any(|v| v == value) {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(value);
                }
            }
            None => list.push(env_var(name, value)),
        }
    }

    /// Add an env var to several containers.
    pub fn add_env_var_to_containers(&mut self, containers: &[AgentContainerName], env: EnvVar) {
        for container in containers {
            self.add_env_var_to_container(*container, env.clone());
        }
    }
}

/// Merge one env var into a container env list.
pub fn merge_env_var(
    list: &mut Vec<EnvVar>,
    env: EnvVar,
    policy: MergePolicy,
    target: &str,
) -> Result<()> {
    merge_keyed(list, env, |e: &EnvVar| e.name.as_str(), policy, "env var", target)?;
    Ok(())
}

/// Plain `name=value` env var.
pub fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Env var holding `"true"` or `"false"`.
pub fn bool_env_var(name: &str, value: bool) -> EnvVar {
    env_var(name, if value { "true" } else { "false" })
}
