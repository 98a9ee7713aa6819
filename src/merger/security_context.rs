//! Container security context manager.

use k8s_openapi::api::core::v1::{Capabilities, SecurityContext};

use super::PodTemplateManagers;
use crate::crd::AgentContainerName;

pub struct SecurityContextManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl SecurityContextManager<'_> {
    /// Add Linux capabilities to a container. Capabilities already present
    /// are not repeated.
    pub fn add_capabilities_to_container(
        &mut self,
        capabilities: &[&str],
        container: AgentContainerName,
    ) {
        let Some(c) = self.managers.container_mut(container) else {
            return;
        };
        let add = c
            .security_context
            .get_or_insert_with(SecurityContext::default)
            .capabilities
            .get_or_insert_with(Capabilities::default)
            .add
            .get_or_insert_with(Vec::new);
        for cap in capabilities {
            if !add.iter().any(|existing| existing == cap) {
                add.push(cap.to_string());
            }
        }
    }
}
