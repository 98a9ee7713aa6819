//! Container port manager.

use k8s_openapi::api::core::v1::ContainerPort;

use super::{MergePolicy, PodTemplateManagers, Result, merge_keyed};
use crate::crd::AgentContainerName;

pub struct PortManager<'a> {
    pub(crate) managers: &'a mut PodTemplateManagers,
}

impl PortManager<'_> {
    /// Add a named port to a container, keeping an existing port of the
    /// same name.
    pub fn add_port_to_container(&mut self, container: AgentContainerName, port: ContainerPort) {
        // KeepExisting never fails
        let _ = self.add_port_to_container_with_merge(container, port, MergePolicy::KeepExisting);
    }

    pub fn add_port_to_container_with_merge(
        &mut self,
        container: AgentContainerName,
        port: ContainerPort,
        policy: MergePolicy,
    ) -> Result<()> {
        let Some(c) = self.managers.container_mut(container) else {
            return Ok(());
        };
        let ports = c.ports.get_or_insert_with(Vec::new);
        merge_keyed(
            ports,
            port,
            |p: &ContainerPort| p.name.as_deref().unwrap_or_default(),
            policy,
            "port",
            container.as_str(),
        )?;
        Ok(())
    }
}

/// A named container port.
pub fn container_port(name: &str, port: i32, protocol: &str) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}
