//! Service manager.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{MergePolicy, Result, merge_keyed};
use crate::resources::store::Store;

pub struct ServiceManager<'a> {
    pub(crate) store: &'a mut Store,
}

impl ServiceManager<'_> {
    /// Create or extend a ClusterIP Service.
    ///
    /// Ports are merged by name with the first writer winning, so two
    /// features may expose ports on the same local Service.
    pub fn add_service(
        &mut self,
        name: &str,
        namespace: &str,
        selector: BTreeMap<String, String>,
        ports: Vec<ServicePort>,
        internal_traffic_policy: Option<&str>,
    ) -> Result<()> {
        let service = self.store.get_or_create::<Service>(namespace, name)?;
        let spec = service.spec.get_or_insert_with(ServiceSpec::default);
        spec.type_ = Some("ClusterIP".to_string());
        spec.selector = Some(selector);
        if let Some(policy) = internal_traffic_policy {
            spec.internal_traffic_policy = Some(policy.to_string());
        }
        let existing = spec.ports.get_or_insert_with(Vec::new);
        for port in ports {
            merge_keyed(
                existing,
                port,
                |p: &ServicePort| p.name.as_deref().unwrap_or_default(),
                MergePolicy::KeepExisting,
                "service port",
                name,
            )?;
        }
        Ok(())
    }
}

pub fn service_port(name: &str, port: i32, target_port: i32, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target_port)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}
