//! Managers for the dependent objects of a DatadogAgent.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{CiliumPolicyManager, NetworkPolicyManager, RbacManager, ServiceManager};
use crate::resources::store::Store;

/// Entry point for `manage_dependencies` hooks.
///
/// Besides the store, it carries read-only cluster state the controller
/// fetched before the build (user ConfigMaps referenced by features), so
/// features stay synchronous.
#[derive(Debug, Default)]
pub struct ResourceManagers {
    store: Store,
    config_maps: BTreeMap<(String, String), ConfigMap>,
}

impl ResourceManagers {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            config_maps: BTreeMap::new(),
        }
    }

    /// Make existing ConfigMaps visible to features.
    pub fn with_config_maps(mut self, config_maps: impl IntoIterator<Item = ConfigMap>) -> Self {
        for cm in config_maps {
            let key = (
                cm.metadata.namespace.clone().unwrap_or_default(),
                cm.metadata.name.clone().unwrap_or_default(),
            );
            self.config_maps.insert(key, cm);
        }
        self
    }

    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn rbac(&mut self) -> RbacManager<'_> {
        RbacManager {
            store: &mut self.store,
        }
    }

    pub fn service(&mut self) -> ServiceManager<'_> {
        ServiceManager {
            store: &mut self.store,
        }
    }

    pub fn network_policy(&mut self) -> NetworkPolicyManager<'_> {
        NetworkPolicyManager {
            store: &mut self.store,
        }
    }

    pub fn cilium_policy(&mut self) -> CiliumPolicyManager<'_> {
        CiliumPolicyManager {
            store: &mut self.store,
        }
    }

    /// A ConfigMap that existed in the cluster when the reconcile started.
    pub fn existing_config_map(&self, namespace: &str, name: &str) -> Option<&ConfigMap> {
        self.config_maps
            .get(&(namespace.to_string(), name.to_string()))
    }

    pub fn into_store(self) -> Store {
        self.store
    }
}
