//! Dependency store.
//!
//! Features accumulate the objects a DatadogAgent depends on (ConfigMaps,
//! Services, RBAC, network policies) in a [`Store`] during a reconcile. The
//! apply layer then creates or updates everything in the store and deletes
//! previously managed objects that are no longer present.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::Resource;

use crate::crd::{CiliumNetworkPolicy, DatadogAgent};
use crate::merger::{MergeError, Result};
use crate::resources::common::{MANAGED_BY_STORE_LABEL, owner_reference, standard_labels};

/// An object type the store can hold.
pub trait StoreObject: Resource<DynamicType = ()> + Clone + Default {
    const KIND: ObjectKind;

    fn wrap(self) -> DependentObject;
    fn from_ref(obj: &DependentObject) -> Option<&Self>;
    fn from_mut(obj: &mut DependentObject) -> Option<&mut Self>;
}

macro_rules! dependent_objects {
    ($($variant:ident($ty:ty) => namespaced: $namespaced:expr),+ $(,)?) => {
        /// Kind of a dependent object.
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub enum ObjectKind {
            $($variant),+
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$variant),+];

            pub fn is_namespaced(&self) -> bool {
                match self {
                    $(ObjectKind::$variant => $namespaced),+
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => stringify!($variant)),+
                }
            }
        }

        /// A dependent object of any supported kind.
        #[derive(Clone, Debug, PartialEq)]
        pub enum DependentObject {
            $($variant($ty)),+
        }

        impl DependentObject {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(DependentObject::$variant(_) => ObjectKind::$variant),+
                }
            }

            pub fn meta(&self) -> &ObjectMeta {
                match self {
                    $(DependentObject::$variant(o) => o.meta()),+
                }
            }

            pub fn meta_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(DependentObject::$variant(o) => o.meta_mut()),+
                }
            }

            pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
                match self {
                    $(DependentObject::$variant(o) => serde_json::to_value(o)),+
                }
            }
        }

        $(
            impl StoreObject for $ty {
                const KIND: ObjectKind = ObjectKind::$variant;

                fn wrap(self) -> DependentObject {
                    DependentObject::$variant(self)
                }

                fn from_ref(obj: &DependentObject) -> Option<&Self> {
                    match obj {
                        DependentObject::$variant(o) => Some(o),
                        _ => None,
                    }
                }

                fn from_mut(obj: &mut DependentObject) -> Option<&mut Self> {
                    match obj {
                        DependentObject::$variant(o) => Some(o),
                        _ => None,
                    }
                }
            }
        )+
    };
}

dependent_objects! {
    ConfigMap(ConfigMap) => namespaced: true,
    Secret(Secret) => namespaced: true,
    Service(Service) => namespaced: true,
    ServiceAccount(ServiceAccount) => namespaced: true,
    Role(Role) => namespaced: true,
    RoleBinding(RoleBinding) => namespaced: true,
    ClusterRole(ClusterRole) => namespaced: false,
    ClusterRoleBinding(ClusterRoleBinding) => namespaced: false,
    NetworkPolicy(NetworkPolicy) => namespaced: true,
    CiliumNetworkPolicy(CiliumNetworkPolicy) => namespaced: true,
    APIService(APIService) => namespaced: false,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a dependent object. Cluster-scoped objects have an empty
/// namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.to_string()
            } else {
                String::new()
            },
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Accumulator of the dependent objects of one DatadogAgent.
#[derive(Clone, Debug, Default)]
pub struct Store {
    objects: BTreeMap<ObjectKey, DependentObject>,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
}

impl Store {
    /// A store whose objects are labelled for and owned by `dda`.
    pub fn new(dda: &DatadogAgent) -> Self {
        Self {
            objects: BTreeMap::new(),
            labels: standard_labels(dda),
            owner: Some(owner_reference(dda)),
        }
    }

    /// Fetch an object, inserting an empty one when missing.
    pub fn get_or_create<T: StoreObject>(&mut self, namespace: &str, name: &str) -> Result<&mut T> {
        let key = ObjectKey::new(T::KIND, namespace, name);
        let labels = &self.labels;
        let owner = self.owner.as_ref();
        let entry = self.objects.entry(key.clone()).or_insert_with(|| {
            let mut obj = T::default();
            let meta = obj.meta_mut();
            meta.name = Some(key.name.clone());
            if !key.namespace.is_empty() {
                meta.namespace = Some(key.namespace.clone());
            }
            stamp(meta, T::KIND, labels, owner);
            obj.wrap()
        });
        T::from_mut(entry).ok_or_else(|| MergeError::KindMismatch(key.to_string()))
    }

    /// Insert or replace an object, keyed by its own metadata.
    pub fn add_or_update<T: StoreObject>(&mut self, mut obj: T) {
        let meta = obj.meta_mut();
        let key = ObjectKey::new(
            T::KIND,
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        );
        if !T::KIND.is_namespaced() {
            meta.namespace = None;
        }
        stamp(meta, T::KIND, &self.labels, self.owner.as_ref());
        self.objects.insert(key, obj.wrap());
    }

    pub fn get<T: StoreObject>(&self, namespace: &str, name: &str) -> Option<&T> {
        self.objects
            .get(&ObjectKey::new(T::KIND, namespace, name))
            .and_then(T::from_ref)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Remove an object. Returns whether it was present.
    pub fn delete(&mut self, kind: ObjectKind, namespace: &str, name: &str) -> bool {
        self.objects
            .remove(&ObjectKey::new(kind, namespace, name))
            .is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.objects.keys()
    }

    pub fn objects(&self) -> impl Iterator<Item = &DependentObject> {
        self.objects.values()
    }

    /// Objects of one kind, in key order.
    pub fn objects_of<'a, T: StoreObject + 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        self.objects
            .iter()
            .filter(|(k, _)| k.kind == T::KIND)
            .filter_map(|(_, o)| T::from_ref(o))
    }

    pub fn into_objects(self) -> Vec<DependentObject> {
        self.objects.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn stamp(
    meta: &mut ObjectMeta,
    kind: ObjectKind,
    labels: &BTreeMap<String, String>,
    owner: Option<&OwnerReference>,
) {
    let obj_labels = meta.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in labels {
        obj_labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    obj_labels.insert(MANAGED_BY_STORE_LABEL.to_string(), "true".to_string());

    if kind.is_namespaced()
        && let Some(owner) = owner
    {
        let refs = meta.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid && r.kind == owner.kind) {
            refs.push(owner.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::resources::common::tests::test_dda;

    #[test]
    fn test_get_or_create_stamps_metadata() {
        let mut store = Store::new(&test_dda("dd"));
        let cm = store.get_or_create::<ConfigMap>("datadog", "dd-config").unwrap();

        assert_eq!(cm.metadata.namespace.as_deref(), Some("datadog"));
        let labels = cm.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(MANAGED_BY_STORE_LABEL).unwrap(), "true");
        assert_eq!(cm.metadata.owner_references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_cluster_scoped_objects_have_no_owner() {
        let mut store = Store::new(&test_dda("dd"));
        let role = store.get_or_create::<ClusterRole>("datadog", "dd-agent").unwrap();

        assert!(role.metadata.namespace.is_none());
        assert!(role.metadata.owner_references.is_none());
        assert!(store.get::<ClusterRole>("", "dd-agent").is_some());
    }

    #[test]
    fn test_get_or_create_returns_existing() {
        let mut store = Store::new(&test_dda("dd"));
        store
            .get_or_create::<ConfigMap>("datadog", "cm")
            .unwrap()
            .data = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
        let again = store.get_or_create::<ConfigMap>("datadog", "cm").unwrap();
        assert!(again.data.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_or_update_replaces() {
        let mut store = Store::new(&test_dda("dd"));
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("cm".to_string());
        cm.metadata.namespace = Some("datadog".to_string());
        store.add_or_update(cm.clone());
        cm.data = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
        store.add_or_update(cm);

        assert_eq!(store.len(), 1);
        assert!(store.get::<ConfigMap>("datadog", "cm").unwrap().data.is_some());
    }

    #[test]
    fn test_delete() {
        let mut store = Store::new(&test_dda("dd"));
        store.get_or_create::<Service>("datadog", "svc").unwrap();
        assert!(store.delete(ObjectKind::Service, "datadog", "svc"));
        assert!(!store.delete(ObjectKind::Service, "datadog", "svc"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_objects_are_ordered_by_key() {
        let mut store = Store::new(&test_dda("dd"));
        store.get_or_create::<Service>("datadog", "b").unwrap();
        store.get_or_create::<ConfigMap>("datadog", "z").unwrap();
        store.get_or_create::<Service>("datadog", "a").unwrap();

        let kinds: Vec<_> = store.keys().map(|k| (k.kind, k.name.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (ObjectKind::ConfigMap, "z".to_string()),
                (ObjectKind::Service, "a".to_string()),
                (ObjectKind::Service, "b".to_string()),
            ]
        );
    }
}
