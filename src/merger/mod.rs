//! Merge managers.
//!
//! Features never touch pod templates or dependent objects directly. They go
//! through the managers in this module, which decide what happens when two
//! features contribute the same env var, volume, port or RBAC rule.
//!
//! | Manager | Target |
//! |---------|--------|
//! | `EnvVarManager` | container env, broadcast to every container on finalize |
//! | `VolumeManager` | pod volumes |
//! | `VolumeMountManager` | container volume mounts, broadcast on finalize |
//! | `PortManager` | container ports |
//! | `AnnotationManager` | pod template annotations |
//! | `SecurityContextManager` | container capabilities |
//! | `RbacManager` | Roles, ClusterRoles and their bindings in the store |
//! | `NetworkPolicyManager` | NetworkPolicy objects |
//! | `CiliumPolicyManager` | CiliumNetworkPolicy objects |
//! | `ServiceManager` | Services in the store |

pub mod annotation;
pub mod env;
pub mod network_policy;
pub mod pod_template;
pub mod port;
pub mod rbac;
pub mod resource_managers;
pub mod security_context;
pub mod service;
pub mod volume;

pub use annotation::AnnotationManager;
pub use env::EnvVarManager;
pub use network_policy::{CiliumPolicyManager, NetworkPolicyManager};
pub use pod_template::PodTemplateManagers;
pub use port::PortManager;
pub use rbac::RbacManager;
pub use resource_managers::ResourceManagers;
pub use security_context::SecurityContextManager;
pub use service::ServiceManager;
pub use volume::{VolumeManager, VolumeMountManager};

use thiserror::Error;

/// What to do when an item with the same key is already present.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MergePolicy {
    /// The first writer wins; later contributions are dropped.
    #[default]
    KeepExisting,
    /// The last writer wins.
    Override,
    /// A differing contribution is an error. Identical ones are accepted.
    ErrorOnConflict,
}

/// Errors raised while merging feature contributions.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("conflicting {kind} {name:?} in {target}")]
    Conflict {
        kind: &'static str,
        name: String,
        target: String,
    },

    #[error("store holds a different kind of object under {0}")]
    KindMismatch(String),

    #[error("failed to build {kind} {name}: {reason}")]
    InvalidObject {
        kind: &'static str,
        name: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Merge `item` into `items`, matching on `key`.
///
/// Returns `true` when `items` changed.
pub fn merge_keyed<T, K>(
    items: &mut Vec<T>,
    item: T,
    key: K,
    policy: MergePolicy,
    kind: &'static str,
    target: &str,
) -> Result<bool>
where
    T: PartialEq,
    K: Fn(&T) -> &str,
{
    let Some(existing) = items.iter_mut().find(|i| key(i) == key(&item)) else {
        items.push(item);
        return Ok(true);
    };

    if *existing == item {
        return Ok(false);
    }

    match policy {
        MergePolicy::KeepExisting => Ok(false),
        MergePolicy::Override => {
            *existing = item;
            Ok(true)
        }
        MergePolicy::ErrorOnConflict => Err(MergeError::Conflict {
            kind,
            name: key(&item).to_string(),
            target: target.to_string(),
        }),
    }
}
