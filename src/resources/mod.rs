//! Resource generation module.
//!
//! Builds the Kubernetes objects owned by a DatadogAgent.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | DaemonSet | Node agent, one per profile |
//! | Deployment | Cluster agent and cluster checks runners |
//! | ServiceAccount, (Cluster)Role, (Cluster)RoleBinding | Component and feature RBAC |
//! | Service, APIService | Cluster agent, node-local agent, external metrics |
//! | ConfigMap, Secret | Check configuration, install info, credentials, tokens |
//! | NetworkPolicy, CiliumNetworkPolicy | Optional ingress/egress policies |
//!
//! Pod templates start from the defaults in [`agent`], [`cluster_agent`]
//! and [`cluster_checks_runner`]; dependent objects are collected in a
//! [`store::Store`].

pub mod agent;
pub mod cluster_agent;
pub mod cluster_checks_runner;
pub mod common;
pub mod store;
pub mod volumes;
pub mod workload;

pub use common::{owner_reference, standard_labels};
pub use store::Store;
