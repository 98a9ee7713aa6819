//! Custom Resource Definitions (CRDs) for datadog-operator.
//!
//! - `DatadogAgent`: the features and overrides of an agent deployment
//! - `DatadogAgentProfile`: node-targeted variants of the node agent
//! - `CiliumNetworkPolicy`: emitted, never reconciled

mod cilium;
mod common;
mod datadog_agent;
mod features;
mod profile;

pub use cilium::*;
pub use common::*;
pub use datadog_agent::*;
pub use features::*;
pub use profile::*;
