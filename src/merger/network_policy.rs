//! Network policy managers.
//!
//! Each feature owns the policies it creates; two features never write to
//! the same policy object.

use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{MergeError, Result};
use crate::crd::{CiliumNetworkPolicy, CiliumNetworkPolicySpec};
use crate::resources::store::Store;

pub struct NetworkPolicyManager<'a> {
    pub(crate) store: &'a mut Store,
}

impl NetworkPolicyManager<'_> {
    /// Create a Kubernetes NetworkPolicy. Policy types are derived from the
    /// rules when `policy_types` is empty.
    pub fn add_kubernetes_network_policy(
        &mut self,
        name: &str,
        namespace: &str,
        pod_selector: LabelSelector,
        policy_types: &[&str],
        ingress: Vec<NetworkPolicyIngressRule>,
        egress: Vec<NetworkPolicyEgressRule>,
    ) -> Result<()> {
        let mut types: Vec<&str> = policy_types.to_vec();
        if types.is_empty() {
            if !ingress.is_empty() {
                types.push("Ingress");
            }
            if !egress.is_empty() {
                types.push("Egress");
            }
        }

        let spec: NetworkPolicySpec = serde_json::from_value(serde_json::json!({
            "podSelector": pod_selector,
            "policyTypes": types,
            "ingress": ingress,
            "egress": egress,
        }))
        .map_err(|e| MergeError::InvalidObject {
            kind: "NetworkPolicy",
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let policy = self.store.get_or_create::<NetworkPolicy>(namespace, name)?;
        policy.spec = Some(spec);
        Ok(())
    }
}

pub struct CiliumPolicyManager<'a> {
    pub(crate) store: &'a mut Store,
}

impl CiliumPolicyManager<'_> {
    pub fn add_cilium_policy(
        &mut self,
        name: &str,
        namespace: &str,
        spec: CiliumNetworkPolicySpec,
    ) -> Result<()> {
        let policy = self
            .store
            .get_or_create::<CiliumNetworkPolicy>(namespace, name)?;
        policy.spec = spec;
        Ok(())
    }
}

/// Ingress rule allowing one port from anywhere, or from `from` when given.
pub fn ingress_on_port(
    port: i32,
    protocol: &str,
    from: Vec<NetworkPolicyPeer>,
) -> NetworkPolicyIngressRule {
    NetworkPolicyIngressRule {
        from: if from.is_empty() { None } else { Some(from) },
        ports: Some(vec![NetworkPolicyPort {
            port: Some(IntOrString::Int(port)),
            protocol: Some(protocol.to_string()),
            end_port: None,
        }]),
    }
}

/// Peer selecting pods by label in the policy's namespace.
pub fn pod_peer(selector: LabelSelector) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(selector),
        ..Default::default()
    }
}
