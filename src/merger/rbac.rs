//! RBAC manager.
//!
//! Rules added for the same Role (or ClusterRole) by different features are
//! unioned. The binding of the same name gains each service account subject
//! once.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

use super::Result;
use crate::resources::store::Store;

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

pub struct RbacManager<'a> {
    pub(crate) store: &'a mut Store,
}

impl RbacManager<'_> {
    pub fn add_service_account(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.store.get_or_create::<ServiceAccount>(namespace, name)?;
        Ok(())
    }

    /// Add rules to a namespaced Role and bind it to `sa_name`.
    pub fn add_policy_rules(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        let role = self.store.get_or_create::<Role>(namespace, role_name)?;
        let mut all = role.rules.take().unwrap_or_default();
        all.extend(rules);
        role.rules = Some(normalize_policy_rules(all));

        let binding = self
            .store
            .get_or_create::<RoleBinding>(namespace, role_name)?;
        binding.role_ref = role_ref("Role", role_name);
        add_subject(binding.subjects.get_or_insert_with(Vec::new), namespace, sa_name);
        Ok(())
    }

    /// Add rules to a ClusterRole and bind it to `sa_name` in `namespace`.
    pub fn add_cluster_policy_rules(
        &mut self,
        namespace: &str,
        role_name: &str,
        sa_name: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        let role = self.store.get_or_create::<ClusterRole>("", role_name)?;
        let mut all = role.rules.take().unwrap_or_default();
        all.extend(rules);
        role.rules = Some(normalize_policy_rules(all));

        self.add_cluster_role_binding(
            namespace,
            role_name,
            sa_name,
            role_ref("ClusterRole", role_name),
        )
    }

    /// Bind an existing (possibly external) ClusterRole to `sa_name`.
    pub fn add_cluster_role_binding(
        &mut self,
        namespace: &str,
        name: &str,
        sa_name: &str,
        role_ref: RoleRef,
    ) -> Result<()> {
        let binding = self.store.get_or_create::<ClusterRoleBinding>("", name)?;
        binding.role_ref = role_ref;
        add_subject(binding.subjects.get_or_insert_with(Vec::new), namespace, sa_name);
        Ok(())
    }
}

pub fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn add_subject(subjects: &mut Vec<Subject>, namespace: &str, sa_name: &str) {
    let present = subjects.iter().any(|s| {
        s.kind == "ServiceAccount" && s.name == sa_name && s.namespace.as_deref() == Some(namespace)
    });
    if !present {
        subjects.push(Subject {
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: Some(namespace.to_string()),
            api_group: None,
        });
    }
}

/// Sort every list inside each rule, order rules canonically and drop
/// duplicates.
pub fn normalize_policy_rules(rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
    let mut keyed: Vec<(String, PolicyRule)> = rules
        .into_iter()
        .map(|mut rule| {
            rule.verbs.sort();
            for list in [
                &mut rule.api_groups,
                &mut rule.resources,
                &mut rule.resource_names,
                &mut rule.non_resource_urls,
            ]
            .into_iter()
            .flatten()
            {
                list.sort();
            }
            let key = serde_json::to_string(&rule).unwrap_or_default();
            (key, rule)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    keyed.into_iter().map(|(_, rule)| rule).collect()
}

/// Rule granting `verbs` on `resources` of `api_group`.
pub fn policy_rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Rule restricted to named objects.
pub fn named_policy_rule(
    api_group: &str,
    resources: &[&str],
    names: &[&str],
    verbs: &[&str],
) -> PolicyRule {
    PolicyRule {
        resource_names: Some(names.iter().map(|n| n.to_string()).collect()),
        ..policy_rule(api_group, resources, verbs)
    }
}

/// Rule on non-resource URLs such as `/metrics`.
pub fn non_resource_rule(urls: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        non_resource_urls: Some(urls.iter().map(|u| u.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::resources::common::tests::test_dda;

    #[test]
    fn test_rules_are_unioned_and_deduplicated() {
        let mut store = Store::new(&test_dda("dd"));
        let mut rbac = RbacManager { store: &mut store };
        rbac.add_policy_rules(
            "datadog",
            "dd-cluster-agent",
            "dd-cluster-agent",
            vec![policy_rule("", &["configmaps"], &["get", "create"])],
        )
        .unwrap();
        rbac.add_policy_rules(
            "datadog",
            "dd-cluster-agent",
            "dd-cluster-agent",
            vec![
                policy_rule("", &["configmaps"], &["create", "get"]),
                policy_rule("", &["events"], &["create"]),
            ],
        )
        .unwrap();

        let role = store.get::<Role>("datadog", "dd-cluster-agent").unwrap();
        let rules = role.rules.as_ref().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].verbs, vec!["create", "get"]);

        let binding = store.get::<RoleBinding>("datadog", "dd-cluster-agent").unwrap();
        assert_eq!(binding.subjects.as_ref().unwrap().len(), 1);
        assert_eq!(binding.role_ref.kind, "Role");
    }

    #[test]
    fn test_cluster_rules_bind_each_service_account_once() {
        let mut store = Store::new(&test_dda("dd"));
        let mut rbac = RbacManager { store: &mut store };
        let rule = policy_rule("", &["nodes"], &["get"]);
        rbac.add_cluster_policy_rules("datadog", "dd-agent", "dd-agent", vec![rule.clone()])
            .unwrap();
        rbac.add_cluster_policy_rules("datadog", "dd-agent", "dd-agent", vec![rule])
            .unwrap();
        rbac.add_cluster_policy_rules("datadog", "dd-agent", "other-sa", vec![])
            .unwrap();

        let binding = store.get::<ClusterRoleBinding>("", "dd-agent").unwrap();
        let subjects = binding.subjects.as_ref().unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].namespace.as_deref(), Some("datadog"));
        assert_eq!(
            store.get::<ClusterRole>("", "dd-agent").unwrap().rules.as_ref().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_normalize_is_order_independent() {
        let a = policy_rule("apps", &["deployments", "daemonsets"], &["list", "get"]);
        let b = policy_rule("", &["pods"], &["watch"]);
        assert_eq!(
            normalize_policy_rules(vec![a.clone(), b.clone()]),
            normalize_policy_rules(vec![b, a])
        );
    }
}
