//! Status management utilities.
//!
//! Provides helpers for building DatadogAgent status conditions and the
//! per-component workload summaries.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{ComponentStatus, Condition, ConditionType};
use crate::resources::common::MD5_ANNOTATION;

/// Add or replace a condition of the same type.
///
/// The transition time is kept when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time.clone();
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: ConditionType) {
    conditions.retain(|c| c.r#type != condition_type.as_str());
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type.as_str())
        .is_some_and(Condition::is_true)
}

/// Summary of the node agent DaemonSets, profile DaemonSets included.
pub fn daemonsets_status(daemonsets: &[DaemonSet], now: &str) -> ComponentStatus {
    let mut status = ComponentStatus {
        last_update: Some(now.to_string()),
        ..Default::default()
    };
    for ds in daemonsets {
        if let Some(s) = ds.status.as_ref() {
            status.desired += s.desired_number_scheduled;
            status.current += s.current_number_scheduled;
            status.ready += s.number_ready;
            status.up_to_date += s.updated_number_scheduled.unwrap_or(0);
        }
        if status.current_hash.is_none() {
            status.current_hash = md5_annotation(&ds.metadata);
        }
    }
    status.status = summary(&status);
    status
}

/// Summary of a cluster agent or cluster checks runner Deployment.
pub fn deployment_status(deployment: &Deployment, now: &str) -> ComponentStatus {
    let mut status = ComponentStatus {
        last_update: Some(now.to_string()),
        current_hash: md5_annotation(&deployment.metadata),
        ..Default::default()
    };
    status.desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    if let Some(s) = deployment.status.as_ref() {
        status.current = s.replicas.unwrap_or(0);
        status.ready = s.ready_replicas.unwrap_or(0);
        status.up_to_date = s.updated_replicas.unwrap_or(0);
    }
    status.status = summary(&status);
    status
}

fn md5_annotation(meta: &ObjectMeta) -> Option<String> {
    meta.annotations.as_ref()?.get(MD5_ANNOTATION).cloned()
}

/// `Running (desired/ready/up-to-date)` once every pod is ready and updated,
/// `Progressing (...)` otherwise.
fn summary(status: &ComponentStatus) -> String {
    let state = if status.desired > 0
        && status.ready == status.desired
        && status.up_to_date == status.desired
    {
        "Running"
    } else {
        "Progressing"
    };
    format!(
        "{state} ({}/{}/{})",
        status.desired, status.ready, status.up_to_date
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentSpec, DeploymentStatus};

    fn condition(status: bool, time: &str) -> Condition {
        let mut c = Condition::new(
            ConditionType::AgentReconcile.as_str(),
            status,
            "Reconciled",
            "",
            Some(1),
        );
        c.last_transition_time = time.to_string();
        c
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let mut conditions = vec![condition(true, "t0")];
        set_condition(&mut conditions, condition(true, "t1"));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, "t0");

        set_condition(&mut conditions, condition(false, "t2"));
        assert_eq!(conditions[0].last_transition_time, "t2");
        assert!(!is_condition_true(&conditions, ConditionType::AgentReconcile));

        remove_condition(&mut conditions, ConditionType::AgentReconcile);
        assert!(conditions.is_empty());
    }

    #[test]
    fn test_daemonsets_are_summed() {
        let ds = |desired, ready| DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                current_number_scheduled: desired,
                number_ready: ready,
                updated_number_scheduled: Some(desired),
                ..Default::default()
            }),
            ..Default::default()
        };
        let status = daemonsets_status(&[ds(3, 3), ds(2, 1)], "now");
        assert_eq!((status.desired, status.ready, status.up_to_date), (5, 4, 5));
        assert_eq!(status.status, "Progressing (5/4/5)");
        assert_eq!(status.last_update.as_deref(), Some("now"));
    }

    #[test]
    fn test_ready_deployment_is_running() {
        let deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(2),
                ready_replicas: Some(2),
                updated_replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(deployment_status(&deployment, "now").status, "Running (2/2/2)");
    }
}
