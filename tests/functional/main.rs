// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the DatadogAgent build pipeline.
//!
//! These tests run the whole feature engine (every built-in feature, global
//! settings, overrides and profiles) against DatadogAgent manifests and
//! inspect the resulting workloads and dependent objects. No cluster is
//! needed.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_apm_host_port_and_socket
//! ```
//!
//! ## Test Categories
//!
//! - **Feature scenarios**: one or more features enabled together
//! - **Override scenarios**: `spec.override`, profiles and component conflicts

#[path = "../common/fixtures.rs"]
#[allow(dead_code)]
mod fixtures;

mod feature_scenarios;
mod override_scenarios;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};

use datadog_operator::crd::DatadogAgent;
use datadog_operator::feature::FeatureRegistry;
use datadog_operator::orchestrator::{BuildOptions, DesiredState, build_desired_state};

/// Build with the built-in features and default options.
pub fn build(dda: &DatadogAgent) -> DesiredState {
    build_with(dda, &BuildOptions::default())
}

pub fn build_with(dda: &DatadogAgent, options: &BuildOptions) -> DesiredState {
    build_desired_state(dda, FeatureRegistry::builtin(), options).expect("build succeeds")
}

pub fn daemonset_template(ds: &DaemonSet) -> &PodTemplateSpec {
    &ds.spec.as_ref().unwrap().template
}

pub fn deployment_template(deployment: &Deployment) -> &PodTemplateSpec {
    &deployment.spec.as_ref().unwrap().template
}

pub fn container<'a>(template: &'a PodTemplateSpec, name: &str) -> &'a Container {
    template
        .spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("container {name} not found"))
}

pub fn container_names(template: &PodTemplateSpec) -> Vec<String> {
    template
        .spec
        .as_ref()
        .unwrap()
        .containers
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

pub fn env_value(container: &Container, name: &str) -> Option<String> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)?
        .value
        .clone()
}

pub fn annotation(template: &PodTemplateSpec, key: &str) -> Option<String> {
    template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(key)
        .cloned()
}

pub fn volume_names(template: &PodTemplateSpec) -> Vec<String> {
    template
        .spec
        .as_ref()
        .unwrap()
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.clone())
        .collect()
}
