//! Controller module for datadog-operator.
//!
//! Contains the reconciliation loop, the apply layer, error handling and
//! status management for DatadogAgent resources.

pub mod apply;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
