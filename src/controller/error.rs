//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::feature::FeatureError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A feature hook or a merge failed while building the desired state
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            // The DatadogAgent or a ConfigMap it references may be fixed
            // without a generation bump, so feature errors are retried too.
            Error::Feature(_) => true,
            Error::Validation(_) | Error::MissingField(_) | Error::Serialization(_) => false,
        }
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::Feature(_) => "feature",
            Error::MissingField(_) => "missing_field",
            Error::Validation(_) => "validation",
            Error::Serialization(_) => "serialization",
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        match self {
            Error::Kube(_) if self.is_retryable() => Duration::from_secs(15),
            Error::Feature(_) => Duration::from_secs(60),
            _ => Duration::from_secs(300),
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::merger::MergeError;

    #[test]
    fn test_spec_errors_are_not_retried() {
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::MissingField("metadata.namespace".into()).is_retryable());
        assert_eq!(
            Error::Validation("bad".into()).requeue_after(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_feature_errors_requeue_slowly() {
        let err = Error::from(FeatureError::from(MergeError::Conflict {
            kind: "env var",
            name: "DD_SITE".into(),
            target: "agent".into(),
        }));
        assert!(err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(60));
    }
}
