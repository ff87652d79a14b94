//! Controller-specific error types.
//!
//! Cloud agent errors are wrapped with the operation, resource kind and
//! resource name before they leave the component that issued the call.

use cloud_client::CloudError;
use crds::SpecError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the infrastructure controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud agent error, with the failed operation
    #[error("failed to {op} {kind} {name}: {source}")]
    Cloud {
        op: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: CloudError,
    },

    /// Spec cannot be acted on; terminal until the spec changes
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency conflict on write
    #[error("Conflict writing {0}")]
    Conflict(String),

    /// Object not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Object is missing its name or namespace
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// JSON (de)serialization of an object failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry setup failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Wrap a cloud error with the operation that produced it.
    pub fn cloud(op: &'static str, kind: &'static str, name: impl Into<String>, source: CloudError) -> Self {
        Self::Cloud { op, kind, name: name.into(), source }
    }

    /// Whether retrying without a spec change cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::MissingObjectKey(_) | Self::InvalidConfig(_))
    }

    /// Underlying cloud error, if any.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        match self {
            Self::Cloud { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::Cloud { .. } => "cloud",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Watch(_) => "watch",
            Self::MissingObjectKey(_) => "missing_object_key",
            Self::Serialization(_) => "serialization",
            Self::Metrics(_) => "metrics",
        }
    }
}

impl From<SpecError> for ControllerError {
    fn from(err: SpecError) -> Self {
        Self::Validation(err.to_string())
    }
}
