//! Controller-specific error types.

use cloudprovider::CloudError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Cloud Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud integration error
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when the reconcile should be retried rather than surfaced as a
    /// terminal failure.
    pub fn should_retry(&self) -> bool {
        match self {
            ControllerError::Kube(_) => true,
            ControllerError::Cloud(e) => e.should_retry(),
            _ => false,
        }
    }
}
