//! EC2 wrapper errors

use thiserror::Error;

/// Errors surfaced by the EC2 API wrapper.
#[derive(Debug, Error)]
pub enum AwsError {
    /// SDK call failed (throttling, 5xx, connectivity, auth).
    #[error("EC2 API error in {operation}: {message}")]
    Api { operation: String, message: String },

    /// The referenced object does not exist in the cloud.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create raced with an existing object of the same name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Credential material was rejected while building the client.
    #[error("credential error: {0}")]
    Credential(String),
}

impl AwsError {
    pub(crate) fn api(operation: &str, message: impl ToString) -> Self {
        AwsError::Api {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}
