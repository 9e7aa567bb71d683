//! Azure client errors

use thiserror::Error;

/// Errors that can occur when talking to Azure Resource Manager.
#[derive(Debug, Error)]
pub enum AzureError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// ARM returned a non-success status
    #[error("Azure API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Token acquisition failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body did not parse
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
