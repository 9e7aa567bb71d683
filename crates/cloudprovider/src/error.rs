//! Crate-wide error type and retry classification.

use crate::types::NamespacedName;
use aws_client::AwsError;
use azure_client::AzureError;
use thiserror::Error;

/// Token embedded in the unknown-provider error text so upstream controllers
/// can classify it without matching the full message.
pub const ERROR_MSG_UNKNOWN_CLOUD_PROVIDER: &str = "ErrorMsgUnknownCloudProvider";

#[derive(Debug, Error)]
pub enum CloudError {
    /// The account CR names no recognized provider configuration.
    #[error("ErrorMsgUnknownCloudProvider: account defines no supported cloud provider config")]
    UnknownCloudProvider,

    /// Malformed account CR (missing poll interval, conflicting configs).
    #[error("invalid account configuration: {0}")]
    InvalidConfiguration(String),

    /// No registered account under the given key.
    #[error("unable to find cloud account config: {0}")]
    AccountNotFound(NamespacedName),

    /// Secret missing, malformed JSON, empty required field. Retryable.
    #[error("failed to resolve account credentials: {0}")]
    CredentialResolution(String),

    /// The referenced VPC is absent from the latest inventory snapshot.
    #[error("vpc {vpc} not found in inventory for account {account}")]
    VpcNotInSnapshot { vpc: String, account: String },

    /// Inventory never initialized within the bounded wait. Retryable.
    #[error("inventory for account {0} not initialized")]
    InventoryNotInitialized(String),

    /// A rule carries no network-policy identity and cannot be written.
    #[error("rule for security group {group} has no network policy identity")]
    RuleMissingDescription { group: String },

    /// Attempt to mutate a cloud object the controller does not own.
    #[error("cloud object {0} is not managed by this controller")]
    UnmanagedObject(String),

    /// Selector could not be compiled into a provider query.
    #[error("error creating resource query filters: {0}")]
    SelectorCompilation(String),

    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error(transparent)]
    Azure(#[from] AzureError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl CloudError {
    /// True for failures the caller should requeue rather than surface as
    /// terminal (missing/malformed secrets, uninitialized inventory,
    /// transient cloud and cluster errors).
    pub fn should_retry(&self) -> bool {
        match self {
            CloudError::CredentialResolution(_)
            | CloudError::InventoryNotInitialized(_)
            | CloudError::Kube(_) => true,
            CloudError::Aws(AwsError::Api { .. }) => true,
            CloudError::Azure(AzureError::Http(_)) | CloudError::Azure(AzureError::Api { .. }) => {
                true
            }
            _ => false,
        }
    }
}
