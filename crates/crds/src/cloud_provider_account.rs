//! CloudProviderAccount CRD
//!
//! Declares one cloud account: which provider, which region, how often to
//! poll inventory, and where the credential secret lives.

use crate::references::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "crd.nephe.io",
    version = "v1alpha1",
    kind = "CloudProviderAccount",
    namespaced,
    status = "CloudProviderAccountStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderAccountSpec {
    /// Interval between inventory polls, in seconds. Must be >= 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_in_seconds: Option<u32>,

    /// AWS account configuration. Exactly one provider config must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_config: Option<CloudProviderAccountAwsConfig>,

    /// Azure account configuration. Exactly one provider config must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_config: Option<CloudProviderAccountAzureConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderAccountAwsConfig {
    /// AWS region, e.g. "us-east-1".
    pub region: String,

    /// Optional EC2 endpoint override (testing / private endpoints).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Secret holding the AWS credential JSON document.
    pub secret_ref: SecretReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderAccountAzureConfig {
    /// Azure location, e.g. "eastus".
    pub region: String,

    /// Secret holding the Azure credential JSON document.
    pub secret_ref: SecretReference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderAccountStatus {
    /// True once the account is bound to a live provider plugin.
    #[serde(default)]
    pub configured: bool,

    /// True when the last credential resolution succeeded.
    #[serde(default)]
    pub credentials_valid: bool,

    /// Outcome of the most recent inventory poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_status: Option<PollStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollStatus {
    /// Timestamp of the last successful poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Error from the last failed poll, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
