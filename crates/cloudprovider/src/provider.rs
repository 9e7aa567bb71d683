//! Abstract provider contract implemented by each cloud plugin.

use crate::cloudresource::{CloudResource, CloudRule, SynchronizationContent};
use crate::error::CloudError;
use crate::inventory::{VirtualMachine, VpcInfo};
use crate::secret::SecretReader;
use crate::types::NamespacedName;
use crds::{CloudEntitySelector, CloudProviderAccount, CloudProviderAccountStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudProviderType {
    Aws,
    Azure,
}

impl std::fmt::Display for CloudProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProviderType::Aws => write!(f, "AWS"),
            CloudProviderType::Azure => write!(f, "Azure"),
        }
    }
}

/// Derives the provider type from an account CR. Exactly one provider config
/// must be present.
pub fn account_provider_type(
    account: &CloudProviderAccount,
) -> Result<CloudProviderType, CloudError> {
    match (&account.spec.aws_config, &account.spec.azure_config) {
        (Some(_), None) => Ok(CloudProviderType::Aws),
        (None, Some(_)) => Ok(CloudProviderType::Azure),
        (Some(_), Some(_)) => Err(CloudError::InvalidConfiguration(
            "account declares more than one cloud provider config".to_string(),
        )),
        (None, None) => Err(CloudError::UnknownCloudProvider),
    }
}

/// Uniform interface each cloud plugin exposes to the upper layers: account
/// management, compute inventory reads, and security-group synchronization.
#[async_trait::async_trait]
pub trait CloudInterface: Send + Sync {
    fn provider_type(&self) -> CloudProviderType;

    // --- account management ---

    /// Adds or updates the given account. On credential-resolution failure
    /// the account is still recorded with sentinel credentials so later
    /// operations fail cleanly, and the error is surfaced.
    async fn add_provider_account(
        &self,
        secret_reader: &dyn SecretReader,
        account: &CloudProviderAccount,
    ) -> Result<(), CloudError>;

    /// Removes the account and cancels its poller. Missing accounts are
    /// tolerated silently.
    async fn remove_provider_account(&self, namespaced_name: &NamespacedName);

    /// Installs or replaces one selector for the account.
    async fn add_account_resource_selector(
        &self,
        account: &NamespacedName,
        selector: &CloudEntitySelector,
    ) -> Result<(), CloudError>;

    /// Removes one selector; other selectors are unaffected.
    async fn remove_account_resource_selector(
        &self,
        account: &NamespacedName,
        selector: &NamespacedName,
    );

    async fn get_account_status(
        &self,
        account: &NamespacedName,
    ) -> Result<CloudProviderAccountStatus, CloudError>;

    /// True when the last credential resolution succeeded and no field holds
    /// the sentinel default.
    async fn is_credentials_valid(&self, account: &NamespacedName) -> bool;

    // --- inventory ---

    /// Harvests VPCs and selected VMs and swaps in a fresh snapshot. A
    /// failure leaves the previous snapshot unchanged and is recorded in the
    /// poll stats.
    async fn do_inventory_poll(&self, account: &NamespacedName) -> Result<(), CloudError>;

    /// Clears the snapshot and marks the poll stats uninitialized; the next
    /// poll repopulates from empty.
    async fn reset_inventory_cache(&self, account: &NamespacedName) -> Result<(), CloudError>;

    /// Blocks until the account's inventory initializes or `timeout` elapses.
    async fn wait_for_inventory_init(
        &self,
        account: &NamespacedName,
        timeout: Duration,
    ) -> Result<(), CloudError>;

    /// VPC map from the latest snapshot, `managed` flag included.
    async fn get_vpc_inventory(
        &self,
        account: &NamespacedName,
    ) -> Result<HashMap<String, VpcInfo>, CloudError>;

    /// Selected VMs from the latest snapshot as uniform objects, keyed by
    /// canonical instance id.
    async fn instances_given_provider_account(
        &self,
        account: &NamespacedName,
    ) -> Result<HashMap<String, VirtualMachine>, CloudError>;

    // --- security ---

    /// Creates the cloud security group for the identifier if absent and
    /// returns the cloud-assigned id; an existing group's id is returned
    /// unchanged.
    async fn create_security_group(
        &self,
        security_group: &CloudResource,
        membership_only: bool,
    ) -> Result<String, CloudError>;

    /// Reconciles the applied-to group's cloud rule set against `all_rules`.
    /// `add_rules`/`remove_rules` carry the delta for logging and no-op
    /// suppression; the written state derives from `all_rules`.
    async fn update_security_group_rules(
        &self,
        applied_to: &CloudResource,
        add_rules: &[CloudRule],
        remove_rules: &[CloudRule],
        all_rules: &[CloudRule],
    ) -> Result<(), CloudError>;

    /// Reconciles group membership; detached members left with no
    /// controller-owned group fall back to the cloud default for their VPC.
    async fn update_security_group_members(
        &self,
        security_group: &CloudResource,
        members: &[CloudResource],
        membership_only: bool,
    ) -> Result<(), CloudError>;

    /// Deletes the cloud group after best-effort detachment of any remaining
    /// members. "Not found" is success.
    async fn delete_security_group(
        &self,
        security_group: &CloudResource,
        membership_only: bool,
    ) -> Result<(), CloudError>;

    /// Cloud view of every controller-owned group across accounts.
    async fn get_enforced_security(&self) -> Vec<SynchronizationContent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        CloudProviderAccountAwsConfig, CloudProviderAccountSpec, SecretReference,
    };
    use kube::core::ObjectMeta;

    fn account_with_spec(spec: CloudProviderAccountSpec) -> CloudProviderAccount {
        CloudProviderAccount {
            metadata: ObjectMeta {
                name: Some("account01".to_string()),
                namespace: Some("namespace01".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn provider_type_requires_exactly_one_config() {
        let empty = account_with_spec(CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: None,
            azure_config: None,
        });
        assert!(matches!(
            account_provider_type(&empty),
            Err(CloudError::UnknownCloudProvider)
        ));

        let aws = account_with_spec(CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: Some(CloudProviderAccountAwsConfig {
                region: "us-east-1".to_string(),
                endpoint: None,
                secret_ref: SecretReference {
                    name: "secret01".to_string(),
                    namespace: "namespace01".to_string(),
                    key: "credentials".to_string(),
                },
            }),
            azure_config: None,
        });
        assert_eq!(account_provider_type(&aws).unwrap(), CloudProviderType::Aws);
    }
}
