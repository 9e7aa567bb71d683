//! Test utilities: CR builders and a recording mock account manager.

use cloudprovider::{AccountManagerInterface, CloudError, CloudProviderType, NamespacedName};
use crds::{
    CloudEntitySelector, CloudEntitySelectorSpec, CloudProviderAccount,
    CloudProviderAccountAwsConfig, CloudProviderAccountSpec, CloudProviderAccountStatus,
    SecretReference,
};
use kube::core::ObjectMeta;
use std::collections::HashSet;
use std::sync::Mutex;

pub fn test_aws_account(namespace: &str, name: &str, secret: &str) -> CloudProviderAccount {
    CloudProviderAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: Some(CloudProviderAccountAwsConfig {
                region: "us-east-1".to_string(),
                endpoint: None,
                secret_ref: SecretReference {
                    name: secret.to_string(),
                    namespace: namespace.to_string(),
                    key: "credentials".to_string(),
                },
            }),
            azure_config: None,
        },
        status: None,
    }
}

pub fn test_account_with_empty_spec() -> CloudProviderAccount {
    CloudProviderAccount {
        metadata: ObjectMeta {
            name: Some("account01".to_string()),
            namespace: Some("namespace01".to_string()),
            ..Default::default()
        },
        spec: CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: None,
            azure_config: None,
        },
        status: None,
    }
}

pub fn test_selector(namespace: &str, name: &str, account: &str) -> CloudEntitySelector {
    CloudEntitySelector {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: CloudEntitySelectorSpec {
            account_name: account.to_string(),
            account_namespace: None,
            vm_selector: vec![],
        },
        status: None,
    }
}

/// Recording mock of the account manager.
#[derive(Default)]
pub struct MockAccountManager {
    accounts: Mutex<HashSet<NamespacedName>>,
    add_calls: Mutex<usize>,
    remove_calls: Mutex<usize>,
    selector_calls: Mutex<Vec<(NamespacedName, NamespacedName, bool)>>,
    remove_selector_calls: Mutex<usize>,
}

impl MockAccountManager {
    pub fn add_account_calls(&self) -> usize {
        *self.add_calls.lock().unwrap()
    }

    pub fn remove_account_calls(&self) -> usize {
        *self.remove_calls.lock().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.lock().unwrap().is_empty()
    }

    pub fn last_selector_call(&self) -> Option<(NamespacedName, NamespacedName, bool)> {
        self.selector_calls.lock().unwrap().last().cloned()
    }

    pub fn remove_selector_calls(&self) -> usize {
        *self.remove_selector_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl AccountManagerInterface for MockAccountManager {
    async fn add_account(
        &self,
        key: &NamespacedName,
        _provider: CloudProviderType,
        _account: &CloudProviderAccount,
    ) -> Result<(), CloudError> {
        *self.add_calls.lock().unwrap() += 1;
        self.accounts.lock().unwrap().insert(key.clone());
        Ok(())
    }

    async fn remove_account(&self, key: &NamespacedName) -> Result<(), CloudError> {
        *self.remove_calls.lock().unwrap() += 1;
        self.accounts.lock().unwrap().remove(key);
        Ok(())
    }

    async fn add_resource_filters_to_account(
        &self,
        key: &NamespacedName,
        selector_key: &NamespacedName,
        _selector: &CloudEntitySelector,
        sync_now: bool,
    ) -> Result<(), CloudError> {
        self.selector_calls
            .lock()
            .unwrap()
            .push((key.clone(), selector_key.clone(), sync_now));
        Ok(())
    }

    async fn remove_resource_filters_from_account(
        &self,
        _key: &NamespacedName,
        _selector_key: &NamespacedName,
    ) -> Result<(), CloudError> {
        *self.remove_selector_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn is_account_credentials_valid(&self, key: &NamespacedName) -> bool {
        self.accounts.lock().unwrap().contains(key)
    }

    async fn get_account_status(
        &self,
        key: &NamespacedName,
    ) -> Result<CloudProviderAccountStatus, CloudError> {
        if self.accounts.lock().unwrap().contains(key) {
            Ok(CloudProviderAccountStatus {
                configured: true,
                credentials_valid: true,
                poll_status: None,
            })
        } else {
            Err(CloudError::AccountNotFound(key.clone()))
        }
    }
}
