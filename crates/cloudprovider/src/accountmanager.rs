//! Account manager: single entry point for account lifecycle.
//!
//! Maps account keys to provider plugins and fans account, selector, and
//! credential events out to the right plugin. Controllers depend on the
//! [`AccountManagerInterface`] trait so they can be tested against a mock.

use crate::error::CloudError;
use crate::internal::INVENTORY_INIT_WAIT_DURATION;
use crate::provider::{CloudInterface, CloudProviderType};
use crate::secret::SecretReader;
use crate::types::NamespacedName;
use crds::{CloudEntitySelector, CloudProviderAccount, CloudProviderAccountStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait AccountManagerInterface: Send + Sync {
    /// Validates the account CR, resolves credentials, and binds the account
    /// to its provider plugin. Idempotent: re-invocation on an existing key
    /// is forwarded as an update. Retryability of a failure is carried by
    /// [`CloudError::should_retry`].
    async fn add_account(
        &self,
        key: &NamespacedName,
        provider: CloudProviderType,
        account: &CloudProviderAccount,
    ) -> Result<(), CloudError>;

    /// Removes the account from its plugin and the registry. "Not found" is
    /// tolerated silently.
    async fn remove_account(&self, key: &NamespacedName) -> Result<(), CloudError>;

    /// Installs or replaces a selector. With `sync_now`, triggers an
    /// immediate poll and blocks until inventory initializes or the bounded
    /// wait elapses.
    async fn add_resource_filters_to_account(
        &self,
        key: &NamespacedName,
        selector_key: &NamespacedName,
        selector: &CloudEntitySelector,
        sync_now: bool,
    ) -> Result<(), CloudError>;

    async fn remove_resource_filters_from_account(
        &self,
        key: &NamespacedName,
        selector_key: &NamespacedName,
    ) -> Result<(), CloudError>;

    /// True when the last credential resolution succeeded and no cached
    /// credential field holds the sentinel default.
    async fn is_account_credentials_valid(&self, key: &NamespacedName) -> bool;

    async fn get_account_status(
        &self,
        key: &NamespacedName,
    ) -> Result<CloudProviderAccountStatus, CloudError>;
}

/// Registry mapping account identity to the provider plugin owning it.
pub struct AccountManager {
    secret_reader: Arc<dyn SecretReader>,
    providers: HashMap<CloudProviderType, Arc<dyn CloudInterface>>,
    accounts: RwLock<HashMap<NamespacedName, CloudProviderType>>,
}

impl AccountManager {
    pub fn new(
        secret_reader: Arc<dyn SecretReader>,
        plugins: Vec<Arc<dyn CloudInterface>>,
    ) -> Self {
        let providers = plugins
            .into_iter()
            .map(|p| (p.provider_type(), p))
            .collect();
        Self {
            secret_reader,
            providers,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().unwrap().is_empty()
    }

    fn plugin(&self, provider: CloudProviderType) -> Result<Arc<dyn CloudInterface>, CloudError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or(CloudError::UnknownCloudProvider)
    }

    fn plugin_for_account(
        &self,
        key: &NamespacedName,
    ) -> Option<(CloudProviderType, Arc<dyn CloudInterface>)> {
        let provider = *self.accounts.read().unwrap().get(key)?;
        let plugin = self.providers.get(&provider)?.clone();
        Some((provider, plugin))
    }
}

#[async_trait::async_trait]
impl AccountManagerInterface for AccountManager {
    async fn add_account(
        &self,
        key: &NamespacedName,
        provider: CloudProviderType,
        account: &CloudProviderAccount,
    ) -> Result<(), CloudError> {
        match account.spec.poll_interval_in_seconds {
            Some(interval) if interval >= 1 => {}
            _ => {
                return Err(CloudError::InvalidConfiguration(
                    "poll interval must be present and at least 1 second".to_string(),
                ))
            }
        }
        let plugin = self.plugin(provider)?;

        // A provider change on an existing key retires the old binding
        // before handing the account to the new plugin.
        let previous = self.accounts.read().unwrap().get(key).copied();
        if let Some(previous) = previous {
            if previous != provider {
                if let Ok(old_plugin) = self.plugin(previous) {
                    old_plugin.remove_provider_account(key).await;
                }
            }
        }

        let result = plugin
            .add_provider_account(self.secret_reader.as_ref(), account)
            .await;
        // Credential failures still leave the account registered (bound
        // with sentinel credentials) so status can report it as invalid.
        self.accounts.write().unwrap().insert(key.clone(), provider);
        if let Err(e) = &result {
            warn!(account = %key, "failed to add cloud account: {e}");
        } else {
            info!(account = %key, provider = %provider, "cloud account bound");
        }
        result
    }

    async fn remove_account(&self, key: &NamespacedName) -> Result<(), CloudError> {
        let removed = self.accounts.write().unwrap().remove(key);
        match removed {
            Some(provider) => {
                if let Ok(plugin) = self.plugin(provider) {
                    plugin.remove_provider_account(key).await;
                }
                info!(account = %key, "cloud account removed");
            }
            None => {
                info!(account = %key, "cloud account not found, nothing to remove");
            }
        }
        Ok(())
    }

    async fn add_resource_filters_to_account(
        &self,
        key: &NamespacedName,
        selector_key: &NamespacedName,
        selector: &CloudEntitySelector,
        sync_now: bool,
    ) -> Result<(), CloudError> {
        let Some((_, plugin)) = self.plugin_for_account(key) else {
            warn!(account = %key, selector = %selector_key, "account not found for selector");
            return Err(CloudError::AccountNotFound(key.clone()));
        };
        plugin.add_account_resource_selector(key, selector).await?;
        if sync_now {
            if let Err(e) = plugin.do_inventory_poll(key).await {
                warn!(account = %key, "immediate inventory poll failed: {e}");
            }
            plugin
                .wait_for_inventory_init(key, INVENTORY_INIT_WAIT_DURATION)
                .await?;
        }
        Ok(())
    }

    async fn remove_resource_filters_from_account(
        &self,
        key: &NamespacedName,
        selector_key: &NamespacedName,
    ) -> Result<(), CloudError> {
        let Some((_, plugin)) = self.plugin_for_account(key) else {
            warn!(account = %key, selector = %selector_key, "account not found, nothing to remove");
            return Ok(());
        };
        plugin.remove_account_resource_selector(key, selector_key).await;
        Ok(())
    }

    async fn is_account_credentials_valid(&self, key: &NamespacedName) -> bool {
        match self.plugin_for_account(key) {
            Some((_, plugin)) => plugin.is_credentials_valid(key).await,
            None => false,
        }
    }

    async fn get_account_status(
        &self,
        key: &NamespacedName,
    ) -> Result<CloudProviderAccountStatus, CloudError> {
        let (_, plugin) = self
            .plugin_for_account(key)
            .ok_or_else(|| CloudError::AccountNotFound(key.clone()))?;
        plugin.get_account_status(key).await
    }
}
