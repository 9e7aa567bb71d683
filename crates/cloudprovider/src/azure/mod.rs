//! Azure provider plugin.
//!
//! Composes the common framework with ARM-specific credential handling,
//! Resource Graph selector queries, inventory harvest, and NSG/ASG-based
//! security-group enforcement.

pub mod credentials;
pub(crate) mod kql;
mod compute;
mod security;
#[cfg(test)]
mod tests;

pub use self::compute::AzureSnapshot;
pub use self::credentials::{AzureAccountConfig, AzureAccountCredential};

use crate::cloudresource::{CloudResource, CloudRule, SynchronizationContent};
use crate::error::CloudError;
use crate::internal::{
    spawn_poller, wait_for_inventory_init, AccountRegistry, InventoryStats, PollerHandle,
    ResourcesCache,
};
use crate::inventory::{VirtualMachine, VpcInfo};
use crate::provider::{CloudInterface, CloudProviderType};
use crate::secret::SecretReader;
use crate::types::NamespacedName;
use azure_client::{ArmAzureClientFactory, AzureApiClient, AzureClientFactory};
use crds::{
    CloudEntitySelector, CloudEntitySelectorSpec, CloudProviderAccount,
    CloudProviderAccountStatus,
};
use self::credentials::{compare_account_credentials, resolve_account_config};
use self::kql::{compile_selector, CompiledQueries};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) struct AzureAccountState {
    pub(crate) config: AzureAccountConfig,
    pub(crate) credentials_valid: bool,
    pub(crate) api: Option<Arc<dyn AzureApiClient>>,
    pub(crate) selectors: HashMap<NamespacedName, CloudEntitySelectorSpec>,
    pub(crate) queries: HashMap<NamespacedName, CompiledQueries>,
    pub(crate) poll_interval: Duration,
}

/// Per-account container: mutable state behind the account mutex, poll
/// stats and the snapshot cache outside it so readers never block.
pub(crate) struct AzureAccountEntry {
    pub(crate) namespaced_name: NamespacedName,
    pub(crate) state: tokio::sync::Mutex<AzureAccountState>,
    pub(crate) stats: InventoryStats,
    pub(crate) cache: ResourcesCache<AzureSnapshot>,
    poller: std::sync::Mutex<Option<PollerHandle>>,
}

/// Azure plugin instance shared by every Azure account.
pub struct AzureCloud {
    factory: Arc<dyn AzureClientFactory>,
    accounts: AccountRegistry<AzureAccountEntry>,
}

impl AzureCloud {
    pub fn new(factory: Arc<dyn AzureClientFactory>) -> Self {
        Self {
            factory,
            accounts: AccountRegistry::default(),
        }
    }

    /// Production construction against the Resource Manager endpoint.
    pub fn with_arm() -> Self {
        Self::new(Arc::new(ArmAzureClientFactory))
    }

    pub fn has_accounts(&self) -> bool {
        !self.accounts.is_empty()
    }

    fn entry(&self, key: &NamespacedName) -> Result<Arc<AzureAccountEntry>, CloudError> {
        self.accounts
            .get(key)
            .ok_or_else(|| CloudError::AccountNotFound(key.clone()))
    }

    fn entry_for_resource(
        &self,
        resource: &CloudResource,
    ) -> Result<Arc<AzureAccountEntry>, CloudError> {
        let key = resource.account_key().map_err(|e| {
            warn!(account_id = %resource.account_id, "{e}");
            CloudError::AccountNotFound(NamespacedName::new("", resource.account_id.clone()))
        })?;
        self.entry(&key)
    }
}

fn account_key(account: &CloudProviderAccount) -> Result<NamespacedName, CloudError> {
    let name = account
        .metadata
        .name
        .clone()
        .ok_or_else(|| CloudError::InvalidConfiguration("account has no name".to_string()))?;
    let namespace = account
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    Ok(NamespacedName::new(namespace, name))
}

#[async_trait::async_trait]
impl CloudInterface for AzureCloud {
    fn provider_type(&self) -> CloudProviderType {
        CloudProviderType::Azure
    }

    async fn add_provider_account(
        &self,
        secret_reader: &dyn SecretReader,
        account: &CloudProviderAccount,
    ) -> Result<(), CloudError> {
        let key = account_key(account)?;
        let azure_config = account
            .spec
            .azure_config
            .as_ref()
            .ok_or(CloudError::UnknownCloudProvider)?;
        let poll_interval = account
            .spec
            .poll_interval_in_seconds
            .map(|s| Duration::from_secs(s.into()))
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let (config, credential_error) =
            match resolve_account_config(secret_reader, azure_config).await {
                Ok(config) => (config, None),
                Err(e) => (AzureAccountConfig::sentinel(azure_config), Some(e)),
            };

        if let Some(entry) = self.accounts.get(&key) {
            let mut state = entry.state.lock().await;
            state.poll_interval = poll_interval;
            let changed = compare_account_credentials(&key.to_string(), &state.config, &config);
            if changed {
                if credential_error.is_none() {
                    let api = self.factory.create(&config.api_config()).await?;
                    state.api = Some(api);
                    state.credentials_valid = true;
                    state.config = config;
                    // Re-register every selector under the new credentials.
                    let vnets = entry
                        .cache
                        .get_snapshot()
                        .map(|s| s.vnets.clone())
                        .unwrap_or_default();
                    let selectors: Vec<(NamespacedName, CloudEntitySelectorSpec)> = state
                        .selectors
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    for (selector_key, spec) in selectors {
                        let compiled = compile_selector(&state.config, &spec, &vnets);
                        state.queries.insert(selector_key, compiled);
                    }
                    info!(account = %key, "account credentials updated, clients rebuilt");
                } else {
                    state.api = None;
                    state.credentials_valid = false;
                    state.config = config;
                }
            }
            drop(state);
            return credential_error.map_or(Ok(()), Err);
        }

        let mut state = AzureAccountState {
            config,
            credentials_valid: credential_error.is_none(),
            api: None,
            selectors: HashMap::new(),
            queries: HashMap::new(),
            poll_interval,
        };
        if credential_error.is_none() {
            state.api = Some(self.factory.create(&state.config.api_config()).await?);
        }

        let entry = Arc::new(AzureAccountEntry {
            namespaced_name: key.clone(),
            state: tokio::sync::Mutex::new(state),
            stats: InventoryStats::default(),
            cache: ResourcesCache::default(),
            poller: std::sync::Mutex::new(None),
        });
        let poll_entry = entry.clone();
        let handle = spawn_poller(key.clone(), move || {
            let entry = poll_entry.clone();
            async move { entry.poll_cycle().await }
        });
        *entry.poller.lock().unwrap() = Some(handle);
        self.accounts.insert(key.clone(), entry);
        info!(account = %key, "azure account added");
        credential_error.map_or(Ok(()), Err)
    }

    async fn remove_provider_account(&self, namespaced_name: &NamespacedName) {
        if let Some(entry) = self.accounts.remove(namespaced_name) {
            if let Some(poller) = entry.poller.lock().unwrap().take() {
                poller.abort();
            }
            info!(account = %namespaced_name, "azure account removed");
        }
    }

    async fn add_account_resource_selector(
        &self,
        account: &NamespacedName,
        selector: &CloudEntitySelector,
    ) -> Result<(), CloudError> {
        let entry = self.entry(account)?;
        let selector_key = NamespacedName::new(
            selector.metadata.namespace.as_deref().unwrap_or("default"),
            selector.metadata.name.as_deref().unwrap_or_default(),
        );
        let vnets = entry
            .cache
            .get_snapshot()
            .map(|s| s.vnets.clone())
            .unwrap_or_default();
        let mut state = entry.state.lock().await;
        let compiled = compile_selector(&state.config, &selector.spec, &vnets);
        state.selectors.insert(selector_key.clone(), selector.spec.clone());
        state.queries.insert(selector_key, compiled);
        Ok(())
    }

    async fn remove_account_resource_selector(
        &self,
        account: &NamespacedName,
        selector: &NamespacedName,
    ) {
        let Ok(entry) = self.entry(account) else {
            warn!(account = %account, selector = %selector, "cloud account config not found");
            return;
        };
        let mut state = entry.state.lock().await;
        state.selectors.remove(selector);
        state.queries.remove(selector);
    }

    async fn get_account_status(
        &self,
        account: &NamespacedName,
    ) -> Result<CloudProviderAccountStatus, CloudError> {
        let entry = self.entry(account)?;
        let state = entry.state.lock().await;
        Ok(CloudProviderAccountStatus {
            configured: true,
            credentials_valid: state.credentials_valid,
            poll_status: Some(entry.stats.poll_status()),
        })
    }

    async fn is_credentials_valid(&self, account: &NamespacedName) -> bool {
        match self.accounts.get(account) {
            Some(entry) => {
                let state = entry.state.lock().await;
                state.credentials_valid && state.config.is_valid()
            }
            None => false,
        }
    }

    async fn do_inventory_poll(&self, account: &NamespacedName) -> Result<(), CloudError> {
        self.entry(account)?.do_inventory_poll().await
    }

    async fn reset_inventory_cache(&self, account: &NamespacedName) -> Result<(), CloudError> {
        let entry = self.entry(account)?;
        let _state = entry.state.lock().await;
        entry.cache.update_snapshot(None);
        entry.stats.reset();
        if let Some(poller) = entry.poller.lock().unwrap().as_ref() {
            poller.poke();
        }
        Ok(())
    }

    async fn wait_for_inventory_init(
        &self,
        account: &NamespacedName,
        timeout: Duration,
    ) -> Result<(), CloudError> {
        let entry = self.entry(account)?;
        wait_for_inventory_init(&entry.stats, account, timeout).await
    }

    async fn get_vpc_inventory(
        &self,
        account: &NamespacedName,
    ) -> Result<HashMap<String, VpcInfo>, CloudError> {
        let entry = self.entry(account)?;
        Ok(entry.vpc_inventory().await)
    }

    async fn instances_given_provider_account(
        &self,
        account: &NamespacedName,
    ) -> Result<HashMap<String, VirtualMachine>, CloudError> {
        let entry = self.entry(account)?;
        Ok(entry.vm_objects().await)
    }

    async fn create_security_group(
        &self,
        security_group: &CloudResource,
        membership_only: bool,
    ) -> Result<String, CloudError> {
        self.entry_for_resource(security_group)?
            .create_security_group(security_group, membership_only)
            .await
    }

    async fn update_security_group_rules(
        &self,
        applied_to: &CloudResource,
        _add_rules: &[CloudRule],
        _remove_rules: &[CloudRule],
        all_rules: &[CloudRule],
    ) -> Result<(), CloudError> {
        self.entry_for_resource(applied_to)?
            .update_security_group_rules(applied_to, all_rules)
            .await
    }

    async fn update_security_group_members(
        &self,
        security_group: &CloudResource,
        members: &[CloudResource],
        membership_only: bool,
    ) -> Result<(), CloudError> {
        self.entry_for_resource(security_group)?
            .update_security_group_members(security_group, members, membership_only)
            .await
    }

    async fn delete_security_group(
        &self,
        security_group: &CloudResource,
        membership_only: bool,
    ) -> Result<(), CloudError> {
        self.entry_for_resource(security_group)?
            .delete_security_group(security_group, membership_only)
            .await
    }

    async fn get_enforced_security(&self) -> Vec<SynchronizationContent> {
        let mut content = Vec::new();
        for entry in self.accounts.values() {
            match entry.enforced_security().await {
                Ok(mut account_content) => content.append(&mut account_content),
                Err(e) => {
                    warn!(account = %entry.namespaced_name, "failed to read enforced security: {e}")
                }
            }
        }
        content
    }
}
