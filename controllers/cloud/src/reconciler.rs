//! Reconciler: event handling plus CR status writing and the secret index.

use crate::error::ControllerError;
use crate::reconcile_helpers::{
    account_key, process_account_create_or_update, process_account_delete,
    process_selector_create_or_update, process_selector_delete, selector_key,
};
use cloudprovider::{AccountManagerInterface, NamespacedName};
use crds::{
    CloudEntitySelector, CloudEntitySelectorStatus, CloudProviderAccount,
    CloudProviderAccountStatus,
};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// Maps `namespace/name` of a secret to the accounts referencing it, so the
/// secret watcher can fan a change out to the right reconciles.
#[derive(Default)]
pub struct SecretIndex {
    entries: RwLock<HashMap<String, HashSet<NamespacedName>>>,
}

impl SecretIndex {
    pub fn record(&self, secret: String, account: NamespacedName) {
        let mut entries = self.entries.write().unwrap();
        // An account references exactly one secret; drop stale links first.
        for accounts in entries.values_mut() {
            accounts.remove(&account);
        }
        entries.entry(secret).or_default().insert(account);
    }

    pub fn remove_account(&self, account: &NamespacedName) {
        let mut entries = self.entries.write().unwrap();
        for accounts in entries.values_mut() {
            accounts.remove(account);
        }
        entries.retain(|_, accounts| !accounts.is_empty());
    }

    pub fn accounts_for(&self, secret: &str) -> Vec<NamespacedName> {
        self.entries
            .read()
            .unwrap()
            .get(secret)
            .map(|accounts| accounts.iter().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct Reconciler {
    client: Client,
    account_manager: Arc<dyn AccountManagerInterface>,
    secret_index: SecretIndex,
}

impl Reconciler {
    pub fn new(client: Client, account_manager: Arc<dyn AccountManagerInterface>) -> Self {
        Self {
            client,
            account_manager,
            secret_index: SecretIndex::default(),
        }
    }

    pub fn secret_index(&self) -> &SecretIndex {
        &self.secret_index
    }

    fn account_api(&self, namespace: &str) -> Api<CloudProviderAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn selector_api(&self, namespace: &str) -> Api<CloudEntitySelector> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn reconcile_account(
        &self,
        account: &CloudProviderAccount,
    ) -> Result<(), ControllerError> {
        let key = account_key(account)?;

        let secret_ref = account
            .spec
            .aws_config
            .as_ref()
            .map(|c| &c.secret_ref)
            .or(account.spec.azure_config.as_ref().map(|c| &c.secret_ref));
        if let Some(secret_ref) = secret_ref {
            self.secret_index
                .record(secret_ref.namespaced_name(), key.clone());
        }

        let result =
            process_account_create_or_update(self.account_manager.as_ref(), &key, account).await;

        // Status reflects what the manager knows even on failure; an
        // unbound account reports unconfigured.
        let status = self
            .account_manager
            .get_account_status(&key)
            .await
            .unwrap_or_default();
        self.update_account_status(&key, status).await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.should_retry() => {
                warn!(account = %key, "account reconcile will be retried: {e}");
                Err(e)
            }
            Err(e) => {
                error!(account = %key, "account reconcile failed terminally: {e}");
                Err(e)
            }
        }
    }

    pub async fn delete_account(
        &self,
        account: &CloudProviderAccount,
    ) -> Result<(), ControllerError> {
        let key = account_key(account)?;
        self.secret_index.remove_account(&key);
        process_account_delete(self.account_manager.as_ref(), &key).await
    }

    pub async fn reconcile_selector(
        &self,
        selector: &CloudEntitySelector,
    ) -> Result<(), ControllerError> {
        let key = selector_key(selector)?;
        let result =
            process_selector_create_or_update(self.account_manager.as_ref(), selector).await;
        let status = CloudEntitySelectorStatus {
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.update_selector_status(&key, status).await;
        result
    }

    pub async fn delete_selector(
        &self,
        selector: &CloudEntitySelector,
    ) -> Result<(), ControllerError> {
        process_selector_delete(self.account_manager.as_ref(), selector).await
    }

    /// A watched secret changed: re-enqueue every account referencing it.
    pub async fn reconcile_secret_change(&self, secret_namespaced_name: &str) {
        let accounts = self.secret_index.accounts_for(secret_namespaced_name);
        if accounts.is_empty() {
            return;
        }
        info!(
            secret = secret_namespaced_name,
            accounts = accounts.len(),
            "credential secret changed, re-reconciling referencing accounts"
        );
        for key in accounts {
            match self.account_api(&key.namespace).get(&key.name).await {
                Ok(account) => {
                    if let Err(e) = self.reconcile_account(&account).await {
                        warn!(account = %key, "re-reconcile after secret change failed: {e}");
                    }
                }
                Err(e) => {
                    warn!(account = %key, "failed to fetch account after secret change: {e}")
                }
            }
        }
    }

    async fn update_account_status(&self, key: &NamespacedName, status: CloudProviderAccountStatus) {
        let api = self.account_api(&key.namespace);
        let patch = serde_json::json!({ "status": status });
        if let Err(e) = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!(account = %key, "failed to update account status: {e}");
        }
    }

    async fn update_selector_status(&self, key: &NamespacedName, status: CloudEntitySelectorStatus) {
        let api = self.selector_api(&key.namespace);
        let patch = serde_json::json!({ "status": status });
        if let Err(e) = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!(selector = %key, "failed to update selector status: {e}");
        }
    }
}
