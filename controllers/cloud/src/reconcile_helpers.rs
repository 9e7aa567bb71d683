//! Pure reconcile logic, separated from status writing so it can be unit
//! tested against a mock account manager.

use crate::error::ControllerError;
use cloudprovider::{account_provider_type, AccountManagerInterface, NamespacedName};
use crds::{CloudEntitySelector, CloudProviderAccount};
use tracing::info;

pub fn account_key(account: &CloudProviderAccount) -> Result<NamespacedName, ControllerError> {
    let name = account
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig("account missing name".to_string()))?;
    let namespace = account
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    Ok(NamespacedName::new(namespace, name))
}

pub fn selector_key(selector: &CloudEntitySelector) -> Result<NamespacedName, ControllerError> {
    let name = selector
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig("selector missing name".to_string()))?;
    let namespace = selector
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    Ok(NamespacedName::new(namespace, name))
}

/// Account key referenced by a selector; the account namespace defaults to
/// the selector's own.
pub fn selector_account_key(
    selector: &CloudEntitySelector,
) -> Result<NamespacedName, ControllerError> {
    let namespace = selector
        .spec
        .account_namespace
        .clone()
        .or_else(|| selector.metadata.namespace.clone())
        .unwrap_or_else(|| "default".to_string());
    Ok(NamespacedName::new(namespace, selector.spec.account_name.clone()))
}

/// Handles an account create/update event: provider classification plus
/// account-manager dispatch.
pub async fn process_account_create_or_update(
    manager: &dyn AccountManagerInterface,
    key: &NamespacedName,
    account: &CloudProviderAccount,
) -> Result<(), ControllerError> {
    let provider = account_provider_type(account)?;
    info!(account = %key, provider = %provider, "reconciling cloud provider account");
    manager.add_account(key, provider, account).await?;
    Ok(())
}

/// Handles an account delete event.
pub async fn process_account_delete(
    manager: &dyn AccountManagerInterface,
    key: &NamespacedName,
) -> Result<(), ControllerError> {
    info!(account = %key, "removing cloud provider account");
    manager.remove_account(key).await?;
    Ok(())
}

/// Handles a selector create/update event; blocks until the account's
/// inventory initializes so selector status reflects reality.
pub async fn process_selector_create_or_update(
    manager: &dyn AccountManagerInterface,
    selector: &CloudEntitySelector,
) -> Result<(), ControllerError> {
    let key = selector_key(selector)?;
    let account = selector_account_key(selector)?;
    info!(selector = %key, account = %account, "reconciling cloud entity selector");
    manager
        .add_resource_filters_to_account(&account, &key, selector, true)
        .await?;
    Ok(())
}

/// Handles a selector delete event.
pub async fn process_selector_delete(
    manager: &dyn AccountManagerInterface,
    selector: &CloudEntitySelector,
) -> Result<(), ControllerError> {
    let key = selector_key(selector)?;
    let account = selector_account_key(selector)?;
    info!(selector = %key, account = %account, "removing cloud entity selector");
    manager
        .remove_resource_filters_from_account(&account, &key)
        .await?;
    Ok(())
}
