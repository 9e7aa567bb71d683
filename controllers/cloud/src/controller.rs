//! Main controller implementation.
//!
//! Wires the kube client, the provider plugins, and the account manager
//! together, then supervises the three watchers (accounts, selectors,
//! credential secrets).

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::secret_watcher::watch_secrets;
use crate::watcher::{watch_accounts, watch_selectors};
use cloudprovider::aws::AwsCloud;
use cloudprovider::azure::AzureCloud;
use cloudprovider::secret::KubeSecretReader;
use cloudprovider::{AccountManager, CloudInterface};
use crds::{CloudEntitySelector, CloudProviderAccount};
use kube::{Api, Client};
use std::env;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Controller {
    account_watcher: JoinHandle<Result<(), ControllerError>>,
    selector_watcher: JoinHandle<Result<(), ControllerError>>,
    secret_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    pub async fn new(namespace: Option<String>) -> Result<Self, ControllerError> {
        info!("Initializing Cloud Controller");

        let client = Client::try_default().await?;

        let aws: Arc<dyn CloudInterface> = Arc::new(AwsCloud::with_sdk());
        let azure: Arc<dyn CloudInterface> = Arc::new(AzureCloud::with_arm());
        let account_manager = Arc::new(AccountManager::new(
            Arc::new(KubeSecretReader::new(client.clone())),
            vec![aws, azure],
        ));
        let reconciler = Arc::new(Reconciler::new(client.clone(), account_manager));

        let account_api: Api<CloudProviderAccount> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let selector_api: Api<CloudEntitySelector> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let pod_namespace = env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        let account_watcher = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { watch_accounts(account_api, reconciler).await })
        };
        let selector_watcher = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { watch_selectors(selector_api, reconciler).await })
        };
        let secret_watcher = {
            let reconciler = reconciler.clone();
            tokio::spawn(
                async move { watch_secrets(client, pod_namespace, reconciler).await },
            )
        };

        Ok(Self {
            account_watcher,
            selector_watcher,
            secret_watcher,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Cloud Controller running");

        // Wait for any watcher to exit (they should run forever).
        tokio::select! {
            result = &mut self.account_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("CloudProviderAccount watcher panicked: {e}")))??;
            }
            result = &mut self.selector_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("CloudEntitySelector watcher panicked: {e}")))??;
            }
            result = &mut self.secret_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Secret watcher panicked: {e}")))??;
            }
        }

        Ok(())
    }
}
