//! Kubernetes resource watchers.
//!
//! A generic watch loop feeds applied/deleted events into the reconciler.
//! The stream reconnects with the watcher's default backoff; a hard stream
//! failure surfaces to the controller supervisor, which exits the process.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use kube::Api;
use kube_runtime::watcher::{watcher, Config, Event};
use kube_runtime::WatchStreamExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

async fn watch_resource<K, FApply, FutApply, FDelete, FutDelete>(
    api: Api<K>,
    resource_name: &str,
    apply: FApply,
    delete: FDelete,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + std::fmt::Debug + serde::de::DeserializeOwned + 'static,
    FApply: Fn(K) -> FutApply,
    FutApply: Future<Output = Result<(), ControllerError>>,
    FDelete: Fn(K) -> FutDelete,
    FutDelete: Future<Output = Result<(), ControllerError>>,
{
    info!("Starting {} watcher", resource_name);
    let mut stream = Box::pin(watcher(api, Config::default()).default_backoff());
    while let Some(result) = stream.next().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                // The watcher re-establishes itself with backoff; a yielded
                // error is transient.
                error!("{} watch error: {}", resource_name, e);
                continue;
            }
        };
        match event {
            Event::Apply(object) => {
                if let Err(e) = apply(object).await {
                    error!("Reconciliation failed for {}: {}", resource_name, e);
                }
            }
            Event::Delete(object) => {
                if let Err(e) = delete(object).await {
                    error!("Delete handling failed for {}: {}", resource_name, e);
                }
            }
            Event::InitApply(object) => {
                if let Err(e) = apply(object).await {
                    error!("Resync reconciliation failed for {}: {}", resource_name, e);
                }
            }
            Event::Init | Event::InitDone => {}
        }
    }
    Err(ControllerError::Watch(format!(
        "{resource_name} watch stream ended"
    )))
}

pub async fn watch_accounts(
    api: Api<crds::CloudProviderAccount>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    let apply_reconciler = reconciler.clone();
    watch_resource(
        api,
        "CloudProviderAccount",
        move |account| {
            let reconciler = apply_reconciler.clone();
            async move { reconciler.reconcile_account(&account).await }
        },
        move |account| {
            let reconciler = reconciler.clone();
            async move { reconciler.delete_account(&account).await }
        },
    )
    .await
}

pub async fn watch_selectors(
    api: Api<crds::CloudEntitySelector>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    let apply_reconciler = reconciler.clone();
    watch_resource(
        api,
        "CloudEntitySelector",
        move |selector| {
            let reconciler = apply_reconciler.clone();
            async move { reconciler.reconcile_selector(&selector).await }
        },
        move |selector| {
            let reconciler = reconciler.clone();
            async move { reconciler.delete_selector(&selector).await }
        },
    )
    .await
}
