//! Credential secret watcher.
//!
//! One long-lived watch on Secrets in the controller's pod namespace. When
//! a watched secret changes, every account referencing it (per the secret
//! index) is re-enqueued for reconciliation. Secrets nothing references are
//! ignored.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::{watcher, Config, Event};
use kube_runtime::WatchStreamExt;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn watch_secrets(
    client: Client,
    pod_namespace: String,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!(namespace = %pod_namespace, "Starting Secret watcher");
    let api: Api<Secret> = Api::namespaced(client, &pod_namespace);
    let mut stream = Box::pin(watcher(api, Config::default()).default_backoff());
    while let Some(result) = stream.next().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Secret watch error: {}", e);
                continue;
            }
        };
        match event {
            Event::Apply(secret) | Event::Delete(secret) => {
                let key = format!(
                    "{}/{}",
                    secret.namespace().unwrap_or_else(|| pod_namespace.clone()),
                    secret.name_any()
                );
                reconciler.reconcile_secret_change(&key).await;
            }
            // The initial resync carries no change information; referenced
            // secrets are picked up by the account reconciles themselves.
            Event::Init | Event::InitApply(_) | Event::InitDone => {}
        }
    }
    Err(ControllerError::Watch("Secret watch stream ended".to_string()))
}
