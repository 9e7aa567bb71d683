//! Cloud Controller
//!
//! Reconciles cloud integration CRDs:
//! - CloudProviderAccount: binds cloud accounts and drives inventory polling
//! - CloudEntitySelector: installs VM selectors on bound accounts
//!
//! A secret watcher re-enqueues accounts whenever a referenced credential
//! secret changes.

mod controller;
mod error;
mod reconcile_helpers;
mod reconciler;
mod secret_watcher;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::controller::Controller;
use crate::error::ControllerError;
use cloudprovider::cloudresource;
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Cloud Controller");

    let namespace = env::var("WATCH_NAMESPACE").ok();
    let prefix = env::var("CLOUD_RESOURCE_PREFIX")
        .unwrap_or_else(|_| cloudresource::DEFAULT_CLOUD_RESOURCE_PREFIX.to_string());
    // The prefix namespaces every cloud object the controller owns; it must
    // be fixed before any plugin is created.
    cloudresource::set_cloud_resource_prefix(&prefix);

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Cloud resource prefix: {}", prefix);

    let controller = Controller::new(namespace).await?;
    controller.run().await?;

    Ok(())
}
