//! Cloud integration plane
//!
//! Bridges the cluster-side network-policy control plane with public-cloud
//! security primitives. Each supported cloud is a plugin behind the
//! [`provider::CloudInterface`] trait; the [`accountmanager::AccountManager`]
//! owns the account-key → plugin registry and is the single entry point for
//! account lifecycle. Plugins harvest inventory on a per-account schedule and
//! translate rule deltas into provider-specific security-group calls.

pub mod accountmanager;
pub mod aws;
pub mod azure;
pub mod cloudresource;
pub mod error;
pub mod internal;
pub mod inventory;
pub mod provider;
pub mod secret;
pub mod types;

pub use accountmanager::{AccountManager, AccountManagerInterface};
pub use error::{CloudError, ERROR_MSG_UNKNOWN_CLOUD_PROVIDER};
pub use provider::{account_provider_type, CloudInterface, CloudProviderType};
pub use types::NamespacedName;
