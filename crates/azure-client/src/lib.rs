//! Azure Resource Manager REST client
//!
//! Covers the slice of ARM the Azure provider plugin needs: Resource Graph
//! queries for VM harvest, virtual-network listing for peering info, and
//! NSG/ASG/NIC CRUD for security-group enforcement.
//!
//! The plugin talks through the [`AzureApiClient`] trait; the concrete
//! implementation authenticates with client-credential OAuth tokens and
//! follows `nextLink`/`$skipToken` pagination.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod azure_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use azure_trait::{AzureApiClient, AzureApiConfig, AzureClientFactory};
pub use client::{ArmAzureClientFactory, ArmClient};
pub use error::AzureError;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockAzureClient, MockAzureClientFactory};
