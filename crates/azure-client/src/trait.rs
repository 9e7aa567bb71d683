//! AzureApiClient trait for mocking

use crate::error::AzureError;
use crate::models::*;
use std::sync::Arc;

/// Everything needed to build one account-scoped ARM client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureApiConfig {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_key: String,
}

/// Builds [`AzureApiClient`] instances for an account.
#[async_trait::async_trait]
pub trait AzureClientFactory: Send + Sync {
    async fn create(&self, config: &AzureApiConfig) -> Result<Arc<dyn AzureApiClient>, AzureError>;
}

/// ARM operations used by the plugin. All list calls return fully-paginated,
/// flattened results scoped to the configured subscription.
#[async_trait::async_trait]
pub trait AzureApiClient: Send + Sync {
    /// Runs a Resource Graph query projecting VM rows.
    async fn query_virtual_machines(
        &self,
        query: &str,
    ) -> Result<Vec<VirtualMachineRow>, AzureError>;

    async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetwork>, AzureError>;

    async fn list_application_security_groups(
        &self,
    ) -> Result<Vec<ApplicationSecurityGroup>, AzureError>;

    async fn create_or_update_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ApplicationSecurityGroup, AzureError>;

    /// Deleting an absent ASG is not an error.
    async fn delete_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError>;

    /// Absent NSGs surface as [`AzureError::NotFound`].
    async fn get_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, AzureError>;

    async fn create_or_update_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        security_group: SecurityGroup,
    ) -> Result<SecurityGroup, AzureError>;

    /// Deleting an absent NSG is not an error.
    async fn delete_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError>;

    async fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, AzureError>;

    async fn create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        interface: NetworkInterface,
    ) -> Result<NetworkInterface, AzureError>;
}
