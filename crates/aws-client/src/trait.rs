//! Ec2ApiClient trait for mocking
//!
//! The provider plugin talks to EC2 exclusively through this trait. The
//! concrete implementation is SDK-backed; tests substitute `MockEc2Client`.

use crate::error::AwsError;
use aws_sdk_ec2::types::{
    Filter, Instance, IpPermission, NetworkInterface, SecurityGroup, Vpc, VpcPeeringConnection,
};
use std::sync::Arc;

/// Everything needed to build one account-scoped EC2 client.
///
/// When `role_arn` is set the factory assumes that role (passing
/// `external_id` when present) and uses the temporary credentials; otherwise
/// the static key pair is used directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsApiConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub session_token: Option<String>,
    pub role_arn: Option<String>,
    pub external_id: Option<String>,
}

/// Builds [`Ec2ApiClient`] instances for an account.
///
/// A factory seam rather than a direct constructor so account tests can
/// inject mock clients.
#[async_trait::async_trait]
pub trait Ec2ClientFactory: Send + Sync {
    async fn create(&self, config: &AwsApiConfig) -> Result<Arc<dyn Ec2ApiClient>, AwsError>;
}

/// EC2 operations used by the plugin. All list calls return fully-paginated,
/// flattened results.
#[async_trait::async_trait]
pub trait Ec2ApiClient: Send + Sync {
    async fn describe_vpcs(&self) -> Result<Vec<Vpc>, AwsError>;

    async fn describe_vpc_peering_connections(
        &self,
    ) -> Result<Vec<VpcPeeringConnection>, AwsError>;

    /// Instances matching all of `filters`; an empty filter list matches the
    /// whole region.
    async fn describe_instances(&self, filters: Vec<Filter>) -> Result<Vec<Instance>, AwsError>;

    async fn describe_security_groups(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<SecurityGroup>, AwsError>;

    /// Creates a security group and returns its cloud-assigned id.
    /// A name collision surfaces as [`AwsError::AlreadyExists`].
    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String, AwsError>;

    /// Deleting an absent group surfaces as [`AwsError::NotFound`].
    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError>;

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError>;

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError>;

    async fn authorize_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError>;

    async fn revoke_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError>;

    async fn describe_network_interfaces(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<NetworkInterface>, AwsError>;

    /// Replaces the security-group set attached to a network interface.
    async fn modify_network_interface_groups(
        &self,
        network_interface_id: &str,
        group_ids: Vec<String>,
    ) -> Result<(), AwsError>;
}
