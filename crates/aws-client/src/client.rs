//! SDK-backed EC2 client
//!
//! Builds the per-account SDK configuration (static credentials or an
//! assumed role) and implements [`Ec2ApiClient`] with pagination handled
//! internally.

use crate::ec2_trait::{AwsApiConfig, Ec2ApiClient, Ec2ClientFactory};
use crate::error::AwsError;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::{Credentials, Region};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{
    Filter, Instance, IpPermission, NetworkInterface, SecurityGroup, Vpc, VpcPeeringConnection,
};
use std::sync::Arc;
use tracing::debug;

/// Cap on per-page results for paginated describe calls.
pub const MAX_RESULTS_PER_PAGE: i32 = 100;

const CREDENTIALS_PROVIDER_NAME: &str = "account-secret";
const ASSUME_ROLE_SESSION_NAME: &str = "cloud-controller";

/// Factory producing SDK-backed clients.
#[derive(Debug, Default)]
pub struct SdkEc2ClientFactory;

#[async_trait::async_trait]
impl Ec2ClientFactory for SdkEc2ClientFactory {
    async fn create(&self, config: &AwsApiConfig) -> Result<Arc<dyn Ec2ApiClient>, AwsError> {
        let client = SdkEc2Client::new(config).await?;
        Ok(Arc::new(client))
    }
}

/// EC2 client bound to one account's credentials and region.
pub struct SdkEc2Client {
    client: aws_sdk_ec2::Client,
}

impl SdkEc2Client {
    pub async fn new(config: &AwsApiConfig) -> Result<Self, AwsError> {
        let static_credentials = Credentials::new(
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
            config.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER_NAME,
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(static_credentials);
        if let Some(endpoint) = &config.endpoint {
            if !endpoint.is_empty() {
                loader = loader.endpoint_url(endpoint.clone());
            }
        }
        let sdk_config = loader.load().await;

        // With a role ARN configured, trade the static keys for temporary
        // role credentials before building the EC2 client.
        let sdk_config = match &config.role_arn {
            Some(role_arn) if !role_arn.is_empty() => {
                let sts = aws_sdk_sts::Client::new(&sdk_config);
                let mut request = sts
                    .assume_role()
                    .role_arn(role_arn)
                    .role_session_name(ASSUME_ROLE_SESSION_NAME);
                if let Some(external_id) = &config.external_id {
                    if !external_id.is_empty() {
                        request = request.external_id(external_id);
                    }
                }
                let output = request
                    .send()
                    .await
                    .map_err(|e| AwsError::Credential(format!("AssumeRole failed: {e}")))?;
                let role_credentials = output.credentials().ok_or_else(|| {
                    AwsError::Credential("AssumeRole returned no credentials".to_string())
                })?;
                let assumed = Credentials::new(
                    role_credentials.access_key_id().to_string(),
                    role_credentials.secret_access_key().to_string(),
                    Some(role_credentials.session_token().to_string()),
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                );
                sdk_config
                    .to_builder()
                    .credentials_provider(aws_sdk_ec2::config::SharedCredentialsProvider::new(
                        assumed,
                    ))
                    .build()
            }
            _ => sdk_config,
        };

        Ok(Self {
            client: aws_sdk_ec2::Client::new(&sdk_config),
        })
    }
}

fn optional_filters(filters: Vec<Filter>) -> Option<Vec<Filter>> {
    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

#[async_trait::async_trait]
impl Ec2ApiClient for SdkEc2Client {
    async fn describe_vpcs(&self) -> Result<Vec<Vpc>, AwsError> {
        let mut vpcs = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_vpcs()
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| AwsError::api("DescribeVpcs", e))?;
            vpcs.extend(output.vpcs().iter().cloned());
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        debug!(count = vpcs.len(), "fetched vpcs");
        Ok(vpcs)
    }

    async fn describe_vpc_peering_connections(
        &self,
    ) -> Result<Vec<VpcPeeringConnection>, AwsError> {
        let mut peers = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_vpc_peering_connections()
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| AwsError::api("DescribeVpcPeeringConnections", e))?;
            peers.extend(output.vpc_peering_connections().iter().cloned());
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(peers)
    }

    async fn describe_instances(&self, filters: Vec<Filter>) -> Result<Vec<Instance>, AwsError> {
        let filters = optional_filters(filters);
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_instances()
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_filters(filters.clone())
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| AwsError::api("DescribeInstances", e))?;
            for reservation in output.reservations() {
                instances.extend(reservation.instances().iter().cloned());
            }
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        debug!(count = instances.len(), "fetched instances");
        Ok(instances)
    }

    async fn describe_security_groups(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<SecurityGroup>, AwsError> {
        let filters = optional_filters(filters);
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_security_groups()
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_filters(filters.clone())
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| AwsError::api("DescribeSecurityGroups", e))?;
            groups.extend(output.security_groups().iter().cloned());
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(groups)
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String, AwsError> {
        let result = self
            .client
            .create_security_group()
            .group_name(group_name)
            .description(description)
            .vpc_id(vpc_id)
            .send()
            .await;
        match result {
            Ok(output) => output
                .group_id()
                .map(str::to_string)
                .ok_or_else(|| AwsError::api("CreateSecurityGroup", "response missing group id")),
            Err(e) if e.code() == Some("InvalidGroup.Duplicate") => {
                Err(AwsError::AlreadyExists(group_name.to_string()))
            }
            Err(e) => Err(AwsError::api("CreateSecurityGroup", e)),
        }
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError> {
        let result = self
            .client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("InvalidGroup.NotFound") => {
                Err(AwsError::NotFound(group_id.to_string()))
            }
            Err(e) => Err(AwsError::api("DeleteSecurityGroup", e)),
        }
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| AwsError::api("AuthorizeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| AwsError::api("RevokeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn authorize_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        self.client
            .authorize_security_group_egress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| AwsError::api("AuthorizeSecurityGroupEgress", e))?;
        Ok(())
    }

    async fn revoke_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        self.client
            .revoke_security_group_egress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| AwsError::api("RevokeSecurityGroupEgress", e))?;
        Ok(())
    }

    async fn describe_network_interfaces(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<NetworkInterface>, AwsError> {
        let filters = optional_filters(filters);
        let mut interfaces = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_network_interfaces()
                .max_results(MAX_RESULTS_PER_PAGE)
                .set_filters(filters.clone())
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| AwsError::api("DescribeNetworkInterfaces", e))?;
            interfaces.extend(output.network_interfaces().iter().cloned());
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(interfaces)
    }

    async fn modify_network_interface_groups(
        &self,
        network_interface_id: &str,
        group_ids: Vec<String>,
    ) -> Result<(), AwsError> {
        self.client
            .modify_network_interface_attribute()
            .network_interface_id(network_interface_id)
            .set_groups(Some(group_ids))
            .send()
            .await
            .map_err(|e| AwsError::api("ModifyNetworkInterfaceAttribute", e))?;
        Ok(())
    }
}
