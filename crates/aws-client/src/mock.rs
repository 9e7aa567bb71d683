//! Mock EC2 client for unit testing
//!
//! Stores cloud state in memory and implements enough of the EC2 filter
//! language for the filters the plugin generates (`vpc-id`, `instance-id`,
//! `instance-state-name`, `tag:<key>`, `group-id`, `group-name`).

use crate::ec2_trait::{AwsApiConfig, Ec2ApiClient, Ec2ClientFactory};
use crate::error::AwsError;
use aws_sdk_ec2::types::{
    Filter, GroupIdentifier, Instance, IpPermission, NetworkInterface, SecurityGroup, Vpc,
    VpcPeeringConnection,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    vpcs: Vec<Vpc>,
    instances: Vec<Instance>,
    peering_connections: Vec<VpcPeeringConnection>,
    security_groups: HashMap<String, SecurityGroup>,
    network_interfaces: HashMap<String, NetworkInterface>,
    next_id: u64,
    // recorded mutations, for assertions
    modified_interface_groups: Vec<(String, Vec<String>)>,
    authorized_ingress: Vec<(String, Vec<IpPermission>)>,
    revoked_ingress: Vec<(String, Vec<IpPermission>)>,
    authorized_egress: Vec<(String, Vec<IpPermission>)>,
    revoked_egress: Vec<(String, Vec<IpPermission>)>,
}

/// In-memory EC2 double.
#[derive(Clone, Default)]
pub struct MockEc2Client {
    state: Arc<Mutex<MockState>>,
}

impl MockEc2Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vpc(&self, vpc: Vpc) {
        self.state.lock().unwrap().vpcs.push(vpc);
    }

    pub fn add_instance(&self, instance: Instance) {
        self.state.lock().unwrap().instances.push(instance);
    }

    pub fn add_peering_connection(&self, peering: VpcPeeringConnection) {
        self.state.lock().unwrap().peering_connections.push(peering);
    }

    pub fn add_security_group(&self, group: SecurityGroup) {
        if let Some(id) = group.group_id() {
            self.state
                .lock()
                .unwrap()
                .security_groups
                .insert(id.to_string(), group);
        }
    }

    pub fn add_network_interface(&self, interface: NetworkInterface) {
        if let Some(id) = interface.network_interface_id() {
            self.state
                .lock()
                .unwrap()
                .network_interfaces
                .insert(id.to_string(), interface);
        }
    }

    pub fn security_group(&self, group_id: &str) -> Option<SecurityGroup> {
        self.state
            .lock()
            .unwrap()
            .security_groups
            .get(group_id)
            .cloned()
    }

    pub fn modified_interface_groups(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().modified_interface_groups.clone()
    }

    pub fn authorized_ingress(&self) -> Vec<(String, Vec<IpPermission>)> {
        self.state.lock().unwrap().authorized_ingress.clone()
    }

    pub fn revoked_ingress(&self) -> Vec<(String, Vec<IpPermission>)> {
        self.state.lock().unwrap().revoked_ingress.clone()
    }

    pub fn authorized_egress(&self) -> Vec<(String, Vec<IpPermission>)> {
        self.state.lock().unwrap().authorized_egress.clone()
    }

    pub fn revoked_egress(&self) -> Vec<(String, Vec<IpPermission>)> {
        self.state.lock().unwrap().revoked_egress.clone()
    }
}

fn values_contain(filter: &Filter, candidate: Option<&str>) -> bool {
    match candidate {
        Some(value) => filter.values().iter().any(|v| v.as_str() == value),
        None => false,
    }
}

fn instance_matches(instance: &Instance, filter: &Filter) -> bool {
    match filter.name() {
        Some("vpc-id") => values_contain(filter, instance.vpc_id()),
        Some("instance-id") => values_contain(filter, instance.instance_id()),
        Some("instance-state-name") => values_contain(
            filter,
            instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str()),
        ),
        Some(name) if name.starts_with("tag:") => {
            let key = &name["tag:".len()..];
            instance
                .tags()
                .iter()
                .any(|t| t.key() == Some(key) && values_contain(filter, t.value()))
        }
        _ => false,
    }
}

fn security_group_matches(group: &SecurityGroup, filter: &Filter) -> bool {
    match filter.name() {
        Some("group-id") => values_contain(filter, group.group_id()),
        Some("group-name") => values_contain(filter, group.group_name()),
        Some("vpc-id") => values_contain(filter, group.vpc_id()),
        _ => false,
    }
}

fn interface_matches(interface: &NetworkInterface, filter: &Filter) -> bool {
    match filter.name() {
        Some("group-id") => interface
            .groups()
            .iter()
            .any(|g| values_contain(filter, g.group_id())),
        Some("vpc-id") => values_contain(filter, interface.vpc_id()),
        _ => false,
    }
}

#[async_trait::async_trait]
impl Ec2ApiClient for MockEc2Client {
    async fn describe_vpcs(&self) -> Result<Vec<Vpc>, AwsError> {
        Ok(self.state.lock().unwrap().vpcs.clone())
    }

    async fn describe_vpc_peering_connections(
        &self,
    ) -> Result<Vec<VpcPeeringConnection>, AwsError> {
        Ok(self.state.lock().unwrap().peering_connections.clone())
    }

    async fn describe_instances(&self, filters: Vec<Filter>) -> Result<Vec<Instance>, AwsError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .filter(|i| filters.iter().all(|f| instance_matches(i, f)))
            .cloned()
            .collect())
    }

    async fn describe_security_groups(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<SecurityGroup>, AwsError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .security_groups
            .values()
            .filter(|g| filters.iter().all(|f| security_group_matches(g, f)))
            .cloned()
            .collect())
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String, AwsError> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state
            .security_groups
            .values()
            .any(|g| g.group_name() == Some(group_name) && g.vpc_id() == Some(vpc_id));
        if duplicate {
            return Err(AwsError::AlreadyExists(group_name.to_string()));
        }
        state.next_id += 1;
        let group_id = format!("sg-{:08x}", state.next_id);
        let group = SecurityGroup::builder()
            .group_id(&group_id)
            .group_name(group_name)
            .description(description)
            .vpc_id(vpc_id)
            .build();
        state.security_groups.insert(group_id.clone(), group);
        Ok(group_id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        state
            .security_groups
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        let mut existing: Vec<IpPermission> = group.ip_permissions().to_vec();
        existing.extend(permissions.iter().cloned());
        let updated = SecurityGroup::builder()
            .set_group_id(group.group_id().map(String::from))
            .set_group_name(group.group_name().map(String::from))
            .set_description(group.description().map(String::from))
            .set_vpc_id(group.vpc_id().map(String::from))
            .set_ip_permissions(Some(existing))
            .set_ip_permissions_egress(Some(group.ip_permissions_egress().to_vec()))
            .build();
        state.security_groups.insert(group_id.to_string(), updated);
        state
            .authorized_ingress
            .push((group_id.to_string(), permissions));
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        let remaining: Vec<IpPermission> = group
            .ip_permissions()
            .iter()
            .filter(|p| !permissions.contains(p))
            .cloned()
            .collect();
        let updated = SecurityGroup::builder()
            .set_group_id(group.group_id().map(String::from))
            .set_group_name(group.group_name().map(String::from))
            .set_description(group.description().map(String::from))
            .set_vpc_id(group.vpc_id().map(String::from))
            .set_ip_permissions(Some(remaining))
            .set_ip_permissions_egress(Some(group.ip_permissions_egress().to_vec()))
            .build();
        state.security_groups.insert(group_id.to_string(), updated);
        state
            .revoked_ingress
            .push((group_id.to_string(), permissions));
        Ok(())
    }

    async fn authorize_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        let mut existing: Vec<IpPermission> = group.ip_permissions_egress().to_vec();
        existing.extend(permissions.iter().cloned());
        let updated = SecurityGroup::builder()
            .set_group_id(group.group_id().map(String::from))
            .set_group_name(group.group_name().map(String::from))
            .set_description(group.description().map(String::from))
            .set_vpc_id(group.vpc_id().map(String::from))
            .set_ip_permissions(Some(group.ip_permissions().to_vec()))
            .set_ip_permissions_egress(Some(existing))
            .build();
        state.security_groups.insert(group_id.to_string(), updated);
        state
            .authorized_egress
            .push((group_id.to_string(), permissions));
        Ok(())
    }

    async fn revoke_security_group_egress(
        &self,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(group_id.to_string()))?;
        let remaining: Vec<IpPermission> = group
            .ip_permissions_egress()
            .iter()
            .filter(|p| !permissions.contains(p))
            .cloned()
            .collect();
        let updated = SecurityGroup::builder()
            .set_group_id(group.group_id().map(String::from))
            .set_group_name(group.group_name().map(String::from))
            .set_description(group.description().map(String::from))
            .set_vpc_id(group.vpc_id().map(String::from))
            .set_ip_permissions(Some(group.ip_permissions().to_vec()))
            .set_ip_permissions_egress(Some(remaining))
            .build();
        state.security_groups.insert(group_id.to_string(), updated);
        state
            .revoked_egress
            .push((group_id.to_string(), permissions));
        Ok(())
    }

    async fn describe_network_interfaces(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<NetworkInterface>, AwsError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .network_interfaces
            .values()
            .filter(|n| filters.iter().all(|f| interface_matches(n, f)))
            .cloned()
            .collect())
    }

    async fn modify_network_interface_groups(
        &self,
        network_interface_id: &str,
        group_ids: Vec<String>,
    ) -> Result<(), AwsError> {
        let mut state = self.state.lock().unwrap();
        let interface = state
            .network_interfaces
            .get(network_interface_id)
            .cloned()
            .ok_or_else(|| AwsError::NotFound(network_interface_id.to_string()))?;
        let groups: Vec<GroupIdentifier> = group_ids
            .iter()
            .map(|id| {
                let name = state
                    .security_groups
                    .get(id)
                    .and_then(|g| g.group_name())
                    .map(String::from);
                GroupIdentifier::builder()
                    .group_id(id)
                    .set_group_name(name)
                    .build()
            })
            .collect();
        let updated = NetworkInterface::builder()
            .set_network_interface_id(interface.network_interface_id().map(String::from))
            .set_vpc_id(interface.vpc_id().map(String::from))
            .set_private_ip_address(interface.private_ip_address().map(String::from))
            .set_groups(Some(groups))
            .set_attachment(interface.attachment().cloned())
            .build();
        state
            .network_interfaces
            .insert(network_interface_id.to_string(), updated);
        state
            .modified_interface_groups
            .push((network_interface_id.to_string(), group_ids));
        Ok(())
    }
}

/// Factory handing out one shared mock client; records every create call so
/// credential-rebuild behavior can be asserted.
#[derive(Clone, Default)]
pub struct MockEc2ClientFactory {
    client: MockEc2Client,
    created_with: Arc<Mutex<Vec<AwsApiConfig>>>,
}

impl MockEc2ClientFactory {
    pub fn new(client: MockEc2Client) -> Self {
        Self {
            client,
            created_with: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn client(&self) -> MockEc2Client {
        self.client.clone()
    }

    pub fn create_count(&self) -> usize {
        self.created_with.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<AwsApiConfig> {
        self.created_with.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl Ec2ClientFactory for MockEc2ClientFactory {
    async fn create(&self, config: &AwsApiConfig) -> Result<Arc<dyn Ec2ApiClient>, AwsError> {
        self.created_with.lock().unwrap().push(config.clone());
        Ok(Arc::new(self.client.clone()))
    }
}
