//! Mock Azure client for unit testing
//!
//! Stores ARM resources in memory; Resource Graph queries return the stored
//! VM rows verbatim while recording the query text for assertions.

use crate::azure_trait::{AzureApiClient, AzureApiConfig, AzureClientFactory};
use crate::error::AzureError;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    vm_rows: Vec<VirtualMachineRow>,
    virtual_networks: Vec<VirtualNetwork>,
    asgs: HashMap<(String, String), ApplicationSecurityGroup>,
    nsgs: HashMap<(String, String), SecurityGroup>,
    nics: HashMap<(String, String), NetworkInterface>,
    queries: Vec<String>,
    nsg_updates: Vec<(String, String, SecurityGroup)>,
    nic_updates: Vec<(String, String, NetworkInterface)>,
}

/// In-memory ARM double.
#[derive(Clone, Default)]
pub struct MockAzureClient {
    state: Arc<Mutex<MockState>>,
}

impl MockAzureClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vm_row(&self, row: VirtualMachineRow) {
        self.state.lock().unwrap().vm_rows.push(row);
    }

    pub fn add_virtual_network(&self, vnet: VirtualNetwork) {
        self.state.lock().unwrap().virtual_networks.push(vnet);
    }

    pub fn add_application_security_group(
        &self,
        resource_group: &str,
        asg: ApplicationSecurityGroup,
    ) {
        if let Some(name) = asg.name.clone() {
            self.state
                .lock()
                .unwrap()
                .asgs
                .insert((resource_group.to_string(), name), asg);
        }
    }

    pub fn add_network_security_group(&self, resource_group: &str, nsg: SecurityGroup) {
        if let Some(name) = nsg.name.clone() {
            self.state
                .lock()
                .unwrap()
                .nsgs
                .insert((resource_group.to_string(), name), nsg);
        }
    }

    pub fn add_network_interface(&self, resource_group: &str, nic: NetworkInterface) {
        if let Some(name) = nic.name.clone() {
            self.state
                .lock()
                .unwrap()
                .nics
                .insert((resource_group.to_string(), name), nic);
        }
    }

    pub fn recorded_queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    /// NSG create-or-update calls in order: (resource group, name, payload).
    pub fn nsg_updates(&self) -> Vec<(String, String, SecurityGroup)> {
        self.state.lock().unwrap().nsg_updates.clone()
    }

    pub fn nic_updates(&self) -> Vec<(String, String, NetworkInterface)> {
        self.state.lock().unwrap().nic_updates.clone()
    }

    pub fn network_security_group(&self, resource_group: &str, name: &str) -> Option<SecurityGroup> {
        self.state
            .lock()
            .unwrap()
            .nsgs
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait::async_trait]
impl AzureApiClient for MockAzureClient {
    async fn query_virtual_machines(
        &self,
        query: &str,
    ) -> Result<Vec<VirtualMachineRow>, AzureError> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());
        Ok(state.vm_rows.clone())
    }

    async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetwork>, AzureError> {
        Ok(self.state.lock().unwrap().virtual_networks.clone())
    }

    async fn list_application_security_groups(
        &self,
    ) -> Result<Vec<ApplicationSecurityGroup>, AzureError> {
        Ok(self.state.lock().unwrap().asgs.values().cloned().collect())
    }

    async fn create_or_update_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ApplicationSecurityGroup, AzureError> {
        let mut state = self.state.lock().unwrap();
        let key = (resource_group.to_string(), name.to_string());
        let asg = state.asgs.entry(key).or_insert(ApplicationSecurityGroup {
            id: Some(format!(
                "/subscriptions/sub/resourceGroups/{resource_group}/providers/Microsoft.Network/applicationSecurityGroups/{name}"
            )),
            name: Some(name.to_string()),
            location: Some(location.to_string()),
        });
        Ok(asg.clone())
    }

    async fn delete_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        self.state
            .lock()
            .unwrap()
            .asgs
            .remove(&(resource_group.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, AzureError> {
        self.state
            .lock()
            .unwrap()
            .nsgs
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AzureError::NotFound(name.to_string()))
    }

    async fn create_or_update_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        security_group: SecurityGroup,
    ) -> Result<SecurityGroup, AzureError> {
        let mut state = self.state.lock().unwrap();
        let mut stored = security_group.clone();
        if stored.name.is_none() {
            stored.name = Some(name.to_string());
        }
        state.nsgs.insert(
            (resource_group.to_string(), name.to_string()),
            stored.clone(),
        );
        state.nsg_updates.push((
            resource_group.to_string(),
            name.to_string(),
            security_group,
        ));
        Ok(stored)
    }

    async fn delete_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        self.state
            .lock()
            .unwrap()
            .nsgs
            .remove(&(resource_group.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, AzureError> {
        Ok(self.state.lock().unwrap().nics.values().cloned().collect())
    }

    async fn create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        interface: NetworkInterface,
    ) -> Result<NetworkInterface, AzureError> {
        let mut state = self.state.lock().unwrap();
        state.nics.insert(
            (resource_group.to_string(), name.to_string()),
            interface.clone(),
        );
        state
            .nic_updates
            .push((resource_group.to_string(), name.to_string(), interface.clone()));
        Ok(interface)
    }
}

/// Factory handing out one shared mock client; records create calls.
#[derive(Clone, Default)]
pub struct MockAzureClientFactory {
    client: MockAzureClient,
    created_with: Arc<Mutex<Vec<AzureApiConfig>>>,
}

impl MockAzureClientFactory {
    pub fn new(client: MockAzureClient) -> Self {
        Self {
            client,
            created_with: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn client(&self) -> MockAzureClient {
        self.client.clone()
    }

    pub fn create_count(&self) -> usize {
        self.created_with.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<AzureApiConfig> {
        self.created_with.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl AzureClientFactory for MockAzureClientFactory {
    async fn create(&self, config: &AzureApiConfig) -> Result<Arc<dyn AzureApiClient>, AzureError> {
        self.created_with.lock().unwrap().push(config.clone());
        Ok(Arc::new(self.client.clone()))
    }
}
