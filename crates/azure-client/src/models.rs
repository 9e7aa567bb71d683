//! ARM wire models
//!
//! Serde shapes for the Resource Manager payloads the plugin reads and
//! writes. Only the fields the controller consumes are modeled; ARM
//! tolerates absent fields on write.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generic `{"value": [...], "nextLink": "..."}` list envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    pub next_link: Option<String>,
}

/// Resource Graph query response page.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGraphResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(rename = "$skipToken", default)]
    pub skip_token: Option<String>,
}

/// One VM row as projected by the inventory KQL query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vnet_id: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceRow>,
}

/// NIC details embedded in a VM row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub private_ips: Vec<String>,
    #[serde(default)]
    pub public_ips: Vec<String>,
}

/// Reference to another ARM resource by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    #[serde(default)]
    pub id: Option<String>,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualNetwork {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Option<VirtualNetworkProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    #[serde(default)]
    pub address_space: Option<AddressSpace>,
    #[serde(default)]
    pub virtual_network_peerings: Vec<VirtualNetworkPeering>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualNetworkPeering {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Option<VirtualNetworkPeeringProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkPeeringProperties {
    #[serde(default)]
    pub remote_virtual_network: Option<SubResource>,
    #[serde(default)]
    pub remote_address_space: Option<AddressSpace>,
}

/// Network security group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Option<SecurityGroupProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupProperties {
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Option<SecurityRuleProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleProperties {
    #[serde(default)]
    pub description: Option<String>,
    /// "Tcp", "Udp", "Icmp", or "*"
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub source_port_range: Option<String>,
    #[serde(default)]
    pub destination_port_range: Option<String>,
    #[serde(default)]
    pub source_address_prefix: Option<String>,
    #[serde(default)]
    pub source_address_prefixes: Vec<String>,
    #[serde(default)]
    pub destination_address_prefix: Option<String>,
    #[serde(default)]
    pub destination_address_prefixes: Vec<String>,
    #[serde(default)]
    pub source_application_security_groups: Vec<SubResource>,
    #[serde(default)]
    pub destination_application_security_groups: Vec<SubResource>,
    /// "Allow" or "Deny"
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// "Inbound" or "Outbound"
    #[serde(default)]
    pub direction: Option<String>,
}

/// Application security group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSecurityGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Network interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Option<NetworkInterfaceProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
    #[serde(default)]
    pub virtual_machine: Option<SubResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpConfiguration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Option<IpConfigurationProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    #[serde(rename = "privateIPAddress", default)]
    pub private_ip_address: Option<String>,
    #[serde(default)]
    pub subnet: Option<SubResource>,
    #[serde(default)]
    pub application_security_groups: Vec<SubResource>,
}

/// Extracts the resource-group segment from an ARM resource id
/// (`/subscriptions/<sub>/resourceGroups/<rg>/providers/...`).
pub fn resource_group_from_id(id: &str) -> Option<String> {
    let mut segments = id.split('/').skip_while(|s| !s.eq_ignore_ascii_case("resourceGroups"));
    segments.next()?;
    segments.next().map(str::to_string)
}

/// Extracts the trailing resource-name segment from an ARM resource id.
pub fn resource_name_from_id(id: &str) -> Option<String> {
    id.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_group_and_name_from_id() {
        let id = "/subscriptions/sub01/resourceGroups/testRG/providers/Microsoft.Network/virtualNetworks/testVnet01";
        assert_eq!(resource_group_from_id(id).as_deref(), Some("testRG"));
        assert_eq!(resource_name_from_id(id).as_deref(), Some("testVnet01"));
        assert_eq!(resource_group_from_id("not-an-arm-id"), None);
    }
}
