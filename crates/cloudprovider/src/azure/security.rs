//! Azure security-group enforcement.
//!
//! Membership lives on Application Security Groups attached to NIC ip
//! configurations; rules live in one Network Security Group per VNet,
//! rewritten wholesale with a single createOrUpdate. Every rule the
//! controller writes is named with the controller prefix and carries the
//! originating policy identity in its description; the NSG's default
//! posture is closed by a pair of lowest-priority deny-all rules.

use super::compute::AzureSnapshot;
use super::AzureAccountEntry;
use crate::cloudresource::{
    address_group_prefix, applied_to_prefix, cloud_resource_prefix, is_controller_owned_name,
    CloudResource, CloudResourceId, CloudResourceType, CloudRule, CloudRuleDescription,
    EgressRule, IngressRule, Rule, SynchronizationContent,
};
use crate::error::CloudError;
use crate::provider::CloudProviderType;
use azure_client::{
    resource_group_from_id, resource_name_from_id, ApplicationSecurityGroup, AzureError,
    NetworkInterface, SecurityGroup, SecurityGroupProperties, SecurityRule,
    SecurityRuleProperties, SubResource,
};
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// First priority handed to controller-owned allow rules, per direction.
pub(crate) const RULE_START_PRIORITY: i32 = 100;
/// Priority of the per-direction deny-all rules; 4096 is the lowest Azure
/// allows.
pub(crate) const DENY_ALL_RULE_PRIORITY: i32 = 4096;

const DIRECTION_INBOUND: &str = "Inbound";
const DIRECTION_OUTBOUND: &str = "Outbound";
const ACCESS_ALLOW: &str = "Allow";
const ACCESS_DENY: &str = "Deny";
const ANY: &str = "*";

fn protocol_to_wire(protocol: Option<u8>) -> String {
    match protocol {
        Some(6) => "Tcp".to_string(),
        Some(17) => "Udp".to_string(),
        Some(1) => "Icmp".to_string(),
        _ => ANY.to_string(),
    }
}

fn protocol_from_wire(protocol: Option<&str>) -> Option<u8> {
    match protocol.unwrap_or(ANY) {
        "Tcp" => Some(6),
        "Udp" => Some(17),
        "Icmp" => Some(1),
        _ => None,
    }
}

/// `<prefix>-vnet-<name>-nsg`, the per-VNet rule holder.
pub(crate) fn vnet_nsg_name(vnet_name: &str) -> String {
    format!(
        "{}-vnet-{}-nsg",
        cloud_resource_prefix(),
        vnet_name.to_lowercase()
    )
}

/// One deduplicated azure rule before priority assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AzureRuleSpec {
    ingress: bool,
    protocol: String,
    port: Option<u16>,
    /// CIDR peers (both address families).
    cidrs: Vec<String>,
    /// ASG-id peers.
    peer_asg_ids: Vec<String>,
    description: String,
}

impl AzureRuleSpec {
    /// Wire-equality key: what the cloud coalesces on.
    fn wire_key(&self) -> (bool, String, Option<u16>, Vec<String>, Vec<String>) {
        (
            self.ingress,
            self.protocol.clone(),
            self.port,
            self.cidrs.clone(),
            self.peer_asg_ids.clone(),
        )
    }
}

fn sub_ids(resources: &[SubResource]) -> Vec<String> {
    let mut ids: Vec<String> = resources
        .iter()
        .filter_map(|r| r.id.as_deref())
        .map(str::to_lowercase)
        .collect();
    ids.sort();
    ids
}

fn rule_is_owned(rule: &SecurityRule) -> bool {
    let by_description = rule
        .properties
        .as_ref()
        .and_then(|p| p.description.as_deref())
        .and_then(CloudRuleDescription::parse)
        .is_some();
    let by_name = rule
        .name
        .as_deref()
        .is_some_and(|n| n.to_lowercase().starts_with(cloud_resource_prefix()));
    by_description || by_name
}

/// Wire key of an existing cloud rule, used to preserve priorities across
/// updates.
fn cloud_rule_wire_key(
    rule: &SecurityRule,
) -> Option<(bool, String, Option<u16>, Vec<String>, Vec<String>)> {
    let properties = rule.properties.as_ref()?;
    let ingress = properties.direction.as_deref()? == DIRECTION_INBOUND;
    let protocol = properties.protocol.clone().unwrap_or_else(|| ANY.to_string());
    let port = properties
        .destination_port_range
        .as_deref()
        .and_then(|p| p.parse().ok());
    let (cidrs, peer_asgs) = if ingress {
        let mut cidrs: Vec<String> = properties.source_address_prefixes.clone();
        cidrs.extend(properties.source_address_prefix.clone());
        cidrs.sort();
        (cidrs, sub_ids(&properties.source_application_security_groups))
    } else {
        let mut cidrs: Vec<String> = properties.destination_address_prefixes.clone();
        cidrs.extend(properties.destination_address_prefix.clone());
        cidrs.sort();
        (
            cidrs,
            sub_ids(&properties.destination_application_security_groups),
        )
    };
    Some((ingress, protocol, port, cidrs, peer_asgs))
}

/// Expands and deduplicates the caller's full intended rule set. Two rules
/// colliding on (direction, protocol, port) but differing in peer spec stay
/// separate; full collisions keep the first occurrence.
fn build_rule_specs(
    all_rules: &[CloudRule],
    group_name: &str,
    asg_ids_by_name: &HashMap<String, String>,
) -> Result<Vec<AzureRuleSpec>, CloudError> {
    let mut specs = Vec::new();
    let mut seen: HashSet<(bool, String, Option<u16>, Vec<String>, Vec<String>)> = HashSet::new();
    for cloud_rule in all_rules {
        let description =
            CloudRuleDescription::encode(&cloud_rule.np_namespaced_name).map_err(|_| {
                CloudError::RuleMissingDescription {
                    group: group_name.to_string(),
                }
            })?;

        let (ingress, port, cidrs, peer_groups, protocol) = match &cloud_rule.rule {
            Rule::Ingress(IngressRule {
                from_port,
                from_src_ip,
                from_security_groups,
                protocol,
            }) => (true, from_port, from_src_ip, from_security_groups, protocol),
            Rule::Egress(EgressRule {
                to_port,
                to_dst_ip,
                to_security_groups,
                protocol,
            }) => (false, to_port, to_dst_ip, to_security_groups, protocol),
        };

        let mut push_spec = |cidrs: Vec<String>, peer_asg_ids: Vec<String>| {
            let spec = AzureRuleSpec {
                ingress,
                protocol: protocol_to_wire(*protocol),
                port: *port,
                cidrs,
                peer_asg_ids,
                description: description.clone(),
            };
            if seen.insert(spec.wire_key()) {
                specs.push(spec);
            }
        };

        if !cidrs.is_empty() {
            let mut prefixes: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
            prefixes.sort();
            push_spec(prefixes, Vec::new());
        }
        if !peer_groups.is_empty() {
            let mut ids = Vec::new();
            for peer in peer_groups {
                let peer_name = peer.cloud_name(true);
                let id = asg_ids_by_name.get(&peer_name).ok_or_else(|| {
                    CloudError::Azure(AzureError::NotFound(format!(
                        "application security group {peer_name}"
                    )))
                })?;
                ids.push(id.to_lowercase());
            }
            ids.sort();
            push_spec(Vec::new(), ids);
        }
    }
    Ok(specs)
}

fn security_rule(
    name: String,
    priority: i32,
    spec: &AzureRuleSpec,
    applied_to_asg_id: &str,
) -> SecurityRule {
    let applied_to = vec![SubResource::new(applied_to_asg_id)];
    let peer_asgs: Vec<SubResource> = spec
        .peer_asg_ids
        .iter()
        .map(|id| SubResource::new(id.clone()))
        .collect();

    let mut properties = SecurityRuleProperties {
        description: Some(spec.description.clone()),
        protocol: Some(spec.protocol.clone()),
        source_port_range: Some(ANY.to_string()),
        destination_port_range: Some(
            spec.port.map(|p| p.to_string()).unwrap_or_else(|| ANY.to_string()),
        ),
        access: Some(ACCESS_ALLOW.to_string()),
        priority: Some(priority),
        direction: Some(
            if spec.ingress {
                DIRECTION_INBOUND
            } else {
                DIRECTION_OUTBOUND
            }
            .to_string(),
        ),
        ..Default::default()
    };
    if spec.ingress {
        properties.source_address_prefixes = spec.cidrs.clone();
        properties.source_application_security_groups = peer_asgs;
        properties.destination_application_security_groups = applied_to;
    } else {
        properties.destination_address_prefixes = spec.cidrs.clone();
        properties.destination_application_security_groups = peer_asgs;
        properties.source_application_security_groups = applied_to;
    }
    SecurityRule {
        id: None,
        name: Some(name),
        properties: Some(properties),
    }
}

/// The two lowest-priority deny-all rules closing the group's default
/// posture.
fn deny_all_rules(applied_to_asg_id: &str) -> Vec<SecurityRule> {
    let prefix = cloud_resource_prefix();
    let inbound = SecurityRule {
        id: None,
        name: Some(format!("{prefix}-deny-all-inbound")),
        properties: Some(SecurityRuleProperties {
            protocol: Some(ANY.to_string()),
            source_port_range: Some(ANY.to_string()),
            destination_port_range: Some(ANY.to_string()),
            source_address_prefix: Some(ANY.to_string()),
            destination_application_security_groups: vec![SubResource::new(applied_to_asg_id)],
            access: Some(ACCESS_DENY.to_string()),
            priority: Some(DENY_ALL_RULE_PRIORITY),
            direction: Some(DIRECTION_INBOUND.to_string()),
            ..Default::default()
        }),
    };
    let outbound = SecurityRule {
        id: None,
        name: Some(format!("{prefix}-deny-all-outbound")),
        properties: Some(SecurityRuleProperties {
            protocol: Some(ANY.to_string()),
            source_port_range: Some(ANY.to_string()),
            destination_port_range: Some(ANY.to_string()),
            destination_address_prefix: Some(ANY.to_string()),
            source_application_security_groups: vec![SubResource::new(applied_to_asg_id)],
            access: Some(ACCESS_DENY.to_string()),
            priority: Some(DENY_ALL_RULE_PRIORITY),
            direction: Some(DIRECTION_OUTBOUND.to_string()),
            ..Default::default()
        }),
    };
    vec![inbound, outbound]
}

fn asg_maps(
    asgs: &[ApplicationSecurityGroup],
) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut by_name = HashMap::new();
    let mut by_id = HashMap::new();
    for asg in asgs {
        if let (Some(name), Some(id)) = (asg.name.as_deref(), asg.id.as_deref()) {
            by_name.insert(name.to_lowercase(), id.to_string());
            by_id.insert(id.to_lowercase(), name.to_string());
        }
    }
    (by_name, by_id)
}

fn interface_references_asg(interface: &NetworkInterface, asg_id: &str) -> bool {
    interface
        .properties
        .as_ref()
        .map(|p| {
            p.ip_configurations.iter().any(|ip| {
                ip.properties
                    .as_ref()
                    .map(|props| {
                        props
                            .application_security_groups
                            .iter()
                            .any(|r| r.id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(asg_id)))
                    })
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Adds or removes one ASG reference across all ip configurations.
fn rewrite_interface_asgs(interface: &NetworkInterface, asg_id: &str, attach: bool) -> NetworkInterface {
    let mut updated = interface.clone();
    if let Some(properties) = updated.properties.as_mut() {
        for ip_configuration in properties.ip_configurations.iter_mut() {
            if let Some(ip_properties) = ip_configuration.properties.as_mut() {
                ip_properties.application_security_groups.retain(|r| {
                    !r.id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(asg_id))
                });
                if attach {
                    ip_properties
                        .application_security_groups
                        .push(SubResource::new(asg_id));
                }
            }
        }
    }
    updated
}

impl AzureAccountEntry {
    fn require_vnet_in_snapshot(&self, vnet_id: &str) -> Result<Arc<AzureSnapshot>, CloudError> {
        let missing = || CloudError::VpcNotInSnapshot {
            vpc: vnet_id.to_string(),
            account: self.namespaced_name.to_string(),
        };
        let snapshot = self.cache.get_snapshot().ok_or_else(missing)?;
        let lowered = vnet_id.to_lowercase();
        let known = snapshot
            .vnets
            .iter()
            .any(|v| v.id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(vnet_id)))
            || snapshot.managed_vnet_ids.contains(&lowered);
        if !known {
            return Err(missing());
        }
        Ok(snapshot)
    }

    pub(crate) async fn create_security_group(
        &self,
        resource: &CloudResource,
        membership_only: bool,
    ) -> Result<String, CloudError> {
        let state = self.state.lock().await;
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;
        let location = state.config.region.clone();
        self.require_vnet_in_snapshot(&resource.id.vpc)?;

        let resource_group = resource_group_from_id(&resource.id.vpc).ok_or_else(|| {
            CloudError::InvalidConfiguration(format!("cannot parse vnet id {}", resource.id.vpc))
        })?;
        let vnet_name = resource_name_from_id(&resource.id.vpc).ok_or_else(|| {
            CloudError::InvalidConfiguration(format!("cannot parse vnet id {}", resource.id.vpc))
        })?;

        let asg_name = resource.id.cloud_name(membership_only);
        let asg = api
            .create_or_update_application_security_group(&resource_group, &asg_name, &location)
            .await?;

        // Applied-to groups need the per-vnet NSG that will hold their
        // rules.
        if !membership_only {
            let nsg_name = vnet_nsg_name(&vnet_name);
            match api.get_network_security_group(&resource_group, &nsg_name).await {
                Ok(_) => {}
                Err(AzureError::NotFound(_)) => {
                    let nsg = SecurityGroup {
                        id: None,
                        name: Some(nsg_name.clone()),
                        location: Some(location.clone()),
                        properties: Some(SecurityGroupProperties::default()),
                    };
                    api.create_or_update_network_security_group(&resource_group, &nsg_name, nsg)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        asg.id
            .ok_or_else(|| CloudError::Azure(AzureError::NotFound(asg_name)))
    }

    pub(crate) async fn update_security_group_members(
        &self,
        resource: &CloudResource,
        members: &[CloudResource],
        membership_only: bool,
    ) -> Result<(), CloudError> {
        let state = self.state.lock().await;
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;
        let snapshot = self.require_vnet_in_snapshot(&resource.id.vpc)?;

        let asg_name = resource.id.cloud_name(membership_only);
        let asgs = api.list_application_security_groups().await?;
        let (asg_by_name, _) = asg_maps(&asgs);
        let asg_id = asg_by_name
            .get(&asg_name)
            .ok_or_else(|| {
                CloudError::Azure(AzureError::NotFound(format!(
                    "application security group {asg_name}"
                )))
            })?
            .clone();

        let mut desired_nics: HashSet<String> = HashSet::new();
        for member in members {
            match member.resource_type {
                CloudResourceType::NetworkInterface => {
                    desired_nics.insert(member.id.name.to_lowercase());
                }
                CloudResourceType::VirtualMachine => {
                    let row = snapshot
                        .virtual_machines
                        .get(&member.id.name.to_lowercase())
                        .or_else(|| {
                            snapshot
                                .virtual_machines
                                .values()
                                .find(|r| r.name.eq_ignore_ascii_case(&member.id.name))
                        });
                    match row {
                        Some(row) => {
                            for nic in &row.network_interfaces {
                                if let Some(id) = &nic.id {
                                    desired_nics.insert(id.to_lowercase());
                                }
                            }
                        }
                        None => warn!(
                            account = %self.namespaced_name,
                            vm = %member.id.name,
                            "member vm not in inventory snapshot, skipping"
                        ),
                    }
                }
            }
        }

        for interface in api.list_network_interfaces().await? {
            let Some(interface_id) = interface.id.as_deref() else {
                continue;
            };
            let attached = interface_references_asg(&interface, &asg_id);
            let wanted = desired_nics.contains(&interface_id.to_lowercase());
            if attached == wanted {
                continue;
            }
            let resource_group = resource_group_from_id(interface_id).ok_or_else(|| {
                CloudError::InvalidConfiguration(format!("cannot parse nic id {interface_id}"))
            })?;
            let name = resource_name_from_id(interface_id).ok_or_else(|| {
                CloudError::InvalidConfiguration(format!("cannot parse nic id {interface_id}"))
            })?;
            let updated = rewrite_interface_asgs(&interface, &asg_id, wanted);
            api.create_or_update_network_interface(&resource_group, &name, updated)
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn update_security_group_rules(
        &self,
        applied_to: &CloudResource,
        all_rules: &[CloudRule],
    ) -> Result<(), CloudError> {
        let state = self.state.lock().await;
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;
        let location = state.config.region.clone();
        self.require_vnet_in_snapshot(&applied_to.id.vpc)?;

        let group_name = applied_to.id.cloud_name(false);
        let asgs = api.list_application_security_groups().await?;
        let (asg_by_name, _) = asg_maps(&asgs);
        let applied_to_asg_id = asg_by_name
            .get(&group_name)
            .ok_or_else(|| {
                CloudError::Azure(AzureError::NotFound(format!(
                    "application security group {group_name}"
                )))
            })?
            .clone();

        let specs = build_rule_specs(all_rules, &group_name, &asg_by_name)?;

        let resource_group = resource_group_from_id(&applied_to.id.vpc).ok_or_else(|| {
            CloudError::InvalidConfiguration(format!("cannot parse vnet id {}", applied_to.id.vpc))
        })?;
        let vnet_name = resource_name_from_id(&applied_to.id.vpc).ok_or_else(|| {
            CloudError::InvalidConfiguration(format!("cannot parse vnet id {}", applied_to.id.vpc))
        })?;
        let nsg_name = vnet_nsg_name(&vnet_name);

        let current = match api.get_network_security_group(&resource_group, &nsg_name).await {
            Ok(nsg) => nsg,
            Err(AzureError::NotFound(_)) => SecurityGroup::default(),
            Err(e) => return Err(e.into()),
        };
        let current_rules = current
            .properties
            .as_ref()
            .map(|p| p.security_rules.clone())
            .unwrap_or_default();

        // Unowned rules pass through unchanged; existing owned priorities
        // are preserved for wire-equal rules.
        let unowned: Vec<SecurityRule> = current_rules
            .iter()
            .filter(|r| !rule_is_owned(r))
            .cloned()
            .collect();
        let mut existing_priorities: HashMap<_, i32> = HashMap::new();
        let mut used_priorities: HashSet<(bool, i32)> = HashSet::new();
        for rule in current_rules.iter().filter(|r| rule_is_owned(r)) {
            if let (Some(key), Some(priority)) = (
                cloud_rule_wire_key(rule),
                rule.properties.as_ref().and_then(|p| p.priority),
            ) {
                if priority != DENY_ALL_RULE_PRIORITY {
                    existing_priorities.insert(key, priority);
                }
            }
        }

        let mut rules: Vec<SecurityRule> = unowned;
        let mut next_priority: HashMap<bool, i32> = HashMap::new();
        for (index, spec) in specs.iter().enumerate() {
            let priority = match existing_priorities.get(&spec.wire_key()) {
                Some(existing) if used_priorities.insert((spec.ingress, *existing)) => *existing,
                _ => {
                    let counter = next_priority.entry(spec.ingress).or_insert(RULE_START_PRIORITY);
                    while !used_priorities.insert((spec.ingress, *counter)) {
                        *counter += 1;
                    }
                    let assigned = *counter;
                    *counter += 1;
                    assigned
                }
            };
            let direction = if spec.ingress { "in" } else { "out" };
            let name = format!("{}-{}-{}", cloud_resource_prefix(), direction, index);
            rules.push(security_rule(name, priority, spec, &applied_to_asg_id));
        }
        rules.extend(deny_all_rules(&applied_to_asg_id));

        let nsg = SecurityGroup {
            id: current.id.clone(),
            name: Some(nsg_name.clone()),
            location: current.location.clone().or(Some(location)),
            properties: Some(SecurityGroupProperties {
                security_rules: rules,
            }),
        };
        api.create_or_update_network_security_group(&resource_group, &nsg_name, nsg)
            .await?;
        Ok(())
    }

    pub(crate) async fn delete_security_group(
        &self,
        resource: &CloudResource,
        membership_only: bool,
    ) -> Result<(), CloudError> {
        let state = self.state.lock().await;
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;

        let asg_name = resource.id.cloud_name(membership_only);
        let asgs = api.list_application_security_groups().await?;
        let (asg_by_name, _) = asg_maps(&asgs);
        let Some(asg_id) = asg_by_name.get(&asg_name).cloned() else {
            return Ok(());
        };

        // Defense: detach any ip configurations still referencing the ASG.
        for interface in api.list_network_interfaces().await? {
            if !interface_references_asg(&interface, &asg_id) {
                continue;
            }
            let Some(interface_id) = interface.id.as_deref() else {
                continue;
            };
            let (Some(resource_group), Some(name)) = (
                resource_group_from_id(interface_id),
                resource_name_from_id(interface_id),
            ) else {
                continue;
            };
            let updated = rewrite_interface_asgs(&interface, &asg_id, false);
            api.create_or_update_network_interface(&resource_group, &name, updated)
                .await?;
        }

        let resource_group = resource_group_from_id(&asg_id)
            .or_else(|| resource_group_from_id(&resource.id.vpc))
            .ok_or_else(|| {
                CloudError::InvalidConfiguration(format!("cannot parse asg id {asg_id}"))
            })?;
        api.delete_application_security_group(&resource_group, &asg_name)
            .await?;

        // Applied-to cleanup: drop this group's rules from the vnet NSG and
        // delete the NSG once no owned allow rules remain.
        if !membership_only {
            if let (Some(nsg_resource_group), Some(vnet_name)) = (
                resource_group_from_id(&resource.id.vpc),
                resource_name_from_id(&resource.id.vpc),
            ) {
                let nsg_name = vnet_nsg_name(&vnet_name);
                match api
                    .get_network_security_group(&nsg_resource_group, &nsg_name)
                    .await
                {
                    Ok(nsg) => {
                        let rules = nsg
                            .properties
                            .as_ref()
                            .map(|p| p.security_rules.clone())
                            .unwrap_or_default();
                        let references_asg = |rule: &SecurityRule| {
                            rule.properties.as_ref().is_some_and(|p| {
                                p.source_application_security_groups
                                    .iter()
                                    .chain(p.destination_application_security_groups.iter())
                                    .any(|r| {
                                        r.id.as_deref()
                                            .is_some_and(|id| id.eq_ignore_ascii_case(&asg_id))
                                    })
                            })
                        };
                        let kept: Vec<SecurityRule> = rules
                            .iter()
                            .filter(|r| !references_asg(r))
                            .cloned()
                            .collect();
                        let owned_allow_remaining = kept.iter().any(|r| {
                            rule_is_owned(r)
                                && r.properties
                                    .as_ref()
                                    .and_then(|p| p.access.as_deref())
                                    .is_some_and(|a| a == ACCESS_ALLOW)
                        });
                        if owned_allow_remaining {
                            let updated = SecurityGroup {
                                properties: Some(SecurityGroupProperties {
                                    security_rules: kept,
                                }),
                                ..nsg
                            };
                            api.create_or_update_network_security_group(
                                &nsg_resource_group,
                                &nsg_name,
                                updated,
                            )
                            .await?;
                        } else {
                            api.delete_network_security_group(&nsg_resource_group, &nsg_name)
                                .await?;
                        }
                    }
                    Err(AzureError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn enforced_security(
        &self,
    ) -> Result<Vec<SynchronizationContent>, CloudError> {
        let api = match self.state.lock().await.api.clone() {
            Some(api) => api,
            None => return Ok(Vec::new()),
        };
        let Some(snapshot) = self.cache.get_snapshot() else {
            return Ok(Vec::new());
        };

        let asgs = api.list_application_security_groups().await?;
        let (_, asg_by_id) = asg_maps(&asgs);
        let interfaces = api.list_network_interfaces().await?;

        // NIC id → owning VM row, for member projection.
        let mut nic_to_vm: HashMap<String, &azure_client::VirtualMachineRow> = HashMap::new();
        for row in snapshot.virtual_machines.values() {
            for nic in &row.network_interfaces {
                if let Some(id) = &nic.id {
                    nic_to_vm.insert(id.to_lowercase(), row);
                }
            }
        }

        let mut contents = Vec::new();
        for asg in &asgs {
            let (Some(asg_id), Some(asg_name)) = (asg.id.as_deref(), asg.name.as_deref()) else {
                continue;
            };
            let lowered_name = asg_name.to_lowercase();
            let (logical_name, membership_only) =
                if let Some(n) = lowered_name.strip_prefix(&address_group_prefix()) {
                    (n.to_string(), true)
                } else if let Some(n) = lowered_name.strip_prefix(&applied_to_prefix()) {
                    (n.to_string(), false)
                } else {
                    continue;
                };

            let mut members = Vec::new();
            let mut members_with_other = Vec::new();
            let mut group_vnet = String::new();
            for interface in &interfaces {
                if !interface_references_asg(interface, asg_id) {
                    continue;
                }
                let nic_id = interface.id.as_deref().unwrap_or_default().to_lowercase();
                let (member_name, vnet_id) = match nic_to_vm.get(&nic_id) {
                    Some(row) => (
                        row.id.clone(),
                        row.vnet_id.as_deref().unwrap_or_default().to_lowercase(),
                    ),
                    None => (nic_id.clone(), String::new()),
                };
                if group_vnet.is_empty() {
                    group_vnet = vnet_id.clone();
                }
                let member = CloudResource {
                    resource_type: CloudResourceType::VirtualMachine,
                    id: CloudResourceId::new(member_name, vnet_id),
                    account_id: self.namespaced_name.to_string(),
                    cloud_provider: CloudProviderType::Azure,
                };
                let has_foreign = interface
                    .properties
                    .as_ref()
                    .map(|p| {
                        p.ip_configurations.iter().any(|ip| {
                            ip.properties.as_ref().is_some_and(|props| {
                                props.application_security_groups.iter().any(|r| {
                                    r.id.as_deref().is_some_and(|id| {
                                        !id.eq_ignore_ascii_case(asg_id)
                                            && asg_by_id
                                                .get(&id.to_lowercase())
                                                .is_some_and(|n| !is_controller_owned_name(n))
                                    })
                                })
                            })
                        })
                    })
                    .unwrap_or(false);
                if has_foreign {
                    members_with_other.push(member.clone());
                }
                members.push(member);
            }

            let mut ingress_rules = Vec::new();
            let mut egress_rules = Vec::new();
            if !membership_only {
                for vnet in &snapshot.vnets {
                    let (Some(vnet_id), Some(vnet_name)) =
                        (vnet.id.as_deref(), vnet.name.as_deref())
                    else {
                        continue;
                    };
                    let Some(resource_group) = resource_group_from_id(vnet_id) else {
                        continue;
                    };
                    let nsg_name = vnet_nsg_name(vnet_name);
                    let nsg = match api
                        .get_network_security_group(&resource_group, &nsg_name)
                        .await
                    {
                        Ok(nsg) => nsg,
                        Err(AzureError::NotFound(_)) => continue,
                        Err(e) => return Err(e.into()),
                    };
                    let rules = nsg
                        .properties
                        .as_ref()
                        .map(|p| p.security_rules.clone())
                        .unwrap_or_default();
                    for rule in &rules {
                        let Some(properties) = rule.properties.as_ref() else {
                            continue;
                        };
                        let Some(description) = properties
                            .description
                            .as_deref()
                            .and_then(CloudRuleDescription::parse)
                        else {
                            continue;
                        };
                        let ingress =
                            properties.direction.as_deref() == Some(DIRECTION_INBOUND);
                        let attached_groups = if ingress {
                            &properties.destination_application_security_groups
                        } else {
                            &properties.source_application_security_groups
                        };
                        let attaches_here = attached_groups
                            .iter()
                            .any(|r| r.id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(asg_id)));
                        if !attaches_here {
                            continue;
                        }

                        let port = properties
                            .destination_port_range
                            .as_deref()
                            .and_then(|p| p.parse::<u16>().ok());
                        let protocol = protocol_from_wire(properties.protocol.as_deref());
                        let (prefixes, peer_refs) = if ingress {
                            (
                                &properties.source_address_prefixes,
                                &properties.source_application_security_groups,
                            )
                        } else {
                            (
                                &properties.destination_address_prefixes,
                                &properties.destination_application_security_groups,
                            )
                        };
                        let cidrs: Vec<IpNet> =
                            prefixes.iter().filter_map(|p| p.parse().ok()).collect();
                        let peer_groups: Vec<CloudResourceId> = peer_refs
                            .iter()
                            .filter_map(|r| {
                                let id = r.id.as_deref()?;
                                let name = asg_by_id.get(&id.to_lowercase())?.to_lowercase();
                                let logical = name.strip_prefix(&address_group_prefix())?;
                                Some(CloudResourceId::new(logical, group_vnet.clone()))
                            })
                            .collect();

                        let semantic_rule = if ingress {
                            Rule::Ingress(IngressRule {
                                from_port: port,
                                from_src_ip: cidrs,
                                from_security_groups: peer_groups,
                                protocol,
                            })
                        } else {
                            Rule::Egress(EgressRule {
                                to_port: port,
                                to_dst_ip: cidrs,
                                to_security_groups: peer_groups,
                                protocol,
                            })
                        };
                        let cloud_rule = CloudRule::new(
                            semantic_rule,
                            &description.np_namespaced_name(),
                            asg_name,
                        );
                        if ingress {
                            ingress_rules.push(cloud_rule);
                        } else {
                            egress_rules.push(cloud_rule);
                        }
                    }
                }
            }

            contents.push(SynchronizationContent {
                resource: CloudResource {
                    resource_type: CloudResourceType::VirtualMachine,
                    id: CloudResourceId::new(logical_name, group_vnet),
                    account_id: self.namespaced_name.to_string(),
                    cloud_provider: CloudProviderType::Azure,
                },
                membership_only,
                members,
                members_with_other_sg_attached: members_with_other,
                ingress_rules,
                egress_rules,
            });
        }
        Ok(contents)
    }
}
