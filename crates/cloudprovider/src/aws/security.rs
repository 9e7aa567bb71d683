//! AWS security-group enforcement.
//!
//! Rules are reconciled as authorize/revoke diffs against the live cloud
//! state; membership is reconciled per network interface. Only objects whose
//! name carries the controller prefix are ever mutated, and rules the
//! controller writes always embed the originating policy identity in the
//! range/pair description.

use super::compute::AwsSnapshot;
use super::AwsAccountEntry;
use crate::cloudresource::{
    address_group_prefix, applied_to_prefix, is_controller_owned_name, CloudResource,
    CloudResourceId, CloudResourceType, CloudRule, CloudRuleDescription, EgressRule, IngressRule,
    Rule, SynchronizationContent,
};
use crate::error::CloudError;
use crate::provider::CloudProviderType;
use aws_client::{AwsError, Ec2ApiClient};
use aws_sdk_ec2::types::{
    Filter, IpPermission, IpRange, Ipv6Range, NetworkInterface, SecurityGroup, UserIdGroupPair,
};
use ipnet::IpNet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_SECURITY_GROUP_NAME: &str = "default";

fn protocol_to_wire(protocol: Option<u8>) -> String {
    match protocol {
        None => "-1".to_string(),
        Some(6) => "tcp".to_string(),
        Some(17) => "udp".to_string(),
        Some(1) => "icmp".to_string(),
        Some(58) => "icmpv6".to_string(),
        Some(other) => other.to_string(),
    }
}

fn protocol_from_wire(protocol: &str) -> Option<u8> {
    match protocol {
        "-1" => None,
        "tcp" => Some(6),
        "udp" => Some(17),
        "icmp" => Some(1),
        "icmpv6" => Some(58),
        other => other.parse().ok(),
    }
}

/// One cloud rule flattened to a single peer, the unit of diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PermKey {
    protocol: String,
    from_port: Option<i32>,
    to_port: Option<i32>,
    cidr_v4: Option<String>,
    cidr_v6: Option<String>,
    peer_group_id: Option<String>,
    description: String,
}

fn flatten_permission(permission: &IpPermission) -> Vec<(PermKey, bool)> {
    let protocol = permission.ip_protocol().unwrap_or("-1").to_string();
    let base = PermKey {
        protocol,
        from_port: permission.from_port(),
        to_port: permission.to_port(),
        cidr_v4: None,
        cidr_v6: None,
        peer_group_id: None,
        description: String::new(),
    };
    let mut keys = Vec::new();
    for range in permission.ip_ranges() {
        let description = range.description().unwrap_or("").to_string();
        let owned = CloudRuleDescription::parse(&description).is_some();
        keys.push((
            PermKey {
                cidr_v4: range.cidr_ip().map(str::to_string),
                description,
                ..base.clone()
            },
            owned,
        ));
    }
    for range in permission.ipv6_ranges() {
        let description = range.description().unwrap_or("").to_string();
        let owned = CloudRuleDescription::parse(&description).is_some();
        keys.push((
            PermKey {
                cidr_v6: range.cidr_ipv6().map(str::to_string),
                description,
                ..base.clone()
            },
            owned,
        ));
    }
    for pair in permission.user_id_group_pairs() {
        let description = pair.description().unwrap_or("").to_string();
        let owned = CloudRuleDescription::parse(&description).is_some();
        keys.push((
            PermKey {
                peer_group_id: pair.group_id().map(str::to_string),
                description,
                ..base.clone()
            },
            owned,
        ));
    }
    keys
}

fn permission_from_key(key: &PermKey) -> IpPermission {
    let mut builder = IpPermission::builder()
        .ip_protocol(&key.protocol)
        .set_from_port(key.from_port)
        .set_to_port(key.to_port);
    if let Some(cidr) = &key.cidr_v4 {
        builder = builder.ip_ranges(
            IpRange::builder()
                .cidr_ip(cidr)
                .description(&key.description)
                .build(),
        );
    }
    if let Some(cidr) = &key.cidr_v6 {
        builder = builder.ipv6_ranges(
            Ipv6Range::builder()
                .cidr_ipv6(cidr)
                .description(&key.description)
                .build(),
        );
    }
    if let Some(group_id) = &key.peer_group_id {
        builder = builder.user_id_group_pairs(
            UserIdGroupPair::builder()
                .group_id(group_id)
                .description(&key.description)
                .build(),
        );
    }
    builder.build()
}

/// Expands the caller's full intended rule set into diffable keys, one per
/// (protocol, port, peer). Rules without a policy identity are rejected.
fn rules_to_keys(
    rules: &[CloudRule],
    want_ingress: bool,
    group_name: &str,
    group_ids_by_name: &HashMap<String, String>,
) -> Result<HashSet<PermKey>, CloudError> {
    let mut keys = HashSet::new();
    for cloud_rule in rules {
        if cloud_rule.rule.is_ingress() != want_ingress {
            continue;
        }
        let description =
            CloudRuleDescription::encode(&cloud_rule.np_namespaced_name).map_err(|_| {
                CloudError::RuleMissingDescription {
                    group: group_name.to_string(),
                }
            })?;

        let (port, cidrs, peer_groups, protocol) = match &cloud_rule.rule {
            Rule::Ingress(IngressRule {
                from_port,
                from_src_ip,
                from_security_groups,
                protocol,
            }) => (from_port, from_src_ip, from_security_groups, protocol),
            Rule::Egress(EgressRule {
                to_port,
                to_dst_ip,
                to_security_groups,
                protocol,
            }) => (to_port, to_dst_ip, to_security_groups, protocol),
        };

        let base = PermKey {
            protocol: protocol_to_wire(*protocol),
            from_port: port.map(i32::from),
            to_port: port.map(i32::from),
            cidr_v4: None,
            cidr_v6: None,
            peer_group_id: None,
            description,
        };

        if cidrs.is_empty() && peer_groups.is_empty() {
            debug!(group = group_name, "rule has no peer specification, skipping");
            continue;
        }
        for cidr in cidrs {
            match cidr {
                IpNet::V4(net) => keys.insert(PermKey {
                    cidr_v4: Some(net.to_string()),
                    ..base.clone()
                }),
                IpNet::V6(net) => keys.insert(PermKey {
                    cidr_v6: Some(net.to_string()),
                    ..base.clone()
                }),
            };
        }
        for peer in peer_groups {
            let peer_name = peer.cloud_name(true);
            let peer_id = group_ids_by_name.get(&peer_name).ok_or_else(|| {
                CloudError::Aws(AwsError::NotFound(format!(
                    "peer security group {peer_name}"
                )))
            })?;
            keys.insert(PermKey {
                peer_group_id: Some(peer_id.clone()),
                ..base.clone()
            });
        }
    }
    Ok(keys)
}

fn filter(name: &str, values: Vec<String>) -> Filter {
    Filter::builder().name(name).set_values(Some(values)).build()
}

async fn find_security_group(
    api: &Arc<dyn Ec2ApiClient>,
    group_name: &str,
    vpc_id: &str,
) -> Result<Option<SecurityGroup>, CloudError> {
    let groups = api
        .describe_security_groups(vec![
            filter("group-name", vec![group_name.to_string()]),
            filter("vpc-id", vec![vpc_id.to_string()]),
        ])
        .await?;
    Ok(groups.into_iter().next())
}

/// id → name and lowercased name → id for every group in the VPC.
async fn vpc_group_maps(
    api: &Arc<dyn Ec2ApiClient>,
    vpc_id: &str,
) -> Result<(HashMap<String, String>, HashMap<String, String>), CloudError> {
    let groups = api
        .describe_security_groups(vec![filter("vpc-id", vec![vpc_id.to_string()])])
        .await?;
    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    for group in groups {
        if let (Some(id), Some(name)) = (group.group_id(), group.group_name()) {
            by_id.insert(id.to_string(), name.to_string());
            by_name.insert(name.to_lowercase(), id.to_string());
        }
    }
    Ok((by_id, by_name))
}

fn interface_group_ids(interface: &NetworkInterface) -> Vec<String> {
    interface
        .groups()
        .iter()
        .filter_map(|g| g.group_id())
        .map(str::to_string)
        .collect()
}

/// Remaining group set for a NIC after detaching `removed`; NICs left with
/// no controller-owned group get the VPC default group so the workload is
/// never stranded without a security policy.
fn groups_after_detach(
    current: Vec<String>,
    removed: &str,
    groups_by_id: &HashMap<String, String>,
    groups_by_name: &HashMap<String, String>,
) -> Vec<String> {
    let mut remaining: Vec<String> = current.into_iter().filter(|id| id != removed).collect();
    let has_owned = remaining
        .iter()
        .any(|id| groups_by_id.get(id).is_some_and(|n| is_controller_owned_name(n)));
    if !has_owned {
        if let Some(default_id) = groups_by_name.get(DEFAULT_SECURITY_GROUP_NAME) {
            if !remaining.iter().any(|id| id == default_id) {
                remaining.push(default_id.clone());
            }
        }
    }
    remaining
}

fn strip_controller_prefix(cloud_name: &str) -> Option<(String, bool)> {
    let lowered = cloud_name.to_lowercase();
    if let Some(logical) = lowered.strip_prefix(&address_group_prefix()) {
        return Some((logical.to_string(), true));
    }
    lowered
        .strip_prefix(&applied_to_prefix())
        .map(|logical| (logical.to_string(), false))
}

impl AwsAccountEntry {
    fn require_vpc_in_snapshot(&self, vpc_id: &str) -> Result<Arc<AwsSnapshot>, CloudError> {
        let snapshot = self
            .cache
            .get_snapshot()
            .ok_or_else(|| CloudError::VpcNotInSnapshot {
                vpc: vpc_id.to_string(),
                account: self.namespaced_name.to_string(),
            })?;
        if !snapshot
            .vpcs
            .iter()
            .any(|v| v.vpc_id() == Some(vpc_id))
        {
            return Err(CloudError::VpcNotInSnapshot {
                vpc: vpc_id.to_string(),
                account: self.namespaced_name.to_string(),
            });
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
        self.require_vpc_in_snapshot(&resource.id.vpc)?;

        let group_name = resource.id.cloud_name(membership_only);
        match api
            .create_security_group(&group_name, &group_name, &resource.id.vpc)
            .await
        {
            Ok(group_id) => Ok(group_id),
            Err(AwsError::AlreadyExists(_)) => {
                let existing = find_security_group(&api, &group_name, &resource.id.vpc).await?;
                existing
                    .and_then(|g| g.group_id().map(str::to_string))
                    .ok_or_else(|| CloudError::Aws(AwsError::NotFound(group_name)))
            }
            Err(e) => Err(e.into()),
        }
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
        let snapshot = self.require_vpc_in_snapshot(&resource.id.vpc)?;

        let group_name = resource.id.cloud_name(membership_only);
        let group = find_security_group(&api, &group_name, &resource.id.vpc)
            .await?
            .ok_or_else(|| CloudError::Aws(AwsError::NotFound(group_name.clone())))?;
        let group_id = group
            .group_id()
            .ok_or_else(|| CloudError::Aws(AwsError::NotFound(group_name.clone())))?
            .to_string();

        let (groups_by_id, groups_by_name) = vpc_group_maps(&api, &resource.id.vpc).await?;

        let mut desired: HashSet<String> = HashSet::new();
        for member in members {
            match member.resource_type {
                CloudResourceType::NetworkInterface => {
                    desired.insert(member.id.name.clone());
                }
                CloudResourceType::VirtualMachine => {
                    match snapshot.instances.get(&member.id.name) {
                        Some(instance) => {
                            for nic in instance.network_interfaces() {
                                if let Some(id) = nic.network_interface_id() {
                                    desired.insert(id.to_string());
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

        let interfaces = api
            .describe_network_interfaces(vec![filter("vpc-id", vec![resource.id.vpc.clone()])])
            .await?;
        for interface in &interfaces {
            let Some(interface_id) = interface.network_interface_id() else {
                continue;
            };
            let current_groups = interface_group_ids(interface);
            let attached = current_groups.iter().any(|id| *id == group_id);
            let wanted = desired.contains(interface_id);
            if wanted && !attached {
                let mut groups = current_groups;
                groups.push(group_id.clone());
                api.modify_network_interface_groups(interface_id, groups)
                    .await?;
            } else if !wanted && attached {
                let groups = groups_after_detach(
                    current_groups,
                    &group_id,
                    &groups_by_id,
                    &groups_by_name,
                );
                api.modify_network_interface_groups(interface_id, groups)
                    .await?;
            }
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
        self.require_vpc_in_snapshot(&applied_to.id.vpc)?;

        let group_name = applied_to.id.cloud_name(false);
        let group = find_security_group(&api, &group_name, &applied_to.id.vpc)
            .await?
            .ok_or_else(|| CloudError::Aws(AwsError::NotFound(group_name.clone())))?;
        let group_id = group
            .group_id()
            .ok_or_else(|| CloudError::Aws(AwsError::NotFound(group_name.clone())))?
            .to_string();

        let (_, groups_by_name) = vpc_group_maps(&api, &applied_to.id.vpc).await?;

        let target_ingress = rules_to_keys(all_rules, true, &group_name, &groups_by_name)?;
        let target_egress = rules_to_keys(all_rules, false, &group_name, &groups_by_name)?;

        let current_owned = |permissions: &[IpPermission]| -> HashSet<PermKey> {
            permissions
                .iter()
                .flat_map(flatten_permission)
                .filter(|(_, owned)| *owned)
                .map(|(key, _)| key)
                .collect()
        };
        let current_ingress = current_owned(group.ip_permissions());
        let current_egress = current_owned(group.ip_permissions_egress());

        let to_permissions = |keys: Vec<&PermKey>| -> Vec<IpPermission> {
            keys.into_iter().map(permission_from_key).collect()
        };

        let add_ingress = to_permissions(target_ingress.difference(&current_ingress).collect());
        let revoke_ingress = to_permissions(current_ingress.difference(&target_ingress).collect());
        let add_egress = to_permissions(target_egress.difference(&current_egress).collect());
        let revoke_egress = to_permissions(current_egress.difference(&target_egress).collect());

        if !add_ingress.is_empty() {
            api.authorize_security_group_ingress(&group_id, add_ingress)
                .await?;
        }
        if !add_egress.is_empty() {
            api.authorize_security_group_egress(&group_id, add_egress)
                .await?;
        }
        if !revoke_ingress.is_empty() {
            api.revoke_security_group_ingress(&group_id, revoke_ingress)
                .await?;
        }
        if !revoke_egress.is_empty() {
            api.revoke_security_group_egress(&group_id, revoke_egress)
                .await?;
        }
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

        let group_name = resource.id.cloud_name(membership_only);
        let Some(group) = find_security_group(&api, &group_name, &resource.id.vpc).await? else {
            return Ok(());
        };
        let Some(group_id) = group.group_id().map(str::to_string) else {
            return Ok(());
        };

        // Defense: detach any members the caller left behind.
        let (groups_by_id, groups_by_name) = vpc_group_maps(&api, &resource.id.vpc).await?;
        let interfaces = api
            .describe_network_interfaces(vec![filter("group-id", vec![group_id.clone()])])
            .await?;
        for interface in &interfaces {
            let Some(interface_id) = interface.network_interface_id() else {
                continue;
            };
            let groups = groups_after_detach(
                interface_group_ids(interface),
                &group_id,
                &groups_by_id,
                &groups_by_name,
            );
            api.modify_network_interface_groups(interface_id, groups)
                .await?;
        }

        match api.delete_security_group(&group_id).await {
            Ok(()) | Err(AwsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
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

        let mut contents = Vec::new();
        for vpc_id in &snapshot.managed_vpc_ids {
            let groups = api
                .describe_security_groups(vec![filter("vpc-id", vec![vpc_id.clone()])])
                .await?;
            let groups_by_id: HashMap<String, String> = groups
                .iter()
                .filter_map(|g| {
                    Some((g.group_id()?.to_string(), g.group_name()?.to_string()))
                })
                .collect();

            for group in &groups {
                let (Some(group_id), Some(cloud_name)) = (group.group_id(), group.group_name())
                else {
                    continue;
                };
                let Some((logical_name, membership_only)) = strip_controller_prefix(cloud_name)
                else {
                    continue;
                };

                let interfaces = api
                    .describe_network_interfaces(vec![filter(
                        "group-id",
                        vec![group_id.to_string()],
                    )])
                    .await?;
                let mut members = Vec::new();
                let mut members_with_other = Vec::new();
                for interface in &interfaces {
                    let member_name = interface
                        .attachment()
                        .and_then(|a| a.instance_id())
                        .or(interface.network_interface_id())
                        .unwrap_or_default()
                        .to_string();
                    let member = CloudResource {
                        resource_type: match interface.attachment().and_then(|a| a.instance_id()) {
                            Some(_) => CloudResourceType::VirtualMachine,
                            None => CloudResourceType::NetworkInterface,
                        },
                        id: CloudResourceId::new(member_name, vpc_id.clone()),
                        account_id: self.namespaced_name.to_string(),
                        cloud_provider: CloudProviderType::Aws,
                    };
                    let has_foreign = interface_group_ids(interface).iter().any(|id| {
                        id != group_id
                            && groups_by_id
                                .get(id)
                                .is_some_and(|n| !is_controller_owned_name(n))
                    });
                    if has_foreign {
                        members_with_other.push(member.clone());
                    }
                    members.push(member);
                }

                let to_rules = |permissions: &[IpPermission], ingress: bool| -> Vec<CloudRule> {
                    permissions
                        .iter()
                        .flat_map(flatten_permission)
                        .filter(|(_, owned)| *owned)
                        .filter_map(|(key, _)| {
                            let description = CloudRuleDescription::parse(&key.description)?;
                            let port = key.from_port.and_then(|p| u16::try_from(p).ok());
                            let protocol = protocol_from_wire(&key.protocol);
                            let cidrs: Vec<IpNet> = key
                                .cidr_v4
                                .iter()
                                .chain(key.cidr_v6.iter())
                                .filter_map(|c| c.parse().ok())
                                .collect();
                            let peer_groups: Vec<CloudResourceId> = key
                                .peer_group_id
                                .iter()
                                .filter_map(|id| {
                                    let name = groups_by_id.get(id)?;
                                    let (logical, _) = strip_controller_prefix(name)?;
                                    Some(CloudResourceId::new(logical, vpc_id.clone()))
                                })
                                .collect();
                            let rule = if ingress {
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
                            Some(CloudRule::new(
                                rule,
                                &description.np_namespaced_name(),
                                cloud_name,
                            ))
                        })
                        .collect()
                };

                contents.push(SynchronizationContent {
                    resource: CloudResource {
                        resource_type: CloudResourceType::VirtualMachine,
                        id: CloudResourceId::new(logical_name, vpc_id.clone()),
                        account_id: self.namespaced_name.to_string(),
                        cloud_provider: CloudProviderType::Aws,
                    },
                    membership_only,
                    members,
                    members_with_other_sg_attached: members_with_other,
                    ingress_rules: to_rules(group.ip_permissions(), true),
                    egress_rules: to_rules(group.ip_permissions_egress(), false),
                });
            }
        }
        Ok(contents)
    }
}
