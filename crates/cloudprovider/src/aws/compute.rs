//! AWS inventory harvest and snapshot projections.

use super::filters::{compile_selector, merge_compiled};
use super::{AwsAccountEntry, AwsAccountState};
use crate::error::CloudError;
use crate::inventory::{virtual_machine_labels, NetworkInterfaceInfo, VirtualMachine, VpcInfo};
use aws_sdk_ec2::types::{Instance, Tag, Vpc, VpcPeeringConnection};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable product of one poll cycle.
pub struct AwsSnapshot {
    pub vpcs: Vec<Vpc>,
    /// Selected instances keyed by instance id.
    pub instances: HashMap<String, Instance>,
    /// VPCs containing at least one selected instance.
    pub managed_vpc_ids: HashSet<String>,
    /// VPC peering adjacency.
    pub vpc_peers: HashMap<String, Vec<String>>,
}

fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key() == Some(key))
        .and_then(|t| t.value())
}

fn build_vpc_peers(connections: &[VpcPeeringConnection]) -> HashMap<String, Vec<String>> {
    let mut peers: HashMap<String, Vec<String>> = HashMap::new();
    for connection in connections {
        let accepter = connection
            .accepter_vpc_info()
            .and_then(|i| i.vpc_id())
            .map(str::to_string);
        let requester = connection
            .requester_vpc_info()
            .and_then(|i| i.vpc_id())
            .map(str::to_string);
        if let (Some(accepter), Some(requester)) = (accepter, requester) {
            peers.entry(accepter.clone()).or_default().push(requester.clone());
            peers.entry(requester).or_default().push(accepter);
        }
    }
    peers
}

impl AwsAccountEntry {
    /// One poller cycle: poll, record the outcome, report the next sleep.
    pub(crate) async fn poll_cycle(&self) -> Duration {
        if let Err(e) = self.do_inventory_poll().await {
            warn!(account = %self.namespaced_name, "inventory poll failed: {e}");
        }
        self.state.lock().await.poll_interval
    }

    /// Takes the account mutex, harvests cloud state, and swaps the
    /// snapshot in atomically. Failures leave the previous snapshot
    /// untouched and are recorded in the poll stats.
    pub(crate) async fn do_inventory_poll(&self) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        let result = self.poll_locked(&mut state).await;
        if let Err(e) = &result {
            self.stats.record_error(&e.to_string());
        }
        result
    }

    async fn poll_locked(&self, state: &mut AwsAccountState) -> Result<(), CloudError> {
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;

        let vpcs = api.describe_vpcs().await?;
        let peering_connections = api.describe_vpc_peering_connections().await?;

        // Recompile filters so VPC name/tag matches resolve against the
        // fresh VPC list.
        let selectors: Vec<_> = state
            .selectors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (selector_key, spec) in selectors {
            state
                .filters
                .insert(selector_key, compile_selector(&spec, &vpcs));
        }

        let mut instances: HashMap<String, Instance> = HashMap::new();
        match merge_compiled(state.filters.values()) {
            None => {
                debug!(account = %self.namespaced_name, "no selector installed, skipping vm fetch");
            }
            Some(queries) => {
                for query in queries {
                    for instance in api.describe_instances(query).await? {
                        if let Some(id) = instance.instance_id() {
                            instances.insert(id.to_string(), instance);
                        }
                    }
                }
            }
        }

        let managed_vpc_ids: HashSet<String> = instances
            .values()
            .filter_map(|i| i.vpc_id())
            .map(str::to_string)
            .collect();
        let vpc_peers = build_vpc_peers(&peering_connections);

        debug!(
            account = %self.namespaced_name,
            vpcs = vpcs.len(),
            instances = instances.len(),
            "inventory snapshot updated"
        );
        self.cache.update_snapshot(Some(AwsSnapshot {
            vpcs,
            instances,
            managed_vpc_ids,
            vpc_peers,
        }));
        self.stats.record_success();
        Ok(())
    }

    /// VPC map from the latest snapshot; empty until the first poll lands.
    pub(crate) async fn vpc_inventory(&self) -> HashMap<String, VpcInfo> {
        let Some(snapshot) = self.cache.get_snapshot() else {
            return HashMap::new();
        };
        let region = self.state.lock().await.config.region.clone();

        let mut vpc_map = HashMap::new();
        for vpc in &snapshot.vpcs {
            let Some(id) = vpc.vpc_id() else { continue };
            let mut cidrs: Vec<String> = vpc.cidr_block().map(str::to_string).into_iter().collect();
            for association in vpc.cidr_block_association_set() {
                if let Some(cidr) = association.cidr_block() {
                    if !cidrs.iter().any(|c| c == cidr) {
                        cidrs.push(cidr.to_string());
                    }
                }
            }
            vpc_map.insert(
                id.to_string(),
                VpcInfo {
                    id: id.to_string(),
                    name: tag_value(vpc.tags(), "Name").unwrap_or(id).to_string(),
                    region: region.clone(),
                    cidrs,
                    managed: snapshot.managed_vpc_ids.contains(id),
                    peers: snapshot.vpc_peers.get(id).cloned().unwrap_or_default(),
                },
            );
        }
        vpc_map
    }

    /// Uniform VM objects projected from the latest snapshot.
    pub(crate) async fn vm_objects(&self) -> HashMap<String, VirtualMachine> {
        let Some(snapshot) = self.cache.get_snapshot() else {
            return HashMap::new();
        };
        let region = self.state.lock().await.config.region.clone();

        let vpc_names: HashMap<&str, &str> = snapshot
            .vpcs
            .iter()
            .filter_map(|v| {
                let id = v.vpc_id()?;
                Some((id, tag_value(v.tags(), "Name").unwrap_or(id)))
            })
            .collect();

        let mut vm_map = HashMap::new();
        for (id, instance) in &snapshot.instances {
            let tags: BTreeMap<String, String> = instance
                .tags()
                .iter()
                .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
                .collect();
            let vpc_id = instance.vpc_id().unwrap_or_default().to_string();
            let vpc_name = vpc_names.get(vpc_id.as_str()).copied().unwrap_or(vpc_id.as_str());

            let network_interfaces = instance
                .network_interfaces()
                .iter()
                .map(|nic| {
                    let mut private_ips: Vec<String> = nic
                        .private_ip_addresses()
                        .iter()
                        .filter_map(|a| a.private_ip_address())
                        .map(str::to_string)
                        .collect();
                    if private_ips.is_empty() {
                        private_ips
                            .extend(nic.private_ip_address().map(str::to_string));
                    }
                    let public_ips = nic
                        .association()
                        .and_then(|a| a.public_ip())
                        .map(str::to_string)
                        .into_iter()
                        .collect();
                    NetworkInterfaceInfo {
                        id: nic.network_interface_id().map(str::to_string),
                        private_ips,
                        public_ips,
                    }
                })
                .collect();

            let labels = virtual_machine_labels(
                &self.namespaced_name,
                vpc_name,
                &vpc_id,
                id,
                &region,
                &tags,
            );
            vm_map.insert(
                id.clone(),
                VirtualMachine {
                    id: id.clone(),
                    name: tags.get("Name").cloned().unwrap_or_else(|| id.clone()),
                    region: region.clone(),
                    vpc_id,
                    tags,
                    network_interfaces,
                    labels,
                },
            );
        }
        vm_map
    }
}
