//! Azure inventory harvest and snapshot projections.

use super::kql::{compile_selector, merge_compiled};
use super::{AzureAccountEntry, AzureAccountState};
use crate::error::CloudError;
use crate::inventory::{virtual_machine_labels, NetworkInterfaceInfo, VirtualMachine, VpcInfo};
use azure_client::{VirtualMachineRow, VirtualNetwork};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable product of one poll cycle.
pub struct AzureSnapshot {
    pub vnets: Vec<VirtualNetwork>,
    /// Selected VMs keyed by lowercased ARM id.
    pub virtual_machines: HashMap<String, VirtualMachineRow>,
    /// Lowercased ids of vnets containing at least one selected VM.
    pub managed_vnet_ids: HashSet<String>,
    /// VNet peering adjacency, lowercased ids.
    pub vnet_peers: HashMap<String, Vec<String>>,
}

fn build_vnet_peers(vnets: &[VirtualNetwork]) -> HashMap<String, Vec<String>> {
    let mut peers: HashMap<String, Vec<String>> = HashMap::new();
    for vnet in vnets {
        let Some(id) = vnet.id.as_deref().map(str::to_lowercase) else {
            continue;
        };
        let Some(properties) = &vnet.properties else {
            continue;
        };
        for peering in &properties.virtual_network_peerings {
            let remote = peering
                .properties
                .as_ref()
                .and_then(|p| p.remote_virtual_network.as_ref())
                .and_then(|r| r.id.as_deref())
                .map(str::to_lowercase);
            if let Some(remote) = remote {
                peers.entry(id.clone()).or_default().push(remote);
            }
        }
    }
    peers
}

impl AzureAccountEntry {
    /// One poller cycle: poll, record the outcome, report the next sleep.
    pub(crate) async fn poll_cycle(&self) -> Duration {
        if let Err(e) = self.do_inventory_poll().await {
            warn!(account = %self.namespaced_name, "inventory poll failed: {e}");
        }
        self.state.lock().await.poll_interval
    }

    pub(crate) async fn do_inventory_poll(&self) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        let result = self.poll_locked(&mut state).await;
        if let Err(e) = &result {
            self.stats.record_error(&e.to_string());
        }
        result
    }

    async fn poll_locked(&self, state: &mut AzureAccountState) -> Result<(), CloudError> {
        let api = state.api.clone().ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "account {} has no usable credentials",
                self.namespaced_name
            ))
        })?;

        let vnets = api.list_virtual_networks().await?;

        // Recompile queries so vnet name matches resolve against the fresh
        // vnet list.
        let selectors: Vec<_> = state
            .selectors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (selector_key, spec) in selectors {
            let compiled = compile_selector(&state.config, &spec, &vnets);
            state.queries.insert(selector_key, compiled);
        }

        let mut virtual_machines: HashMap<String, VirtualMachineRow> = HashMap::new();
        match merge_compiled(&state.config, state.queries.values()) {
            None => {
                debug!(account = %self.namespaced_name, "no selector installed, skipping vm fetch");
            }
            Some(queries) => {
                for query in queries {
                    for row in api.query_virtual_machines(&query).await? {
                        virtual_machines.insert(row.id.to_lowercase(), row);
                    }
                }
            }
        }

        let managed_vnet_ids: HashSet<String> = virtual_machines
            .values()
            .filter_map(|vm| vm.vnet_id.as_deref())
            .map(str::to_lowercase)
            .collect();
        let vnet_peers = build_vnet_peers(&vnets);

        debug!(
            account = %self.namespaced_name,
            vnets = vnets.len(),
            instances = virtual_machines.len(),
            "inventory snapshot updated"
        );
        self.cache.update_snapshot(Some(AzureSnapshot {
            vnets,
            virtual_machines,
            managed_vnet_ids,
            vnet_peers,
        }));
        self.stats.record_success();
        Ok(())
    }

    /// VNet map from the latest snapshot, restricted to the account's
    /// region; empty until the first poll lands.
    pub(crate) async fn vpc_inventory(&self) -> HashMap<String, VpcInfo> {
        let Some(snapshot) = self.cache.get_snapshot() else {
            return HashMap::new();
        };
        let region = self.state.lock().await.config.region.clone();

        let mut vpc_map = HashMap::new();
        for vnet in &snapshot.vnets {
            let Some(id) = vnet.id.as_deref() else { continue };
            let location = vnet.location.as_deref().unwrap_or_default();
            if !location.eq_ignore_ascii_case(&region) {
                continue;
            }
            let lowered = id.to_lowercase();
            let cidrs = vnet
                .properties
                .as_ref()
                .and_then(|p| p.address_space.as_ref())
                .map(|a| a.address_prefixes.clone())
                .unwrap_or_default();
            vpc_map.insert(
                lowered.clone(),
                VpcInfo {
                    id: lowered.clone(),
                    name: vnet.name.clone().unwrap_or_else(|| lowered.clone()),
                    region: region.to_lowercase(),
                    cidrs,
                    managed: snapshot.managed_vnet_ids.contains(&lowered),
                    peers: snapshot.vnet_peers.get(&lowered).cloned().unwrap_or_default(),
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

        let vnet_names: HashMap<String, String> = snapshot
            .vnets
            .iter()
            .filter_map(|v| {
                let id = v.id.as_deref()?.to_lowercase();
                let name = v.name.clone().unwrap_or_else(|| id.clone());
                Some((id, name))
            })
            .collect();

        let mut vm_map = HashMap::new();
        for (id, row) in &snapshot.virtual_machines {
            let tags: BTreeMap<String, String> = row
                .tags
                .clone()
                .map(|t| t.into_iter().collect())
                .unwrap_or_default();
            let vpc_id = row.vnet_id.as_deref().unwrap_or_default().to_lowercase();
            let vpc_name = vnet_names.get(&vpc_id).cloned().unwrap_or_else(|| vpc_id.clone());

            let network_interfaces = row
                .network_interfaces
                .iter()
                .map(|nic| NetworkInterfaceInfo {
                    id: nic.id.clone(),
                    private_ips: nic.private_ips.clone(),
                    public_ips: nic.public_ips.clone(),
                })
                .collect();

            let labels =
                virtual_machine_labels(&self.namespaced_name, &vpc_name, &vpc_id, id, &region, &tags);
            vm_map.insert(
                id.clone(),
                VirtualMachine {
                    id: id.clone(),
                    name: row.name.clone(),
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
