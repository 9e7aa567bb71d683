//! Selector compilation into Resource Graph KQL.
//!
//! Every query is constrained to the account's subscription, tenant, and
//! region; selector criteria narrow it further. VNet matches by name or tag
//! are resolved to vnet ids against the VNet list of the current poll cycle.

use azure_client::VirtualNetwork;
use crds::{CloudEntitySelectorSpec, EntityMatch};

use super::credentials::AzureAccountConfig;

/// Compiled form of one selector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledQueries {
    /// Match every VM in the account's subscription/tenant/region.
    MatchAll,
    /// Union of per-disjunct queries; empty means the selector currently
    /// matches nothing.
    Queries(Vec<String>),
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Base VM harvest query: one row per VM with its NIC addressing, scoped to
/// the account.
fn base_query(config: &AzureAccountConfig) -> String {
    format!(
        "Resources\n\
         | where type =~ 'microsoft.compute/virtualmachines'\n\
         | where subscriptionId =~ '{sub}' and tenantId =~ '{tenant}' and location =~ '{region}'\n\
         | mv-expand nicRef = properties.networkProfile.networkInterfaces\n\
         | extend nicId = tolower(tostring(nicRef.id))\n\
         | join kind = leftouter (\n\
         \u{20}   Resources\n\
         \u{20}   | where type =~ 'microsoft.network/networkinterfaces'\n\
         \u{20}   | mv-expand ipConfig = properties.ipConfigurations\n\
         \u{20}   | extend privateIp = tostring(ipConfig.properties.privateIPAddress)\n\
         \u{20}   | extend vnetId = tolower(substring(tostring(ipConfig.properties.subnet.id), 0, indexof(tostring(ipConfig.properties.subnet.id), '/subnets/')))\n\
         \u{20}   | summarize privateIps = make_list(privateIp) by nicId = tolower(id), vnetId\n\
         ) on nicId\n\
         | summarize networkInterfaces = make_list(pack('id', nicId, 'privateIps', privateIps)), vnetId = take_any(vnetId) by id = tolower(id), name, tags",
        sub = config.credential.subscription_id,
        tenant = config.credential.tenant_id,
        region = config.region,
    )
}

fn project_clause() -> &'static str {
    "| project id, name, tags, vnetId, networkInterfaces"
}

fn vnet_matches(vnet: &VirtualNetwork, entity_match: &EntityMatch) -> bool {
    if let Some(id) = &entity_match.match_id {
        let matches = vnet
            .id
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case(id));
        if !matches {
            return false;
        }
    }
    if let Some(name) = &entity_match.match_name {
        if vnet.name.as_deref() != Some(name.as_str()) {
            return false;
        }
    }
    true
}

/// Resolves a VNet match to concrete vnet ids. `None` means unconstrained;
/// an empty list means the match resolves to nothing right now.
fn resolve_vnet_ids(
    vpc_match: &Option<EntityMatch>,
    vnets: &[VirtualNetwork],
) -> Option<Vec<String>> {
    let entity_match = vpc_match.as_ref()?;
    if entity_match.is_empty() {
        return None;
    }
    if entity_match.match_name.is_none()
        && entity_match.match_tags.as_ref().map_or(true, |t| t.is_empty())
    {
        return entity_match
            .match_id
            .clone()
            .map(|id| vec![id.to_lowercase()]);
    }
    Some(
        vnets
            .iter()
            .filter(|v| vnet_matches(v, entity_match))
            .filter_map(|v| v.id.as_deref().map(str::to_lowercase))
            .collect(),
    )
}

fn vm_clauses(entity_match: &EntityMatch) -> Vec<String> {
    let mut clauses = Vec::new();
    if let Some(id) = &entity_match.match_id {
        clauses.push(format!("| where id in~ ({})", quoted_list(&[id.clone()])));
    }
    if let Some(name) = &entity_match.match_name {
        clauses.push(format!(
            "| where name in~ ({})",
            quoted_list(&[name.clone()])
        ));
    }
    if let Some(tags) = &entity_match.match_tags {
        for (key, value) in tags {
            clauses.push(format!(
                "| where tags['{}'] =~ '{}'",
                key.replace('\'', ""),
                value.replace('\'', "")
            ));
        }
    }
    clauses
}

/// Compiles one selector against the given VNet list.
pub(crate) fn compile_selector(
    config: &AzureAccountConfig,
    spec: &CloudEntitySelectorSpec,
    vnets: &[VirtualNetwork],
) -> CompiledQueries {
    if spec.vm_selector.is_empty() {
        return CompiledQueries::MatchAll;
    }

    let mut queries = Vec::new();
    for disjunct in &spec.vm_selector {
        let vnet_ids = resolve_vnet_ids(&disjunct.vpc_match, vnets);
        if let Some(ids) = &vnet_ids {
            if ids.is_empty() {
                continue;
            }
        }
        let vnet_clause = vnet_ids.map(|ids| format!("| where vnetId in~ ({})", quoted_list(&ids)));

        let per_vm: Vec<Vec<String>> = if disjunct.vm_match.is_empty() {
            vec![Vec::new()]
        } else {
            disjunct.vm_match.iter().map(vm_clauses).collect()
        };

        for vm_clause_set in per_vm {
            if vm_clause_set.is_empty() && vnet_clause.is_none() {
                return CompiledQueries::MatchAll;
            }
            let mut query = base_query(config);
            for clause in &vm_clause_set {
                query.push('\n');
                query.push_str(clause);
            }
            if let Some(clause) = &vnet_clause {
                query.push('\n');
                query.push_str(clause);
            }
            query.push('\n');
            query.push_str(project_clause());
            queries.push(query);
        }
    }
    CompiledQueries::Queries(queries)
}

/// Merges the compiled queries of every registered selector into the query
/// list for one poll. `None` means no cloud call should be made.
pub(crate) fn merge_compiled<'a, I>(
    config: &AzureAccountConfig,
    compiled: I,
) -> Option<Vec<String>>
where
    I: IntoIterator<Item = &'a CompiledQueries>,
{
    let mut queries = Vec::new();
    let mut any = false;
    for entry in compiled {
        any = true;
        match entry {
            CompiledQueries::MatchAll => {
                let mut query = base_query(config);
                query.push('\n');
                query.push_str(project_clause());
                return Some(vec![query]);
            }
            CompiledQueries::Queries(q) => queries.extend(q.iter().cloned()),
        }
    }
    if !any {
        return None;
    }
    Some(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::credentials::AzureAccountCredential;
    use crds::VirtualMachineSelector;

    fn config() -> AzureAccountConfig {
        AzureAccountConfig {
            credential: AzureAccountCredential {
                subscription_id: "SubID".to_string(),
                tenant_id: "TenantID".to_string(),
                client_id: "ClientID".to_string(),
                client_key: "ClientKey".to_string(),
            },
            region: "eastus".to_string(),
        }
    }

    fn selector(vm_selector: Vec<VirtualMachineSelector>) -> CloudEntitySelectorSpec {
        CloudEntitySelectorSpec {
            account_name: "account01".to_string(),
            account_namespace: None,
            vm_selector,
        }
    }

    #[test]
    fn queries_are_scoped_to_subscription_tenant_and_region() {
        let compiled = compile_selector(&config(), &selector(vec![]), &[]);
        let queries = merge_compiled(&config(), [&compiled]).unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("subscriptionId =~ 'SubID'"));
        assert!(queries[0].contains("tenantId =~ 'TenantID'"));
        assert!(queries[0].contains("location =~ 'eastus'"));
    }

    #[test]
    fn vnet_id_match_constrains_the_query() {
        let vnet_id = "/subscriptions/SubID/resourceGroups/testRG/providers/Microsoft.Network/virtualNetworks/testVnet01";
        let compiled = compile_selector(
            &config(),
            &selector(vec![VirtualMachineSelector {
                vpc_match: Some(EntityMatch {
                    match_id: Some(vnet_id.to_string()),
                    ..Default::default()
                }),
                vm_match: vec![],
            }]),
            &[],
        );
        let CompiledQueries::Queries(queries) = compiled else {
            panic!("expected queries");
        };
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains(&vnet_id.to_lowercase()));
    }
}
