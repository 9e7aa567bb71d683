//! Selector compilation into EC2 describe-instances filters.
//!
//! Each `VirtualMachineSelector` disjunct compiles to one filter set (the
//! conjunction of its VPC and VM criteria); the selector as a whole is the
//! union of its disjuncts. VPC matches by name or tag are resolved to
//! concrete vpc-ids against the VPC list of the current poll cycle.

use aws_sdk_ec2::types::{Filter, Vpc};
use crds::{CloudEntitySelectorSpec, EntityMatch};

pub(crate) const FILTER_KEY_VPC_ID: &str = "vpc-id";
pub(crate) const FILTER_KEY_INSTANCE_ID: &str = "instance-id";
pub(crate) const FILTER_KEY_INSTANCE_STATE: &str = "instance-state-name";
pub(crate) const FILTER_KEY_TAG_PREFIX: &str = "tag:";
const FILTER_KEY_NAME_TAG: &str = "tag:Name";

/// Lifecycle states the inventory tracks.
const TRACKED_INSTANCE_STATES: [&str; 5] =
    ["pending", "running", "shutting-down", "stopping", "stopped"];

/// Compiled form of one selector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledFilters {
    /// Match every instance in the account's region.
    MatchAll,
    /// Union of filter sets; empty means the selector currently matches
    /// nothing (e.g. its VPC name resolves to no known VPC).
    Sets(Vec<Vec<Filter>>),
}

fn filter(name: &str, values: Vec<String>) -> Filter {
    Filter::builder().name(name).set_values(Some(values)).build()
}

pub(crate) fn instance_state_filter() -> Filter {
    filter(
        FILTER_KEY_INSTANCE_STATE,
        TRACKED_INSTANCE_STATES.iter().map(|s| s.to_string()).collect(),
    )
}

fn vpc_matches(vpc: &Vpc, entity_match: &EntityMatch) -> bool {
    if let Some(id) = &entity_match.match_id {
        if vpc.vpc_id() != Some(id.as_str()) {
            return false;
        }
    }
    if let Some(name) = &entity_match.match_name {
        let tag_name = vpc
            .tags()
            .iter()
            .find(|t| t.key() == Some("Name"))
            .and_then(|t| t.value());
        if tag_name != Some(name.as_str()) {
            return false;
        }
    }
    if let Some(tags) = &entity_match.match_tags {
        for (key, value) in tags {
            let found = vpc
                .tags()
                .iter()
                .any(|t| t.key() == Some(key.as_str()) && t.value() == Some(value.as_str()));
            if !found {
                return false;
            }
        }
    }
    true
}

/// Resolves a VPC match to concrete vpc-ids. `None` means unconstrained;
/// `Some(vec![])` means the match resolves to no VPC right now.
fn resolve_vpc_ids(vpc_match: &Option<EntityMatch>, vpcs: &[Vpc]) -> Option<Vec<String>> {
    let entity_match = vpc_match.as_ref()?;
    if entity_match.is_empty() {
        return None;
    }
    // A bare id match needs no resolution against the VPC list.
    if entity_match.match_name.is_none()
        && entity_match.match_tags.as_ref().map_or(true, |t| t.is_empty())
    {
        return entity_match.match_id.clone().map(|id| vec![id]);
    }
    Some(
        vpcs.iter()
            .filter(|v| vpc_matches(v, entity_match))
            .filter_map(|v| v.vpc_id().map(str::to_string))
            .collect(),
    )
}

fn vm_match_filters(entity_match: &EntityMatch) -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(id) = &entity_match.match_id {
        filters.push(filter(FILTER_KEY_INSTANCE_ID, vec![id.clone()]));
    }
    if let Some(name) = &entity_match.match_name {
        filters.push(filter(FILTER_KEY_NAME_TAG, vec![name.clone()]));
    }
    if let Some(tags) = &entity_match.match_tags {
        for (key, value) in tags {
            filters.push(filter(
                &format!("{FILTER_KEY_TAG_PREFIX}{key}"),
                vec![value.clone()],
            ));
        }
    }
    filters
}

/// Compiles one selector against the given VPC list.
pub(crate) fn compile_selector(spec: &CloudEntitySelectorSpec, vpcs: &[Vpc]) -> CompiledFilters {
    if spec.vm_selector.is_empty() {
        return CompiledFilters::MatchAll;
    }

    let mut sets: Vec<Vec<Filter>> = Vec::new();
    for disjunct in &spec.vm_selector {
        let vpc_ids = resolve_vpc_ids(&disjunct.vpc_match, vpcs);
        if let Some(ids) = &vpc_ids {
            if ids.is_empty() {
                // VPC criterion resolves to nothing; this disjunct matches
                // no instance until a later poll sees the VPC.
                continue;
            }
        }

        let vpc_filter = vpc_ids.map(|ids| filter(FILTER_KEY_VPC_ID, ids));

        if disjunct.vm_match.is_empty() {
            let mut set = Vec::new();
            if let Some(f) = &vpc_filter {
                set.push(f.clone());
            }
            if set.is_empty() {
                // Neither VPC nor VM criteria: the disjunct matches all.
                return CompiledFilters::MatchAll;
            }
            set.push(instance_state_filter());
            sets.push(set);
            continue;
        }

        for vm_match in &disjunct.vm_match {
            let mut set = Vec::new();
            if let Some(f) = &vpc_filter {
                set.push(f.clone());
            }
            set.extend(vm_match_filters(vm_match));
            if set.is_empty() {
                return CompiledFilters::MatchAll;
            }
            set.push(instance_state_filter());
            sets.push(set);
        }
    }
    CompiledFilters::Sets(sets)
}

/// Merges the compiled filters of every registered selector into the query
/// list for one poll. `None` means no cloud call should be made.
pub(crate) fn merge_compiled<'a, I>(compiled: I) -> Option<Vec<Vec<Filter>>>
where
    I: IntoIterator<Item = &'a CompiledFilters>,
{
    let mut queries: Vec<Vec<Filter>> = Vec::new();
    let mut any = false;
    for entry in compiled {
        any = true;
        match entry {
            CompiledFilters::MatchAll => {
                // One unconstrained query subsumes every other filter set.
                return Some(vec![vec![instance_state_filter()]]);
            }
            CompiledFilters::Sets(sets) => queries.extend(sets.iter().cloned()),
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
    use aws_sdk_ec2::types::Tag;
    use crds::VirtualMachineSelector;

    fn vpc(id: &str, name: Option<&str>) -> Vpc {
        let mut builder = Vpc::builder().vpc_id(id);
        if let Some(name) = name {
            builder = builder.tags(Tag::builder().key("Name").value(name).build());
        }
        builder.build()
    }

    fn selector(vm_selector: Vec<VirtualMachineSelector>) -> CloudEntitySelectorSpec {
        CloudEntitySelectorSpec {
            account_name: "account01".to_string(),
            account_namespace: None,
            vm_selector,
        }
    }

    fn filter_value(set: &[Filter], key: &str) -> Option<Vec<String>> {
        set.iter()
            .find(|f| f.name() == Some(key))
            .map(|f| f.values().to_vec())
    }

    #[test]
    fn empty_selector_matches_everything() {
        let compiled = compile_selector(&selector(vec![]), &[]);
        assert_eq!(compiled, CompiledFilters::MatchAll);
    }

    #[test]
    fn vpc_id_match_compiles_without_vpc_resolution() {
        let compiled = compile_selector(
            &selector(vec![VirtualMachineSelector {
                vpc_match: Some(EntityMatch {
                    match_id: Some("vpc-01".to_string()),
                    ..Default::default()
                }),
                vm_match: vec![],
            }]),
            &[],
        );
        let CompiledFilters::Sets(sets) = compiled else {
            panic!("expected filter sets");
        };
        assert_eq!(sets.len(), 1);
        assert_eq!(
            filter_value(&sets[0], FILTER_KEY_VPC_ID),
            Some(vec!["vpc-01".to_string()])
        );
        assert!(filter_value(&sets[0], FILTER_KEY_INSTANCE_STATE).is_some());
    }

    #[test]
    fn vpc_name_match_resolves_against_vpc_list() {
        let vpcs = vec![vpc("vpc-01", Some("prod")), vpc("vpc-02", Some("dev"))];
        let spec = selector(vec![VirtualMachineSelector {
            vpc_match: Some(EntityMatch {
                match_name: Some("prod".to_string()),
                ..Default::default()
            }),
            vm_match: vec![],
        }]);

        let CompiledFilters::Sets(sets) = compile_selector(&spec, &vpcs) else {
            panic!("expected filter sets");
        };
        assert_eq!(
            filter_value(&sets[0], FILTER_KEY_VPC_ID),
            Some(vec!["vpc-01".to_string()])
        );

        // Unresolvable name: the disjunct matches nothing for now.
        let CompiledFilters::Sets(empty) = compile_selector(&spec, &[]) else {
            panic!("expected filter sets");
        };
        assert!(empty.is_empty());
    }

    #[test]
    fn selectors_union_and_match_all_short_circuits() {
        let constrained = compile_selector(
            &selector(vec![VirtualMachineSelector {
                vpc_match: Some(EntityMatch {
                    match_id: Some("vpc-01".to_string()),
                    ..Default::default()
                }),
                vm_match: vec![EntityMatch {
                    match_id: Some("i-1".to_string()),
                    ..Default::default()
                }],
            }]),
            &[],
        );
        let all = compile_selector(&selector(vec![]), &[]);

        let merged = merge_compiled([&constrained, &all]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(filter_value(&merged[0], FILTER_KEY_VPC_ID).is_none());

        let merged = merge_compiled([&constrained, &constrained]).unwrap();
        assert_eq!(merged.len(), 2);

        assert!(merge_compiled(std::iter::empty::<&CompiledFilters>()).is_none());
    }
}
