//! CloudEntitySelector CRD
//!
//! Picks which virtual machines of one account are managed. Selectors within
//! a resource compose disjunctively: a VM matching any `VirtualMachineSelector`
//! entry is selected.

use crate::references::EntityMatch;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "crd.nephe.io",
    version = "v1alpha1",
    kind = "CloudEntitySelector",
    namespaced,
    status = "CloudEntitySelectorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudEntitySelectorSpec {
    /// Name of the CloudProviderAccount this selector binds to.
    pub account_name: String,

    /// Namespace of the account; defaults to the selector's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_namespace: Option<String>,

    /// VM match rules. An empty list selects every VM in the account scope.
    #[serde(default)]
    pub vm_selector: Vec<VirtualMachineSelector>,
}

/// One disjunct of a selector: an optional VPC scope and optional VM matches
/// inside that scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSelector {
    /// Restricts the rule to VMs inside a matching VPC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_match: Option<EntityMatch>,

    /// Matches on the VM itself; empty means every VM in the VPC scope.
    #[serde(default)]
    pub vm_match: Vec<EntityMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudEntitySelectorStatus {
    /// Error from the last selector registration, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
