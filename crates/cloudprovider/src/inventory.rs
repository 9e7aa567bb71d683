//! Uniform inventory objects projected from provider snapshots.
//!
//! Upper layers consume VMs and VPCs in this provider-neutral shape; the
//! well-known labels let cluster policies select the reflected entities.

use crate::types::NamespacedName;
use std::collections::BTreeMap;

pub const LABEL_PREFIX: &str = "nephe.io/";
pub const LABEL_CLOUD_ACCOUNT_NAME: &str = "nephe.io/cpa-name";
pub const LABEL_CLOUD_ACCOUNT_NAMESPACE: &str = "nephe.io/cpa-namespace";
pub const LABEL_VPC_NAME: &str = "nephe.io/vpc-name";
pub const LABEL_CLOUD_REGION: &str = "nephe.io/cloud-region";
pub const LABEL_CLOUD_VPC_UID: &str = "nephe.io/cloud-vpc-uid";
pub const LABEL_CLOUD_VM_UID: &str = "nephe.io/cloud-vm-uid";
pub const LABEL_TAG_PREFIX: &str = "tag-";

/// Per-NIC addressing of a VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInterfaceInfo {
    pub id: Option<String>,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
}

/// Provider-neutral VM object, keyed by canonical instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub region: String,
    pub vpc_id: String,
    pub tags: BTreeMap<String, String>,
    pub network_interfaces: Vec<NetworkInterfaceInfo>,
    pub labels: BTreeMap<String, String>,
}

/// Provider-neutral VPC object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpcInfo {
    pub id: String,
    pub name: String,
    pub region: String,
    pub cidrs: Vec<String>,
    /// True iff the VPC contains at least one selected VM.
    pub managed: bool,
    /// Peer VPC ids from the peering adjacency.
    pub peers: Vec<String>,
}

/// Builds the well-known label set stamped on reflected VM entities.
pub fn virtual_machine_labels(
    account: &NamespacedName,
    vpc_name: &str,
    vpc_id: &str,
    vm_id: &str,
    region: &str,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_CLOUD_ACCOUNT_NAME.to_string(), account.name.clone());
    labels.insert(
        LABEL_CLOUD_ACCOUNT_NAMESPACE.to_string(),
        account.namespace.clone(),
    );
    labels.insert(LABEL_VPC_NAME.to_string(), vpc_name.to_string());
    labels.insert(LABEL_CLOUD_REGION.to_string(), region.to_lowercase());
    labels.insert(LABEL_CLOUD_VPC_UID.to_string(), vpc_id.to_lowercase());
    labels.insert(LABEL_CLOUD_VM_UID.to_string(), vm_id.to_lowercase());
    for (key, value) in tags {
        labels.insert(format!("{LABEL_TAG_PREFIX}{key}"), value.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_labels_include_account_vpc_and_tags() {
        let account = NamespacedName::new("namespace01", "account01");
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());

        let labels =
            virtual_machine_labels(&account, "vpc-a", "VPC-ID-1", "i-ABC", "US-EAST-1", &tags);

        assert_eq!(labels[LABEL_CLOUD_ACCOUNT_NAME], "account01");
        assert_eq!(labels[LABEL_CLOUD_ACCOUNT_NAMESPACE], "namespace01");
        assert_eq!(labels[LABEL_CLOUD_REGION], "us-east-1");
        assert_eq!(labels[LABEL_CLOUD_VPC_UID], "vpc-id-1");
        assert_eq!(labels[LABEL_CLOUD_VM_UID], "i-abc");
        assert_eq!(labels["tag-env"], "prod");
    }
}
