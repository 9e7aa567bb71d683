//! Cloud resource identities, rules, and the controller naming scheme.
//!
//! Every cloud object this controller creates carries the configured prefix
//! in its name; membership-only groups use the `-ag-` infix and applied-to
//! groups the `-at-` infix. Objects without the prefix are never mutated.

use crate::provider::CloudProviderType;
use crate::types::NamespacedName;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Prefix used when none is configured at startup.
pub const DEFAULT_CLOUD_RESOURCE_PREFIX: &str = "nephe";

static CLOUD_RESOURCE_PREFIX: OnceLock<String> = OnceLock::new();

/// Fixes the process-wide cloud resource prefix. Must be called before any
/// plugin is created; later calls are ignored.
pub fn set_cloud_resource_prefix(prefix: &str) {
    let _ = CLOUD_RESOURCE_PREFIX.set(prefix.to_string());
}

pub fn cloud_resource_prefix() -> &'static str {
    CLOUD_RESOURCE_PREFIX
        .get()
        .map(String::as_str)
        .unwrap_or(DEFAULT_CLOUD_RESOURCE_PREFIX)
}

/// `<prefix>-ag-`, the infix for membership-only (address) groups.
pub fn address_group_prefix() -> String {
    format!("{}-ag-", cloud_resource_prefix())
}

/// `<prefix>-at-`, the infix for applied-to groups.
pub fn applied_to_prefix() -> String {
    format!("{}-at-", cloud_resource_prefix())
}

/// True when the cloud-visible name belongs to this controller.
pub fn is_controller_owned_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.starts_with(&address_group_prefix()) || lowered.starts_with(&applied_to_prefix())
}

/// Type of a uniquely-addressed cloud object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudResourceType {
    VirtualMachine,
    NetworkInterface,
}

/// Name + VPC pair identifying one security group before cloud-name
/// derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudResourceId {
    /// Cloud-visible identifier used for group lookup.
    pub name: String,
    /// Containing VPC/VNet id.
    pub vpc: String,
}

impl CloudResourceId {
    pub fn new(name: impl Into<String>, vpc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vpc: vpc.into(),
        }
    }

    /// Derived cloud-visible group name, always lowercased.
    pub fn cloud_name(&self, membership_only: bool) -> String {
        if membership_only {
            format!("{}{}", address_group_prefix(), self.name.to_lowercase())
        } else {
            format!("{}{}", applied_to_prefix(), self.name.to_lowercase())
        }
    }
}

impl std::fmt::Display for CloudResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.vpc)
    }
}

/// Uniquely identifies a cloud resource across accounts and providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResource {
    pub resource_type: CloudResourceType,
    pub id: CloudResourceId,
    /// `namespace/name` of the owning CloudProviderAccount.
    pub account_id: String,
    pub cloud_provider: CloudProviderType,
}

impl CloudResource {
    /// Owning account key parsed from `account_id`.
    pub fn account_key(&self) -> Result<NamespacedName, String> {
        self.account_id.parse()
    }
}

/// Policy identity embedded in cloud rule descriptions. A cloud rule whose
/// description does not parse into this shape is not owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRuleDescription {
    pub name: String,
    pub namespace: String,
}

impl CloudRuleDescription {
    /// Builds the description for a rule originating from the given
    /// `namespace/name` policy. Fails on an identity that does not parse.
    pub fn encode(np_namespaced_name: &str) -> Result<String, String> {
        let key: NamespacedName = np_namespaced_name.parse()?;
        let description = CloudRuleDescription {
            name: key.name,
            namespace: key.namespace,
        };
        serde_json::to_string(&description).map_err(|e| e.to_string())
    }

    /// Parses a cloud description; `None` marks the rule as unowned.
    pub fn parse(description: &str) -> Option<CloudRuleDescription> {
        let parsed: CloudRuleDescription = serde_json::from_str(description).ok()?;
        if parsed.name.is_empty() || parsed.namespace.is_empty() {
            return None;
        }
        Some(parsed)
    }

    pub fn np_namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One ingress rule of a cloud security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub from_port: Option<u16>,
    pub from_src_ip: Vec<IpNet>,
    pub from_security_groups: Vec<CloudResourceId>,
    pub protocol: Option<u8>,
}

/// One egress rule of a cloud security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    pub to_port: Option<u16>,
    pub to_dst_ip: Vec<IpNet>,
    pub to_security_groups: Vec<CloudResourceId>,
    pub protocol: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    Ingress(IngressRule),
    Egress(EgressRule),
}

impl Rule {
    pub fn is_ingress(&self) -> bool {
        matches!(self, Rule::Ingress(_))
    }
}

/// A semantic rule delivered by the policy evaluator, tagged with the
/// originating policy and a content hash used to suppress no-op replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRule {
    pub rule: Rule,
    /// Content hash over the semantic fields.
    pub hash: String,
    /// `namespace/name` of the originating network policy; empty when the
    /// rule was recovered from the cloud without an identity.
    pub np_namespaced_name: String,
    /// Cloud name of the applied-to group the rule belongs to.
    pub applied_to_group: String,
}

impl CloudRule {
    pub fn new(rule: Rule, np_namespaced_name: &str, applied_to_group: &str) -> Self {
        let mut cloud_rule = CloudRule {
            rule,
            hash: String::new(),
            np_namespaced_name: np_namespaced_name.to_string(),
            applied_to_group: applied_to_group.to_string(),
        };
        cloud_rule.hash = cloud_rule.compute_hash();
        cloud_rule
    }

    /// Hash over the serialized semantic fields; the hash field itself is
    /// excluded.
    pub fn compute_hash(&self) -> String {
        let semantic = (
            &self.rule,
            &self.np_namespaced_name,
            &self.applied_to_group,
        );
        let serialized = serde_json::to_string(&semantic).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Cloud view of one controller-owned security group, reported to upstream
/// for drift reconciliation.
#[derive(Debug, Clone)]
pub struct SynchronizationContent {
    pub resource: CloudResource,
    pub membership_only: bool,
    pub members: Vec<CloudResource>,
    pub members_with_other_sg_attached: Vec<CloudResource>,
    pub ingress_rules: Vec<CloudRule>,
    pub egress_rules: Vec<CloudRule>,
}
