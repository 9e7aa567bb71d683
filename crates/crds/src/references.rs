//! Shared reference types used by both CRDs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a Kubernetes Secret holding cloud credentials.
///
/// The value under `key` is a JSON document whose fields depend on the cloud
/// provider the owning account is configured for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret.
    pub name: String,

    /// Namespace of the Secret.
    pub namespace: String,

    /// Key inside the Secret data holding the credential document.
    pub key: String,
}

impl SecretReference {
    /// `namespace/name` form, used as the secret index key.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Matches one cloud entity by id, name, or tags.
///
/// All populated fields must match (conjunction); an empty match selects
/// everything in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityMatch {
    /// Cloud-assigned identifier (e.g. vpc-id, instance-id, vnet id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,

    /// Cloud-visible name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_name: Option<String>,

    /// Cloud tags, all of which must be present with the given values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_tags: Option<BTreeMap<String, String>>,
}

impl EntityMatch {
    /// True when no criterion is set.
    pub fn is_empty(&self) -> bool {
        self.match_id.is_none()
            && self.match_name.is_none()
            && self.match_tags.as_ref().map_or(true, |t| t.is_empty())
    }
}
