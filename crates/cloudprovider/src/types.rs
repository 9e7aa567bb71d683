//! Namespaced-name key type shared across the crate.

use std::fmt;
use std::str::FromStr;

/// `(namespace, name)` key identifying accounts and selectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for NamespacedName {
    type Err = String;

    /// Parses the `namespace/name` form; exactly two tokens are expected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split('/').collect();
        match tokens.as_slice() {
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(*namespace, *name))
            }
            _ => Err(format!("account id is not in the expected format: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_name() {
        let parsed: NamespacedName = "namespace01/account01".parse().unwrap();
        assert_eq!(parsed, NamespacedName::new("namespace01", "account01"));
        assert_eq!(parsed.to_string(), "namespace01/account01");
    }

    #[test]
    fn rejects_malformed_account_ids() {
        assert!("account01".parse::<NamespacedName>().is_err());
        assert!("a/b/c".parse::<NamespacedName>().is_err());
        assert!("/b".parse::<NamespacedName>().is_err());
    }
}
