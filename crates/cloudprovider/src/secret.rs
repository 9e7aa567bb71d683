//! Credential secret access.
//!
//! Plugins resolve account credentials through this seam so unit tests can
//! feed secrets from memory instead of a cluster.

use crate::error::CloudError;
use crds::SecretReference;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;

#[async_trait::async_trait]
pub trait SecretReader: Send + Sync {
    /// Raw bytes stored under `reference.key`; the payload is a JSON
    /// credential document.
    async fn read_secret_key(&self, reference: &SecretReference) -> Result<Vec<u8>, CloudError>;
}

/// Reads secrets through the cluster API.
pub struct KubeSecretReader {
    client: kube::Client,
}

impl KubeSecretReader {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretReader for KubeSecretReader {
    async fn read_secret_key(&self, reference: &SecretReference) -> Result<Vec<u8>, CloudError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &reference.namespace);
        let secret = api.get(&reference.name).await.map_err(|e| {
            CloudError::CredentialResolution(format!(
                "failed to get Secret object {}/{}: {e}",
                reference.namespace, reference.name
            ))
        })?;
        let data = secret.data.ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "failed to get Secret data {}/{}",
                reference.namespace, reference.name
            ))
        })?;
        let value = data.get(&reference.key).ok_or_else(|| {
            CloudError::CredentialResolution(format!(
                "failed to get Secret key {}/{}, key: {}",
                reference.namespace, reference.name, reference.key
            ))
        })?;
        Ok(value.0.clone())
    }
}

/// In-memory secret store for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MemorySecretReader {
        secrets: Arc<Mutex<HashMap<(String, String, String), Vec<u8>>>>,
    }

    impl MemorySecretReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, namespace: &str, name: &str, key: &str, value: &[u8]) {
            self.secrets.lock().unwrap().insert(
                (namespace.to_string(), name.to_string(), key.to_string()),
                value.to_vec(),
            );
        }

        pub fn remove(&self, namespace: &str, name: &str, key: &str) {
            self.secrets.lock().unwrap().remove(&(
                namespace.to_string(),
                name.to_string(),
                key.to_string(),
            ));
        }
    }

    #[async_trait::async_trait]
    impl SecretReader for MemorySecretReader {
        async fn read_secret_key(
            &self,
            reference: &SecretReference,
        ) -> Result<Vec<u8>, CloudError> {
            self.secrets
                .lock()
                .unwrap()
                .get(&(
                    reference.namespace.clone(),
                    reference.name.clone(),
                    reference.key.clone(),
                ))
                .cloned()
                .ok_or_else(|| {
                    CloudError::CredentialResolution(format!(
                        "failed to get Secret object {}/{}",
                        reference.namespace, reference.name
                    ))
                })
        }
    }
}
