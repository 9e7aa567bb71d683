//! Azure credential resolution and comparison.

use crate::error::CloudError;
use crate::internal::ACCOUNT_CREDENTIALS_DEFAULT;
use crate::secret::SecretReader;
use crds::CloudProviderAccountAzureConfig;
use serde::Deserialize;
use tracing::info;

/// Credential document stored in the referenced secret. All four fields are
/// required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureAccountCredential {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_key: String,
}

/// Resolved account configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureAccountConfig {
    pub credential: AzureAccountCredential,
    pub region: String,
}

impl AzureAccountConfig {
    /// Sentinel configuration recorded when secret resolution fails; the
    /// account is treated as fully rejected until credentials resolve.
    pub fn sentinel(azure_config: &CloudProviderAccountAzureConfig) -> Self {
        Self {
            credential: AzureAccountCredential {
                subscription_id: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
                tenant_id: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
                client_id: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
                client_key: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
            },
            region: azure_config.region.trim().to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        let fields = [
            &self.credential.subscription_id,
            &self.credential.tenant_id,
            &self.credential.client_id,
            &self.credential.client_key,
        ];
        fields
            .iter()
            .all(|f| !f.is_empty() && *f != ACCOUNT_CREDENTIALS_DEFAULT)
    }

    pub fn api_config(&self) -> azure_client::AzureApiConfig {
        azure_client::AzureApiConfig {
            subscription_id: self.credential.subscription_id.clone(),
            tenant_id: self.credential.tenant_id.clone(),
            client_id: self.credential.client_id.clone(),
            client_key: self.credential.client_key.clone(),
        }
    }
}

/// Resolves the account configuration from the referenced secret.
pub async fn resolve_account_config(
    secret_reader: &dyn SecretReader,
    azure_config: &CloudProviderAccountAzureConfig,
) -> Result<AzureAccountConfig, CloudError> {
    let payload = secret_reader
        .read_secret_key(&azure_config.secret_ref)
        .await?;
    let credential: AzureAccountCredential = serde_json::from_slice(&payload).map_err(|e| {
        CloudError::CredentialResolution(format!(
            "failed to unmarshal Secret credentials {}/{}: {e}",
            azure_config.secret_ref.namespace, azure_config.secret_ref.name
        ))
    })?;
    if credential.subscription_id.trim().is_empty()
        || credential.tenant_id.trim().is_empty()
        || credential.client_id.trim().is_empty()
        || credential.client_key.trim().is_empty()
    {
        return Err(CloudError::CredentialResolution(format!(
            "Secret credentials cannot be empty: {}/{}",
            azure_config.secret_ref.namespace, azure_config.secret_ref.name
        )));
    }
    Ok(AzureAccountConfig {
        credential: AzureAccountCredential {
            subscription_id: credential.subscription_id.trim().to_string(),
            tenant_id: credential.tenant_id.trim().to_string(),
            client_id: credential.client_id.trim().to_string(),
            client_key: credential.client_key.trim().to_string(),
        },
        region: azure_config.region.trim().to_string(),
    })
}

/// Field-by-field comparison on trimmed values, logging what changed.
pub fn compare_account_credentials(
    account_name: &str,
    existing: &AzureAccountConfig,
    new: &AzureAccountConfig,
) -> bool {
    let mut changed = false;
    let differs = |a: &str, b: &str| a.trim() != b.trim();

    if differs(
        &existing.credential.subscription_id,
        &new.credential.subscription_id,
    ) {
        changed = true;
        info!(account = account_name, "subscription ID updated");
    }
    if differs(&existing.credential.client_id, &new.credential.client_id) {
        changed = true;
        info!(account = account_name, "client ID updated");
    }
    if differs(&existing.credential.tenant_id, &new.credential.tenant_id) {
        changed = true;
        info!(account = account_name, "tenant ID updated");
    }
    if differs(&existing.credential.client_key, &new.credential.client_key) {
        changed = true;
        info!(account = account_name, "client key updated");
    }
    if differs(&existing.region, &new.region) {
        changed = true;
        info!(account = account_name, "region updated");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::memory::MemorySecretReader;
    use crds::SecretReference;

    fn azure_config() -> CloudProviderAccountAzureConfig {
        CloudProviderAccountAzureConfig {
            region: "eastus".to_string(),
            secret_ref: SecretReference {
                name: "account01".to_string(),
                namespace: "namespace01".to_string(),
                key: "credentials".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn resolves_credentials_and_rejects_empty_fields() {
        let secrets = MemorySecretReader::new();
        secrets.insert(
            "namespace01",
            "account01",
            "credentials",
            br#"{"subscriptionId": "SubID", "clientId": "ClientID", "tenantId": "TenantID", "clientKey": "ClientKey"}"#,
        );
        let config = resolve_account_config(&secrets, &azure_config()).await.unwrap();
        assert_eq!(config.credential.subscription_id, "SubID");
        assert!(config.is_valid());

        secrets.insert(
            "namespace01",
            "account01",
            "credentials",
            br#"{"subscriptionId": "SubID", "clientId": "", "tenantId": "TenantID", "clientKey": "ClientKey"}"#,
        );
        let missing_field = resolve_account_config(&secrets, &azure_config()).await;
        assert!(matches!(
            missing_field,
            Err(CloudError::CredentialResolution(_))
        ));
    }

    #[test]
    fn sentinel_is_rejected() {
        let sentinel = AzureAccountConfig::sentinel(&azure_config());
        assert!(!sentinel.is_valid());
        assert_eq!(sentinel.credential.subscription_id, "default");
    }

    #[test]
    fn comparator_detects_key_rotation() {
        let secrets_doc = AzureAccountCredential {
            subscription_id: "SubID".to_string(),
            tenant_id: "TenantID".to_string(),
            client_id: "ClientID".to_string(),
            client_key: "ClientKey".to_string(),
        };
        let base = AzureAccountConfig {
            credential: secrets_doc.clone(),
            region: "eastus".to_string(),
        };
        let mut rotated = base.clone();
        rotated.credential.client_key = "NewKey".to_string();
        assert!(compare_account_credentials("account01", &base, &rotated));
        assert!(!compare_account_credentials("account01", &base, &base.clone()));
    }
}
