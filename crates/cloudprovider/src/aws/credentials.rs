//! AWS credential resolution and comparison.

use crate::error::CloudError;
use crate::internal::ACCOUNT_CREDENTIALS_DEFAULT;
use crate::secret::SecretReader;
use crds::CloudProviderAccountAwsConfig;
use serde::Deserialize;
use tracing::info;

/// Credential document stored in the referenced secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsAccountCredential {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub external_id: String,
}

/// Resolved account configuration: credential plus CR-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsAccountConfig {
    pub credential: AwsAccountCredential,
    pub region: String,
    pub endpoint: String,
}

impl AwsAccountConfig {
    /// Sentinel configuration recorded when secret resolution fails.
    pub fn sentinel(aws_config: &CloudProviderAccountAwsConfig) -> Self {
        Self {
            credential: AwsAccountCredential {
                access_key_id: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
                access_key_secret: ACCOUNT_CREDENTIALS_DEFAULT.to_string(),
                session_token: String::new(),
                role_arn: String::new(),
                external_id: String::new(),
            },
            region: aws_config.region.trim().to_string(),
            endpoint: aws_config.endpoint.as_deref().unwrap_or("").trim().to_string(),
        }
    }

    /// True when no credential field holds the sentinel default.
    pub fn is_valid(&self) -> bool {
        self.credential.access_key_id != ACCOUNT_CREDENTIALS_DEFAULT
            && self.credential.access_key_secret != ACCOUNT_CREDENTIALS_DEFAULT
            && !self.credential.access_key_id.is_empty()
            && !self.credential.access_key_secret.is_empty()
    }

    pub fn api_config(&self) -> aws_client::AwsApiConfig {
        let optional = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        aws_client::AwsApiConfig {
            region: self.region.clone(),
            endpoint: optional(&self.endpoint),
            access_key_id: self.credential.access_key_id.clone(),
            access_key_secret: self.credential.access_key_secret.clone(),
            session_token: optional(&self.credential.session_token),
            role_arn: optional(&self.credential.role_arn),
            external_id: optional(&self.credential.external_id),
        }
    }
}

/// Resolves the account configuration from the referenced secret. Required
/// fields must be present and non-empty.
pub async fn resolve_account_config(
    secret_reader: &dyn SecretReader,
    aws_config: &CloudProviderAccountAwsConfig,
) -> Result<AwsAccountConfig, CloudError> {
    let payload = secret_reader.read_secret_key(&aws_config.secret_ref).await?;
    let credential: AwsAccountCredential = serde_json::from_slice(&payload).map_err(|e| {
        CloudError::CredentialResolution(format!(
            "failed to unmarshal Secret credentials {}/{}: {e}",
            aws_config.secret_ref.namespace, aws_config.secret_ref.name
        ))
    })?;
    if credential.access_key_id.trim().is_empty() || credential.access_key_secret.trim().is_empty()
    {
        return Err(CloudError::CredentialResolution(format!(
            "Secret credentials cannot be empty: {}/{}",
            aws_config.secret_ref.namespace, aws_config.secret_ref.name
        )));
    }
    Ok(AwsAccountConfig {
        credential: AwsAccountCredential {
            access_key_id: credential.access_key_id.trim().to_string(),
            access_key_secret: credential.access_key_secret.trim().to_string(),
            session_token: credential.session_token.trim().to_string(),
            role_arn: credential.role_arn.trim().to_string(),
            external_id: credential.external_id.trim().to_string(),
        },
        region: aws_config.region.trim().to_string(),
        endpoint: aws_config.endpoint.as_deref().unwrap_or("").trim().to_string(),
    })
}

/// Field-by-field comparison on trimmed values, logging what changed.
/// Returns true when any field differs.
pub fn compare_account_credentials(
    account_name: &str,
    existing: &AwsAccountConfig,
    new: &AwsAccountConfig,
) -> bool {
    let mut changed = false;
    let differs = |a: &str, b: &str| a.trim() != b.trim();

    if differs(&existing.credential.access_key_id, &new.credential.access_key_id) {
        changed = true;
        info!(account = account_name, "access key id updated");
    }
    if differs(
        &existing.credential.access_key_secret,
        &new.credential.access_key_secret,
    ) {
        changed = true;
        info!(account = account_name, "access key secret updated");
    }
    if differs(&existing.credential.session_token, &new.credential.session_token) {
        changed = true;
        info!(account = account_name, "session token updated");
    }
    if differs(&existing.credential.role_arn, &new.credential.role_arn) {
        changed = true;
        info!(account = account_name, "IAM role updated");
    }
    if differs(&existing.credential.external_id, &new.credential.external_id) {
        changed = true;
        info!(account = account_name, "IAM external id updated");
    }
    if differs(&existing.region, &new.region) {
        changed = true;
        info!(account = account_name, "region updated");
    }
    if differs(&existing.endpoint, &new.endpoint) {
        changed = true;
        info!(account = account_name, "endpoint url updated");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::memory::MemorySecretReader;
    use crds::SecretReference;

    fn aws_config() -> CloudProviderAccountAwsConfig {
        CloudProviderAccountAwsConfig {
            region: "us-east-1".to_string(),
            endpoint: None,
            secret_ref: SecretReference {
                name: "secret01".to_string(),
                namespace: "namespace01".to_string(),
                key: "credentials".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn resolves_credentials_from_secret() {
        let secrets = MemorySecretReader::new();
        secrets.insert(
            "namespace01",
            "secret01",
            "credentials",
            br#"{"accessKeyId": "keyId", "accessKeySecret": "keySecret"}"#,
        );
        let config = resolve_account_config(&secrets, &aws_config()).await.unwrap();
        assert_eq!(config.credential.access_key_id, "keyId");
        assert_eq!(config.credential.access_key_secret, "keySecret");
        assert!(config.is_valid());
    }

    #[tokio::test]
    async fn missing_secret_and_bad_json_fail_resolution() {
        let secrets = MemorySecretReader::new();
        let missing = resolve_account_config(&secrets, &aws_config()).await;
        assert!(matches!(missing, Err(CloudError::CredentialResolution(_))));

        secrets.insert("namespace01", "secret01", "credentials", b"credentialg");
        let malformed = resolve_account_config(&secrets, &aws_config()).await;
        assert!(matches!(malformed, Err(CloudError::CredentialResolution(_))));

        secrets.insert(
            "namespace01",
            "secret01",
            "credentials",
            br#"{"accessKeyId": "", "accessKeySecret": "keySecret"}"#,
        );
        let empty_field = resolve_account_config(&secrets, &aws_config()).await;
        assert!(matches!(empty_field, Err(CloudError::CredentialResolution(_))));
    }

    #[test]
    fn comparator_fires_only_on_trimmed_differences() {
        let base = AwsAccountConfig {
            credential: AwsAccountCredential {
                access_key_id: "keyId".to_string(),
                access_key_secret: "keySecret".to_string(),
                ..Default::default()
            },
            region: "us-east-1".to_string(),
            endpoint: String::new(),
        };

        let mut same = base.clone();
        same.credential.access_key_id = " keyId ".to_string();
        assert!(!compare_account_credentials("account01", &base, &same));

        let mut rotated = base.clone();
        rotated.credential.access_key_secret = "Secret".to_string();
        assert!(compare_account_credentials("account01", &base, &rotated));
    }

    #[test]
    fn sentinel_config_is_invalid() {
        let sentinel = AwsAccountConfig::sentinel(&aws_config());
        assert!(!sentinel.is_valid());
        assert_eq!(sentinel.region, "us-east-1");
    }
}
