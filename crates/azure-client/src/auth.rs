//! Client-credential token provider
//!
//! Acquires bearer tokens for the ARM audience via the OAuth2
//! client-credentials grant and caches them until shortly before expiry.

use crate::error::AzureError;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_SCOPE: &str = "https://management.azure.com/.default";
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Caching token source for one service principal.
pub struct TokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_key: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, tenant_id: &str, client_id: &str, client_key: &str) -> Self {
        Self {
            http,
            token_url: format!(
                "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"
            ),
            client_id: client_id.to_string(),
            client_key: client_key.to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a bearer token, refreshing when the cached one is near expiry.
    pub async fn token(&self) -> Result<String, AzureError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() {
                return Ok(entry.token.clone());
            }
        }

        debug!("requesting new ARM access token");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_key.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::Authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response.json().await?;
        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            token: token.access_token,
            expires_at,
        });
        Ok(value)
    }
}
