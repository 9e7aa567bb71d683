//! ARM REST client
//!
//! Implements [`AzureApiClient`] against the Resource Manager endpoint with
//! bearer-token auth, `nextLink` pagination for list calls, and `$skipToken`
//! pagination for Resource Graph queries.

use crate::auth::TokenProvider;
use crate::azure_trait::{AzureApiClient, AzureApiConfig, AzureClientFactory};
use crate::error::AzureError;
use crate::models::*;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const NETWORK_API_VERSION: &str = "2023-05-01";
const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";

/// Rows requested per Resource Graph page.
pub const RESOURCE_GRAPH_PAGE_SIZE: i64 = 100;

/// Factory producing REST-backed clients.
#[derive(Debug, Default)]
pub struct ArmAzureClientFactory;

#[async_trait::async_trait]
impl AzureClientFactory for ArmAzureClientFactory {
    async fn create(&self, config: &AzureApiConfig) -> Result<Arc<dyn AzureApiClient>, AzureError> {
        Ok(Arc::new(ArmClient::new(config)?))
    }
}

/// ARM client bound to one subscription.
pub struct ArmClient {
    http: reqwest::Client,
    token_provider: TokenProvider,
    subscription_id: String,
}

impl ArmClient {
    pub fn new(config: &AzureApiConfig) -> Result<Self, AzureError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let token_provider = TokenProvider::new(
            http.clone(),
            &config.tenant_id,
            &config.client_id,
            &config.client_key,
        );
        Ok(Self {
            http,
            token_provider,
            subscription_id: config.subscription_id.clone(),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AzureError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }

    /// Follows `nextLink` pages of a `{"value": [...]}` list endpoint.
    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        mut url: String,
    ) -> Result<Vec<T>, AzureError> {
        let mut all_results = Vec::new();
        loop {
            debug!(%url, "fetching ARM page");
            let token = self.token_provider.token().await?;
            let response = self.http.get(&url).bearer_auth(token).send().await?;
            let response = Self::check_status(response).await?;
            let page: ListResponse<T> = response.json().await?;
            all_results.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(all_results)
    }

    async fn put_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, AzureError> {
        let token = self.token_provider.token().await?;
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, url: &str) -> Result<(), AzureError> {
        let token = self.token_provider.token().await?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        // 404 means already gone, which callers treat as success.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }

    fn subscription_url(&self, resource_type: &str) -> String {
        format!(
            "{MANAGEMENT_ENDPOINT}/subscriptions/{}/providers/Microsoft.Network/{resource_type}?api-version={NETWORK_API_VERSION}",
            self.subscription_id
        )
    }

    fn resource_url(&self, resource_group: &str, resource_type: &str, name: &str) -> String {
        format!(
            "{MANAGEMENT_ENDPOINT}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Network/{resource_type}/{name}?api-version={NETWORK_API_VERSION}",
            self.subscription_id
        )
    }
}

#[async_trait::async_trait]
impl AzureApiClient for ArmClient {
    async fn query_virtual_machines(
        &self,
        query: &str,
    ) -> Result<Vec<VirtualMachineRow>, AzureError> {
        let url = format!(
            "{MANAGEMENT_ENDPOINT}/providers/Microsoft.ResourceGraph/resources?api-version={RESOURCE_GRAPH_API_VERSION}"
        );
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;
        loop {
            let mut options = json!({ "$top": RESOURCE_GRAPH_PAGE_SIZE });
            if let Some(token) = &skip_token {
                options["$skipToken"] = json!(token);
            }
            let body = json!({
                "subscriptions": [self.subscription_id],
                "query": query,
                "options": options,
            });
            let token = self.token_provider.token().await?;
            let response = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            let page: ResourceGraphResponse<VirtualMachineRow> = response.json().await?;
            rows.extend(page.data);
            match page.skip_token {
                Some(next) => skip_token = Some(next),
                None => break,
            }
        }
        debug!(count = rows.len(), "resource graph rows");
        Ok(rows)
    }

    async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetwork>, AzureError> {
        self.fetch_all_pages(self.subscription_url("virtualNetworks"))
            .await
    }

    async fn list_application_security_groups(
        &self,
    ) -> Result<Vec<ApplicationSecurityGroup>, AzureError> {
        self.fetch_all_pages(self.subscription_url("applicationSecurityGroups"))
            .await
    }

    async fn create_or_update_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ApplicationSecurityGroup, AzureError> {
        let url = self.resource_url(resource_group, "applicationSecurityGroups", name);
        let body = json!({ "location": location, "properties": {} });
        self.put_json(&url, &body).await
    }

    async fn delete_application_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        let url = self.resource_url(resource_group, "applicationSecurityGroups", name);
        self.delete(&url).await
    }

    async fn get_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<SecurityGroup, AzureError> {
        let url = self.resource_url(resource_group, "networkSecurityGroups", name);
        let token = self.token_provider.token().await?;
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn create_or_update_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        security_group: SecurityGroup,
    ) -> Result<SecurityGroup, AzureError> {
        let url = self.resource_url(resource_group, "networkSecurityGroups", name);
        self.put_json(&url, &security_group).await
    }

    async fn delete_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        let url = self.resource_url(resource_group, "networkSecurityGroups", name);
        self.delete(&url).await
    }

    async fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, AzureError> {
        self.fetch_all_pages(self.subscription_url("networkInterfaces"))
            .await
    }

    async fn create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        interface: NetworkInterface,
    ) -> Result<NetworkInterface, AzureError> {
        let url = self.resource_url(resource_group, "networkInterfaces", name);
        self.put_json(&url, &interface).await
    }
}
