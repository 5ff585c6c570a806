//! HubSpot CRM v3 companies API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::{
    exchange_refresh_token, read_json, send_with_retry, OAuthClient, RetryPolicy, USER_AGENT,
};
use crate::sync::oauth::{OAuthSettings, OAuthTokens, RefreshedTokens, TokenRefresher};

pub const PAGE_LIMIT: u32 = 100;
const COMPANY_PROPERTIES: &str = "name,domain,phone,industry";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSpotSettings {
    pub tokens: OAuthTokens,
}

impl OAuthSettings for HubSpotSettings {
    fn tokens(&self) -> &OAuthTokens {
        &self.tokens
    }
    fn tokens_mut(&mut self) -> &mut OAuthTokens {
        &mut self.tokens
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyProperties {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubSpotCompany {
    pub id: String,
    #[serde(default)]
    pub properties: CompanyProperties,
}

#[derive(Debug, Clone, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyPage {
    pub results: Vec<HubSpotCompany>,
    #[serde(default)]
    paging: Option<Paging>,
}

impl CompanyPage {
    pub fn new(results: Vec<HubSpotCompany>, after: Option<String>) -> Self {
        Self {
            results,
            paging: after.map(|after| Paging { next: Some(NextPage { after }) }),
        }
    }

    /// Cursor for the following page, `None` on the last one.
    pub fn next_after(&self) -> Option<String> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.clone())
    }
}

#[async_trait]
pub trait HubSpotApi: Send + Sync {
    async fn companies(
        &self,
        access_token: &str,
        after: Option<&str>,
    ) -> Result<CompanyPage, ProviderError>;
}

pub struct HubSpotClient {
    http: reqwest::Client,
    base_url: String,
    oauth: Option<OAuthClient>,
    retry: RetryPolicy,
}

impl HubSpotClient {
    /// `oauth` is `None` when no app credentials are configured; refreshes
    /// then fail with a message pointing at the config file.
    pub fn new(http: reqwest::Client, base_url: &str, oauth: Option<OAuthClient>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl HubSpotApi for HubSpotClient {
    async fn companies(
        &self,
        access_token: &str,
        after: Option<&str>,
    ) -> Result<CompanyPage, ProviderError> {
        let mut query = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("properties", COMPANY_PROPERTIES.to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let request = self
            .http
            .get(format!("{}/crm/v3/objects/companies", self.base_url))
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&query);

        let response = send_with_retry("hubspot", request, &self.retry).await?;
        read_json(response).await
    }
}

#[async_trait]
impl TokenRefresher for HubSpotClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            ProviderError::RefreshFailed(
                "providers.hubspot.clientId is not set in config.json".to_string(),
            )
        })?;
        exchange_refresh_token(&self.http, "hubspot", oauth, refresh_token, &self.retry).await
    }
}
