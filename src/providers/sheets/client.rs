//! Google Sheets v4 values API plus the Google OAuth token refresh.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::{
    exchange_refresh_token, read_json, send_with_retry, OAuthClient, RetryPolicy, USER_AGENT,
};
use crate::sync::oauth::{OAuthSettings, OAuthTokens, RefreshedTokens, TokenRefresher};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsSettings {
    pub tokens: OAuthTokens,
    pub spreadsheet_id: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
}

fn default_sheet_name() -> String {
    "Financials".to_string()
}

impl OAuthSettings for SheetsSettings {
    fn tokens(&self) -> &OAuthTokens {
        &self.tokens
    }
    fn tokens_mut(&mut self) -> &mut OAuthTokens {
        &mut self.tokens
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    /// Omitted entirely when the range is empty.
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Formatted cell values for an A1 range, trailing empty rows dropped.
    async fn read_range(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, ProviderError>;
}

pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    oauth: Option<OAuthClient>,
    retry: RetryPolicy,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, base_url: &str, oauth: Option<OAuthClient>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth,
            retry: RetryPolicy::default(),
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<url::Url, ProviderError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Decode(format!("invalid sheets base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Decode("sheets base url cannot be a base".to_string()))?
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
        Ok(url)
    }
}

#[async_trait]
impl SheetsApi for SheetsClient {
    async fn read_range(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, ProviderError> {
        let request = self
            .http
            .get(self.values_url(spreadsheet_id, range)?)
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[("majorDimension", "ROWS")]);

        let response = send_with_retry("sheets", request, &self.retry).await?;
        let body: ValueRange = read_json(response).await?;
        Ok(body.values)
    }
}

#[async_trait]
impl TokenRefresher for SheetsClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            ProviderError::RefreshFailed(
                "providers.sheets.clientId is not set in config.json".to_string(),
            )
        })?;
        exchange_refresh_token(&self.http, "sheets", oauth, refresh_token, &self.retry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_url_escapes_range() {
        let client = SheetsClient::new(reqwest::Client::new(), "https://sheets.googleapis.com/", None);
        let url = client.values_url("abc123", "Client Figures!A2:F501").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/Client%20Figures!A2:F501"
        );
    }

    #[test]
    fn test_empty_range_has_no_values() {
        let body: ValueRange = serde_json::from_str(r#"{"range": "Financials!A2:F501"}"#).unwrap();
        assert!(body.values.is_empty());
    }
}
