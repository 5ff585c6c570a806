//! Harvest v2 API: time entries and users, page-number pagination, personal
//! access token auth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::providers::{read_json, send_with_retry, RetryPolicy, USER_AGENT};

pub const PER_PAGE: u32 = 100;

/// Stored (sealed) Harvest connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestSettings {
    pub access_token: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestTimeEntry {
    pub id: i64,
    pub spent_date: String,
    pub hours: f64,
    #[serde(default)]
    pub billable: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub client: Option<HarvestRef>,
    #[serde(default)]
    pub user: Option<HarvestRef>,
    #[serde(default)]
    pub project: Option<HarvestRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeEntryPage {
    pub time_entries: Vec<HarvestTimeEntry>,
    /// `null` on the last page.
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub default_hourly_rate: Option<f64>,
}

impl HarvestUser {
    /// Matches the `user.name` Harvest embeds in time entries.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPage {
    pub users: Vec<HarvestUser>,
    pub next_page: Option<u32>,
}

#[async_trait]
pub trait HarvestApi: Send + Sync {
    async fn time_entries(
        &self,
        settings: &HarvestSettings,
        page: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<TimeEntryPage, ProviderError>;

    async fn users(
        &self,
        settings: &HarvestSettings,
        page: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<UserPage, ProviderError>;
}

pub struct HarvestClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HarvestClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        settings: &HarvestSettings,
        page: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<T, ProviderError> {
        let mut query = vec![
            ("page", page.to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        if let Some(since) = updated_since {
            query.push(("updated_since", since.to_rfc3339()));
        }

        let request = self
            .http
            .get(format!("{}/v2/{}", self.base_url, path))
            .bearer_auth(&settings.access_token)
            .header("Harvest-Account-Id", &settings.account_id)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&query);

        let response = send_with_retry("harvest", request, &self.retry).await?;
        read_json(response).await
    }
}

#[async_trait]
impl HarvestApi for HarvestClient {
    async fn time_entries(
        &self,
        settings: &HarvestSettings,
        page: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<TimeEntryPage, ProviderError> {
        self.get_page("time_entries", settings, page, updated_since).await
    }

    async fn users(
        &self,
        settings: &HarvestSettings,
        page: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<UserPage, ProviderError> {
        self.get_page("users", settings, page, updated_since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_decodes_with_missing_optionals() {
        let json = r#"{
            "time_entries": [
                {"id": 1, "spent_date": "2025-03-04", "hours": 1.5, "billable": true,
                 "client": {"id": 10, "name": "Acme"}, "user": {"id": 7, "name": "Jane Doe"},
                 "project": {"id": 3, "name": "Retainer"}, "notes": null},
                {"id": 2, "spent_date": "2025-03-05", "hours": 0.25}
            ],
            "per_page": 100,
            "next_page": 2
        }"#;
        let page: TimeEntryPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.time_entries.len(), 2);
        assert_eq!(page.next_page, Some(2));
        assert!(page.time_entries[1].client.is_none());
        assert!(!page.time_entries[1].billable);
    }

    #[test]
    fn test_user_page_decodes() {
        let json = r#"{
            "users": [
                {"id": 7, "first_name": "Jane", "last_name": "Doe", "email": "jane@acme.test",
                 "is_active": true, "roles": ["Design"], "default_hourly_rate": 150.0},
                {"id": 8, "first_name": "Sam", "last_name": " ", "is_active": false}
            ],
            "next_page": null
        }"#;
        let page: UserPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.users[0].full_name(), "Jane Doe");
        assert_eq!(page.users[1].full_name(), "Sam");
        assert!(page.users[1].email.is_none());
        assert!(page.next_page.is_none());
    }
}
