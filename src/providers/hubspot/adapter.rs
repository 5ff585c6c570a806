use std::sync::Arc;

use async_trait::async_trait;

use super::client::{HubSpotApi, HubSpotCompany, HubSpotSettings};
use crate::db::{ClientProfile, DbError, OpsDb, SharedDb};
use crate::entity::EntityKind;
use crate::error::SyncError;
use crate::integrations::IntegrationStore;
use crate::ratelimit::TokenBucket;
use crate::sync::oauth::{ensure_fresh_token, TokenRefresher};
use crate::sync::{BatchOutcome, Page, SyncAdapter, SyncContext};

pub const PROVIDER: &str = "hubspot";

/// HubSpot companies -> `clients`, keyed by HubSpot company id.
///
/// The list endpoint has no updated-since filter, so incremental runs read
/// every company; the upsert makes that harmless.
pub struct HubSpotCompaniesAdapter {
    api: Arc<dyn HubSpotApi>,
    refresher: Arc<dyn TokenRefresher>,
    store: IntegrationStore,
    limiter: Arc<TokenBucket>,
}

impl HubSpotCompaniesAdapter {
    pub fn new(
        api: Arc<dyn HubSpotApi>,
        refresher: Arc<dyn TokenRefresher>,
        store: IntegrationStore,
        limiter: Arc<TokenBucket>,
    ) -> Self {
        Self { api, refresher, store, limiter }
    }
}

#[async_trait]
impl SyncAdapter for HubSpotCompaniesAdapter {
    type Record = HubSpotCompany;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn data_kind(&self) -> &'static str {
        "companies"
    }

    async fn fetch_page(
        &self,
        _ctx: &SyncContext,
        cursor: Option<String>,
    ) -> Result<Page<HubSpotCompany>, SyncError> {
        let settings: HubSpotSettings =
            ensure_fresh_token(&self.store, PROVIDER, self.refresher.as_ref()).await?;

        self.limiter.acquire(1.0).await;
        let page = self
            .api
            .companies(&settings.tokens.access_token, cursor.as_deref())
            .await
            .map_err(|e| SyncError::provider(PROVIDER, e))?;

        let next_cursor = page.next_after();
        Ok(Page { records: page.results, next_cursor })
    }

    async fn map_and_upsert(&self, batch: Vec<HubSpotCompany>, _ctx: &SyncContext) -> BatchOutcome {
        upsert_batch(self.store.db(), &batch)
    }
}

fn upsert_batch(db: &SharedDb, batch: &[HubSpotCompany]) -> BatchOutcome {
    let db = db.lock();
    let mut outcome = BatchOutcome::default();
    for company in batch {
        match upsert_company(&db, company) {
            Ok(()) => outcome.record_success(),
            Err(e) => outcome.record_failure(format!("company {}: {}", company.id, e)),
        }
    }
    outcome
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn upsert_company(db: &OpsDb, company: &HubSpotCompany) -> Result<(), String> {
    let props = &company.properties;
    let name = non_blank(&props.name).ok_or_else(|| "missing company name".to_string())?;
    let profile = ClientProfile {
        email: None,
        phone: non_blank(&props.phone),
        website: non_blank(&props.domain),
        industry: non_blank(&props.industry),
    };

    db.with_transaction(|tx| {
        let client_id = match tx.find_entity_by_external_id(EntityKind::Client, PROVIDER, &company.id)? {
            Some(id) => id,
            None => tx.resolve_or_create_entity(
                EntityKind::Client,
                PROVIDER,
                Some(&company.id),
                name,
                None,
            )?,
        };
        tx.update_client_profile(&client_id, name, &profile)?;
        Ok::<(), DbError>(())
    })
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::crypto::ConfigCipher;
    use crate::db::test_support::shared_test_db;
    use crate::error::ProviderError;
    use crate::providers::hubspot::client::{CompanyPage, CompanyProperties};
    use crate::sync::oauth::testing::FakeRefresher;
    use crate::sync::oauth::OAuthTokens;
    use crate::sync::SyncKind;

    fn company(id: &str, name: Option<&str>, domain: Option<&str>) -> HubSpotCompany {
        HubSpotCompany {
            id: id.to_string(),
            properties: CompanyProperties {
                name: name.map(str::to_string),
                domain: domain.map(str::to_string),
                phone: None,
                industry: Some("Retail".into()),
            },
        }
    }

    struct FakeHubSpot {
        pages: Vec<Vec<HubSpotCompany>>,
        tokens_seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HubSpotApi for FakeHubSpot {
        async fn companies(
            &self,
            access_token: &str,
            after: Option<&str>,
        ) -> Result<CompanyPage, ProviderError> {
            self.tokens_seen.lock().unwrap().push(access_token.to_string());
            let idx: usize = after.map(|a| a.parse().unwrap()).unwrap_or(0);
            let next = (idx + 1 < self.pages.len()).then(|| (idx + 1).to_string());
            Ok(CompanyPage::new(self.pages[idx].clone(), next))
        }
    }

    fn ctx() -> SyncContext {
        SyncContext {
            job_id: "j".into(),
            provider: PROVIDER.into(),
            data_kind: "companies".into(),
            sync_kind: SyncKind::Full,
            triggered_by: "test".into(),
            since: None,
        }
    }

    fn store_with(tokens: OAuthTokens) -> IntegrationStore {
        let store = IntegrationStore::new(shared_test_db(), Arc::new(ConfigCipher::new([5u8; 32])));
        store.save_settings(PROVIDER, &HubSpotSettings { tokens }).unwrap();
        store
    }

    fn expired(refresh: Option<&str>) -> OAuthTokens {
        OAuthTokens {
            access_token: "old".into(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn test_pages_use_refreshed_token_and_follow_cursor() {
        let store = store_with(expired(Some("r")));
        let api = Arc::new(FakeHubSpot {
            pages: vec![vec![company("1", Some("Acme"), None)], vec![company("2", Some("Globex"), None)]],
            tokens_seen: Mutex::new(Vec::new()),
        });
        let refresher = Arc::new(FakeRefresher::ok());
        let adapter = HubSpotCompaniesAdapter::new(
            api.clone(),
            refresher.clone(),
            store.clone(),
            Arc::new(TokenBucket::new(10.0, 10.0)),
        );

        let ctx = ctx();
        let mut batches = adapter.fetch_all(&ctx);
        let mut total = 0;
        while let Some(batch) = batches.next().await {
            total += batch.unwrap().len();
        }
        assert_eq!(total, 2);
        // One refresh, then the stored token is fresh for the second page.
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*api.tokens_seen.lock().unwrap(), vec!["access-1", "access-1"]);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_requires_reauth() {
        let store = store_with(expired(None));
        let api = Arc::new(FakeHubSpot { pages: vec![vec![]], tokens_seen: Mutex::new(Vec::new()) });
        let adapter = HubSpotCompaniesAdapter::new(
            api.clone(),
            Arc::new(FakeRefresher::ok()),
            store,
            Arc::new(TokenBucket::new(10.0, 10.0)),
        );

        let err = adapter.fetch_page(&ctx(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::ReauthRequired { .. }));
        assert!(err.to_string().contains("Re-authenticate"));
        assert!(api.tokens_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_refreshes_profile_and_rejects_nameless() {
        let store = store_with(expired(Some("r")));
        let adapter = HubSpotCompaniesAdapter::new(
            Arc::new(FakeHubSpot { pages: vec![], tokens_seen: Mutex::new(Vec::new()) }),
            Arc::new(FakeRefresher::ok()),
            store.clone(),
            Arc::new(TokenBucket::new(10.0, 10.0)),
        );

        let first = adapter
            .map_and_upsert(vec![company("1", Some("Acme"), None), company("2", Some("  "), None)], &ctx())
            .await;
        assert_eq!((first.synced, first.failed), (1, 1));
        assert_eq!(first.errors, vec!["company 2: missing company name".to_string()]);

        // Renamed in the CRM: same row, new name, domain filled in.
        let second = adapter
            .map_and_upsert(vec![company("1", Some("Acme Corp"), Some("acme.com"))], &ctx())
            .await;
        assert_eq!(second.synced, 1);

        let db = store.db().lock();
        let clients = db.list_entities(EntityKind::Client).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].name, "Acme Corp");
        let (website, industry): (Option<String>, Option<String>) = db
            .conn_ref()
            .query_row("SELECT website, industry FROM clients", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(website.as_deref(), Some("acme.com"));
        assert_eq!(industry.as_deref(), Some("Retail"));
    }
}
