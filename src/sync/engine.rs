//! Runs one adapter end to end: job row, background pipeline, progress and
//! finalization.
//!
//! Job lifecycle: `running -> completed | failed`. A run that finishes with
//! per-record failures is still `completed`; only a fatal error (page fetch,
//! configuration, auth) fails it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::adapter::SyncAdapter;
use super::job::{ErrorLog, JobStatus, SyncContext, SyncKind};
use super::progress::{ProgressRegistry, SyncProgress};
use crate::db::{DbSyncJob, JobCounters, NewSyncJob, SharedDb};
use crate::error::SyncError;

/// Status of a job as seen by a poller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub job_id: String,
    pub status: JobStatus,
    pub records_found: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub current_step: Option<String>,
    pub errors: Vec<String>,
    /// `true` when read from the live registry rather than the job row.
    pub live: bool,
}

impl From<SyncProgress> for SyncStatus {
    fn from(p: SyncProgress) -> Self {
        Self {
            job_id: p.job_id,
            status: p.status,
            records_found: p.records_found,
            records_synced: p.records_synced,
            records_failed: p.records_failed,
            current_step: Some(p.current_step),
            errors: p.errors,
            live: true,
        }
    }
}

impl From<DbSyncJob> for SyncStatus {
    fn from(job: DbSyncJob) -> Self {
        Self {
            job_id: job.id,
            status: JobStatus::from_str_lossy(&job.status),
            records_found: job.records_found,
            records_synced: job.records_synced,
            records_failed: job.records_failed,
            current_step: None,
            errors: job.errors,
            live: false,
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    db: SharedDb,
    progress: ProgressRegistry,
}

impl SyncEngine {
    /// `progress_ttl` is how long a finished job stays in the live registry.
    pub fn new(db: SharedDb, progress_ttl: Duration) -> Self {
        Self {
            db,
            progress: ProgressRegistry::new(progress_ttl),
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Start a run and return its job id without waiting for it.
    ///
    /// Must be called from within a Tokio runtime. The pipeline runs on a
    /// spawned task; a second task watches its handle and fails the job if
    /// the pipeline panics.
    pub fn run<A: SyncAdapter>(
        &self,
        adapter: Arc<A>,
        sync_kind: SyncKind,
        triggered_by: &str,
    ) -> Result<String, SyncError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        let provider = adapter.provider();
        let data_kind = adapter.data_kind();

        let since = {
            let db = self.db.lock();
            let since = match sync_kind {
                SyncKind::Full => None,
                SyncKind::Incremental => db
                    .last_completed_start(provider, data_kind)?
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc)),
            };
            db.insert_sync_job(&NewSyncJob {
                id: &job_id,
                provider,
                data_kind,
                sync_kind: sync_kind.as_str(),
                triggered_by,
                started_at: &started_at,
            })?;
            since
        };
        self.progress.start(&job_id);

        let ctx = SyncContext {
            job_id: job_id.clone(),
            provider: provider.to_string(),
            data_kind: data_kind.to_string(),
            sync_kind,
            triggered_by: triggered_by.to_string(),
            since,
        };
        log::info!(
            "sync {} started: {} {} ({}) by {}",
            job_id,
            provider,
            data_kind,
            sync_kind,
            triggered_by
        );

        let pipeline = tokio::spawn(run_pipeline(
            self.db.clone(),
            self.progress.clone(),
            adapter,
            ctx,
            started_at,
        ));

        let db = self.db.clone();
        let progress = self.progress.clone();
        let watched_id = job_id.clone();
        tokio::spawn(async move {
            if let Err(join_err) = pipeline.await {
                log::error!("sync {} pipeline aborted: {}", watched_id, join_err);
                let counters = progress
                    .get(&watched_id)
                    .map(|p| p.counters())
                    .unwrap_or_default();
                let message = format!("Sync pipeline aborted: {}", join_err);
                persist_final(&db, &watched_id, JobStatus::Failed, counters, &[message.clone()]);
                progress.finish(
                    &watched_id,
                    JobStatus::Failed,
                    counters,
                    "Failed".to_string(),
                    vec![message],
                );
            }
        });

        Ok(job_id)
    }

    /// Live progress for a job, if the registry still holds it.
    pub fn get_progress(&self, job_id: &str) -> Option<SyncProgress> {
        self.progress.get(job_id)
    }

    /// Live progress when available, the persisted job otherwise.
    pub fn poll_status(&self, job_id: &str) -> Result<SyncStatus, SyncError> {
        if let Some(progress) = self.progress.get(job_id) {
            return Ok(progress.into());
        }
        self.db
            .lock()
            .get_sync_job(job_id)?
            .map(SyncStatus::from)
            .ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))
    }
}

async fn run_pipeline<A: SyncAdapter>(
    db: SharedDb,
    progress: ProgressRegistry,
    adapter: Arc<A>,
    ctx: SyncContext,
    started_at: String,
) {
    let mut totals = JobCounters::default();
    let mut errors = ErrorLog::new();

    let outcome = pump(adapter.as_ref(), &ctx, &progress, &mut totals, &mut errors).await;

    let (status, last_sync_status, step) = match &outcome {
        Ok(()) => {
            let last = if totals.failed == 0 { "success" } else { "partial" };
            let step = format!("Completed: {} synced, {} failed", totals.synced, totals.failed);
            (JobStatus::Completed, last, step)
        }
        Err(e) => {
            errors.push(e.to_string());
            (JobStatus::Failed, "failed", format!("Failed: {}", e))
        }
    };

    let error_list = errors.to_vec();
    persist_final(&db, &ctx.job_id, status, totals, &error_list);
    record_integration_outcome(&db, &ctx, status, last_sync_status, &started_at, totals);
    progress.finish(&ctx.job_id, status, totals, step, error_list);

    match outcome {
        Ok(()) => log::info!(
            "sync {} completed: found {}, synced {}, failed {}",
            ctx.job_id,
            totals.found,
            totals.synced,
            totals.failed
        ),
        Err(e) => log::warn!("sync {} failed after {} records: {}", ctx.job_id, totals.found, e),
    }
}

/// Drive the adapter's batches, accumulating totals. Returns the first
/// fatal error.
async fn pump<A: SyncAdapter>(
    adapter: &A,
    ctx: &SyncContext,
    progress: &ProgressRegistry,
    totals: &mut JobCounters,
    errors: &mut ErrorLog,
) -> Result<(), SyncError> {
    let mut batches = adapter.fetch_all(ctx);
    while let Some(batch) = batches.next().await {
        let batch = batch?;
        totals.found += batch.len() as u64;
        progress.update(
            &ctx.job_id,
            *totals,
            format!("Fetched {} records", totals.found),
            None,
        );

        let outcome = adapter.map_and_upsert(batch, ctx).await;
        totals.synced += outcome.synced;
        totals.failed += outcome.failed;
        for error in &outcome.errors {
            log::warn!("sync {} {}: {}", ctx.job_id, ctx.provider, error);
        }
        errors.extend(outcome.errors);

        progress.update(
            &ctx.job_id,
            *totals,
            format!("Synced {} of {}", totals.synced, totals.found),
            Some(errors.to_vec()),
        );
    }
    Ok(())
}

/// Write the terminal job row. Failures are logged, never raised.
fn persist_final(db: &SharedDb, job_id: &str, status: JobStatus, totals: JobCounters, errors: &[String]) {
    match db.lock().finalize_sync_job(job_id, status.as_str(), totals, errors) {
        Ok(true) => {}
        Ok(false) => log::warn!("sync {} was already finalized", job_id),
        Err(e) => log::error!("sync {}: failed to persist final status: {}", job_id, e),
    }
}

fn record_integration_outcome(
    db: &SharedDb,
    ctx: &SyncContext,
    status: JobStatus,
    last_sync_status: &str,
    started_at: &str,
    totals: JobCounters,
) {
    let db = db.lock();
    // last_sync_at only ever names a completed run.
    let recorded = match status {
        JobStatus::Completed => db.record_integration_sync(&ctx.provider, last_sync_status, started_at),
        _ => db.record_integration_failure(&ctx.provider),
    };
    if let Err(e) = recorded {
        log::warn!("sync {}: failed to update {} last-sync fields: {}", ctx.job_id, ctx.provider, e);
    }
    let detail = serde_json::json!({
        "jobId": ctx.job_id,
        "dataKind": ctx.data_kind,
        "status": status.as_str(),
        "recordsFound": totals.found,
        "recordsSynced": totals.synced,
        "recordsFailed": totals.failed,
    });
    crate::audit::record(&db, &ctx.triggered_by, "sync.finished", &ctx.provider, Some(&detail));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::db::test_support::shared_test_db;
    use crate::sync::adapter::scripted::ScriptedAdapter;

    fn engine() -> SyncEngine {
        SyncEngine::new(shared_test_db(), Duration::from_secs(300))
    }

    /// Poll until the job row leaves `running`.
    async fn wait_for_terminal(engine: &SyncEngine, job_id: &str) -> DbSyncJob {
        for _ in 0..500 {
            let job = engine.db.lock().get_sync_job(job_id).unwrap().unwrap();
            if job.status != "running" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", job_id);
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let engine = engine();
        // Second item of the first batch fails.
        let mut adapter = ScriptedAdapter::new(vec![vec![1, 2, 3], vec![4, 5]]);
        adapter.fail_values = vec![2];

        let job_id = engine.run(Arc::new(adapter), SyncKind::Full, "test").unwrap();
        let job = wait_for_terminal(&engine, &job_id).await;

        assert_eq!(job.status, "completed");
        assert_eq!(job.records_found, 5);
        assert_eq!(job.records_synced, 4);
        assert_eq!(job.records_failed, 1);
        assert_eq!(job.errors.len(), 1);
        assert!(job.completed_at.is_some());

        let integration = engine.db.lock().get_integration("scripted").unwrap().unwrap();
        assert_eq!(integration.last_sync_status.as_deref(), Some("partial"));
        assert!(integration.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_zero_batches_completes_with_zero_counters() {
        let engine = engine();
        let adapter = ScriptedAdapter::new(vec![]);

        let job_id = engine.run(Arc::new(adapter), SyncKind::Full, "test").unwrap();
        let job = wait_for_terminal(&engine, &job_id).await;

        assert_eq!(job.status, "completed");
        assert_eq!((job.records_found, job.records_synced, job.records_failed), (0, 0, 0));
        assert!(job.errors.is_empty());
        let integration = engine.db.lock().get_integration("scripted").unwrap().unwrap();
        assert_eq!(integration.last_sync_status.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_page_error_fails_job_and_keeps_counters() {
        let engine = engine();
        let mut adapter = ScriptedAdapter::new(vec![vec![1, 2], vec![3], vec![4]]);
        adapter.error_at_page = Some(1);
        let adapter = Arc::new(adapter);

        let job_id = engine.run(Arc::clone(&adapter), SyncKind::Full, "test").unwrap();
        let job = wait_for_terminal(&engine, &job_id).await;

        assert_eq!(job.status, "failed");
        assert_eq!(job.records_found, 2);
        assert_eq!(job.records_synced, 2);
        assert_eq!(job.errors.len(), 1);
        assert!(job.errors[0].contains("page 1 exploded"));
        assert_eq!(adapter.fetches.load(Ordering::SeqCst), 2, "no fetch after a fatal error");

        let integration = engine.db.lock().get_integration("scripted").unwrap().unwrap();
        assert_eq!(integration.last_sync_status.as_deref(), Some("failed"));
        assert!(integration.last_sync_at.is_none(), "a failed run leaves last_sync_at unset");
    }

    #[tokio::test]
    async fn test_incremental_watermark_survives_failed_run() {
        let engine = engine();
        let first = engine
            .run(Arc::new(ScriptedAdapter::new(vec![vec![1]])), SyncKind::Full, "test")
            .unwrap();
        let first = wait_for_terminal(&engine, &first).await;
        assert_eq!(first.status, "completed");

        let integration = engine.db.lock().get_integration("scripted").unwrap().unwrap();
        assert_eq!(integration.last_sync_at.as_deref(), Some(first.started_at.as_str()));

        let mut broken = ScriptedAdapter::new(vec![vec![2]]);
        broken.error_at_page = Some(0);
        let second = engine.run(Arc::new(broken), SyncKind::Incremental, "test").unwrap();
        assert_eq!(wait_for_terminal(&engine, &second).await.status, "failed");

        let integration = engine.db.lock().get_integration("scripted").unwrap().unwrap();
        assert_eq!(integration.last_sync_status.as_deref(), Some("failed"));
        assert_eq!(integration.last_sync_at.as_deref(), Some(first.started_at.as_str()));

        let third = Arc::new(ScriptedAdapter::new(vec![vec![3]]));
        let job_id = engine.run(Arc::clone(&third), SyncKind::Incremental, "test").unwrap();
        wait_for_terminal(&engine, &job_id).await;

        let expected = chrono::DateTime::parse_from_rfc3339(&first.started_at)
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(third.seen_since.lock().as_slice(), &[Some(expected)]);
    }

    #[tokio::test]
    async fn test_run_returns_before_pipeline_finishes() {
        let engine = engine();
        let adapter = ScriptedAdapter::new(vec![vec![1], vec![2], vec![3]]);

        let job_id = engine.run(Arc::new(adapter), SyncKind::Full, "test").unwrap();
        let status = engine.poll_status(&job_id).unwrap();
        assert_eq!(status.status, JobStatus::Running);
        assert!(status.live);

        wait_for_terminal(&engine, &job_id).await;
    }

    #[tokio::test]
    async fn test_progress_counters_are_monotonic() {
        let engine = engine();
        let pages: Vec<Vec<u32>> = (0..20).map(|i| vec![i * 2, i * 2 + 1]).collect();
        let mut adapter = ScriptedAdapter::new(pages);
        adapter.fail_values = vec![3, 17, 30];

        let job_id = engine.run(Arc::new(adapter), SyncKind::Full, "test").unwrap();
        let mut last = JobCounters::default();
        loop {
            let status = engine.poll_status(&job_id).unwrap();
            assert!(status.records_found >= last.found);
            assert!(status.records_synced >= last.synced);
            assert!(status.records_failed >= last.failed);
            last = JobCounters {
                found: status.records_found,
                synced: status.records_synced,
                failed: status.records_failed,
            };
            if status.status.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(last, JobCounters { found: 40, synced: 37, failed: 3 });
    }

    #[tokio::test]
    async fn test_poll_falls_back_to_job_row() {
        let engine = engine();
        let job_id = engine
            .run(Arc::new(ScriptedAdapter::new(vec![vec![1]])), SyncKind::Full, "test")
            .unwrap();
        wait_for_terminal(&engine, &job_id).await;

        let fresh = SyncEngine::new(engine.db.clone(), Duration::from_secs(300));
        assert!(fresh.get_progress(&job_id).is_none());
        let status = fresh.poll_status(&job_id).unwrap();
        assert!(!status.live);
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.records_synced, 1);

        assert!(matches!(
            fresh.poll_status("missing"),
            Err(SyncError::JobNotFound(_))
        ));
    }
}
