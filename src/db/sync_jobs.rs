//! Persistence for sync job rows.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{DbError, DbSyncJob, JobCounters, NewSyncJob, OpsDb};

const JOB_COLUMNS: &str = "id, provider, data_kind, sync_kind, status, records_found,
     records_synced, records_failed, errors, started_at, completed_at, triggered_by";

impl OpsDb {
    /// Insert a job row in `running` state.
    pub fn insert_sync_job(&self, job: &NewSyncJob<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sync_jobs (id, provider, data_kind, sync_kind, status, started_at, triggered_by)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6)",
            params![
                job.id,
                job.provider,
                job.data_kind,
                job.sync_kind,
                job.started_at,
                job.triggered_by,
            ],
        )?;
        Ok(())
    }

    /// Move a running job to a terminal status.
    ///
    /// Only rows still in `running` are touched, so a finalized job is never
    /// rewritten. Returns whether a row was updated.
    pub fn finalize_sync_job(
        &self,
        id: &str,
        status: &str,
        counters: JobCounters,
        errors: &[String],
    ) -> Result<bool, DbError> {
        let errors_json = serde_json::to_string(errors)?;
        let updated = self.conn.execute(
            "UPDATE sync_jobs
             SET status = ?2, records_found = ?3, records_synced = ?4, records_failed = ?5,
                 errors = ?6, completed_at = ?7
             WHERE id = ?1 AND status = 'running'",
            params![
                id,
                status,
                counters.found as i64,
                counters.synced as i64,
                counters.failed as i64,
                errors_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn get_sync_job(&self, id: &str) -> Result<Option<DbSyncJob>, DbError> {
        let sql = format!("SELECT {} FROM sync_jobs WHERE id = ?1", JOB_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], Self::map_sync_job_row)
            .optional()?;
        row.map(|(job, errors_json)| finish_job_row(job, &errors_json))
            .transpose()
    }

    /// Start time of the newest completed job for (provider, data kind): the
    /// lower bound for the next incremental run of that adapter.
    pub fn last_completed_start(
        &self,
        provider: &str,
        data_kind: &str,
    ) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT started_at FROM sync_jobs
                 WHERE provider = ?1 AND data_kind = ?2 AND status = 'completed'
                 ORDER BY started_at DESC LIMIT 1",
                params![provider, data_kind],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Most recent jobs, newest first, optionally filtered by provider.
    pub fn list_sync_jobs(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DbSyncJob>, DbError> {
        let sql = format!(
            "SELECT {} FROM sync_jobs
             WHERE (?1 IS NULL OR provider = ?1)
             ORDER BY started_at DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![provider, limit as i64], Self::map_sync_job_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            let (job, errors_json) = row?;
            jobs.push(finish_job_row(job, &errors_json)?);
        }
        Ok(jobs)
    }

    fn map_sync_job_row(row: &Row<'_>) -> rusqlite::Result<(DbSyncJob, String)> {
        Ok((
            DbSyncJob {
                id: row.get(0)?,
                provider: row.get(1)?,
                data_kind: row.get(2)?,
                sync_kind: row.get(3)?,
                status: row.get(4)?,
                records_found: row.get::<_, i64>(5)?.max(0) as u64,
                records_synced: row.get::<_, i64>(6)?.max(0) as u64,
                records_failed: row.get::<_, i64>(7)?.max(0) as u64,
                errors: Vec::new(),
                started_at: row.get(9)?,
                completed_at: row.get(10)?,
                triggered_by: row.get(11)?,
            },
            row.get(8)?,
        ))
    }
}

fn finish_job_row(mut job: DbSyncJob, errors_json: &str) -> Result<DbSyncJob, DbError> {
    job.errors = serde_json::from_str(errors_json)?;
    Ok(job)
}
