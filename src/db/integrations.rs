//! Integration rows: enabled flag, sealed settings blob and last-sync metadata.
//!
//! This layer only moves bytes. Sealing and unsealing live in
//! [`crate::integrations::IntegrationStore`].

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{DbError, DbIntegration, OpsDb};

impl OpsDb {
    pub fn get_integration(&self, provider: &str) -> Result<Option<DbIntegration>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT provider, enabled, settings, last_sync_at, last_sync_status, updated_at
                 FROM integrations WHERE provider = ?1",
                params![provider],
                Self::map_integration_row,
            )
            .optional()?)
    }

    pub fn list_integrations(&self) -> Result<Vec<DbIntegration>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, enabled, settings, last_sync_at, last_sync_status, updated_at
             FROM integrations ORDER BY provider",
        )?;
        let rows = stmt.query_map([], Self::map_integration_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store a sealed settings blob, creating the row if needed. The enabled
    /// flag of an existing row is left alone.
    pub fn save_integration_settings(&self, provider: &str, sealed: &[u8]) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO integrations (provider, enabled, settings, updated_at)
             VALUES (?1, 0, ?2, ?3)
             ON CONFLICT(provider) DO UPDATE SET settings = excluded.settings,
                                                 updated_at = excluded.updated_at",
            params![provider, sealed, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_integration_enabled(&self, provider: &str, enabled: bool) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO integrations (provider, enabled, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(provider) DO UPDATE SET enabled = excluded.enabled,
                                                 updated_at = excluded.updated_at",
            params![provider, enabled, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a completed run. `last_sync_at` takes the run's start time, so
    /// it never claims records that changed while the run was in flight.
    pub fn record_integration_sync(
        &self,
        provider: &str,
        status: &str,
        started_at: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO integrations (provider, enabled, last_sync_at, last_sync_status, updated_at)
             VALUES (?1, 0, ?2, ?3, ?4)
             ON CONFLICT(provider) DO UPDATE SET last_sync_at = excluded.last_sync_at,
                                                 last_sync_status = excluded.last_sync_status",
            params![provider, started_at, status, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Flag the latest run as failed. `last_sync_at` keeps the last
    /// completed run's start time.
    pub fn record_integration_failure(&self, provider: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO integrations (provider, enabled, last_sync_status, updated_at)
             VALUES (?1, 0, 'failed', ?2)
             ON CONFLICT(provider) DO UPDATE SET last_sync_status = 'failed'",
            params![provider, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn map_integration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbIntegration> {
        Ok(DbIntegration {
            provider: row.get(0)?,
            enabled: row.get(1)?,
            settings: row.get(2)?,
            last_sync_at: row.get(3)?,
            last_sync_status: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}
