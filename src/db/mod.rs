//! SQLite store for integrations, sync jobs, business entities and the
//! records imported from providers.
//!
//! The database lives at `~/.opsdash/opsdash.db` unless the config names
//! another path. One connection is shared by the sync engine, adapters and the
//! entity resolver through [`SharedDb`]; callers hold the lock only inside
//! synchronous sections, never across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

pub mod audit_log;
pub mod entities;
pub mod integrations;
pub mod records;
pub mod sync_jobs;
pub mod types;
pub use types::*;

/// Store handle shared across tasks.
pub type SharedDb = Arc<Mutex<OpsDb>>;

pub struct OpsDb {
    conn: Connection,
}

impl OpsDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Sqlite(e)));
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default location and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::default_path()?)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps status polls readable while a pipeline writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Wrap this store for sharing between the engine, adapters and services.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    /// Resolve the default database path: `~/.opsdash/opsdash.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".opsdash").join("opsdash.db"))
    }

    /// Path of the main database file, if the connection is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.conn.path().map(Path::new).filter(|p| !p.as_os_str().is_empty())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_db;
    use super::*;

    #[test]
    fn test_open_applies_schema_and_foreign_keys() {
        let db = test_db();
        let fk: i64 = db
            .conn_ref()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert!(db.path().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO clients (id, name, source, created_at, updated_at)
                 VALUES ('c1', 'Acme', 'hubspot', '2025-01-01', '2025-01-01')",
                [],
            )?;
            Err(DbError::Migration("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "insert inside a failed transaction must not persist");
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        let inserted: Result<usize, DbError> = db.with_transaction(|tx| {
            Ok(tx.conn_ref().execute(
                "INSERT INTO clients (id, name, source, created_at, updated_at)
                 VALUES ('c1', 'Acme', 'hubspot', '2025-01-01', '2025-01-01')",
                [],
            )?)
        });
        assert_eq!(inserted.unwrap(), 1);
    }
}
