use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use crate::db::migration_runner::MigrationRunner;
use crate::error::{AppError, AppResult};

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL lets readers proceed while an import transaction is writing
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::prepare(conn, Some(db_path))
    }

    /// Fresh, fully migrated database that lives only as long as the value.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn, None)
    }

    /// Runs `f` with the connection locked, on the blocking thread pool so
    /// SQLite work never stalls the async workers.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            // A panic mid-request rolls its transaction back while unwinding,
            // so the connection is still consistent
            let conn = db.conn.lock().unwrap_or_else(|poisoned| {
                log::warn!("Recovering database connection after a panicked request");
                PoisonError::into_inner(poisoned)
            });
            f(&conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("database task failed: {}", e)))?
    }

    fn prepare(conn: Connection, db_path: Option<&Path>) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let runner = MigrationRunner::new();

        log::info!("=== Starting database migration check ===");

        let current_version = runner.get_current_version(&conn)?;
        log::info!("Current schema version: {:?}", current_version);

        let applied = runner.run_pending_migrations(&conn, db_path)?;

        if applied > 0 {
            log::info!("Applied {} migrations successfully", applied);
        } else {
            log::info!("Database schema is up to date");
        }

        runner.verify_migrations(&conn)?;

        if let Some(version) = runner.get_current_version(&conn)? {
            log::info!("Final schema version: {}", version);
        }

        log::info!("=== Migration check complete ===");

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}
