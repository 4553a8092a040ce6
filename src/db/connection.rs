use rusqlite::{Connection, Result};
use std::sync::Mutex;

use crate::db::migration_runner::MigrationRunner;

/// Single shared connection, serialized behind a mutex
pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn, db_path)
    }

    /// Private database, used by tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?, ":memory:")
    }

    fn prepare(conn: Connection, db_path: &str) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let runner = MigrationRunner::new();
        let applied = runner.run_pending_migrations(&conn, db_path)?;
        runner.verify_migrations(&conn)?;

        let version = runner.get_current_version(&conn)?;
        if applied > 0 {
            log::info!("Journal schema upgraded to {:?} ({} steps)", version, applied);
        } else {
            log::debug!("Journal schema current at {:?}", version);
        }

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}
