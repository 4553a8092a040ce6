use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

// Goes through `log` in builds, straight to stderr under test
macro_rules! migration_log {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(not(test))]
        log::$level!($($arg)*);
        #[cfg(test)]
        eprintln!("[{}] {}", stringify!($level), format!($($arg)*));
    }};
}

const SNAPSHOT_DIR: &str = "backups";
const SNAPSHOT_PREFIX: &str = "schema-";
const SNAPSHOTS_KEPT: usize = 5;

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub fn new(version: u32, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }

    /// Hex SHA-256 of the script, recorded when the step is applied
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }
}

/// Ordered schema history for the journal database
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self {
            migrations: vec![
                Migration::new(0, "bootstrap", include_str!("migrations/000_bootstrap.sql")),
                Migration::new(
                    1,
                    "initial_schema",
                    include_str!("migrations/001_initial_schema.sql"),
                ),
                Migration::new(
                    2,
                    "add_users_and_payments",
                    include_str!("migrations/002_add_users_and_payments.sql"),
                ),
                Migration::new(3, "add_indexes", include_str!("migrations/003_add_indexes.sql")),
            ],
        }
    }

    /// Bring the schema up to date and return how many steps ran.
    ///
    /// A file database that already has a schema is snapshotted first.
    /// Each step commits on its own; the first failure stops the run.
    pub fn run_pending_migrations(&self, conn: &Connection, db_path: &str) -> Result<usize> {
        let current = self.get_current_version(conn)?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| current.is_none_or(|v| m.version > v))
            .collect();

        let Some(target) = pending.last().map(|m| m.version) else {
            return Ok(0);
        };
        migration_log!(info, "{} schema steps pending, target version {}", pending.len(), target);

        let snapshot = match current {
            Some(_) if db_path != ":memory:" => Some(snapshot_database(conn, db_path, target)?),
            _ => None,
        };

        for (done, migration) in pending.iter().enumerate() {
            if let Err(e) = self.apply_migration(conn, migration) {
                migration_log!(
                    error,
                    "Schema step {} ({}) failed after {} succeeded: {}",
                    migration.version,
                    migration.name,
                    done,
                    e
                );
                if let Some(path) = &snapshot {
                    migration_log!(error, "Pre-upgrade copy kept at {}", path.display());
                }
                return Err(e);
            }
        }

        Ok(pending.len())
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<()> {
        let started = Instant::now();
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        tx.execute(
            "INSERT INTO schema_migrations
                 (version, name, applied_at, checksum, execution_time_ms, notes)
             VALUES (?, ?, ?, ?, ?, NULL)",
            params![
                migration.version,
                migration.name,
                chrono::Utc::now().timestamp(),
                migration.checksum(),
                elapsed_ms
            ],
        )?;
        tx.commit()?;

        migration_log!(
            info,
            "Schema v{} {} applied in {}ms",
            migration.version,
            migration.name,
            elapsed_ms
        );
        Ok(())
    }

    /// Fails when an applied step's script no longer matches its recorded hash
    pub fn verify_migrations(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT version, checksum FROM schema_migrations
             WHERE checksum IS NOT NULL ORDER BY version",
        )?;
        let recorded = stmt
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>>>()?;

        let edited = recorded.iter().find(|(version, checksum)| {
            self.migrations
                .iter()
                .find(|m| m.version == *version)
                .is_some_and(|m| m.checksum() != *checksum)
        });
        if let Some((version, _)) = edited {
            migration_log!(
                error,
                "Schema step {} was edited after it was applied; restore the script or a backup",
                version
            );
            return Err(rusqlite::Error::InvalidQuery);
        }
        Ok(())
    }

    /// Highest applied version, `None` before the bootstrap step
    pub fn get_current_version(&self, conn: &Connection) -> Result<Option<u32>> {
        let tracked: bool = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'
             )",
            [],
            |row| row.get(0),
        )?;
        if !tracked {
            return Ok(None);
        }

        let version = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get::<_, Option<u32>>(0)
            })
            .optional()?
            .flatten();
        Ok(version)
    }
}

/// Copy the live database next to itself before upgrading it to `target`
fn snapshot_database(conn: &Connection, db_path: &str, target: u32) -> Result<PathBuf> {
    let db_path = Path::new(db_path);
    let dir = db_path
        .parent()
        .ok_or_else(|| rusqlite::Error::InvalidPath(db_path.to_path_buf()))?
        .join(SNAPSHOT_DIR);
    fs::create_dir_all(&dir)
        .map_err(|e| io_failure(format!("Cannot create {}: {}", dir.display(), e)))?;

    // Zero-padded timestamp so names sort oldest first
    let path = dir.join(format!(
        "{}{:012}-v{}.db",
        SNAPSHOT_PREFIX,
        chrono::Utc::now().timestamp(),
        target
    ));
    conn.backup(DatabaseName::Main, &path, None)?;
    migration_log!(info, "Snapshot before upgrade: {}", path.display());

    prune_snapshots(&dir);
    Ok(path)
}

/// Drop all but the newest few snapshots; failures only warn
fn prune_snapshots(dir: &Path) {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .filter(|name| name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".db"))
            .collect(),
        Err(e) => {
            migration_log!(warn, "Cannot list {}: {}", dir.display(), e);
            return;
        }
    };
    names.sort();

    let excess = names.len().saturating_sub(SNAPSHOTS_KEPT);
    for name in &names[..excess] {
        if let Err(e) = fs::remove_file(dir.join(name)) {
            migration_log!(warn, "Cannot remove old snapshot {}: {}", name, e);
        }
    }
}

fn io_failure(message: String) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some(message))
}
