use log::{error, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::error::FundPulseError;
use crate::schema::{CREATE_SCHEMA_SQL, CURRENT_SCHEMA_VERSION};

const DB_FILENAME: &str = "fundpulse.db";
const POOL_SIZE: u32 = 8;

/// Handle to the SQLite database. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating if needed) fundpulse.db inside `db_folder`
    pub fn connect(db_folder: &Path) -> Result<Self, FundPulseError> {
        if !db_folder.exists() {
            std::fs::create_dir_all(db_folder)?;
        }

        if !db_folder.is_dir() {
            return Err(FundPulseError::Error(format!(
                "Database folder '{}' is not a directory",
                db_folder.display()
            )));
        }

        let db_path = db_folder.join(DB_FILENAME);

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;
        let db = Self { pool };

        db.ensure_schema()?;
        info!("Database opened at: {}", db_path.display());

        Ok(db)
    }

    pub fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, FundPulseError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), FundPulseError> {
        let conn = self.conn()?;

        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !table_exists {
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
            return Ok(());
        }

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(CURRENT_SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(FundPulseError::Error(format!(
                "Schema version mismatch: database is at {}, expected {}",
                other, CURRENT_SCHEMA_VERSION
            ))),
            None => Err(FundPulseError::Error("Schema version missing".to_string())),
        }
    }

    /// Run `f` inside BEGIN IMMEDIATE. Commits on Ok, rolls back on Err.
    ///
    /// IMMEDIATE takes the write lock up front so two writers never both
    /// read-then-write against a stale view.
    pub fn immediate_transaction<T, F>(conn: &Connection, f: F) -> Result<T, FundPulseError>
    where
        F: FnOnce(&Connection) -> Result<T, FundPulseError>,
    {
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = f(conn).and_then(|value| {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        if result.is_err() && !conn.is_autocommit() {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                error!("Rollback failed: {}", rollback_err);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_connect_creates_schema() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(dir.path()).unwrap();
        let conn = db.conn().unwrap();

        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_reconnect_keeps_data() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::connect(dir.path()).unwrap();
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO campaigns (url, created_at, updated_at) VALUES ('https://x/f/a', 1, 1)",
                    [],
                )
                .unwrap();
        }
        let db = Database::connect(dir.path()).unwrap();
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM campaigns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_version_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::connect(dir.path()).unwrap();
            db.conn()
                .unwrap()
                .execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])
                .unwrap();
        }
        assert!(Database::connect(dir.path()).is_err());
    }

    #[test]
    fn test_immediate_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(dir.path()).unwrap();
        let conn = db.conn().unwrap();

        let result: Result<(), FundPulseError> = Database::immediate_transaction(&conn, |c| {
            c.execute(
                "INSERT INTO campaigns (url, created_at, updated_at) VALUES ('https://x/f/a', 1, 1)",
                [],
            )?;
            Err(FundPulseError::Error("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(conn.is_autocommit());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM campaigns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
