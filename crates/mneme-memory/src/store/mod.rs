//! Durable record store backed by SQLite.
//!
//! The `memories` table is the source of truth for the corpus. Everything
//! held in memory (the ordered mirror, the vector index) is rebuilt from it.

mod record_ops;

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Schema version recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Record Store
// ─────────────────────────────────────────────────────────────────────────────

/// Memory records in a single SQLite file (WAL mode).
pub struct RecordStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl RecordStore {
    /// Open or create a record store at the given path.
    ///
    /// Creates parent directories and the schema as needed. `busy_timeout`
    /// bounds how long a statement waits on a locked database before failing.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;

        info!(path = %path.display(), "Record store opened");
        Ok(store)
    }

    /// Private in-memory database. Nothing survives the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize()?;

        debug!("In-memory record store created");
        Ok(store)
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply pragmas and bring the schema up to date.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        // In-memory databases report "memory" and ignore the request
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        create_schema(&conn)
    }
}

/// Create or migrate the database schema.
fn create_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version >= SCHEMA_VERSION {
        debug!("Schema up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Migrating schema from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    // Columns stay nullable so databases written by earlier tooling open as-is
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            tags TEXT,
            created_at TEXT,
            embedding_b64 TEXT,
            embedding_model TEXT
        );

        -- Corpus order
        CREATE INDEX IF NOT EXISTS idx_memories_created_at
            ON memories(created_at);
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    info!("Schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl RecordStore {
    /// Run `f` inside one transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls everything back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Dropping an uncommitted transaction rolls it back
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Write a consistent copy of the database to `target`.
    ///
    /// Runs outside any mutation transaction. `target` must not exist.
    pub fn backup_to(&self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref();
        let conn = self.conn.lock();
        conn.execute("VACUUM INTO ?1", [target.to_string_lossy().as_ref()])?;
        info!(path = %target.display(), "Database backed up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_dirs_and_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memories.sqlite");

        let store = RecordStore::open(&path, Duration::from_secs(5)).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("m.sqlite"), Duration::from_secs(5)).unwrap();
        let mode: String = store
            .conn
            .lock()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_schema_version_set() {
        let store = RecordStore::open_in_memory().unwrap();
        let version: i32 = store
            .conn
            .lock()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.sqlite");
        drop(RecordStore::open(&path, Duration::from_secs(5)).unwrap());
        let store = RecordStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = RecordStore::open_in_memory().unwrap();
        let result: Result<()> = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO memories (id, text) VALUES ('a', 'x')",
                [],
            )?;
            Err(crate::MemoryError::InvalidData("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_backup_to() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("m.sqlite"), Duration::from_secs(5)).unwrap();
        store
            .with_transaction(|conn| {
                conn.execute("INSERT INTO memories (id, text) VALUES ('a', 'x')", [])?;
                Ok(())
            })
            .unwrap();

        let backup = dir.path().join("m.sqlite.bak");
        store.backup_to(&backup).unwrap();

        let copy = RecordStore::open(&backup, Duration::from_secs(5)).unwrap();
        assert_eq!(copy.count().unwrap(), 1);
    }
}
