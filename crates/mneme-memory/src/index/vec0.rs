//! Accelerated index backed by a sqlite-vec `vec0` virtual table.
//!
//! The table lives in its own SQLite file next to the record database, or in
//! memory when no artifact path is configured. Rows are keyed by mirror slot,
//! so entries without an embedding leave a gap instead of shifting later
//! slots.

use std::path::{Path, PathBuf};
use std::sync::Once;

use mneme_embed::dot;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::error::{MemoryError, Result};

use super::{ScoredSlot, SimilarityIndex, rank};

/// Largest `k` a vec0 KNN query accepts.
const KNN_MAX: usize = 4096;

static VECTOR_EXTENSION: Once = Once::new();

// ─────────────────────────────────────────────────────────────────────────────
// Extension & Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Register sqlite-vec for every connection opened afterwards.
fn init_vector_extension() {
    VECTOR_EXTENSION.call_once(|| {
        use rusqlite::ffi::sqlite3_auto_extension;
        use sqlite_vec::sqlite3_vec_init;

        // SAFETY: sqlite3_vec_init is a SQLite extension entry point
        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }
    });
}

/// sqlite-vec version on `conn`. Fails when the extension is not loaded.
fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// (Re)create the embeddings table for `dims`-wide rows.
fn create_vector_table(conn: &Connection, dims: usize) -> Result<()> {
    let sql = format!(
        r#"
        DROP TABLE IF EXISTS memory_embeddings;
        DROP TABLE IF EXISTS index_info;

        CREATE VIRTUAL TABLE memory_embeddings USING vec0(
            slot integer primary key,
            embedding float[{dims}]
        );

        CREATE TABLE index_info (dimensions INTEGER NOT NULL);
        INSERT INTO index_info (dimensions) VALUES ({dims});
        "#
    );
    conn.execute_batch(&sql)?;

    debug!(dims, "Created memory_embeddings table");
    Ok(())
}

/// Open a connection that can (re)write the table.
///
/// An unreadable artifact file is deleted and recreated.
fn open_writable(artifact: Option<&Path>) -> Result<Connection> {
    init_vector_extension();

    let Some(path) = artifact else {
        let conn = Connection::open_in_memory()?;
        check_vector_extension(&conn)?;
        return Ok(conn);
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    match open_checked(path) {
        Ok(conn) => Ok(conn),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Index artifact unusable, recreating");
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
            open_checked(path)
        }
    }
}

fn open_checked(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    check_vector_extension(&conn)?;
    // Fails on a file that is not a database
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

fn insert_embedding(conn: &Connection, slot: usize, embedding: &[f32]) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_embeddings (slot, embedding) VALUES (?1, ?2)",
        params![slot as i64, embedding.as_bytes()],
    )?;
    Ok(())
}

fn count_embeddings(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

/// `(slot, vector)` candidates nearest to `query`, at most `limit`.
fn search_similar(
    conn: &Connection,
    query: &[f32],
    limit: usize,
) -> Result<Vec<(usize, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT slot, embedding
        FROM memory_embeddings
        WHERE embedding MATCH ?1
        ORDER BY distance
        LIMIT ?2
        "#,
    )?;
    let rows = stmt.query(params![query.as_bytes(), limit as i64])?;
    collect_rows(rows)
}

/// Every `(slot, vector)` row.
fn scan_embeddings(conn: &Connection) -> Result<Vec<(usize, Vec<f32>)>> {
    let mut stmt = conn.prepare("SELECT slot, embedding FROM memory_embeddings")?;
    let rows = stmt.query([])?;
    collect_rows(rows)
}

fn collect_rows(mut rows: rusqlite::Rows<'_>) -> Result<Vec<(usize, Vec<f32>)>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let slot: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        let vector = blob
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        out.push((slot as usize, vector));
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

/// Nearest-neighbour index over a `vec0` table.
///
/// The dimension is fixed when the table is created: at build time, or by
/// the first non-empty row added to a pending index.
#[derive(Debug)]
pub struct Vec0Index {
    conn: Option<Connection>,
    artifact: Option<PathBuf>,
    dim: Option<usize>,
    /// Rows stored in the table.
    rows: usize,
    /// Mirror positions covered, including rows with no embedding.
    slots: usize,
}

impl Vec0Index {
    /// An index with no table yet. The first `slots` positions hold no
    /// embedding; the table is created by the first non-empty `add`.
    pub fn pending(artifact: Option<PathBuf>, slots: usize) -> Self {
        Self {
            conn: None,
            artifact,
            dim: None,
            rows: 0,
            slots,
        }
    }

    /// Build from `vectors` in mirror order, replacing any existing table.
    ///
    /// Empty vectors are skipped; every other row must have dimension `dim`.
    pub fn build(artifact: Option<PathBuf>, dim: usize, vectors: &[&[f32]]) -> Result<Self> {
        let mut conn = open_writable(artifact.as_deref())?;
        create_vector_table(&conn, dim)?;

        let tx = conn.transaction()?;
        let mut rows = 0;
        for (slot, vector) in vectors.iter().enumerate() {
            if vector.is_empty() {
                continue;
            }
            if vector.len() != dim {
                return Err(MemoryError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            insert_embedding(&tx, slot, vector)?;
            rows += 1;
        }
        tx.commit()?;

        Ok(Self {
            conn: Some(conn),
            artifact,
            dim: Some(dim),
            rows,
            slots: vectors.len(),
        })
    }

    /// Open an existing artifact covering `slots` mirror positions.
    ///
    /// The file is not modified. Fails if it is not a valid index or holds
    /// slots beyond the mirror.
    pub fn load(path: &Path, slots: usize) -> Result<Self> {
        init_vector_extension();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let version = check_vector_extension(&conn)?;

        let dim: i64 = conn.query_row("SELECT dimensions FROM index_info", [], |row| row.get(0))?;
        if dim <= 0 {
            return Err(MemoryError::InvalidData(format!(
                "Index artifact has dimension {}",
                dim
            )));
        }
        let rows = count_embeddings(&conn)?;
        let max_slot: Option<i64> =
            conn.query_row("SELECT MAX(slot) FROM memory_embeddings", [], |row| row.get(0))?;
        if max_slot.is_some_and(|s| s < 0 || s as usize >= slots) {
            return Err(MemoryError::InvalidData(format!(
                "Index artifact slot {:?} outside {} entries",
                max_slot, slots
            )));
        }

        info!(path = %path.display(), rows, dim, sqlite_vec = %version, "Opened index artifact");
        Ok(Self {
            conn: Some(conn),
            artifact: Some(path.to_path_buf()),
            dim: Some(dim as usize),
            rows,
            slots,
        })
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| MemoryError::InvalidData("Index table not created".to_string()))
    }
}

impl SimilarityIndex for Vec0Index {
    fn add(&mut self, vector: &[f32]) -> Result<()> {
        let slot = self.slots;
        if vector.is_empty() {
            self.slots += 1;
            return Ok(());
        }

        match self.dim {
            Some(dim) if dim != vector.len() => {
                return Err(MemoryError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => {
                let conn = open_writable(self.artifact.as_deref())?;
                create_vector_table(&conn, vector.len())?;
                self.conn = Some(conn);
                self.dim = Some(vector.len());
            }
        }

        insert_embedding(self.connection()?, slot, vector)?;
        self.rows += 1;
        self.slots += 1;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredSlot>> {
        let (Some(conn), Some(dim)) = (self.conn.as_ref(), self.dim) else {
            return Ok(Vec::new());
        };
        if k == 0 || query.len() != dim || self.rows == 0 {
            return Ok(Vec::new());
        }

        let candidates = if k >= self.rows || k > KNN_MAX {
            scan_embeddings(conn)?
        } else {
            search_similar(conn, query, k)?
        };

        // Rescore exactly so ranking matches the brute-force variant
        let mut scored: Vec<ScoredSlot> = candidates
            .into_iter()
            .filter_map(|(slot, row)| dot(&row, query).map(|score| ScoredSlot { slot, score }))
            .collect();
        scored.sort_unstable_by(rank);
        scored.truncate(k);
        Ok(scored)
    }

    fn size(&self) -> usize {
        self.rows
    }

    fn dimensions(&self) -> Option<usize> {
        self.dim
    }
}
