//! Record CRUD operations.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::codec::{decode_vector, encode_vector, format_timestamp, parse_timestamp};
use crate::error::Result;
use crate::types::MemoryEntry;

use super::RecordStore;

const SELECT_COLUMNS: &str =
    "SELECT id, text, tags, created_at, embedding_b64, embedding_model FROM memories";

impl RecordStore {
    /// Insert a record, replacing any row with the same id.
    pub fn upsert(&self, entry: &MemoryEntry) -> Result<()> {
        let conn = self.conn.lock();
        insert_row(&conn, entry)?;
        debug!(id = %entry.id, "Upserted memory");
        Ok(())
    }

    /// Delete a record by id. Returns whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.with_transaction(|conn| {
            let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    /// Delete records whose text contains `substring` (case-insensitive).
    ///
    /// Candidates are taken oldest first and capped at `limit`. Selection and
    /// deletion run in one transaction. Returns the removed ids.
    pub fn delete_matching(&self, substring: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let needle = substring.to_lowercase();
        self.with_transaction(|conn| {
            let mut stmt = conn.prepare("SELECT id, text, created_at FROM memories")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut candidates = Vec::new();
            for (id, text, created_at) in rows {
                if text
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
                {
                    candidates.push((created_at_or_epoch(created_at.as_deref())?, id));
                }
            }
            candidates.sort();

            let ids: Vec<String> = candidates
                .into_iter()
                .map(|(_, id)| id)
                .take(limit.unwrap_or(usize::MAX))
                .collect();

            delete_ids(conn, &ids)?;
            Ok(ids)
        })
    }

    /// Delete every record. Returns the prior count.
    pub fn delete_all(&self) -> Result<usize> {
        self.with_transaction(|conn| Ok(conn.execute("DELETE FROM memories", [])?))
    }

    /// All records ordered by `created_at`, then `id`.
    ///
    /// Sorted after parsing: stored timestamps may carry any UTC offset, so
    /// their text order is not chronological.
    pub fn scan(&self) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(SELECT_COLUMNS)?;
        let mut rows = stmt.query([])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(entries)
    }

    /// Number of records.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Rewrite vectors and provenance for a batch in one transaction.
    ///
    /// Returns the number of rows updated; ids that no longer exist are skipped.
    pub fn update_embeddings(&self, updates: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
        self.with_transaction(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE memories SET embedding_b64 = ?1, embedding_model = ?2 WHERE id = ?3",
            )?;
            let mut updated = 0;
            for (id, vector) in updates {
                updated += stmt.execute(params![encode_vector(vector), model, id])?;
            }
            Ok(updated)
        })
    }

    /// Remove `removed_ids` and insert `summary`, atomically.
    ///
    /// Returns the number of rows removed.
    pub fn replace_with_summary(&self, removed_ids: &[String], summary: &MemoryEntry) -> Result<usize> {
        self.with_transaction(|conn| {
            let removed = delete_ids(conn, removed_ids)?;
            insert_row(conn, summary)?;
            Ok(removed)
        })
    }
}

fn insert_row(conn: &Connection, entry: &MemoryEntry) -> Result<()> {
    let tags_json = serde_json::to_string(&entry.tags)?;
    conn.execute(
        r#"
        INSERT OR REPLACE INTO memories (id, text, tags, created_at, embedding_b64, embedding_model)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            entry.id,
            entry.text,
            tags_json,
            format_timestamp(&entry.created_at),
            encode_vector(&entry.embedding),
            entry.embedding_model,
        ],
    )?;
    Ok(())
}

fn delete_ids(conn: &Connection, ids: &[String]) -> Result<usize> {
    let mut stmt = conn.prepare("DELETE FROM memories WHERE id = ?1")?;
    let mut removed = 0;
    for id in ids {
        removed += stmt.execute(params![id])?;
    }
    Ok(removed)
}

/// Convert a row to an entry. Null columns from older databases map to
/// empty tags, the epoch, an empty vector and an empty provenance tag.
fn row_to_entry(row: &rusqlite::Row) -> Result<MemoryEntry> {
    let id: String = row.get(0)?;
    let text: String = row.get(1)?;
    let tags_json: Option<String> = row.get(2)?;
    let created_at_str: Option<String> = row.get(3)?;
    let embedding_b64: Option<String> = row.get(4)?;
    let embedding_model: Option<String> = row.get(5)?;

    let tags = match tags_json.as_deref() {
        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
        _ => Vec::new(),
    };
    let created_at = created_at_or_epoch(created_at_str.as_deref())?;
    let embedding = match embedding_b64.as_deref() {
        Some(b64) => decode_vector(b64)?,
        None => Vec::new(),
    };

    Ok(MemoryEntry {
        id,
        text,
        tags,
        created_at,
        embedding,
        embedding_model: embedding_model.unwrap_or_default(),
    })
}

fn created_at_or_epoch(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(s) => parse_timestamp(s),
        None => Ok(DateTime::<Utc>::UNIX_EPOCH),
    }
}
